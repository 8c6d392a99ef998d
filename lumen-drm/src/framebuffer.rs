//! The framebuffer record and its origin factories.
//!
//! A [`ScanoutFramebuffer`] is a cheaply clonable handle over a shared
//! record; the last handle to drop tears the underlying resources down
//! exactly once, in origin-specific order. Factories cover the four ways a
//! framebuffer comes into existence: dumb allocation, wrapping a driver
//! buffer object (surface front buffer, imported client buffer, cursor),
//! and dmabuf import.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::device::{DumbMapping, FramebufferRequest, KmsDevice};
use crate::driver::{
    ClientBuffer, DestroyListener, DmabufAttributes, DriverBuffer, DriverDevice, ReleaseNotifier,
    ScanoutSurface, MAX_PLANES, MODIFIER_INVALID,
};
use crate::error::ScanoutError;
use crate::format::{self, FormatInfo};
use crate::registration;
use crate::registry::{FramebufferRegistry, RegistryShared};

/// How a framebuffer came into existence. Determines its teardown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    /// CPU-accessible dumb allocation owned by this record.
    Dumb,
    /// Front buffer locked from a driver rendering surface.
    Surface,
    /// Client buffer imported through the driver.
    Client,
    /// Cursor buffer imported through the driver.
    Cursor,
    /// Externally exported buffer imported from dmabuf descriptors.
    Dmabuf,
}

enum Origin {
    Dumb {
        handle: u32,
        mapping: RefCell<Option<DumbMapping>>,
    },
    Surface {
        bo: Box<dyn DriverBuffer>,
        surface: Rc<dyn ScanoutSurface>,
    },
    Client {
        bo: Box<dyn DriverBuffer>,
    },
    Cursor {
        bo: Box<dyn DriverBuffer>,
    },
    Dmabuf {
        bo: Box<dyn DriverBuffer>,
    },
    /// Placeholder left behind during teardown. Observing it outside of
    /// `Drop` is a programming error.
    Retired,
}

impl Origin {
    fn kind(&self) -> OriginKind {
        match self {
            Origin::Dumb { .. } => OriginKind::Dumb,
            Origin::Surface { .. } => OriginKind::Surface,
            Origin::Client { .. } => OriginKind::Client,
            Origin::Cursor { .. } => OriginKind::Cursor,
            Origin::Dmabuf { .. } => OriginKind::Dmabuf,
            Origin::Retired => unreachable!("framebuffer origin observed after retirement"),
        }
    }
}

pub(crate) struct FramebufferRecord {
    device: Rc<dyn KmsDevice>,
    /// Kernel framebuffer id; 0 iff unregistered. Shared with the driver
    /// destroy listener so exactly one side performs the removal.
    fb_id: Rc<Cell<u32>>,
    width: u32,
    height: u32,
    format: &'static FormatInfo,
    modifier: u64,
    plane_count: usize,
    handles: [u32; MAX_PLANES],
    strides: [u32; MAX_PLANES],
    offsets: [u32; MAX_PLANES],
    /// Whether modifier-aware registration was available when this record
    /// was built; reused verbatim on resume.
    modifier_capable: bool,
    origin: Origin,
    suspend_safe: Cell<bool>,
    on_destroy: RefCell<Option<Box<dyn FnOnce()>>>,
    client_buffer: RefCell<Option<Rc<dyn ClientBuffer>>>,
    release_notifier: RefCell<Option<Rc<dyn ReleaseNotifier>>>,
    registry: RefCell<Option<Weak<RegistryShared>>>,
}

impl FramebufferRecord {
    pub(crate) fn fb_id_cell(&self) -> &Cell<u32> {
        &self.fb_id
    }

    pub(crate) fn device(&self) -> &dyn KmsDevice {
        self.device.as_ref()
    }

    pub(crate) fn format(&self) -> &'static FormatInfo {
        self.format
    }

    pub(crate) fn modifier(&self) -> u64 {
        self.modifier
    }

    pub(crate) fn modifier_capable(&self) -> bool {
        self.modifier_capable
    }

    pub(crate) fn is_suspend_safe(&self) -> bool {
        self.suspend_safe.get()
    }

    /// Rebuilds the registration request, e.g. for resume.
    pub(crate) fn request(&self) -> FramebufferRequest {
        FramebufferRequest {
            width: self.width,
            height: self.height,
            fourcc: self.format.fourcc,
            plane_count: self.plane_count,
            handles: self.handles,
            strides: self.strides,
            offsets: self.offsets,
        }
    }

    /// Identity of the driver surface backing this record, when
    /// surface-backed. Compares by data pointer.
    pub(crate) fn surface_data_ptr(&self) -> Option<*const ()> {
        match &self.origin {
            Origin::Surface { surface, .. } => Some(Rc::as_ptr(surface) as *const ()),
            _ => None,
        }
    }

    pub(crate) fn link_registry(&self, shared: &Rc<RegistryShared>) {
        *self.registry.borrow_mut() = Some(Rc::downgrade(shared));
    }

    pub(crate) fn unlink_registry(&self) {
        self.registry.borrow_mut().take();
    }

    fn store_mapping(&self, mapping: DumbMapping) {
        match &self.origin {
            Origin::Dumb { mapping: slot, .. } => {
                *slot.borrow_mut() = Some(mapping);
            }
            _ => unreachable!("mapping stored on a non-dumb framebuffer"),
        }
    }

    fn attach_client(
        &self,
        buffer: Rc<dyn ClientBuffer>,
        notifier: Option<Rc<dyn ReleaseNotifier>>,
    ) {
        *self.client_buffer.borrow_mut() = Some(buffer);
        *self.release_notifier.borrow_mut() = notifier;
    }

    /// Idempotent removal from the owning registry.
    fn forget_self(&self) {
        if let Some(weak) = self.registry.borrow_mut().take() {
            if let Some(shared) = weak.upgrade() {
                shared.forget_ptr(self as *const FramebufferRecord);
            }
        }
    }
}

impl Drop for FramebufferRecord {
    fn drop(&mut self) {
        let hook = self.on_destroy.borrow_mut().take();
        self.forget_self();

        match mem::replace(&mut self.origin, Origin::Retired) {
            Origin::Dumb { handle, mapping } => {
                drop(mapping.into_inner());
                if let Err(e) = self.device.destroy_dumb(handle) {
                    warn!(handle, error = %e, "failed to destroy dumb buffer");
                }
                registration::deregister(self.device.as_ref(), &self.fb_id);
            }
            Origin::Surface { bo, surface } => {
                // The surface keeps the driver object alive; the removal of
                // the kernel registration rides on the destroy listener the
                // object carries.
                surface.release_buffer(bo);
            }
            Origin::Client { bo } | Origin::Cursor { bo } | Origin::Dmabuf { bo } => {
                // Destroying the driver object fires any attached destroy
                // listener first; the explicit deregister below covers
                // objects without one and is a no-op otherwise.
                drop(bo);
                registration::deregister(self.device.as_ref(), &self.fb_id);
            }
            Origin::Retired => unreachable!("framebuffer record torn down twice"),
        }

        if let Some(notifier) = self.release_notifier.borrow_mut().take() {
            notifier.notify();
        }
        self.client_buffer.borrow_mut().take();

        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Shared-ownership handle to a registered scanout framebuffer.
///
/// Cloning is reference-counted; dropping the last clone releases the
/// kernel registration and the backing resources.
#[derive(Clone)]
pub struct ScanoutFramebuffer {
    record: Rc<FramebufferRecord>,
}

impl fmt::Debug for ScanoutFramebuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanoutFramebuffer")
            .field("fb_id", &self.id())
            .field("size", &format_args!("{}x{}", self.width(), self.height()))
            .field("format", &self.format().name)
            .field("origin", &self.origin())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl ScanoutFramebuffer {
    /// Kernel framebuffer id; 0 iff currently unregistered (e.g. while
    /// suspended).
    pub fn id(&self) -> u32 {
        self.record.fb_id.get()
    }

    pub fn is_registered(&self) -> bool {
        self.id() != 0
    }

    pub fn width(&self) -> u32 {
        self.record.width
    }

    pub fn height(&self) -> u32 {
        self.record.height
    }

    pub fn format(&self) -> &'static FormatInfo {
        self.record.format
    }

    pub fn modifier(&self) -> u64 {
        self.record.modifier
    }

    pub fn plane_count(&self) -> usize {
        self.record.plane_count
    }

    /// Stride of plane 0 in bytes.
    pub fn stride(&self) -> u32 {
        self.record.strides[0]
    }

    pub fn origin(&self) -> OriginKind {
        self.record.origin.kind()
    }

    /// Number of live handles to this framebuffer.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.record)
    }

    /// Marks this framebuffer as surviving suspend untouched (its kernel
    /// registration is not removed on a device switch-away).
    pub fn set_suspend_safe(&self, safe: bool) {
        self.record.suspend_safe.set(safe);
    }

    pub fn is_suspend_safe(&self) -> bool {
        self.record.suspend_safe.get()
    }

    /// Registers a one-shot destroy hook, replacing any previous hook.
    pub fn on_destroy<F>(&self, hook: F)
    where
        F: FnOnce() + 'static,
    {
        *self.record.on_destroy.borrow_mut() = Some(Box::new(hook));
    }

    /// Runs `f` over the writable pixel mapping. `None` unless this is a
    /// mapped dumb framebuffer.
    pub fn with_mapping<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        match &self.record.origin {
            Origin::Dumb { mapping, .. } => {
                mapping.borrow_mut().as_mut().map(|m| f(m.as_mut_slice()))
            }
            _ => None,
        }
    }

    /// Size in bytes of the pixel mapping, for dumb framebuffers.
    pub fn mapped_len(&self) -> Option<usize> {
        match &self.record.origin {
            Origin::Dumb { mapping, .. } => mapping.borrow().as_ref().map(|m| m.len()),
            _ => None,
        }
    }

    pub(crate) fn record(&self) -> &Rc<FramebufferRecord> {
        &self.record
    }

    pub(crate) fn from_record(record: Rc<FramebufferRecord>) -> Self {
        ScanoutFramebuffer { record }
    }

    pub(crate) fn attach_client(
        &self,
        buffer: Rc<dyn ClientBuffer>,
        notifier: Option<Rc<dyn ReleaseNotifier>>,
    ) {
        self.record.attach_client(buffer, notifier);
    }
}

fn check_bounds(device: &dyn KmsDevice, width: u32, height: u32) -> Result<(), ScanoutError> {
    let bounds = device.size_bounds();
    if width == 0 || height == 0 || !bounds.contains(width, height) {
        return Err(ScanoutError::GeometryOutOfBounds {
            width,
            height,
            bounds,
        });
    }
    Ok(())
}

/// Creates, registers, remembers and maps a dumb framebuffer.
///
/// Every failure exit unwinds whatever was already constructed: the dumb
/// allocation is destroyed, any kernel registration removed, the registry
/// entry dropped.
pub(crate) fn create_dumb(
    device: &Rc<dyn KmsDevice>,
    registry: &FramebufferRegistry,
    modifier_capable: bool,
    width: u32,
    height: u32,
    fourcc: u32,
) -> Result<ScanoutFramebuffer, ScanoutError> {
    let info = format::lookup(fourcc)
        .filter(|info| info.legacy_eligible())
        .ok_or(ScanoutError::FormatUnsupported { fourcc })?;
    check_bounds(device.as_ref(), width, height)?;

    let allocation = device
        .create_dumb(width, height, info.bpp)
        .map_err(ScanoutError::DriverImportFailed)?;

    // From here on the record's Drop is the unwind path.
    let record = Rc::new(FramebufferRecord {
        device: device.clone(),
        fb_id: Rc::new(Cell::new(0)),
        width,
        height,
        format: info,
        modifier: MODIFIER_INVALID,
        plane_count: 1,
        handles: [allocation.handle, 0, 0, 0],
        strides: [allocation.pitch, 0, 0, 0],
        offsets: [0; MAX_PLANES],
        modifier_capable,
        origin: Origin::Dumb {
            handle: allocation.handle,
            mapping: RefCell::new(None),
        },
        suspend_safe: Cell::new(false),
        on_destroy: RefCell::new(None),
        client_buffer: RefCell::new(None),
        release_notifier: RefCell::new(None),
        registry: RefCell::new(None),
    });

    let fb_id = registration::register(
        device.as_ref(),
        &record.request(),
        info,
        MODIFIER_INVALID,
        modifier_capable,
    )
    .map_err(ScanoutError::KernelRegistrationFailed)?;
    record.fb_id.set(fb_id);

    registry.remember(&record);

    let mapping = device
        .map_dumb(allocation.handle, allocation.size)
        .map_err(ScanoutError::DriverImportFailed)?;
    record.store_mapping(mapping);

    debug!(fb_id, width, height, format = info.name, "created dumb framebuffer");
    Ok(ScanoutFramebuffer { record })
}

/// Which kind of driver buffer object is being wrapped.
pub enum DriverOrigin {
    /// Front buffer of the given driver surface; released back to it on
    /// teardown.
    Surface(Rc<dyn ScanoutSurface>),
    /// Imported client buffer.
    Client,
    /// Imported cursor buffer.
    Cursor,
}

/// Wraps an existing driver buffer object into a registered framebuffer.
///
/// `opaque` selects the alpha-free equivalent of the buffer's format when
/// one exists. On failure the buffer object is dropped, which either
/// releases it to its surface or destroys the import.
pub(crate) fn from_driver_buffer(
    device: &Rc<dyn KmsDevice>,
    registry: &FramebufferRegistry,
    modifier_capable: bool,
    mut bo: Box<dyn DriverBuffer>,
    origin: DriverOrigin,
    opaque: bool,
) -> Result<ScanoutFramebuffer, ScanoutError> {
    let fourcc = bo.format();
    let mut info =
        format::lookup(fourcc).ok_or(ScanoutError::FormatUnsupported { fourcc })?;
    if opaque {
        info = info.opaque_substitute();
    }

    let width = bo.width();
    let height = bo.height();
    check_bounds(device.as_ref(), width, height)?;

    let mut handles = [0u32; MAX_PLANES];
    let mut strides = [0u32; MAX_PLANES];
    let mut offsets = [0u32; MAX_PLANES];
    let (modifier, plane_count) = match bo.modifier() {
        Some(modifier) => {
            let plane_count = bo.plane_count().clamp(1, MAX_PLANES);
            for plane in 0..plane_count {
                handles[plane] = bo.plane_handle(plane);
                strides[plane] = bo.plane_stride(plane);
                offsets[plane] = bo.plane_offset(plane);
            }
            (modifier, plane_count)
        }
        None => {
            // No plane introspection; describe the buffer the legacy way.
            handles[0] = bo.handle();
            strides[0] = bo.stride();
            (MODIFIER_INVALID, 1)
        }
    };

    let request = FramebufferRequest {
        width,
        height,
        fourcc: info.fourcc,
        plane_count,
        handles,
        strides,
        offsets,
    };

    let fb_id_cell = Rc::new(Cell::new(0u32));
    bo.attach_destroy_listener(DestroyListener::new(device.clone(), fb_id_cell.clone()));

    let fb_id =
        registration::register(device.as_ref(), &request, info, modifier, modifier_capable)
            .map_err(ScanoutError::KernelRegistrationFailed)?;
    fb_id_cell.set(fb_id);

    let origin = match origin {
        DriverOrigin::Surface(surface) => Origin::Surface { bo, surface },
        DriverOrigin::Client => Origin::Client { bo },
        DriverOrigin::Cursor => Origin::Cursor { bo },
    };

    let record = Rc::new(FramebufferRecord {
        device: device.clone(),
        fb_id: fb_id_cell,
        width,
        height,
        format: info,
        modifier,
        plane_count,
        handles,
        strides,
        offsets,
        modifier_capable,
        origin,
        suspend_safe: Cell::new(false),
        on_destroy: RefCell::new(None),
        client_buffer: RefCell::new(None),
        release_notifier: RefCell::new(None),
        registry: RefCell::new(None),
    });
    registry.remember(&record);

    debug!(fb_id, width, height, format = record.format.name, "wrapped driver buffer");
    Ok(ScanoutFramebuffer { record })
}

/// Imports a dmabuf-described buffer and registers it.
///
/// The plane file descriptors are borrowed; the exporter keeps them. The
/// imported driver object is destroyed on every failure path.
pub(crate) fn from_dmabuf(
    device: &Rc<dyn KmsDevice>,
    driver: &Rc<dyn DriverDevice>,
    registry: &FramebufferRegistry,
    modifier_capable: bool,
    attributes: &DmabufAttributes,
    opaque: bool,
) -> Result<ScanoutFramebuffer, ScanoutError> {
    if attributes.flags != 0 {
        return Err(ScanoutError::ImportRejected(format!(
            "dmabuf carries orientation flags {:#x}",
            attributes.flags
        )));
    }
    if attributes.planes.is_empty() || attributes.planes.len() > MAX_PLANES {
        return Err(ScanoutError::ImportRejected(format!(
            "dmabuf has {} planes",
            attributes.planes.len()
        )));
    }

    let modifier = attributes.modifier();
    // The kernel requires one modifier across all planes.
    if attributes.planes.iter().any(|p| p.modifier != modifier) {
        return Err(ScanoutError::ImportRejected(
            "dmabuf planes carry differing modifiers".to_string(),
        ));
    }

    let fourcc = attributes.format;
    let mut info =
        format::lookup(fourcc).ok_or(ScanoutError::FormatUnsupported { fourcc })?;
    if opaque {
        info = info.opaque_substitute();
    }

    let needs_modifier_import = modifier != MODIFIER_INVALID
        || attributes.planes.len() > 1
        || attributes.planes[0].offset > 0;
    if needs_modifier_import && !driver.supports_modifier_import() {
        return Err(ScanoutError::ImportRejected(
            "buffer layout requires modifier-aware import".to_string(),
        ));
    }

    let bo = if needs_modifier_import {
        driver.import_dmabuf_with_modifiers(attributes)
    } else {
        driver.import_dmabuf(attributes)
    }
    .map_err(ScanoutError::DriverImportFailed)?;

    check_bounds(device.as_ref(), attributes.width, attributes.height)?;

    let mut handles = [0u32; MAX_PLANES];
    let mut strides = [0u32; MAX_PLANES];
    let mut offsets = [0u32; MAX_PLANES];
    for (plane, attrs) in attributes.planes.iter().enumerate() {
        handles[plane] = bo.plane_handle(plane);
        strides[plane] = attrs.stride;
        offsets[plane] = attrs.offset;
    }

    let request = FramebufferRequest {
        width: attributes.width,
        height: attributes.height,
        fourcc: info.fourcc,
        plane_count: attributes.planes.len(),
        handles,
        strides,
        offsets,
    };

    let fb_id =
        registration::register(device.as_ref(), &request, info, modifier, modifier_capable)
            .map_err(ScanoutError::KernelRegistrationFailed)?;

    let record = Rc::new(FramebufferRecord {
        device: device.clone(),
        fb_id: Rc::new(Cell::new(fb_id)),
        width: attributes.width,
        height: attributes.height,
        format: info,
        modifier,
        plane_count: attributes.planes.len(),
        handles,
        strides,
        offsets,
        modifier_capable,
        origin: Origin::Dmabuf { bo },
        suspend_safe: Cell::new(false),
        on_destroy: RefCell::new(None),
        client_buffer: RefCell::new(None),
        release_notifier: RefCell::new(None),
        registry: RefCell::new(None),
    });
    registry.remember(&record);

    debug!(
        fb_id,
        width = attributes.width,
        height = attributes.height,
        format = record.format.name,
        modifier,
        "imported dmabuf framebuffer"
    );
    Ok(ScanoutFramebuffer { record })
}
