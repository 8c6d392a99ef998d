//! Test doubles for the kernel and driver seams.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io;
use std::rc::Rc;

use lumen_core::{Size, SizeBounds};

use crate::device::{DumbAllocation, DumbMapping, FramebufferRequest, KmsDevice};
use crate::driver::{
    ClientBuffer, DestroyListener, DmabufAttributes, DmabufPlane, DriverBuffer, DriverDevice,
    ReleaseNotifier, ScanoutSurface, MODIFIER_INVALID,
};

/// One kernel entry point invocation, for asserting call ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KernelCall {
    CreateDumb,
    DestroyDumb,
    MapDumb,
    AddFb2Modifiers,
    AddFb2,
    AddFbLegacy,
    RemoveFb,
}

fn kernel_error() -> io::Error {
    io::Error::from_raw_os_error(libc::EINVAL)
}

/// In-memory kernel device: tracks dumb allocations and registrations,
/// records every call, and fails on demand.
pub(crate) struct MockKmsDevice {
    calls: RefCell<Vec<KernelCall>>,
    next_handle: Cell<u32>,
    next_fb_id: Cell<u32>,
    dumb_sizes: RefCell<HashMap<u32, u64>>,
    registered: RefCell<HashSet<u32>>,
    remove_calls: Cell<usize>,
    pub(crate) supports_modifiers: Cell<bool>,
    pub(crate) bounds: Cell<SizeBounds>,
    pub(crate) fail_create_dumb: Cell<bool>,
    pub(crate) fail_map_dumb: Cell<bool>,
    pub(crate) fail_addfb2_modifiers: Cell<bool>,
    pub(crate) fail_addfb2: Cell<bool>,
    pub(crate) fail_addfb_legacy: Cell<bool>,
    pub(crate) fail_remove: Cell<bool>,
}

impl MockKmsDevice {
    pub(crate) fn new() -> Self {
        MockKmsDevice {
            calls: RefCell::new(Vec::new()),
            next_handle: Cell::new(1),
            next_fb_id: Cell::new(100),
            dumb_sizes: RefCell::new(HashMap::new()),
            registered: RefCell::new(HashSet::new()),
            remove_calls: Cell::new(0),
            supports_modifiers: Cell::new(true),
            bounds: Cell::new(SizeBounds::new(Size::new(64, 64), Size::new(4096, 4096))),
            fail_create_dumb: Cell::new(false),
            fail_map_dumb: Cell::new(false),
            fail_addfb2_modifiers: Cell::new(false),
            fail_addfb2: Cell::new(false),
            fail_addfb_legacy: Cell::new(false),
            fail_remove: Cell::new(false),
        }
    }

    pub(crate) fn calls(&self) -> Vec<KernelCall> {
        self.calls.borrow().clone()
    }

    pub(crate) fn dumb_alive(&self) -> usize {
        self.dumb_sizes.borrow().len()
    }

    pub(crate) fn is_registered(&self, fb_id: u32) -> bool {
        self.registered.borrow().contains(&fb_id)
    }

    pub(crate) fn registered_count(&self) -> usize {
        self.registered.borrow().len()
    }

    pub(crate) fn remove_calls(&self) -> usize {
        self.remove_calls.get()
    }

    pub(crate) fn mark_registered(&self, fb_id: u32) {
        self.registered.borrow_mut().insert(fb_id);
    }

    fn record(&self, call: KernelCall) {
        self.calls.borrow_mut().push(call);
    }

    fn register(&self) -> u32 {
        let fb_id = self.next_fb_id.get();
        self.next_fb_id.set(fb_id + 1);
        self.registered.borrow_mut().insert(fb_id);
        fb_id
    }
}

impl KmsDevice for MockKmsDevice {
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation> {
        self.record(KernelCall::CreateDumb);
        if self.fail_create_dumb.get() {
            return Err(kernel_error());
        }
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        let pitch = width * (bpp / 8);
        let size = u64::from(pitch) * u64::from(height);
        self.dumb_sizes.borrow_mut().insert(handle, size);
        Ok(DumbAllocation {
            handle,
            pitch,
            size,
        })
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        self.record(KernelCall::DestroyDumb);
        match self.dumb_sizes.borrow_mut().remove(&handle) {
            Some(_) => Ok(()),
            None => Err(kernel_error()),
        }
    }

    fn map_dumb(&self, handle: u32, size: u64) -> io::Result<DumbMapping> {
        self.record(KernelCall::MapDumb);
        if self.fail_map_dumb.get() {
            return Err(kernel_error());
        }
        if !self.dumb_sizes.borrow().contains_key(&handle) {
            return Err(kernel_error());
        }
        Ok(DumbMapping::heap(size as usize))
    }

    fn add_framebuffer2(
        &self,
        _request: &FramebufferRequest,
        modifier: Option<u64>,
    ) -> io::Result<u32> {
        if modifier.is_some() {
            self.record(KernelCall::AddFb2Modifiers);
            if self.fail_addfb2_modifiers.get() {
                return Err(kernel_error());
            }
        } else {
            self.record(KernelCall::AddFb2);
            if self.fail_addfb2.get() {
                return Err(kernel_error());
            }
        }
        Ok(self.register())
    }

    fn add_framebuffer_legacy(
        &self,
        _request: &FramebufferRequest,
        _depth: u32,
        _bpp: u32,
    ) -> io::Result<u32> {
        self.record(KernelCall::AddFbLegacy);
        if self.fail_addfb_legacy.get() {
            return Err(kernel_error());
        }
        Ok(self.register())
    }

    fn remove_framebuffer(&self, fb_id: u32) -> io::Result<()> {
        self.record(KernelCall::RemoveFb);
        self.remove_calls.set(self.remove_calls.get() + 1);
        if self.fail_remove.get() {
            return Err(kernel_error());
        }
        match self.registered.borrow_mut().remove(&fb_id) {
            true => Ok(()),
            false => Err(kernel_error()),
        }
    }

    fn supports_modifiers(&self) -> bool {
        self.supports_modifiers.get()
    }

    fn size_bounds(&self) -> SizeBounds {
        self.bounds.get()
    }
}

/// Driver buffer object fake: introspection data plus an alive counter and
/// the attached destroy listener, which drops (and so fires) with it.
#[derive(Debug)]
pub(crate) struct FakeDriverBuffer {
    width: u32,
    height: u32,
    format: u32,
    modifier: Option<u64>,
    planes: Vec<(u32, u32, u32)>,
    listener: Option<DestroyListener>,
    alive: Rc<Cell<usize>>,
}

impl Drop for FakeDriverBuffer {
    fn drop(&mut self) {
        self.alive.set(self.alive.get() - 1);
    }
}

impl DriverBuffer for FakeDriverBuffer {
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn format(&self) -> u32 {
        self.format
    }
    fn stride(&self) -> u32 {
        self.planes[0].1
    }
    fn modifier(&self) -> Option<u64> {
        self.modifier
    }
    fn plane_count(&self) -> usize {
        self.planes.len()
    }
    fn plane_handle(&self, plane: usize) -> u32 {
        self.planes[plane].0
    }
    fn plane_stride(&self, plane: usize) -> u32 {
        self.planes[plane].1
    }
    fn plane_offset(&self, plane: usize) -> u32 {
        self.planes[plane].2
    }
    fn handle(&self) -> u32 {
        self.planes[0].0
    }
    fn attach_destroy_listener(&mut self, listener: DestroyListener) {
        self.listener = Some(listener);
    }
}

/// Driver device fake with per-entry-point import counters.
pub(crate) struct FakeDriverDevice {
    supports_modifier_import: bool,
    next_handle: Cell<u32>,
    imports: Cell<usize>,
    modifier_imports: Cell<usize>,
    client_imports: Cell<usize>,
    alive: Rc<Cell<usize>>,
    pub(crate) fail_imports: Cell<bool>,
}

impl FakeDriverDevice {
    pub(crate) fn new_rc(supports_modifier_import: bool) -> Rc<Self> {
        Rc::new(FakeDriverDevice {
            supports_modifier_import,
            next_handle: Cell::new(1000),
            imports: Cell::new(0),
            modifier_imports: Cell::new(0),
            client_imports: Cell::new(0),
            alive: Rc::new(Cell::new(0)),
            fail_imports: Cell::new(false),
        })
    }

    /// Attributes of a plain linear single-plane buffer (no modifier, no
    /// offset), eligible for the legacy import path.
    pub(crate) fn single_plane_attributes(
        width: u32,
        height: u32,
        format: u32,
    ) -> DmabufAttributes {
        DmabufAttributes {
            width,
            height,
            format,
            flags: 0,
            planes: vec![DmabufPlane {
                fd: -1,
                stride: width * 4,
                offset: 0,
                modifier: MODIFIER_INVALID,
            }],
        }
    }

    /// Attributes of a two-plane buffer carrying an explicit modifier.
    pub(crate) fn two_plane_attributes(
        width: u32,
        height: u32,
        format: u32,
        modifier: u64,
    ) -> DmabufAttributes {
        DmabufAttributes {
            width,
            height,
            format,
            flags: 0,
            planes: vec![
                DmabufPlane {
                    fd: -1,
                    stride: width * 4,
                    offset: 0,
                    modifier,
                },
                DmabufPlane {
                    fd: -1,
                    stride: width * 4,
                    offset: width * height * 4,
                    modifier,
                },
            ],
        }
    }

    pub(crate) fn import_count(&self) -> usize {
        self.imports.get()
    }

    pub(crate) fn modifier_import_count(&self) -> usize {
        self.modifier_imports.get()
    }

    pub(crate) fn client_import_count(&self) -> usize {
        self.client_imports.get()
    }

    pub(crate) fn buffers_alive(&self) -> usize {
        self.alive.get()
    }

    fn buffer(
        &self,
        width: u32,
        height: u32,
        format: u32,
        modifier: Option<u64>,
        plane_layout: &[(u32, u32)],
    ) -> Box<dyn DriverBuffer> {
        let planes = plane_layout
            .iter()
            .map(|&(stride, offset)| {
                let handle = self.next_handle.get();
                self.next_handle.set(handle + 1);
                (handle, stride, offset)
            })
            .collect();
        self.alive.set(self.alive.get() + 1);
        Box::new(FakeDriverBuffer {
            width,
            height,
            format,
            modifier,
            planes,
            listener: None,
            alive: self.alive.clone(),
        })
    }
}

impl DriverDevice for FakeDriverDevice {
    fn supports_modifier_import(&self) -> bool {
        self.supports_modifier_import
    }

    fn import_dmabuf(&self, attributes: &DmabufAttributes) -> io::Result<Box<dyn DriverBuffer>> {
        if self.fail_imports.get() {
            return Err(kernel_error());
        }
        self.imports.set(self.imports.get() + 1);
        let plane = &attributes.planes[0];
        Ok(self.buffer(
            attributes.width,
            attributes.height,
            attributes.format,
            None,
            &[(plane.stride, plane.offset)],
        ))
    }

    fn import_dmabuf_with_modifiers(
        &self,
        attributes: &DmabufAttributes,
    ) -> io::Result<Box<dyn DriverBuffer>> {
        if self.fail_imports.get() {
            return Err(kernel_error());
        }
        self.modifier_imports.set(self.modifier_imports.get() + 1);
        let layout: Vec<(u32, u32)> = attributes
            .planes
            .iter()
            .map(|p| (p.stride, p.offset))
            .collect();
        Ok(self.buffer(
            attributes.width,
            attributes.height,
            attributes.format,
            Some(attributes.modifier()),
            &layout,
        ))
    }

    fn import_client_buffer(
        &self,
        _buffer: &dyn ClientBuffer,
    ) -> io::Result<Box<dyn DriverBuffer>> {
        if self.fail_imports.get() {
            return Err(kernel_error());
        }
        self.client_imports.set(self.client_imports.get() + 1);
        Ok(self.buffer(
            64,
            64,
            crate::format::DRM_FORMAT_XRGB8888,
            Some(0),
            &[(64 * 4, 0)],
        ))
    }
}

/// Surface fake that keeps released buffers alive, like a real driver
/// swapchain does.
pub(crate) struct FakeSurface {
    released: RefCell<Vec<Box<dyn DriverBuffer>>>,
}

impl FakeSurface {
    pub(crate) fn new() -> Self {
        FakeSurface {
            released: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn released_count(&self) -> usize {
        self.released.borrow().len()
    }
}

impl ScanoutSurface for FakeSurface {
    fn release_buffer(&self, buffer: Box<dyn DriverBuffer>) {
        self.released.borrow_mut().push(buffer);
    }
}

/// Client buffer stand-in.
#[derive(Debug)]
pub(crate) struct FakeClientBuffer {
    #[allow(dead_code)]
    label: &'static str,
}

impl FakeClientBuffer {
    pub(crate) fn new(label: &'static str) -> Self {
        FakeClientBuffer { label }
    }
}

impl ClientBuffer for FakeClientBuffer {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Release notifier that counts invocations.
pub(crate) struct CountingNotifier {
    count: Cell<usize>,
}

impl CountingNotifier {
    pub(crate) fn new() -> Self {
        CountingNotifier {
            count: Cell::new(0),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count.get()
    }
}

impl ReleaseNotifier for CountingNotifier {
    fn notify(&self) {
        self.count.set(self.count.get() + 1);
    }
}
