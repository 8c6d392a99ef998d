//! Driver allocator seam.
//!
//! Everything the framebuffer manager needs from the GPU driver is behind
//! the [`DriverDevice`] and [`DriverBuffer`] traits: dmabuf import (legacy
//! single-fd and modifier-aware multi-fd), client buffer import, and plane
//! introspection of the resulting buffer objects. [`ScanoutSurface`] models
//! the driver-side swapchain a surface-backed framebuffer is released to.
//!
//! The `gbm` module provides the real implementations; tests use fakes.

use std::any::Any;
use std::cell::Cell;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use tracing::warn;

use crate::device::KmsDevice;

/// The modifier value meaning "no modifier information available". Buffers
/// carrying it must never go through modifier-aware registration.
pub const MODIFIER_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// The explicit linear-layout modifier.
pub const MODIFIER_LINEAR: u64 = 0;

/// Maximum number of memory planes a framebuffer can carry.
pub const MAX_PLANES: usize = 4;

/// dmabuf orientation/interlace flags. Any of these disqualifies a buffer
/// from direct scanout.
pub const DMABUF_FLAG_Y_INVERT: u32 = 1;
pub const DMABUF_FLAG_INTERLACED: u32 = 2;
pub const DMABUF_FLAG_BOTTOM_FIRST: u32 = 4;

/// One plane of an externally exported buffer.
///
/// The file descriptor is borrowed for the duration of the import call; the
/// exporter keeps ownership.
#[derive(Debug, Clone, Copy)]
pub struct DmabufPlane {
    pub fd: RawFd,
    pub stride: u32,
    pub offset: u32,
    pub modifier: u64,
}

/// Attributes describing an externally exported (dmabuf) buffer.
#[derive(Debug, Clone)]
pub struct DmabufAttributes {
    pub width: u32,
    pub height: u32,
    /// DRM fourcc of the buffer contents.
    pub format: u32,
    /// Orientation/interlace flags; must be zero for scanout.
    pub flags: u32,
    pub planes: Vec<DmabufPlane>,
}

impl DmabufAttributes {
    /// The modifier of the first plane, or [`MODIFIER_INVALID`] when no
    /// planes are populated.
    pub fn modifier(&self) -> u64 {
        self.planes.first().map_or(MODIFIER_INVALID, |p| p.modifier)
    }
}

/// An opaque client buffer handle, as attached to a surface by a display
/// client. The framebuffer manager only holds and releases it; the driver
/// adapter downcasts it for import.
pub trait ClientBuffer: std::fmt::Debug {
    fn as_any(&self) -> &dyn Any;
}

/// Release-notification channel back to the owner of a client buffer. Fired
/// exactly once, when the framebuffer holding the buffer is destroyed.
pub trait ReleaseNotifier {
    fn notify(&self);
}

/// A driver-level buffer object with its plane layout introspected.
///
/// All accessors are infallible: adapters cache the introspection results at
/// import time.
pub trait DriverBuffer: std::fmt::Debug {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// DRM fourcc of the buffer contents.
    fn format(&self) -> u32;
    /// Stride of plane 0, for the legacy description path.
    fn stride(&self) -> u32;
    /// Layout modifier, or `None` when the driver offers no plane
    /// introspection and only the legacy description is usable.
    fn modifier(&self) -> Option<u64>;
    fn plane_count(&self) -> usize;
    fn plane_handle(&self, plane: usize) -> u32;
    fn plane_stride(&self, plane: usize) -> u32;
    fn plane_offset(&self, plane: usize) -> u32;
    /// GEM handle of plane 0.
    fn handle(&self) -> u32;

    /// Attaches a listener that runs when the driver object itself is
    /// destroyed. At most one listener per buffer.
    fn attach_destroy_listener(&mut self, listener: DestroyListener);
}

/// The driver-side allocator/importer.
pub trait DriverDevice {
    /// Whether modifier-aware multi-fd dmabuf import is available.
    fn supports_modifier_import(&self) -> bool;

    /// Legacy single-fd dmabuf import.
    fn import_dmabuf(&self, attributes: &DmabufAttributes) -> io::Result<Box<dyn DriverBuffer>>;

    /// Modifier-aware multi-fd dmabuf import.
    fn import_dmabuf_with_modifiers(
        &self,
        attributes: &DmabufAttributes,
    ) -> io::Result<Box<dyn DriverBuffer>>;

    /// Imports a native client buffer handle.
    fn import_client_buffer(&self, buffer: &dyn ClientBuffer)
        -> io::Result<Box<dyn DriverBuffer>>;
}

/// The driver-side swapchain that owns surface-backed buffer objects.
pub trait ScanoutSurface {
    /// Hands a previously locked front buffer back to the surface. The
    /// surface keeps the underlying driver object alive.
    fn release_buffer(&self, buffer: Box<dyn DriverBuffer>);
}

/// Couples kernel deregistration to the death of a driver buffer object.
///
/// The listener shares the framebuffer id cell with the buffer record, so
/// whichever side still holds a nonzero id performs the single RmFB.
pub struct DestroyListener {
    device: Rc<dyn KmsDevice>,
    fb_id: Rc<Cell<u32>>,
}

impl DestroyListener {
    pub(crate) fn new(device: Rc<dyn KmsDevice>, fb_id: Rc<Cell<u32>>) -> Self {
        DestroyListener { device, fb_id }
    }
}

impl std::fmt::Debug for DestroyListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestroyListener")
            .field("fb_id", &self.fb_id.get())
            .finish()
    }
}

impl Drop for DestroyListener {
    fn drop(&mut self) {
        let fb_id = self.fb_id.replace(0);
        if fb_id != 0 {
            if let Err(e) = self.device.remove_framebuffer(fb_id) {
                warn!(fb_id, error = %e, "failed to remove framebuffer on driver buffer destruction");
            }
        }
    }
}
