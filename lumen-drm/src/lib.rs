//! DRM/KMS scanout framebuffer management.
//!
//! This crate owns the lifecycle of kernel-registered framebuffers for a
//! display server: CPU-writable dumb buffers, driver (gbm) buffer objects
//! locked from rendering surfaces, imported client buffers, cursors and
//! dmabuf imports. Registration walks the modifier-aware, planar and
//! legacy kernel entry points; a per-backend registry of weak references
//! supports suspending and resuming every registration around display
//! device mastership changes.
//!
//! [`ScanoutBackend`] is the entry point. It is built over a
//! [`KmsDevice`] (usually [`GpuDevice`]) and optionally a
//! [`DriverDevice`] (usually [`gbm::GbmDriverDevice`]), both behind
//! traits so the lifecycle logic is testable without hardware.
//!
//! Everything here is single-threaded by design; handles are
//! reference-counted with [`std::rc::Rc`] and must stay on the thread
//! that talks to the display device.

pub mod backend;
pub mod device;
pub mod driver;
pub mod error;
pub mod format;
pub mod framebuffer;
pub mod gbm;
mod registration;
pub mod registry;
#[cfg(test)]
pub(crate) mod testing;
pub mod view;

pub use backend::ScanoutBackend;
pub use device::{DumbMapping, GpuDevice, KmsDevice};
pub use driver::{
    ClientBuffer, DmabufAttributes, DmabufPlane, DriverBuffer, DriverDevice, ReleaseNotifier,
    ScanoutSurface, MODIFIER_INVALID, MODIFIER_LINEAR,
};
pub use error::ScanoutError;
pub use format::FormatInfo;
pub use framebuffer::{DriverOrigin, OriginKind, ScanoutFramebuffer};
pub use registry::FramebufferRegistry;
pub use view::{
    BufferAttachment, BufferContent, ContentProtection, ProtectionMode, Transform, ViewSnapshot,
};
