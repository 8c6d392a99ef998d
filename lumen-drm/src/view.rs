//! Direct scanout eligibility for compositor views.
//!
//! A [`ViewSnapshot`] captures the read-only inputs the decision needs;
//! [`framebuffer_for_view`] either turns the attached client buffer into a
//! registered framebuffer or rejects the view (with the reason logged at
//! debug, since rejection is the common case during normal compositing).

use std::rc::Rc;

use tracing::debug;

use crate::backend::ScanoutBackend;
use crate::driver::{ClientBuffer, DmabufAttributes, ReleaseNotifier};
use crate::framebuffer::{DriverOrigin, ScanoutFramebuffer};

/// Output/buffer orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

/// How strictly content-protection requirements are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionMode {
    /// Unprotected scanout of protected content is tolerated.
    Relaxed,
    /// Content must not reach an output below its required level.
    Enforced,
}

/// HDCP-style content protection levels, ordered by strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ContentProtection {
    Disabled,
    Type0,
    Type1,
}

/// What the attached client buffer actually is.
pub enum BufferContent {
    /// Shared-memory buffer; never scanned out directly.
    Shm,
    /// Externally exported buffer with dmabuf descriptors.
    Dmabuf(DmabufAttributes),
    /// Native client buffer handle, importable through the driver.
    Native,
}

/// A client buffer attachment on a view.
pub struct BufferAttachment {
    pub content: BufferContent,
    pub buffer: Rc<dyn ClientBuffer>,
    /// Signaled when the display server is done with the buffer.
    pub release: Option<Rc<dyn ReleaseNotifier>>,
}

/// Read-only inputs for the scanout decision.
pub struct ViewSnapshot {
    /// View-level opacity; anything below 1.0 requires blending.
    pub alpha: f32,
    /// Whether the buffer contents are known to be fully opaque.
    pub is_opaque: bool,
    pub transform: Transform,
    pub output_transform: Transform,
    pub protection_mode: ProtectionMode,
    pub desired_protection: ContentProtection,
    pub output_protection: ContentProtection,
    pub attachment: Option<BufferAttachment>,
}

/// Resolves a view to a scanout framebuffer, or `None` when the view must
/// go through composition. On success the client buffer reference and its
/// release notifier are attached to the framebuffer.
pub(crate) fn framebuffer_for_view(
    backend: &ScanoutBackend,
    view: &ViewSnapshot,
) -> Option<ScanoutFramebuffer> {
    if view.alpha != 1.0 {
        debug!(alpha = view.alpha, "view not eligible for scanout: not fully opaque");
        return None;
    }
    if view.transform != view.output_transform {
        debug!(
            view_transform = ?view.transform,
            output_transform = ?view.output_transform,
            "view not eligible for scanout: transform mismatch"
        );
        return None;
    }
    if view.protection_mode == ProtectionMode::Enforced
        && view.desired_protection > view.output_protection
    {
        debug!(
            desired = ?view.desired_protection,
            current = ?view.output_protection,
            "view not eligible for scanout: insufficient content protection"
        );
        return None;
    }

    let attachment = match &view.attachment {
        Some(attachment) => attachment,
        None => {
            debug!("view not eligible for scanout: no buffer attached");
            return None;
        }
    };
    let driver = match backend.driver() {
        Some(driver) => driver,
        None => {
            debug!("view not eligible for scanout: no driver device");
            return None;
        }
    };

    let framebuffer = match &attachment.content {
        BufferContent::Shm => {
            debug!("view not eligible for scanout: shared-memory buffer");
            return None;
        }
        BufferContent::Dmabuf(attributes) => {
            match backend.framebuffer_from_dmabuf(attributes, view.is_opaque) {
                Ok(fb) => fb,
                Err(e) => {
                    debug!(error = %e, "dmabuf not usable for scanout");
                    return None;
                }
            }
        }
        BufferContent::Native => {
            let bo = match driver.import_client_buffer(attachment.buffer.as_ref()) {
                Ok(bo) => bo,
                Err(e) => {
                    debug!(error = %e, "client buffer import failed");
                    return None;
                }
            };
            match backend.framebuffer_from_driver_buffer(bo, DriverOrigin::Client, view.is_opaque)
            {
                Ok(fb) => fb,
                Err(e) => {
                    debug!(error = %e, "client buffer not usable for scanout");
                    return None;
                }
            }
        }
    };

    framebuffer.attach_client(attachment.buffer.clone(), attachment.release.clone());
    Some(framebuffer)
}
