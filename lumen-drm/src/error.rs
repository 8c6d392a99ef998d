//! Error handling for the KMS framebuffer layer.
//!
//! [`ScanoutError`] is the discriminated failure type every factory and
//! registration operation returns. Partial construction is always unwound
//! before one of these reaches the caller; no variant implies a leaked
//! kernel or driver resource.

use lumen_core::SizeBounds;
use thiserror::Error;

/// Failures produced while creating, importing or registering a scanout
/// framebuffer.
#[derive(Debug, Error)]
pub enum ScanoutError {
    /// The pixel format code is not in the format table, or lacks legacy
    /// depth/bpp information where the operation requires it.
    #[error("pixel format {fourcc:#010x} is not supported for scanout")]
    FormatUnsupported { fourcc: u32 },

    /// Requested dimensions fall outside the device's advertised limits.
    #[error("geometry {width}x{height} is outside device bounds {min}..={max}", min = .bounds.min, max = .bounds.max)]
    GeometryOutOfBounds {
        width: u32,
        height: u32,
        bounds: SizeBounds,
    },

    /// All applicable kernel registration fallbacks were exhausted.
    #[error("kernel framebuffer registration failed")]
    KernelRegistrationFailed(#[source] std::io::Error),

    /// The dmabuf carries attributes this backend cannot honor (orientation
    /// flags, mixed per-plane modifiers, or a modifier/multi-plane layout
    /// without driver support for modifier import).
    #[error("buffer import rejected: {0}")]
    ImportRejected(String),

    /// The underlying driver buffer-object import or creation failed.
    #[error("driver buffer object import failed")]
    DriverImportFailed(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::Size;
    use std::error::Error;
    use std::io;

    #[test]
    fn geometry_message_names_the_bounds() {
        let err = ScanoutError::GeometryOutOfBounds {
            width: 8192,
            height: 64,
            bounds: SizeBounds::new(Size::new(64, 64), Size::new(4096, 4096)),
        };
        assert_eq!(
            err.to_string(),
            "geometry 8192x64 is outside device bounds 64x64..=4096x4096"
        );
    }

    #[test]
    fn format_message_is_hex() {
        let err = ScanoutError::FormatUnsupported { fourcc: 0x34325258 };
        assert_eq!(
            err.to_string(),
            "pixel format 0x34325258 is not supported for scanout"
        );
    }

    #[test]
    fn kernel_failure_preserves_source() {
        let err = ScanoutError::KernelRegistrationFailed(io::Error::from_raw_os_error(libc::EINVAL));
        assert!(err.source().is_some());
    }
}
