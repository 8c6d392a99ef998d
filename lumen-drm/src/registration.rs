//! Kernel registration ladder.
//!
//! Which registration entry points apply to a buffer is decided up front as
//! an ordered candidate list, then attempted in sequence. A buffer with a
//! real modifier can only ever go through the modifier-aware entry point;
//! there is no legal fallback from it.

use std::cell::Cell;
use std::io;

use tracing::{debug, warn};

use crate::device::{FramebufferRequest, KmsDevice};
use crate::driver::MODIFIER_INVALID;
use crate::format::FormatInfo;

/// One registration entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Strategy {
    /// AddFB2 with an explicit per-plane modifier.
    ModifierAware,
    /// AddFB2 without modifiers.
    Planar,
    /// Legacy AddFB, single plane with explicit depth/bpp.
    Legacy,
}

/// The applicable entry points for this buffer, in the order they must be
/// attempted.
pub(crate) fn candidates(
    format: &FormatInfo,
    plane_count: usize,
    modifier: u64,
    modifier_capable: bool,
) -> Vec<Strategy> {
    if modifier_capable && modifier != MODIFIER_INVALID {
        // A set modifier binds the buffer to the modifier-aware entry point;
        // the legacy ioctls cannot describe it.
        return vec![Strategy::ModifierAware];
    }

    let mut list = vec![Strategy::Planar];
    if format.legacy_eligible() && plane_count == 1 {
        list.push(Strategy::Legacy);
    }
    list
}

/// Registers the buffer with the kernel, walking the candidate ladder.
/// Returns the nonzero framebuffer id.
pub(crate) fn register(
    device: &dyn KmsDevice,
    request: &FramebufferRequest,
    format: &'static FormatInfo,
    modifier: u64,
    modifier_capable: bool,
) -> io::Result<u32> {
    let mut last_error = io::Error::from_raw_os_error(libc::EINVAL);

    for strategy in candidates(format, request.plane_count, modifier, modifier_capable) {
        let attempt = match strategy {
            Strategy::ModifierAware => device.add_framebuffer2(request, Some(modifier)),
            Strategy::Planar => device.add_framebuffer2(request, None),
            Strategy::Legacy => device.add_framebuffer_legacy(request, format.depth, format.bpp),
        };
        match attempt {
            Ok(fb_id) => {
                debug!(
                    fb_id,
                    ?strategy,
                    format = format.name,
                    width = request.width,
                    height = request.height,
                    "registered framebuffer"
                );
                return Ok(fb_id);
            }
            Err(e) => {
                debug!(?strategy, error = %e, "framebuffer registration attempt failed");
                last_error = e;
            }
        }
    }
    Err(last_error)
}

/// Unconditionally removes the kernel registration, clearing the shared id
/// cell. Kernel errors are reported but never leave the in-memory state
/// inconsistent.
pub(crate) fn deregister(device: &dyn KmsDevice, fb_id: &Cell<u32>) {
    let id = fb_id.replace(0);
    if id == 0 {
        return;
    }
    if let Err(e) = device.remove_framebuffer(id) {
        warn!(fb_id = id, error = %e, "failed to remove framebuffer");
    }
}
