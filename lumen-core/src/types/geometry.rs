//! Geometric primitives used by the display backend.

use serde::{Deserialize, Serialize};

/// A 2D pixel size (width and height).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Size {
    /// Creates a new size with the given dimensions.
    pub const fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Inclusive minimum/maximum size bounds, as advertised by a display device
/// for framebuffer dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBounds {
    pub min: Size,
    pub max: Size,
}

impl SizeBounds {
    pub const fn new(min: Size, max: Size) -> Self {
        SizeBounds { min, max }
    }

    /// Whether the given dimensions fall within these bounds (inclusive on
    /// both ends).
    pub fn contains(&self, width: u32, height: u32) -> bool {
        width >= self.min.width
            && width <= self.max.width
            && height >= self.min.height
            && height <= self.max.height
    }
}

impl Default for SizeBounds {
    /// Permissive bounds for devices that do not report limits.
    fn default() -> Self {
        SizeBounds {
            min: Size::new(1, 1),
            max: Size::new(u32::MAX, u32::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Size: Copy, Send, Sync);
    assert_impl_all!(SizeBounds: Copy, Send, Sync);

    #[test]
    fn size_display() {
        assert_eq!(Size::new(1920, 1080).to_string(), "1920x1080");
    }

    #[rstest]
    #[case(64, 64, true)]
    #[case(4096, 4096, true)]
    #[case(63, 64, false)]
    #[case(64, 63, false)]
    #[case(4097, 4096, false)]
    #[case(4096, 4097, false)]
    fn bounds_are_inclusive(#[case] width: u32, #[case] height: u32, #[case] expected: bool) {
        let bounds = SizeBounds::new(Size::new(64, 64), Size::new(4096, 4096));
        assert_eq!(bounds.contains(width, height), expected);
    }

    #[test]
    fn default_bounds_accept_common_modes() {
        let bounds = SizeBounds::default();
        assert!(bounds.contains(1, 1));
        assert!(bounds.contains(7680, 4320));
        assert!(!bounds.contains(0, 1));
    }
}
