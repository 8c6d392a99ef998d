//! Pixel format table for scanout.
//!
//! Keyed by DRM fourcc. Legacy depth/bpp values are only populated for the
//! formats the pre-AddFB2 kernel interface can express; everything else is
//! registered through the multi-plane path exclusively.

/// Builds a DRM fourcc code from its four ASCII characters.
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const DRM_FORMAT_XRGB8888: u32 = fourcc(b'X', b'R', b'2', b'4');
pub const DRM_FORMAT_ARGB8888: u32 = fourcc(b'A', b'R', b'2', b'4');
pub const DRM_FORMAT_XBGR8888: u32 = fourcc(b'X', b'B', b'2', b'4');
pub const DRM_FORMAT_ABGR8888: u32 = fourcc(b'A', b'B', b'2', b'4');
pub const DRM_FORMAT_RGB565: u32 = fourcc(b'R', b'G', b'1', b'6');
pub const DRM_FORMAT_XRGB2101010: u32 = fourcc(b'X', b'R', b'3', b'0');
pub const DRM_FORMAT_ARGB2101010: u32 = fourcc(b'A', b'R', b'3', b'0');
pub const DRM_FORMAT_XBGR2101010: u32 = fourcc(b'X', b'B', b'3', b'0');
pub const DRM_FORMAT_ABGR2101010: u32 = fourcc(b'A', b'B', b'3', b'0');
pub const DRM_FORMAT_RGB888: u32 = fourcc(b'R', b'G', b'2', b'4');
pub const DRM_FORMAT_BGR888: u32 = fourcc(b'B', b'G', b'2', b'4');
pub const DRM_FORMAT_NV12: u32 = fourcc(b'N', b'V', b'1', b'2');
pub const DRM_FORMAT_YUYV: u32 = fourcc(b'Y', b'U', b'Y', b'V');

/// Static description of a scanout-capable pixel format.
#[derive(Debug, PartialEq, Eq)]
pub struct FormatInfo {
    pub fourcc: u32,
    pub name: &'static str,
    /// Color depth for the legacy single-plane kernel interface; 0 when the
    /// format cannot be expressed through it.
    pub depth: u32,
    /// Bits per pixel for the legacy single-plane kernel interface; 0 when
    /// not legacy-expressible.
    pub bpp: u32,
    /// Number of memory planes.
    pub plane_count: u32,
    /// Alpha-free equivalent fourcc, for buffers known to be fully opaque.
    pub opaque: Option<u32>,
}

impl FormatInfo {
    /// Whether the legacy single-plane registration interface can carry this
    /// format.
    pub fn legacy_eligible(&self) -> bool {
        self.depth != 0 && self.bpp != 0
    }

    /// Returns the alpha-free equivalent of this format, or `self` when the
    /// format has no alpha channel to strip (or the substitute is unknown).
    pub fn opaque_substitute(&'static self) -> &'static FormatInfo {
        match self.opaque.and_then(lookup) {
            Some(info) => info,
            None => self,
        }
    }
}

static FORMATS: &[FormatInfo] = &[
    FormatInfo {
        fourcc: DRM_FORMAT_XRGB8888,
        name: "XRGB8888",
        depth: 24,
        bpp: 32,
        plane_count: 1,
        opaque: None,
    },
    FormatInfo {
        fourcc: DRM_FORMAT_ARGB8888,
        name: "ARGB8888",
        depth: 32,
        bpp: 32,
        plane_count: 1,
        opaque: Some(DRM_FORMAT_XRGB8888),
    },
    FormatInfo {
        fourcc: DRM_FORMAT_XBGR8888,
        name: "XBGR8888",
        depth: 0,
        bpp: 0,
        plane_count: 1,
        opaque: None,
    },
    FormatInfo {
        fourcc: DRM_FORMAT_ABGR8888,
        name: "ABGR8888",
        depth: 0,
        bpp: 0,
        plane_count: 1,
        opaque: Some(DRM_FORMAT_XBGR8888),
    },
    FormatInfo {
        fourcc: DRM_FORMAT_RGB565,
        name: "RGB565",
        depth: 16,
        bpp: 16,
        plane_count: 1,
        opaque: None,
    },
    FormatInfo {
        fourcc: DRM_FORMAT_XRGB2101010,
        name: "XRGB2101010",
        depth: 30,
        bpp: 32,
        plane_count: 1,
        opaque: None,
    },
    FormatInfo {
        fourcc: DRM_FORMAT_ARGB2101010,
        name: "ARGB2101010",
        depth: 0,
        bpp: 0,
        plane_count: 1,
        opaque: Some(DRM_FORMAT_XRGB2101010),
    },
    FormatInfo {
        fourcc: DRM_FORMAT_XBGR2101010,
        name: "XBGR2101010",
        depth: 0,
        bpp: 0,
        plane_count: 1,
        opaque: None,
    },
    FormatInfo {
        fourcc: DRM_FORMAT_ABGR2101010,
        name: "ABGR2101010",
        depth: 0,
        bpp: 0,
        plane_count: 1,
        opaque: Some(DRM_FORMAT_XBGR2101010),
    },
    FormatInfo {
        fourcc: DRM_FORMAT_RGB888,
        name: "RGB888",
        depth: 0,
        bpp: 0,
        plane_count: 1,
        opaque: None,
    },
    FormatInfo {
        fourcc: DRM_FORMAT_BGR888,
        name: "BGR888",
        depth: 0,
        bpp: 0,
        plane_count: 1,
        opaque: None,
    },
    FormatInfo {
        fourcc: DRM_FORMAT_NV12,
        name: "NV12",
        depth: 0,
        bpp: 0,
        plane_count: 2,
        opaque: None,
    },
    FormatInfo {
        fourcc: DRM_FORMAT_YUYV,
        name: "YUYV",
        depth: 0,
        bpp: 0,
        plane_count: 1,
        opaque: None,
    },
];

/// Looks up a format by fourcc. `None` means the format cannot be scanned
/// out by this backend at all.
pub fn lookup(fourcc: u32) -> Option<&'static FormatInfo> {
    FORMATS.iter().find(|info| info.fourcc == fourcc)
}

/// Renders a fourcc as its four ASCII characters for diagnostics.
pub fn fourcc_string(fourcc: u32) -> String {
    fourcc
        .to_le_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn fourcc_packing_matches_kernel_layout() {
        assert_eq!(DRM_FORMAT_XRGB8888, 0x34325258);
        assert_eq!(DRM_FORMAT_ARGB8888, 0x34325241);
        assert_eq!(DRM_FORMAT_NV12, 0x3231564e);
    }

    #[rstest]
    #[case(DRM_FORMAT_XRGB8888, 24, 32)]
    #[case(DRM_FORMAT_ARGB8888, 32, 32)]
    #[case(DRM_FORMAT_XRGB2101010, 30, 32)]
    #[case(DRM_FORMAT_RGB565, 16, 16)]
    fn legacy_eligible_formats(#[case] fourcc: u32, #[case] depth: u32, #[case] bpp: u32) {
        let info = lookup(fourcc).unwrap();
        assert!(info.legacy_eligible());
        assert_eq!(info.depth, depth);
        assert_eq!(info.bpp, bpp);
    }

    #[rstest]
    #[case(DRM_FORMAT_XBGR8888)]
    #[case(DRM_FORMAT_ABGR2101010)]
    #[case(DRM_FORMAT_NV12)]
    #[case(DRM_FORMAT_YUYV)]
    fn non_legacy_formats(#[case] fourcc: u32) {
        assert!(!lookup(fourcc).unwrap().legacy_eligible());
    }

    #[test]
    fn unknown_fourcc_is_rejected() {
        assert!(lookup(fourcc(b'Z', b'Z', b'9', b'9')).is_none());
    }

    #[test]
    fn opaque_substitution_strips_alpha() {
        let argb = lookup(DRM_FORMAT_ARGB8888).unwrap();
        assert_eq!(argb.opaque_substitute().fourcc, DRM_FORMAT_XRGB8888);

        let xrgb = lookup(DRM_FORMAT_XRGB8888).unwrap();
        assert_eq!(xrgb.opaque_substitute().fourcc, DRM_FORMAT_XRGB8888);
    }

    #[test]
    fn nv12_has_two_planes() {
        assert_eq!(lookup(DRM_FORMAT_NV12).unwrap().plane_count, 2);
    }

    #[test]
    fn fourcc_string_renders_ascii() {
        assert_eq!(fourcc_string(DRM_FORMAT_XRGB8888), "XR24");
        assert_eq!(fourcc_string(0x0000_0001), "????");
    }
}
