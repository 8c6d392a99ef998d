//! Kernel device seam.
//!
//! [`KmsDevice`] abstracts the handful of kernel primitives the framebuffer
//! manager needs: the dumb-buffer trio, the three framebuffer registration
//! entry points, removal, and device capabilities. [`GpuDevice`] is the real
//! implementation over an opened DRM node; tests substitute a mock.
//!
//! The dumb-buffer ioctls are issued raw because the higher-level wrappers
//! assume ownership semantics this manager handles itself. Registration goes
//! through the `drm` crate.

use std::fs::{File, OpenOptions};
use std::io;
use std::num::{NonZeroU32, NonZeroUsize};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;
use std::ptr::NonNull;

use drm::buffer::{Buffer, DrmFourcc, DrmModifier, Handle as BufferHandle, PlanarBuffer};
use drm::control::{framebuffer, Device as ControlDevice, FbCmd2Flags};
use drm::{Device, DriverCapability};
use nix::errno::Errno;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use tracing::{debug, warn};

use lumen_core::{Size, SizeBounds};

/// Result of a dumb-buffer allocation.
#[derive(Debug, Clone, Copy)]
pub struct DumbAllocation {
    /// GEM handle of the allocated buffer.
    pub handle: u32,
    /// Bytes per scanline, as chosen by the kernel.
    pub pitch: u32,
    /// Total allocation size in bytes.
    pub size: u64,
}

/// Plane layout handed to the registration entry points. Planes beyond
/// `plane_count` carry zeroes and are ignored.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferRequest {
    pub width: u32,
    pub height: u32,
    pub fourcc: u32,
    pub plane_count: usize,
    pub handles: [u32; 4],
    pub strides: [u32; 4],
    pub offsets: [u32; 4],
}

impl FramebufferRequest {
    /// Single-plane request with no offset.
    pub fn single_plane(width: u32, height: u32, fourcc: u32, handle: u32, stride: u32) -> Self {
        FramebufferRequest {
            width,
            height,
            fourcc,
            plane_count: 1,
            handles: [handle, 0, 0, 0],
            strides: [stride, 0, 0, 0],
            offsets: [0; 4],
        }
    }
}

/// The kernel operations the framebuffer manager depends on.
pub trait KmsDevice {
    /// Allocates a CPU-accessible dumb buffer.
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation>;

    /// Frees a dumb buffer allocation.
    fn destroy_dumb(&self, handle: u32) -> io::Result<()>;

    /// Maps a dumb buffer write-shared into this process.
    fn map_dumb(&self, handle: u32, size: u64) -> io::Result<DumbMapping>;

    /// AddFB2, optionally with an explicit modifier applied to every
    /// populated plane. Returns the kernel framebuffer id.
    fn add_framebuffer2(
        &self,
        request: &FramebufferRequest,
        modifier: Option<u64>,
    ) -> io::Result<u32>;

    /// Legacy single-plane AddFB with explicit depth/bpp.
    fn add_framebuffer_legacy(
        &self,
        request: &FramebufferRequest,
        depth: u32,
        bpp: u32,
    ) -> io::Result<u32>;

    /// RmFB.
    fn remove_framebuffer(&self, fb_id: u32) -> io::Result<()>;

    /// Whether the device accepts modifier-aware registration.
    fn supports_modifiers(&self) -> bool;

    /// Framebuffer dimension limits advertised by the device.
    fn size_bounds(&self) -> SizeBounds;
}

// Dumb-buffer ioctl argument structs, from drm_mode.h. Field order matters;
// height precedes width in the create struct.

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct DrmModeCreateDumb {
    height: u32,
    width: u32,
    bpp: u32,
    flags: u32,
    handle: u32,
    pitch: u32,
    size: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct DrmModeMapDumb {
    handle: u32,
    pad: u32,
    offset: u64,
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct DrmModeDestroyDumb {
    handle: u32,
}

nix::ioctl_readwrite!(drm_ioctl_mode_create_dumb, b'd', 0xb2, DrmModeCreateDumb);
nix::ioctl_readwrite!(drm_ioctl_mode_map_dumb, b'd', 0xb3, DrmModeMapDumb);
nix::ioctl_readwrite!(drm_ioctl_mode_destroy_dumb, b'd', 0xb4, DrmModeDestroyDumb);

/// Retries an ioctl until it completes without EINTR.
fn retry_ioctl<F>(mut call: F) -> io::Result<()>
where
    F: FnMut() -> nix::Result<libc::c_int>,
{
    loop {
        match call() {
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => continue,
            Err(errno) => return Err(errno.into()),
        }
    }
}

enum MappingInner {
    /// mmap of the dumb buffer through the device node.
    Device {
        ptr: NonNull<libc::c_void>,
        len: NonZeroUsize,
    },
    /// Plain memory, for devices without a mappable node.
    Heap(Box<[u8]>),
}

/// A writable mapping of a dumb buffer. Unmaps on drop.
pub struct DumbMapping {
    inner: MappingInner,
}

impl DumbMapping {
    /// Wraps a region obtained from `mmap`. The caller guarantees `ptr` is a
    /// live mapping of exactly `len` bytes that nothing else will unmap.
    unsafe fn from_device(ptr: NonNull<libc::c_void>, len: NonZeroUsize) -> Self {
        DumbMapping {
            inner: MappingInner::Device { ptr, len },
        }
    }

    /// Allocates a zeroed heap-backed mapping of `len` bytes.
    pub fn heap(len: usize) -> Self {
        DumbMapping {
            inner: MappingInner::Heap(vec![0u8; len].into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner {
            MappingInner::Device { len, .. } => len.get(),
            MappingInner::Heap(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.inner {
            MappingInner::Device { ptr, len } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr() as *const u8, len.get())
            },
            MappingInner::Heap(buf) => buf,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.inner {
            MappingInner::Device { ptr, len } => unsafe {
                std::slice::from_raw_parts_mut(ptr.as_ptr() as *mut u8, len.get())
            },
            MappingInner::Heap(buf) => buf,
        }
    }
}

impl std::fmt::Debug for DumbMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DumbMapping")
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for DumbMapping {
    fn drop(&mut self) {
        if let MappingInner::Device { ptr, len } = &self.inner {
            if let Err(errno) = unsafe { mman::munmap(*ptr, len.get()) } {
                warn!(error = %errno, "failed to unmap dumb buffer");
            }
        }
    }
}

/// An opened DRM node.
///
/// Capabilities are queried once at open time; the framebuffer calls go
/// through the `drm` crate, the dumb-buffer trio through raw ioctls.
#[derive(Debug)]
pub struct GpuDevice {
    file: File,
    fb_modifiers: bool,
    bounds: SizeBounds,
}

impl AsFd for GpuDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl drm::Device for GpuDevice {}
impl ControlDevice for GpuDevice {}

impl GpuDevice {
    /// Opens the DRM node at `path` read-write and snapshots its
    /// capabilities.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut device = GpuDevice {
            file,
            fb_modifiers: false,
            bounds: SizeBounds::default(),
        };

        device.fb_modifiers = device
            .get_driver_capability(DriverCapability::AddFB2Modifiers)
            .map(|v| v != 0)
            .unwrap_or(false);

        match device.resource_handles() {
            Ok(resources) => {
                let (min_w, max_w) = range_limits(resources.supported_fb_width());
                let (min_h, max_h) = range_limits(resources.supported_fb_height());
                device.bounds =
                    SizeBounds::new(Size::new(min_w, min_h), Size::new(max_w, max_h));
            }
            Err(e) => {
                warn!(error = %e, "could not query device resources, assuming permissive bounds");
            }
        }

        debug!(
            path = %path.display(),
            fb_modifiers = device.fb_modifiers,
            min = %device.bounds.min,
            max = %device.bounds.max,
            "opened DRM device"
        );
        Ok(device)
    }

    /// Duplicates the node handle, e.g. for handing to the driver allocator.
    pub fn try_clone_file(&self) -> io::Result<File> {
        self.file.try_clone()
    }
}

/// Extracts the inclusive (min, max) limits of a framebuffer-dimension
/// range advertised by the device.
fn range_limits(range: impl std::ops::RangeBounds<u32>) -> (u32, u32) {
    use std::ops::Bound;
    let min = match range.start_bound() {
        Bound::Included(&v) => v,
        Bound::Excluded(&v) => v.saturating_add(1),
        Bound::Unbounded => 0,
    };
    let max = match range.end_bound() {
        Bound::Included(&v) => v,
        Bound::Excluded(&v) => v.saturating_sub(1),
        Bound::Unbounded => u32::MAX,
    };
    (min, max)
}

/// Planar buffer description built from raw plane numbers.
struct PlanarRequest {
    size: (u32, u32),
    format: DrmFourcc,
    modifier: Option<DrmModifier>,
    pitches: [u32; 4],
    handles: [Option<BufferHandle>; 4],
    offsets: [u32; 4],
}

impl PlanarBuffer for PlanarRequest {
    fn size(&self) -> (u32, u32) {
        self.size
    }
    fn format(&self) -> DrmFourcc {
        self.format
    }
    fn modifier(&self) -> Option<DrmModifier> {
        self.modifier
    }
    fn pitches(&self) -> [u32; 4] {
        self.pitches
    }
    fn handles(&self) -> [Option<BufferHandle>; 4] {
        self.handles
    }
    fn offsets(&self) -> [u32; 4] {
        self.offsets
    }
}

/// Single-plane buffer description for the legacy entry point.
struct LegacyRequest {
    size: (u32, u32),
    format: DrmFourcc,
    pitch: u32,
    handle: BufferHandle,
}

impl Buffer for LegacyRequest {
    fn size(&self) -> (u32, u32) {
        self.size
    }
    fn format(&self) -> DrmFourcc {
        self.format
    }
    fn pitch(&self) -> u32 {
        self.pitch
    }
    fn handle(&self) -> BufferHandle {
        self.handle
    }
}

fn parse_fourcc(fourcc: u32) -> io::Result<DrmFourcc> {
    DrmFourcc::try_from(fourcc).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn gem_handle(raw: u32) -> io::Result<BufferHandle> {
    NonZeroU32::new(raw)
        .map(BufferHandle::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "GEM handle is zero"))
}

impl KmsDevice for GpuDevice {
    fn create_dumb(&self, width: u32, height: u32, bpp: u32) -> io::Result<DumbAllocation> {
        let mut arg = DrmModeCreateDumb {
            height,
            width,
            bpp,
            ..Default::default()
        };
        retry_ioctl(|| unsafe { drm_ioctl_mode_create_dumb(self.file.as_raw_fd(), &mut arg) })?;
        Ok(DumbAllocation {
            handle: arg.handle,
            pitch: arg.pitch,
            size: arg.size,
        })
    }

    fn destroy_dumb(&self, handle: u32) -> io::Result<()> {
        let mut arg = DrmModeDestroyDumb { handle };
        retry_ioctl(|| unsafe { drm_ioctl_mode_destroy_dumb(self.file.as_raw_fd(), &mut arg) })
    }

    fn map_dumb(&self, handle: u32, size: u64) -> io::Result<DumbMapping> {
        let mut arg = DrmModeMapDumb {
            handle,
            ..Default::default()
        };
        retry_ioctl(|| unsafe { drm_ioctl_mode_map_dumb(self.file.as_raw_fd(), &mut arg) })?;

        let len = NonZeroUsize::new(size as usize)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "zero-sized dumb buffer"))?;
        let ptr = unsafe {
            mman::mmap(
                None,
                len,
                ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &self.file,
                arg.offset as libc::off_t,
            )
        }
        .map_err(io::Error::from)?;
        Ok(unsafe { DumbMapping::from_device(ptr, len) })
    }

    fn add_framebuffer2(
        &self,
        request: &FramebufferRequest,
        modifier: Option<u64>,
    ) -> io::Result<u32> {
        let mut handles: [Option<BufferHandle>; 4] = [None; 4];
        for plane in 0..request.plane_count.min(4) {
            handles[plane] = Some(gem_handle(request.handles[plane])?);
        }

        let planar = PlanarRequest {
            size: (request.width, request.height),
            format: parse_fourcc(request.fourcc)?,
            modifier: modifier.map(DrmModifier::from),
            pitches: request.strides,
            handles,
            offsets: request.offsets,
        };
        let flags = if modifier.is_some() {
            FbCmd2Flags::MODIFIERS
        } else {
            FbCmd2Flags::empty()
        };
        let handle = self.add_planar_framebuffer(&planar, flags)?;
        Ok(u32::from(handle))
    }

    fn add_framebuffer_legacy(
        &self,
        request: &FramebufferRequest,
        depth: u32,
        bpp: u32,
    ) -> io::Result<u32> {
        let legacy = LegacyRequest {
            size: (request.width, request.height),
            format: parse_fourcc(request.fourcc)?,
            pitch: request.strides[0],
            handle: gem_handle(request.handles[0])?,
        };
        let handle = self.add_framebuffer(&legacy, depth, bpp)?;
        Ok(u32::from(handle))
    }

    fn remove_framebuffer(&self, fb_id: u32) -> io::Result<()> {
        let raw = NonZeroU32::new(fb_id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "framebuffer id is zero"))?;
        self.destroy_framebuffer(framebuffer::Handle::from(raw))
    }

    fn supports_modifiers(&self) -> bool {
        self.fb_modifiers
    }

    fn size_bounds(&self) -> SizeBounds {
        self.bounds
    }
}
