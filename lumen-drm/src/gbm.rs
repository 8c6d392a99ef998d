//! gbm-backed implementations of the driver seam.
//!
//! Buffer introspection is cached eagerly at wrap time, so the
//! [`DriverBuffer`] accessors stay infallible and no gbm call happens after
//! import. The destroy listener rides as bo userdata; gbm drops it when the
//! buffer object itself is destroyed, which is exactly when the kernel
//! registration must go away.

use std::io;
use std::os::fd::BorrowedFd;

use gbm::{BufferObject, BufferObjectFlags, Device as GbmDevice, Format, Modifier, Surface};
use tracing::warn;

use crate::driver::{
    ClientBuffer, DestroyListener, DmabufAttributes, DriverBuffer, DriverDevice, ScanoutSurface,
    MAX_PLANES,
};

fn device_gone<E>(e: E) -> io::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    io::Error::new(io::ErrorKind::Other, e)
}

fn parse_format(fourcc: u32) -> io::Result<Format> {
    Format::try_from(fourcc).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// A gbm buffer object with its plane layout snapshot.
pub struct GbmScanoutBuffer {
    bo: BufferObject<DestroyListener>,
    width: u32,
    height: u32,
    format: u32,
    modifier: u64,
    plane_count: usize,
    handles: [u32; MAX_PLANES],
    strides: [u32; MAX_PLANES],
    offsets: [u32; MAX_PLANES],
}

impl std::fmt::Debug for GbmScanoutBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GbmScanoutBuffer")
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("format", &crate::format::fourcc_string(self.format))
            .field("modifier", &self.modifier)
            .field("planes", &self.plane_count)
            .finish()
    }
}

impl GbmScanoutBuffer {
    /// Snapshots the buffer's geometry and plane layout.
    pub fn wrap(bo: BufferObject<DestroyListener>) -> io::Result<Self> {
        let width = bo.width().map_err(device_gone)?;
        let height = bo.height().map_err(device_gone)?;
        let format = bo.format().map_err(device_gone)? as u32;
        let modifier = u64::from(bo.modifier().map_err(device_gone)?);
        let plane_count = (bo.plane_count().map_err(device_gone)? as usize).clamp(1, MAX_PLANES);

        let mut handles = [0u32; MAX_PLANES];
        let mut strides = [0u32; MAX_PLANES];
        let mut offsets = [0u32; MAX_PLANES];
        for plane in 0..plane_count {
            let idx = plane as i32;
            handles[plane] = unsafe { bo.handle_for_plane(idx).map_err(device_gone)?.u32_ };
            strides[plane] = bo.stride_for_plane(idx).map_err(device_gone)?;
            offsets[plane] = bo.offset(idx).map_err(device_gone)?;
        }

        Ok(GbmScanoutBuffer {
            bo,
            width,
            height,
            format,
            modifier,
            plane_count,
            handles,
            strides,
            offsets,
        })
    }
}

impl DriverBuffer for GbmScanoutBuffer {
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
        self.strides[0]
    }
    fn modifier(&self) -> Option<u64> {
        Some(self.modifier)
    }
    fn plane_count(&self) -> usize {
        self.plane_count
    }
    fn plane_handle(&self, plane: usize) -> u32 {
        self.handles[plane]
    }
    fn plane_stride(&self, plane: usize) -> u32 {
        self.strides[plane]
    }
    fn plane_offset(&self, plane: usize) -> u32 {
        self.offsets[plane]
    }
    fn handle(&self) -> u32 {
        self.handles[0]
    }

    fn attach_destroy_listener(&mut self, listener: DestroyListener) {
        if let Err(e) = self.bo.set_userdata(listener) {
            warn!(error = %e, "could not attach destroy listener to gbm buffer");
        }
    }
}

/// A gbm rendering surface whose front buffers become scanout
/// framebuffers.
pub struct GbmScanoutSurface {
    surface: Surface<DestroyListener>,
}

impl GbmScanoutSurface {
    /// Locks the surface's current front buffer for scanout.
    pub fn lock_front_buffer(&self) -> io::Result<Box<dyn DriverBuffer>> {
        let bo = unsafe { self.surface.lock_front_buffer() }.map_err(device_gone)?;
        Ok(Box::new(GbmScanoutBuffer::wrap(bo)?))
    }
}

impl ScanoutSurface for GbmScanoutSurface {
    fn release_buffer(&self, buffer: Box<dyn DriverBuffer>) {
        // Dropping a locked front buffer hands it back to the gbm surface;
        // the underlying object stays alive inside the swapchain.
        drop(buffer);
    }
}

/// The gbm allocator over a DRM node.
pub struct GbmDriverDevice {
    gbm: GbmDevice<std::fs::File>,
}

impl GbmDriverDevice {
    /// Creates the allocator from a (duplicated) DRM node handle.
    pub fn new(file: std::fs::File) -> io::Result<Self> {
        let gbm = GbmDevice::new(file)?;
        Ok(GbmDriverDevice { gbm })
    }

    /// Creates a scanout-capable rendering surface.
    pub fn create_scanout_surface(
        &self,
        width: u32,
        height: u32,
        fourcc: u32,
    ) -> io::Result<GbmScanoutSurface> {
        let surface = self.gbm.create_surface::<DestroyListener>(
            width,
            height,
            parse_format(fourcc)?,
            BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
        )?;
        Ok(GbmScanoutSurface { surface })
    }
}

impl DriverDevice for GbmDriverDevice {
    fn supports_modifier_import(&self) -> bool {
        true
    }

    fn import_dmabuf(&self, attributes: &DmabufAttributes) -> io::Result<Box<dyn DriverBuffer>> {
        let plane = attributes
            .planes
            .first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "dmabuf has no planes"))?;
        let fd = unsafe { BorrowedFd::borrow_raw(plane.fd) };
        let bo = self.gbm.import_buffer_object_from_dma_buf::<DestroyListener>(
            fd,
            attributes.width,
            attributes.height,
            plane.stride,
            parse_format(attributes.format)?,
            BufferObjectFlags::SCANOUT,
        )?;
        Ok(Box::new(GbmScanoutBuffer::wrap(bo)?))
    }

    fn import_dmabuf_with_modifiers(
        &self,
        attributes: &DmabufAttributes,
    ) -> io::Result<Box<dyn DriverBuffer>> {
        let mut fds: [Option<BorrowedFd<'_>>; 4] = [None; 4];
        let mut strides = [0i32; 4];
        let mut offsets = [0i32; 4];
        for (plane, attrs) in attributes.planes.iter().enumerate().take(MAX_PLANES) {
            fds[plane] = Some(unsafe { BorrowedFd::borrow_raw(attrs.fd) });
            strides[plane] = attrs.stride as i32;
            offsets[plane] = attrs.offset as i32;
        }

        let bo = self
            .gbm
            .import_buffer_object_from_dma_buf_with_modifiers::<DestroyListener>(
                attributes.planes.len() as u32,
                fds,
                attributes.width,
                attributes.height,
                parse_format(attributes.format)?,
                BufferObjectFlags::SCANOUT,
                strides,
                offsets,
                Modifier::from(attributes.modifier()),
            )?;
        Ok(Box::new(GbmScanoutBuffer::wrap(bo)?))
    }

    fn import_client_buffer(
        &self,
        _buffer: &dyn ClientBuffer,
    ) -> io::Result<Box<dyn DriverBuffer>> {
        #[cfg(feature = "wayland")]
        if let Some(wayland) = _buffer.as_any().downcast_ref::<WaylandClientBuffer>() {
            let bo = self.gbm.import_buffer_object_from_wayland::<DestroyListener>(
                &wayland.resource,
                BufferObjectFlags::SCANOUT,
            )?;
            return Ok(Box::new(GbmScanoutBuffer::wrap(bo)?));
        }

        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "client buffer type not importable through gbm",
        ))
    }
}

/// A wl_buffer resource wrapped as an importable client buffer.
#[cfg(feature = "wayland")]
#[derive(Debug)]
pub struct WaylandClientBuffer {
    pub resource: wayland_server::protocol::wl_buffer::WlBuffer,
}

#[cfg(feature = "wayland")]
impl ClientBuffer for WaylandClientBuffer {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
