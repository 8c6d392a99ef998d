//! The scanout backend: capability context and factory entry points.
//!
//! [`ScanoutBackend`] ties a kernel device, an optional driver allocator and
//! the lifecycle registry together. All framebuffer creation goes through
//! it, so every buffer is built against the same capability snapshot
//! (modifier support, size bounds) and lands in the same registry.

use std::rc::Rc;

use tracing::{debug, info};

use lumen_core::{BackendConfig, SizeBounds};

use crate::device::KmsDevice;
use crate::driver::{DmabufAttributes, DriverBuffer, DriverDevice};
use crate::error::ScanoutError;
use crate::framebuffer::{self, DriverOrigin, ScanoutFramebuffer};
use crate::registry::FramebufferRegistry;
use crate::view::{self, ViewSnapshot};

pub struct ScanoutBackend {
    device: Rc<dyn KmsDevice>,
    driver: Option<Rc<dyn DriverDevice>>,
    /// Modifier-aware registration: device capability gated by
    /// configuration.
    fb_modifiers: bool,
    registry: FramebufferRegistry,
}

impl ScanoutBackend {
    pub fn new(
        device: Rc<dyn KmsDevice>,
        driver: Option<Rc<dyn DriverDevice>>,
        config: &BackendConfig,
    ) -> Self {
        let fb_modifiers = device.supports_modifiers() && config.allow_modifiers;
        info!(
            fb_modifiers,
            has_driver = driver.is_some(),
            "scanout backend initialized"
        );
        ScanoutBackend {
            device,
            driver,
            fb_modifiers,
            registry: FramebufferRegistry::new(),
        }
    }

    /// Whether framebuffers may be registered with explicit modifiers.
    pub fn supports_modifiers(&self) -> bool {
        self.fb_modifiers
    }

    pub fn size_bounds(&self) -> SizeBounds {
        self.device.size_bounds()
    }

    pub fn registry(&self) -> &FramebufferRegistry {
        &self.registry
    }

    pub(crate) fn driver(&self) -> Option<&Rc<dyn DriverDevice>> {
        self.driver.as_ref()
    }

    /// Allocates, registers and maps a CPU-writable dumb framebuffer.
    pub fn create_dumb_framebuffer(
        &self,
        width: u32,
        height: u32,
        fourcc: u32,
    ) -> Result<ScanoutFramebuffer, ScanoutError> {
        framebuffer::create_dumb(
            &self.device,
            &self.registry,
            self.fb_modifiers,
            width,
            height,
            fourcc,
        )
    }

    /// Wraps an existing driver buffer object (surface front buffer,
    /// imported client buffer, or cursor) into a registered framebuffer.
    pub fn framebuffer_from_driver_buffer(
        &self,
        bo: Box<dyn DriverBuffer>,
        origin: DriverOrigin,
        opaque: bool,
    ) -> Result<ScanoutFramebuffer, ScanoutError> {
        framebuffer::from_driver_buffer(
            &self.device,
            &self.registry,
            self.fb_modifiers,
            bo,
            origin,
            opaque,
        )
    }

    /// Imports a dmabuf-described client buffer into a registered
    /// framebuffer.
    pub fn framebuffer_from_dmabuf(
        &self,
        attributes: &DmabufAttributes,
        opaque: bool,
    ) -> Result<ScanoutFramebuffer, ScanoutError> {
        let driver = self.driver.as_ref().ok_or_else(|| {
            ScanoutError::ImportRejected("no driver device for dmabuf import".to_string())
        })?;
        framebuffer::from_dmabuf(
            &self.device,
            driver,
            &self.registry,
            self.fb_modifiers,
            attributes,
            opaque,
        )
    }

    /// Probes whether a dmabuf could be scanned out, by running the full
    /// import/registration cycle and immediately discarding the result.
    pub fn can_scanout_dmabuf(&self, attributes: &DmabufAttributes) -> bool {
        match self.framebuffer_from_dmabuf(attributes, false) {
            Ok(_fb) => true,
            Err(e) => {
                debug!(
                    width = attributes.width,
                    height = attributes.height,
                    error = %e,
                    "dmabuf cannot be scanned out"
                );
                false
            }
        }
    }

    /// Resolves a compositor view to a scanout framebuffer, if eligible.
    pub fn framebuffer_for_view(&self, view: &ViewSnapshot) -> Option<ScanoutFramebuffer> {
        view::framebuffer_for_view(self, view)
    }

    /// Drops every kernel registration ahead of losing display-device
    /// mastership.
    pub fn suspend(&self) {
        self.registry.suspend();
    }

    /// Restores kernel registrations after regaining mastership.
    pub fn resume(&self) {
        self.registry.resume();
    }
}
