//! GPU context management.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::instance::{Instance, InstanceDesc};
use crate::physical_device::PhysicalDeviceSelector;
use crate::surface::{Surface, SurfaceProvider};
use crate::swapchain::{Swapchain, SwapchainDesc, DEFAULT_SURFACE_FORMAT};
use ash::vk;
use std::sync::Arc;

/// Instance, optional surface and logical device for one adapter.
pub struct GpuContext {
    // Field order is drop order: device, surface, instance.
    device: Arc<LogicalDevice>,
    surface: Option<Arc<Surface>>,
    instance: Arc<Instance>,
    preferred_format: vk::SurfaceFormatKHR,
    vsync: bool,
}

impl GpuContext {
    /// Get the logical device.
    pub fn device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    /// Get the presentation surface, if the context was built for one.
    pub fn surface(&self) -> Option<&Arc<Surface>> {
        self.surface.as_ref()
    }

    /// Get the instance.
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Surface format swapchains on this context will use.
    pub fn surface_format(&self) -> Result<vk::SurfaceFormatKHR> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("context has no surface".into()))?;
        Swapchain::surface_format(&self.device, surface, self.preferred_format)
    }

    /// Swapchain parameters for a `width`x`height` window.
    pub fn swapchain_desc(&self, width: u32, height: u32) -> SwapchainDesc {
        SwapchainDesc::new(width, height)
            .with_preferred_format(self.preferred_format)
            .with_vsync(self.vsync)
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    validation: bool,
    entry: Option<ash::Entry>,
    adapter_index: usize,
    preferred_format: vk::SurfaceFormatKHR,
    vsync: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Vulkanoid".to_string(),
            validation: cfg!(debug_assertions),
            entry: None,
            adapter_index: 0,
            preferred_format: DEFAULT_SURFACE_FORMAT,
            vsync: true,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    /// Use an already loaded entry-point table instead of the system loader.
    pub fn entry(mut self, entry: ash::Entry) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Pick the `index`-th capable adapter instead of the first.
    pub fn adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Surface format to request when it is supported.
    pub fn preferred_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.preferred_format = format;
        self
    }

    /// Present with FIFO (`true`) or prefer MAILBOX (`false`).
    pub fn vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Build a context without presentation.
    pub fn build(self) -> Result<GpuContext> {
        self.build_inner(None)
    }

    /// Build a context that presents to `provider`'s window.
    ///
    /// # Safety
    /// The window must outlive the returned context.
    pub unsafe fn build_for_surface(self, provider: &dyn SurfaceProvider) -> Result<GpuContext> {
        self.build_inner(Some(provider))
    }

    fn build_inner(self, provider: Option<&dyn SurfaceProvider>) -> Result<GpuContext> {
        let entry = match self.entry {
            Some(entry) => entry,
            // SAFETY: the loaded library stays alive inside the Entry.
            None => unsafe { ash::Entry::load() }
                .map_err(|e| GpuError::Loading(format!("Failed to load Vulkan: {e}")))?,
        };

        let extensions = match provider {
            Some(provider) => provider.required_extensions()?,
            None => Vec::new(),
        };
        let instance = Instance::new(
            entry,
            &InstanceDesc {
                app_name: self.app_name,
                validation: self.validation,
                extensions,
            },
        )?;

        let surface = match provider {
            // SAFETY: forwarded from build_for_surface.
            Some(provider) => Some(Arc::new(unsafe { Surface::new(&instance, provider) }?)),
            None => None,
        };

        let physical =
            PhysicalDeviceSelector::select(&instance, surface.as_deref(), self.adapter_index)?;
        let device = LogicalDevice::new(&instance, physical)?;

        Ok(GpuContext {
            device,
            surface,
            instance,
            preferred_format: self.preferred_format,
            vsync: self.vsync,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A headless device with validation on, shared by GPU tests.
    pub fn headless_device() -> Arc<LogicalDevice> {
        let context = GpuContextBuilder::new()
            .app_name("vulkanoid-test")
            .validation(true)
            .build()
            .unwrap();
        Arc::clone(context.device())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::headless_device;
    use super::*;
    use crate::buffer::Buffer;
    use crate::image::{mip_level_count, Image};
    use crate::sync::{FenceStatus, SubmitBatch};

    #[test]
    fn builder_defaults() {
        let builder = GpuContextBuilder::new();
        assert_eq!(builder.app_name, "Vulkanoid");
        assert_eq!(builder.validation, cfg!(debug_assertions));
        assert_eq!(builder.adapter_index, 0);
        assert!(builder.vsync);
        assert_eq!(builder.preferred_format.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn headless_context_has_no_present_queue() {
        let context = GpuContextBuilder::new()
            .app_name("vulkanoid-test")
            .validation(true)
            .build()
            .unwrap();
        assert!(context.surface().is_none());
        assert!(context.device().present_queue().is_none());
        assert!(context.surface_format().is_err());
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn unsignaled_fence_polls_not_ready() {
        let device = headless_device();
        let fence = device.create_fence(false).unwrap();
        assert_eq!(fence.wait(0).unwrap(), FenceStatus::NotReady);
        assert_eq!(fence.status().unwrap(), FenceStatus::NotReady);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn submitted_fence_signals() {
        let device = headless_device();
        let pool = device
            .create_command_pool(
                device.graphics_queue(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
            .unwrap();
        let fence = device.create_fence(false).unwrap();
        let mut cmd = pool.allocate().unwrap();
        cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .unwrap();
        cmd.end().unwrap();
        cmd.submit(&SubmitBatch::new().fence(&fence)).unwrap();
        assert_eq!(fence.wait(u64::MAX).unwrap(), FenceStatus::Signaled);
        cmd.reset().unwrap();
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn texture_upload_generates_full_mip_chain() {
        let device = headless_device();
        let pool = device
            .create_command_pool(device.graphics_queue(), vk::CommandPoolCreateFlags::empty())
            .unwrap();
        let pixels = vec![255_u8; 256 * 256 * 4];
        let texture = Image::from_rgba8(
            &device,
            &pool,
            256,
            256,
            &pixels,
            vk::Format::R8G8B8A8_SRGB,
            true,
        )
        .unwrap();
        assert_eq!(texture.mip_levels(), mip_level_count(256, 256));
        assert_eq!(texture.mip_levels(), 9);
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn tracker_balances_after_drop() {
        let device = headless_device();
        {
            let _buffer = Buffer::new(
                &device,
                64,
                vk::BufferUsageFlags::VERTEX_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .unwrap();
            assert!(!device.tracker().leaks().is_empty());
        }
        assert!(device.tracker().leaks().is_empty());
    }
}
