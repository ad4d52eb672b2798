//! Logical device, queues and resource factories.

use crate::buffer::Buffer;
use crate::command::CommandPool;
use crate::descriptors::{DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder};
use crate::error::{GpuError, Result};
use crate::image::{Image, ImageDesc, ImageView};
use crate::instance::Instance;
use crate::physical_device::PhysicalDeviceInfo;
use crate::pipeline::{GraphicsPipeline, GraphicsPipelineDesc};
use crate::render_pass::{Framebuffer, RenderPass, RenderPassDesc};
use crate::sampler::{Sampler, SamplerDesc};
use crate::shader::ShaderModule;
use crate::surface::Surface;
use crate::swapchain::{Swapchain, SwapchainDesc};
use crate::sync::{Fence, Semaphore, SubmitBatch};
use crate::tracker::ResourceTracker;
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

/// A device queue and the family it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue {
    handle: vk::Queue,
    family: u32,
}

impl Queue {
    /// Raw queue handle.
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }

    /// Queue family index.
    pub fn family(&self) -> u32 {
        self.family
    }
}

/// The logical device.
///
/// Exactly one per application. Every resource holds an `Arc` back-reference,
/// so the device is destroyed only after all of them.
pub struct LogicalDevice {
    handle: ash::Device,
    physical: PhysicalDeviceInfo,
    graphics_queue: Queue,
    present_queue: Option<Queue>,
    swapchain_loader: Option<ash::khr::swapchain::Device>,
    sampler_anisotropy: bool,
    tracker: ResourceTracker,
    instance: Arc<Instance>,
}

impl LogicalDevice {
    /// Create the device with one queue per distinct family.
    ///
    /// `VK_KHR_swapchain` is enabled only when the adapter was selected with
    /// a surface; `samplerAnisotropy` only when the adapter supports it.
    pub fn new(instance: &Arc<Instance>, physical: PhysicalDeviceInfo) -> Result<Arc<Self>> {
        let families = physical.queue_families;
        let unique_families = families.unique_families();

        let queue_priority = 1.0_f32;
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(std::slice::from_ref(&queue_priority))
            })
            .collect();

        let mut extensions: Vec<&CStr> = Vec::new();
        if physical.supports_presentation() {
            if !physical.capabilities.has_extension("VK_KHR_swapchain") {
                return Err(GpuError::MissingExtension("VK_KHR_swapchain".into()));
            }
            extensions.push(ash::khr::swapchain::NAME);
        }
        if physical.capabilities.has_extension("VK_KHR_portability_subset") {
            extensions.push(ash::khr::portability_subset::NAME);
        }
        let extension_names: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();

        let sampler_anisotropy = physical.capabilities.sampler_anisotropy;
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(sampler_anisotropy);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        // SAFETY: the physical device was enumerated from this instance and
        // every pointer in create_info refers to locals.
        let handle = unsafe {
            instance
                .raw()
                .create_device(physical.handle, &create_info, None)
        }
        .inspect_err(|e| tracing::error!("vkCreateDevice failed: {e}"))?;

        // SAFETY: each family was requested with one queue above.
        let queue = |family: u32| Queue {
            handle: unsafe { handle.get_device_queue(family, 0) },
            family,
        };
        let graphics_queue = queue(families.graphics);
        let present_queue = families.present.map(queue);

        let swapchain_loader = physical
            .supports_presentation()
            .then(|| ash::khr::swapchain::Device::new(instance.raw(), &handle));

        tracing::info!(
            device = %physical.capabilities.device_name,
            queue_families = ?unique_families,
            sampler_anisotropy,
            "Logical device created"
        );

        Ok(Arc::new(Self {
            handle,
            physical,
            graphics_queue,
            present_queue,
            swapchain_loader,
            sampler_anisotropy,
            tracker: ResourceTracker::new(),
            instance: Arc::clone(instance),
        }))
    }

    /// The device function table.
    pub fn raw(&self) -> &ash::Device {
        &self.handle
    }

    /// The raw device handle.
    pub fn handle(&self) -> vk::Device {
        self.handle.handle()
    }

    /// The owning instance.
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Adapter information the device was created from.
    pub fn physical(&self) -> &PhysicalDeviceInfo {
        &self.physical
    }

    /// Memory-type table of the adapter.
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.physical.memory_properties
    }

    /// The graphics queue.
    pub fn graphics_queue(&self) -> Queue {
        self.graphics_queue
    }

    /// The present queue, if the device was created for a surface.
    pub fn present_queue(&self) -> Option<Queue> {
        self.present_queue
    }

    /// Swapchain extension loader.
    pub fn swapchain_loader(&self) -> Result<&ash::khr::swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .ok_or_else(|| GpuError::MissingExtension("VK_KHR_swapchain".into()))
    }

    /// Whether `samplerAnisotropy` was enabled.
    pub fn sampler_anisotropy_enabled(&self) -> bool {
        self.sampler_anisotropy
    }

    /// Live-object counters.
    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Block until every queue is idle.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: the device is alive.
        unsafe { self.handle.device_wait_idle() }?;
        Ok(())
    }

    /// Block until `queue` is idle.
    pub fn queue_wait_idle(&self, queue: Queue) -> Result<()> {
        // SAFETY: the queue was retrieved from this device.
        unsafe { self.handle.queue_wait_idle(queue.handle) }?;
        Ok(())
    }

    /// Submit `batch` to `queue` without command buffers.
    ///
    /// The waits are consumed and the signals and fence fire once they are
    /// satisfied; used to retire an acquired image's semaphore when no
    /// commands were recorded for it.
    pub fn submit_empty(&self, queue: Queue, batch: &SubmitBatch<'_>) -> Result<()> {
        let (wait_semaphores, wait_stages) = batch.wait_handles();
        let signal_semaphores = batch.signal_handles();
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the queue belongs to this device and every handle in the
        // batch is borrowed for the duration of the call.
        unsafe {
            self.handle
                .queue_submit(queue.handle, &[submit_info], batch.fence_handle())
        }?;
        Ok(())
    }

    /// Create a buffer with its own memory allocation.
    pub fn create_buffer(
        self: &Arc<Self>,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Buffer> {
        Buffer::new(self, size, usage, properties)
    }

    /// Create an image with its own memory allocation.
    pub fn create_image(self: &Arc<Self>, desc: &ImageDesc) -> Result<Arc<Image>> {
        Image::new(self, desc).map(Arc::new)
    }

    /// Create a view over all mip levels of `image`.
    pub fn create_image_view(
        self: &Arc<Self>,
        image: &Arc<Image>,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Arc<ImageView>> {
        ImageView::new(self, image, aspect).map(Arc::new)
    }

    /// Create a command pool for `queue`.
    pub fn create_command_pool(
        self: &Arc<Self>,
        queue: Queue,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Arc<CommandPool>> {
        CommandPool::new(self, queue, flags)
    }

    /// Create a fence.
    pub fn create_fence(self: &Arc<Self>, signaled: bool) -> Result<Fence> {
        Fence::new(self, signaled)
    }

    /// Create a binary semaphore.
    pub fn create_semaphore(self: &Arc<Self>) -> Result<Semaphore> {
        Semaphore::new(self)
    }

    /// Create the color/depth(/resolve) render pass.
    pub fn create_render_pass(self: &Arc<Self>, desc: &RenderPassDesc) -> Result<Arc<RenderPass>> {
        RenderPass::new(self, desc)
    }

    /// Create a framebuffer over `attachments` for `render_pass`.
    pub fn create_framebuffer(
        self: &Arc<Self>,
        render_pass: &Arc<RenderPass>,
        attachments: Vec<Arc<ImageView>>,
        extent: vk::Extent2D,
    ) -> Result<Framebuffer> {
        Framebuffer::new(self, render_pass, attachments, extent)
    }

    /// Create a shader module from SPIR-V bytes.
    pub fn create_shader_module(
        self: &Arc<Self>,
        spirv: &[u8],
        stage: vk::ShaderStageFlags,
        entry_point: &str,
    ) -> Result<ShaderModule> {
        ShaderModule::new(self, spirv, stage, entry_point)
    }

    /// Create a graphics pipeline.
    pub fn create_pipeline(
        self: &Arc<Self>,
        desc: &GraphicsPipelineDesc,
        shaders: &[&ShaderModule],
    ) -> Result<GraphicsPipeline> {
        GraphicsPipeline::new(self, desc, shaders)
    }

    /// Create a swapchain and its attachments on `surface`.
    pub fn create_swapchain(
        self: &Arc<Self>,
        surface: &Arc<Surface>,
        render_pass: &Arc<RenderPass>,
        desc: &SwapchainDesc,
    ) -> Result<Swapchain> {
        Swapchain::new(self, surface, render_pass, desc)
    }

    /// Create a sampler.
    pub fn create_sampler(self: &Arc<Self>, desc: &SamplerDesc) -> Result<Sampler> {
        Sampler::new(self, desc)
    }

    /// Create a descriptor pool.
    pub fn create_descriptor_pool(
        self: &Arc<Self>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Arc<DescriptorPool>> {
        DescriptorPool::new(self, max_sets, pool_sizes)
    }

    /// Create a descriptor set layout.
    pub fn create_descriptor_set_layout(
        self: &Arc<Self>,
        builder: DescriptorSetLayoutBuilder,
    ) -> Result<Arc<DescriptorSetLayout>> {
        builder.build(self)
    }

    /// Allocate one descriptor set from `pool`.
    pub fn create_descriptor_set(
        self: &Arc<Self>,
        pool: &Arc<DescriptorPool>,
        layout: &Arc<DescriptorSetLayout>,
    ) -> Result<DescriptorSet> {
        pool.allocate(layout)
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            tracing::error!("wait_idle failed during device teardown: {e}");
        }

        let leaks = self.tracker.leaks();
        if !leaks.is_empty() {
            tracing::error!(?leaks, "Device destroyed with live dependent objects");
        }
        debug_assert!(
            leaks.is_empty() || std::thread::panicking(),
            "device destroyed before its dependents: {leaks:?}"
        );

        tracing::debug!("Destroying logical device {:?}", self.handle.handle());
        // SAFETY: the device is idle and no wrapper references it any more.
        unsafe {
            self.handle.destroy_device(None);
        }
    }
}
