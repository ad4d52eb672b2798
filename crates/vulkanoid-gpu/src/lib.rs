//! Vulkan graphics-device abstraction for the Vulkanoid renderer.
//!
//! This crate provides:
//! - Instance, surface and adapter selection
//! - A logical device that creates and tracks every other resource
//! - Buffers, images, views and samplers with dedicated memory
//! - Command pools and state-checked command buffers
//! - Fences, semaphores and per-frame synchronization
//! - Swapchain presentation with out-of-date handling and rebuild
//! - The forward render pass, shader modules, pipelines and descriptors
//!
//! Every wrapper owns one Vulkan handle, keeps its parent alive through an
//! `Arc`, and destroys the handle on drop.

pub mod buffer;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod deferred;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod tracker;
pub mod vertex;

pub use ash::vk;

pub use buffer::Buffer;
pub use capabilities::{DeviceCapabilities, GpuVendor};
pub use command::{CommandBuffer, CommandBufferState, CommandPool};
pub use context::{GpuContext, GpuContextBuilder};
pub use deferred::DeferredDestroyQueue;
pub use descriptors::{
    DescriptorPool, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    DescriptorWriter,
};
pub use device::{LogicalDevice, Queue};
pub use error::{GpuError, Result};
pub use image::{Image, ImageDesc, ImageView};
pub use instance::{Instance, InstanceDesc};
pub use memory::{DeviceMemory, MappedMemory};
pub use physical_device::{PhysicalDeviceInfo, PhysicalDeviceSelector, QueueFamilyIndices};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineDesc, ViewportMode};
pub use render_pass::{Framebuffer, RenderPass, RenderPassDesc};
pub use sampler::{Sampler, SamplerDesc};
pub use shader::ShaderModule;
pub use surface::{Surface, SurfaceProvider};
pub use swapchain::{
    AcquireOutcome, PresentStatus, PresentationState, Swapchain, SwapchainDesc, SwapchainSupport,
};
pub use sync::{Fence, FenceStatus, FrameSync, FrameSyncManager, Semaphore, SubmitBatch};
pub use tracker::{ResourceKind, ResourceTracker};
pub use vertex::{Vertex, VertexLayout};
