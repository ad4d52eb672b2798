//! Images, image views, layout transitions and mip-chain generation.

use crate::buffer::Buffer;
use crate::command::{CommandBuffer, CommandPool};
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::memory::DeviceMemory;
use crate::tracker::ResourceKind;
use ash::vk;
use std::sync::Arc;

/// Image creation parameters.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub properties: vk::MemoryPropertyFlags,
}

impl ImageDesc {
    /// Single-level, single-sample, optimally tiled, device-local image.
    pub fn new(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
        }
    }

    #[must_use]
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    #[must_use]
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    #[must_use]
    pub fn with_tiling(mut self, tiling: vk::ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: vk::MemoryPropertyFlags) -> Self {
        self.properties = properties;
        self
    }

    /// Check that the mip count lies in `1..=mip_level_count(extent)`.
    pub fn validate(&self) -> Result<()> {
        let full_chain = mip_level_count(self.extent.width, self.extent.height);
        if self.mip_levels == 0 || self.mip_levels > full_chain {
            return Err(GpuError::InvalidState(format!(
                "{} mip levels requested for a {}x{} image (1..={full_chain} allowed)",
                self.mip_levels, self.extent.width, self.extent.height
            )));
        }
        Ok(())
    }
}

/// Access and stage masks for one layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the supported layout transitions.
///
/// The table is closed: any other pair fails with
/// [`GpuError::UnsupportedLayoutTransition`].
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    use vk::ImageLayout as L;

    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        },
        (old, new) => {
            tracing::error!(?old, ?new, "Unsupported layout transition");
            return Err(GpuError::UnsupportedLayoutTransition { old, new });
        }
    };
    Ok(masks)
}

/// Whether `format` carries a stencil component.
pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::S8_UINT
    )
}

/// Aspect mask a transition into `new` must use for `format`.
pub fn transition_aspect(format: vk::Format, new: vk::ImageLayout) -> vk::ImageAspectFlags {
    if new == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if has_stencil(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Full mip-chain length: `floor(log2(max(width, height))) + 1`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// One mip step: half size, floored at 1.
pub const fn next_mip_extent(width: u32, height: u32) -> (u32, u32) {
    (
        if width > 1 { width / 2 } else { 1 },
        if height > 1 { height / 2 } else { 1 },
    )
}

/// Extents of every level of a full mip chain, base level first.
pub fn mip_extents(width: u32, height: u32) -> Vec<(u32, u32)> {
    let count = mip_level_count(width, height);
    std::iter::successors(Some((width.max(1), height.max(1))), |&(w, h)| {
        Some(next_mip_extent(w, h))
    })
    .take(count as usize)
    .collect()
}

/// First candidate whose tiling features contain `features`.
pub fn find_supported_format(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            // SAFETY: the physical device belongs to this instance.
            let props =
                unsafe { instance.get_physical_device_format_properties(physical, format) };
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or(GpuError::NoSupportedFormat)
}

/// A 2D image and the memory bound to it.
pub struct Image {
    handle: vk::Image,
    memory: DeviceMemory,
    format: vk::Format,
    extent: vk::Extent2D,
    mip_levels: u32,
    samples: vk::SampleCountFlags,
    usage: vk::ImageUsageFlags,
    device: Arc<LogicalDevice>,
}

impl Image {
    /// Create the image, allocate memory for it and bind.
    pub fn new(device: &Arc<LogicalDevice>, desc: &ImageDesc) -> Result<Self> {
        desc.validate()?;
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(desc.samples);

        // SAFETY: the device outlives the image through the Arc.
        let handle = unsafe { device.raw().create_image(&create_info, None) }.map_err(|e| {
            tracing::error!(?desc, "vkCreateImage failed: {e}");
            GpuError::from(e)
        })?;
        device.tracker().created(ResourceKind::Image);

        // SAFETY: handle was created above.
        let requirements = unsafe { device.raw().get_image_memory_requirements(handle) };
        let memory = match DeviceMemory::allocate(device, requirements, desc.properties) {
            Ok(memory) => memory,
            Err(e) => {
                // SAFETY: the image has no memory and is not in use.
                unsafe { device.raw().destroy_image(handle, None) };
                device.tracker().destroyed(ResourceKind::Image);
                return Err(e);
            }
        };

        // SAFETY: fresh image, fresh allocation sized from its requirements.
        if let Err(e) = unsafe { device.raw().bind_image_memory(handle, memory.handle(), 0) } {
            // SAFETY: as above; memory is freed when it drops.
            unsafe { device.raw().destroy_image(handle, None) };
            device.tracker().destroyed(ResourceKind::Image);
            return Err(e.into());
        }

        tracing::debug!(
            width = desc.extent.width,
            height = desc.extent.height,
            format = ?desc.format,
            mip_levels = desc.mip_levels,
            samples = ?desc.samples,
            usage = ?desc.usage,
            "Created image {handle:?}"
        );

        Ok(Self {
            handle,
            memory,
            format: desc.format,
            extent: desc.extent,
            mip_levels: desc.mip_levels,
            samples: desc.samples,
            usage: desc.usage,
            device: Arc::clone(device),
        })
    }

    /// Upload tightly packed RGBA8 pixels into a sampled image.
    ///
    /// With `mipmaps` the full chain is generated on the GPU; the result is
    /// left in `SHADER_READ_ONLY_OPTIMAL` either way.
    pub fn from_rgba8(
        device: &Arc<LogicalDevice>,
        pool: &Arc<CommandPool>,
        width: u32,
        height: u32,
        pixels: &[u8],
        format: vk::Format,
        mipmaps: bool,
    ) -> Result<Arc<Self>> {
        let expected = u64::from(width) * u64::from(height) * 4;
        if pixels.len() as u64 != expected {
            return Err(GpuError::BufferOverflow {
                data_size: pixels.len() as u64,
                capacity: expected,
            });
        }

        let mut staging = Buffer::new(
            device,
            expected,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.upload_bytes(pixels)?;

        let mip_levels = if mipmaps {
            mip_level_count(width, height)
        } else {
            1
        };
        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image = Self::new(
            device,
            &ImageDesc::new(vk::Extent2D { width, height }, format, usage)
                .with_mip_levels(mip_levels),
        )?;

        image.transition_layout(
            pool,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        staging.copy_to_image(pool, &image)?;
        if mip_levels > 1 {
            image.generate_mipmaps(pool)?;
        } else {
            image.transition_layout(
                pool,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }

        Ok(Arc::new(image))
    }

    /// Raw image handle.
    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn usage(&self) -> vk::ImageUsageFlags {
        self.usage
    }

    /// Bound memory.
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    /// Record a barrier for a table transition covering every mip level.
    pub fn record_transition(
        &self,
        cmd: &mut CommandBuffer,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<()> {
        let masks = transition_masks(old, new)?;
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.handle)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(transition_aspect(self.format, new))
                    .base_mip_level(0)
                    .level_count(self.mip_levels)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        cmd.pipeline_barrier(masks.src_stage, masks.dst_stage, &[barrier]);
        Ok(())
    }

    /// Transition the image with a blocking one-time submission.
    pub fn transition_layout(
        &self,
        pool: &Arc<CommandPool>,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<()> {
        // Validate before touching the queue.
        transition_masks(old, new)?;
        pool.one_time_submit(|cmd| self.record_transition(cmd, old, new))
    }

    /// Fill levels `1..mip_levels` by successive half-size linear blits.
    ///
    /// Expects every level in `TRANSFER_DST_OPTIMAL`; leaves every level in
    /// `SHADER_READ_ONLY_OPTIMAL`.
    pub fn generate_mipmaps(&self, pool: &Arc<CommandPool>) -> Result<()> {
        let physical = self.device.physical().handle;
        // SAFETY: the physical device belongs to the device's instance.
        let props = unsafe {
            self.device
                .instance()
                .raw()
                .get_physical_device_format_properties(physical, self.format)
        };
        if !props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            tracing::error!(format = ?self.format, "Format does not support linear blitting");
            return Err(GpuError::UnsupportedBlitFormat(self.format));
        }

        pool.one_time_submit(|cmd| {
            self.record_mipmaps(cmd);
            Ok(())
        })
    }

    fn record_mipmaps(&self, cmd: &mut CommandBuffer) {
        let level_barrier = |level: u32| {
            vk::ImageMemoryBarrier::default()
                .image(self.handle)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(level)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                )
        };
        let layers = |level: u32| {
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(level)
                .base_array_layer(0)
                .layer_count(1)
        };

        let (mut width, mut height) = (self.extent.width, self.extent.height);
        for level in 1..self.mip_levels {
            let to_src = level_barrier(level - 1)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::TRANSFER_READ);
            cmd.pipeline_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                &[to_src],
            );

            let (next_width, next_height) = next_mip_extent(width, height);
            let blit = vk::ImageBlit::default()
                .src_subresource(layers(level - 1))
                .src_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: width as i32,
                        y: height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(layers(level))
                .dst_offsets([
                    vk::Offset3D::default(),
                    vk::Offset3D {
                        x: next_width as i32,
                        y: next_height as i32,
                        z: 1,
                    },
                ]);
            cmd.blit_image(
                self.handle,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            let to_read = level_barrier(level - 1)
                .old_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .src_access_mask(vk::AccessFlags::TRANSFER_READ)
                .dst_access_mask(vk::AccessFlags::SHADER_READ);
            cmd.pipeline_barrier(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                &[to_read],
            );

            (width, height) = (next_width, next_height);
        }

        let last = level_barrier(self.mip_levels - 1)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        cmd.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            &[last],
        );
    }

    /// Destroy the image and free its memory. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::Image::null() {
            return;
        }
        tracing::debug!("Destroying image {:?}", self.handle);
        // SAFETY: every view holds an Arc<Image>, so none is alive; callers
        // ensure no in-flight work references the image.
        unsafe {
            self.device.raw().destroy_image(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::Image);
        self.handle = vk::Image::null();
        self.memory.destroy();
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A view over an image.
///
/// Views over owned images keep the image alive; views over swapchain images
/// are destroyed by the swapchain before it releases its images.
pub struct ImageView {
    handle: vk::ImageView,
    image: Option<Arc<Image>>,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    level_count: u32,
    device: Arc<LogicalDevice>,
}

impl ImageView {
    /// View over every mip level of `image`.
    pub fn new(
        device: &Arc<LogicalDevice>,
        image: &Arc<Image>,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let mut view = Self::create(
            device,
            image.handle(),
            image.format(),
            aspect,
            image.mip_levels(),
        )?;
        view.image = Some(Arc::clone(image));
        Ok(view)
    }

    /// View over an image the view does not own (a swapchain image).
    pub(crate) fn for_raw_image(
        device: &Arc<LogicalDevice>,
        image: vk::Image,
        format: vk::Format,
    ) -> Result<Self> {
        Self::create(device, image, format, vk::ImageAspectFlags::COLOR, 1)
    }

    fn create(
        device: &Arc<LogicalDevice>,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        level_count: u32,
    ) -> Result<Self> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(level_count)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        // SAFETY: the image is alive for the duration of the call.
        let handle = unsafe { device.raw().create_image_view(&create_info, None) }.map_err(|e| {
            tracing::error!(?format, ?aspect, "vkCreateImageView failed: {e}");
            GpuError::from(e)
        })?;
        device.tracker().created(ResourceKind::ImageView);
        tracing::debug!(?format, ?aspect, level_count, "Created image view {handle:?}");

        Ok(Self {
            handle,
            image: None,
            format,
            aspect,
            level_count,
            device: Arc::clone(device),
        })
    }

    /// Raw view handle.
    pub fn handle(&self) -> vk::ImageView {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn level_count(&self) -> u32 {
        self.level_count
    }

    /// The viewed image, when owned.
    pub fn image(&self) -> Option<&Arc<Image>> {
        self.image.as_ref()
    }

    /// Destroy the view. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::ImageView::null() {
            return;
        }
        tracing::debug!("Destroying image view {:?}", self.handle);
        // SAFETY: every framebuffer using the view holds an Arc to it and is
        // gone.
        unsafe {
            self.device.raw().destroy_image_view(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::ImageView);
        self.handle = vk::ImageView::null();
        self.image = None;
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_transitions() {
        let upload = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .ok();
        assert_eq!(
            upload.map(|m| (m.src_stage, m.dst_stage, m.dst_access)),
            Some((
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::TRANSFER_WRITE
            ))
        );

        let sampled = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .ok();
        assert_eq!(
            sampled.map(|m| (m.src_access, m.dst_access, m.dst_stage)),
            Some((
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::FRAGMENT_SHADER
            ))
        );

        let depth = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .ok();
        assert_eq!(
            depth.map(|m| m.dst_stage),
            Some(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        );
    }

    #[test]
    fn undefined_to_shader_read_is_rejected() {
        let result = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert!(matches!(
            result,
            Err(GpuError::UnsupportedLayoutTransition {
                old: vk::ImageLayout::UNDEFINED,
                new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            })
        ));
    }

    #[test]
    fn depth_attachment_transition() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        )
        .ok();
        assert_eq!(
            masks,
            Some(TransitionMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            })
        );
    }

    #[test]
    fn zero_or_excess_mip_levels_are_rejected() {
        let extent = vk::Extent2D {
            width: 256,
            height: 256,
        };
        let mut desc = ImageDesc::new(
            extent,
            vk::Format::R8G8B8A8_SRGB,
            vk::ImageUsageFlags::SAMPLED,
        );
        assert!(desc.validate().is_ok());
        assert!(desc.with_mip_levels(9).validate().is_ok());

        desc.mip_levels = 0;
        assert!(matches!(desc.validate(), Err(GpuError::InvalidState(_))));
        desc.mip_levels = 10;
        assert!(matches!(desc.validate(), Err(GpuError::InvalidState(_))));
    }

    #[test]
    fn reverse_transition_is_rejected() {
        assert!(transition_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .is_err());
    }

    #[test]
    fn mip_chain_for_256_has_9_levels() {
        assert_eq!(mip_level_count(256, 256), 9);
        let extents = mip_extents(256, 256);
        assert_eq!(extents.len(), 9);
        assert_eq!(extents.first(), Some(&(256, 256)));
        assert_eq!(extents.last(), Some(&(1, 1)));
        for pair in extents.windows(2) {
            assert_eq!(pair[1], (pair[0].0 / 2, pair[0].1 / 2));
        }
    }

    #[test]
    fn mip_chain_for_non_square_floors_at_one() {
        assert_eq!(mip_level_count(512, 4), 10);
        let extents = mip_extents(512, 4);
        assert_eq!(extents[2], (128, 1));
        assert_eq!(extents.last(), Some(&(1, 1)));
        assert_eq!(mip_level_count(1, 1), 1);
        assert_eq!(mip_level_count(300, 200), 9);
    }

    #[test]
    fn depth_aspect_includes_stencil_when_present() {
        let layout = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        assert_eq!(
            transition_aspect(vk::Format::D32_SFLOAT, layout),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            transition_aspect(vk::Format::D24_UNORM_S8_UINT, layout),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            transition_aspect(
                vk::Format::R8G8B8A8_SRGB,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL
            ),
            vk::ImageAspectFlags::COLOR
        );
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }
}
