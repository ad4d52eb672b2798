//! Descriptor set layouts, pools, sets and writes.

use crate::buffer::Buffer;
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::image::ImageView;
use crate::sampler::Sampler;
use crate::tracker::ResourceKind;
use ash::vk;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Descriptor set layout builder.
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    #[must_use]
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    #[must_use]
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a storage buffer binding.
    #[must_use]
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a combined image sampler binding.
    #[must_use]
    pub fn combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Pool sizes that hold `sets` sets of this layout.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        pool_sizes_for(&self.bindings, sets)
    }

    /// Build the descriptor set layout.
    pub fn build(self, device: &Arc<LogicalDevice>) -> Result<Arc<DescriptorSetLayout>> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        // SAFETY: the device outlives the layout through the Arc.
        let handle = unsafe { device.raw().create_descriptor_set_layout(&layout_info, None) }?;
        device.tracker().created(ResourceKind::DescriptorSetLayout);
        tracing::debug!(bindings = self.bindings.len(), "Created descriptor set layout {handle:?}");

        Ok(Arc::new(DescriptorSetLayout {
            device: Arc::clone(device),
            handle,
            bindings: self.bindings,
        }))
    }
}

/// Sum descriptor counts per type, times `sets`.
fn pool_sizes_for(
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut per_type: BTreeMap<i32, u32> = BTreeMap::new();
    for binding in bindings {
        *per_type.entry(binding.descriptor_type.as_raw()).or_default() +=
            binding.descriptor_count;
    }
    per_type
        .into_iter()
        .map(|(ty, count)| vk::DescriptorPoolSize {
            ty: vk::DescriptorType::from_raw(ty),
            descriptor_count: count * sets,
        })
        .collect()
}

/// A descriptor set layout.
pub struct DescriptorSetLayout {
    device: Arc<LogicalDevice>,
    handle: vk::DescriptorSetLayout,
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorSetLayout {
    /// Raw layout handle.
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.handle
    }

    /// Pool sizes that hold `sets` sets of this layout.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        pool_sizes_for(&self.bindings, sets)
    }

    /// Destroy the layout. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::DescriptorSetLayout::null() {
            return;
        }
        tracing::debug!("Destroying descriptor set layout {:?}", self.handle);
        // SAFETY: pipelines and sets using the layout hold an Arc to it.
        unsafe {
            self.device
                .raw()
                .destroy_descriptor_set_layout(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::DescriptorSetLayout);
        self.handle = vk::DescriptorSetLayout::null();
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Descriptor pool for allocating descriptor sets.
pub struct DescriptorPool {
    device: Arc<LogicalDevice>,
    handle: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create a new descriptor pool.
    ///
    /// Sets are individually freeable; each [`DescriptorSet`] frees itself.
    pub fn new(
        device: &Arc<LogicalDevice>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Arc<Self>> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);

        // SAFETY: the device outlives the pool through the Arc.
        let handle = unsafe { device.raw().create_descriptor_pool(&create_info, None) }?;
        device.tracker().created(ResourceKind::DescriptorPool);
        tracing::debug!(max_sets, "Created descriptor pool {handle:?}");

        Ok(Arc::new(Self {
            device: Arc::clone(device),
            handle,
        }))
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }

    /// Allocate one descriptor set with `layout`.
    pub fn allocate(self: &Arc<Self>, layout: &Arc<DescriptorSetLayout>) -> Result<DescriptorSet> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.handle)
            .set_layouts(&layouts);

        // SAFETY: pool and layout are alive.
        let handle = unsafe { self.device.raw().allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| match e {
                vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
                    GpuError::AllocationFailed(format!("descriptor set: {e}"))
                }
                other => other.into(),
            })?
            .pop()
            .ok_or_else(|| GpuError::InvalidState("driver returned no descriptor set".into()))?;

        Ok(DescriptorSet {
            pool: Arc::clone(self),
            layout: Arc::clone(layout),
            handle,
        })
    }

    /// Destroy the pool. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::DescriptorPool::null() {
            return;
        }
        tracing::debug!("Destroying descriptor pool {:?}", self.handle);
        // SAFETY: every set holds an Arc to the pool and is gone.
        unsafe {
            self.device.raw().destroy_descriptor_pool(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::DescriptorPool);
        self.handle = vk::DescriptorPool::null();
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A descriptor set allocated from a pool.
pub struct DescriptorSet {
    handle: vk::DescriptorSet,
    layout: Arc<DescriptorSetLayout>,
    pool: Arc<DescriptorPool>,
}

impl DescriptorSet {
    /// Raw set handle.
    pub fn handle(&self) -> vk::DescriptorSet {
        self.handle
    }

    /// Layout the set was allocated with.
    pub fn layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.layout
    }

    /// Start a batch of writes into this set.
    pub fn writer(&self) -> DescriptorWriter<'_> {
        DescriptorWriter {
            set: self,
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Free the set back to its pool. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::DescriptorSet::null() {
            return;
        }
        // SAFETY: the pool was created with FREE_DESCRIPTOR_SET and no
        // in-flight command buffer uses the set.
        let freed = unsafe {
            self.pool
                .device
                .raw()
                .free_descriptor_sets(self.pool.handle, &[self.handle])
        };
        if let Err(e) = freed {
            tracing::error!("Failed to free descriptor set: {e}");
        }
        self.handle = vk::DescriptorSet::null();
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Batched descriptor writes, applied by [`DescriptorWriter::update`].
pub struct DescriptorWriter<'a> {
    set: &'a DescriptorSet,
    buffers: Vec<(u32, vk::DescriptorType, vk::DescriptorBufferInfo)>,
    images: Vec<(u32, vk::DescriptorImageInfo)>,
}

impl DescriptorWriter<'_> {
    /// Bind the whole of `buffer` as a uniform buffer.
    #[must_use]
    pub fn uniform_buffer(mut self, binding: u32, buffer: &Buffer) -> Self {
        self.buffers.push((
            binding,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::DescriptorBufferInfo::default()
                .buffer(buffer.handle())
                .offset(0)
                .range(buffer.size()),
        ));
        self
    }

    /// Bind the whole of `buffer` as a storage buffer.
    #[must_use]
    pub fn storage_buffer(mut self, binding: u32, buffer: &Buffer) -> Self {
        self.buffers.push((
            binding,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::DescriptorBufferInfo::default()
                .buffer(buffer.handle())
                .offset(0)
                .range(vk::WHOLE_SIZE),
        ));
        self
    }

    /// Bind `view` with `sampler`, expecting `SHADER_READ_ONLY_OPTIMAL`.
    #[must_use]
    pub fn combined_image_sampler(mut self, binding: u32, view: &ImageView, sampler: &Sampler) -> Self {
        self.images.push((
            binding,
            vk::DescriptorImageInfo::default()
                .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                .image_view(view.handle())
                .sampler(sampler.handle()),
        ));
        self
    }

    /// Apply every queued write.
    pub fn update(self) {
        let set = self.set.handle;
        let mut writes: Vec<vk::WriteDescriptorSet<'_>> =
            Vec::with_capacity(self.buffers.len() + self.images.len());
        for (binding, ty, info) in &self.buffers {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*ty)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }
        for (binding, info) in &self.images {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info)),
            );
        }
        // SAFETY: every referenced buffer, view and sampler is borrowed for
        // the lifetime of the writer.
        unsafe {
            self.set
                .pool
                .device
                .raw()
                .update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_sum_per_type() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT)
            .uniform_buffer(2, vk::ShaderStageFlags::FRAGMENT);

        let sizes = builder.pool_sizes(3);
        assert_eq!(sizes.len(), 2);
        let count = |ty: vk::DescriptorType| {
            sizes
                .iter()
                .find(|size| size.ty == ty)
                .map(|size| size.descriptor_count)
        };
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER), Some(6));
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(3));
    }

    #[test]
    fn empty_builder_needs_no_pool_space() {
        assert!(DescriptorSetLayoutBuilder::new().pool_sizes(4).is_empty());
    }
}
