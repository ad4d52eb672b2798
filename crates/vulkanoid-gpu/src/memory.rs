//! Device memory allocation.
//!
//! One `vkAllocateMemory` per resource, no sub-allocation. Every buffer and
//! image exclusively owns its [`DeviceMemory`].

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::tracker::ResourceKind;
use ash::vk;
use std::sync::Arc;

/// Find the first memory type whose bit is set in `type_bits` and whose
/// property flags contain `required`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(GpuError::NoMatchingMemoryType {
            type_bits,
            properties: required,
        })
}

/// A single device memory allocation.
pub struct DeviceMemory {
    device: Arc<LogicalDevice>,
    handle: vk::DeviceMemory,
    size: u64,
    properties: vk::MemoryPropertyFlags,
}

impl DeviceMemory {
    /// Allocate memory matching `requirements` with at least `properties`.
    pub fn allocate(
        device: &Arc<LogicalDevice>,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let type_index = find_memory_type(
            device.memory_properties(),
            requirements.memory_type_bits,
            properties,
        )
        .inspect_err(|e| {
            tracing::error!(size = requirements.size, ?properties, "Memory allocation failed: {e}");
        })?;

        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(type_index);

        // SAFETY: the device is alive for as long as this Arc is held.
        let handle = unsafe { device.raw().allocate_memory(&alloc_info, None) }.map_err(|e| {
            tracing::error!(size = requirements.size, ?properties, "vkAllocateMemory failed: {e}");
            match e {
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                    GpuError::AllocationFailed(format!("{} bytes: {e}", requirements.size))
                }
                other => other.into(),
            }
        })?;

        device.tracker().created(ResourceKind::Memory);
        tracing::debug!(
            size = requirements.size,
            type_index,
            ?properties,
            "Allocated device memory {handle:?}"
        );

        Ok(Self {
            device: Arc::clone(device),
            handle,
            size: requirements.size,
            properties,
        })
    }

    /// Raw memory handle.
    pub fn handle(&self) -> vk::DeviceMemory {
        self.handle
    }

    /// Allocation size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Property flags requested at allocation time.
    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Whether the host can map this memory.
    pub fn is_host_visible(&self) -> bool {
        self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Whether host writes are visible without an explicit flush.
    pub fn is_host_coherent(&self) -> bool {
        self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Map the whole allocation.
    ///
    /// The mapping lives as long as the returned guard. Taking `&mut self`
    /// rules out a second concurrent mapping.
    pub fn map(&mut self) -> Result<MappedMemory<'_>> {
        if !self.is_host_visible() {
            return Err(GpuError::InvalidState(format!(
                "cannot map memory with properties {:?}",
                self.properties
            )));
        }

        // SAFETY: the memory is host-visible and not currently mapped.
        let ptr = unsafe {
            self.device
                .raw()
                .map_memory(self.handle, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }?
        .cast::<u8>();

        let mapped = MappedMemory {
            memory: self,
            ptr,
            finished: false,
        };
        if !mapped.memory.is_host_coherent() {
            mapped.invalidate()?;
        }
        Ok(mapped)
    }

    /// Free the allocation. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::DeviceMemory::null() {
            return;
        }
        tracing::debug!("Freeing device memory {:?}", self.handle);
        // SAFETY: the owning resource was destroyed first and no mapping is
        // live (a mapping borrows self mutably).
        unsafe {
            self.device.raw().free_memory(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::Memory);
        self.handle = vk::DeviceMemory::null();
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A scoped host mapping. Unmapped on drop; the pointer never escapes.
pub struct MappedMemory<'a> {
    memory: &'a mut DeviceMemory,
    ptr: *mut u8,
    finished: bool,
}

impl MappedMemory<'_> {
    /// Mapped size in bytes.
    pub fn len(&self) -> usize {
        self.memory.size as usize
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.memory.size == 0
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > self.len() {
            return Err(GpuError::BufferOverflow {
                data_size: end as u64,
                capacity: self.memory.size,
            });
        }
        Ok(())
    }

    /// Copy `bytes` into the mapping at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        // SAFETY: the range was checked against the mapped size and the
        // mapping is exclusively borrowed.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
        Ok(())
    }

    /// Copy bytes out of the mapping at `offset`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check_range(offset, out.len())?;
        // SAFETY: the range was checked against the mapped size.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    fn whole_range(&self) -> vk::MappedMemoryRange<'static> {
        vk::MappedMemoryRange::default()
            .memory(self.memory.handle)
            .offset(0)
            .size(vk::WHOLE_SIZE)
    }

    fn invalidate(&self) -> Result<()> {
        // SAFETY: the range covers the live mapping.
        unsafe {
            self.memory
                .device
                .raw()
                .invalidate_mapped_memory_ranges(&[self.whole_range()])
        }?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        // SAFETY: the range covers the live mapping.
        unsafe {
            self.memory
                .device
                .raw()
                .flush_mapped_memory_ranges(&[self.whole_range()])
        }?;
        Ok(())
    }

    fn unmap(&mut self) {
        if self.finished {
            return;
        }
        // SAFETY: the memory is mapped exactly once, by this guard.
        unsafe {
            self.memory.device.raw().unmap_memory(self.memory.handle);
        }
        self.finished = true;
    }

    /// Flush host writes (non-coherent memory only) and unmap.
    pub fn finish(mut self) -> Result<()> {
        let flushed = if self.memory.is_host_coherent() {
            Ok(())
        } else {
            self.flush()
        };
        self.unmap();
        flushed
    }
}

impl Drop for MappedMemory<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if !self.memory.is_host_coherent() {
            if let Err(e) = self.flush() {
                tracing::error!("Failed to flush mapped memory on drop: {e}");
            }
        }
        self.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn empty_type_mask_never_matches() {
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        for required in [
            vk::MemoryPropertyFlags::empty(),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
        ] {
            assert!(matches!(
                find_memory_type(&props, 0, required),
                Err(GpuError::NoMatchingMemoryType { type_bits: 0, .. })
            ));
        }
    }

    #[test]
    fn first_superset_match_wins() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            host | vk::MemoryPropertyFlags::HOST_CACHED,
            host,
        ]);

        assert_eq!(find_memory_type(&props, 0b111, host).ok(), Some(1));
        // Type 1 is masked out, so the plain host type is next.
        assert_eq!(find_memory_type(&props, 0b101, host).ok(), Some(2));
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).ok(),
            Some(0)
        );
    }

    #[test]
    fn types_beyond_count_are_ignored() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }
}
