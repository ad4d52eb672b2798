//! Buffers and their upload/copy protocol.

use crate::command::CommandPool;
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::image::Image;
use crate::memory::DeviceMemory;
use crate::tracker::ResourceKind;
use ash::vk;
use bytemuck::Pod;
use std::sync::Arc;

/// Check that `data_size` bytes fit into `capacity`.
///
/// Enforced in every build profile.
pub fn check_capacity(data_size: u64, capacity: u64) -> Result<()> {
    if data_size > capacity {
        return Err(GpuError::BufferOverflow {
            data_size,
            capacity,
        });
    }
    Ok(())
}

/// Byte size of `count` values of `T`.
pub fn element_bytes<T>(count: usize) -> Result<u64> {
    std::mem::size_of::<T>()
        .checked_mul(count)
        .map(|bytes| bytes as u64)
        .ok_or_else(|| {
            GpuError::InvalidState(format!(
                "{count} elements of {} bytes overflow the buffer size",
                std::mem::size_of::<T>()
            ))
        })
}

/// A buffer and the memory bound to it.
pub struct Buffer {
    handle: vk::Buffer,
    memory: DeviceMemory,
    size: u64,
    usage: vk::BufferUsageFlags,
    device: Arc<LogicalDevice>,
}

impl Buffer {
    /// Create a buffer of `size` bytes with its own allocation.
    ///
    /// `TRANSFER_DST` is always added to `usage` so any buffer can receive a
    /// copy.
    pub fn new(
        device: &Arc<LogicalDevice>,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        if size == 0 {
            return Err(GpuError::InvalidState("buffer size must be non-zero".into()));
        }
        let usage = usage | vk::BufferUsageFlags::TRANSFER_DST;
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        // SAFETY: the device outlives the buffer through the Arc.
        let handle = unsafe { device.raw().create_buffer(&create_info, None) }.map_err(|e| {
            tracing::error!(size, ?usage, "vkCreateBuffer failed: {e}");
            GpuError::from(e)
        })?;
        device.tracker().created(ResourceKind::Buffer);

        // SAFETY: handle was created above.
        let requirements = unsafe { device.raw().get_buffer_memory_requirements(handle) };
        let memory = match DeviceMemory::allocate(device, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                // SAFETY: the buffer has no memory and is not in use.
                unsafe { device.raw().destroy_buffer(handle, None) };
                device.tracker().destroyed(ResourceKind::Buffer);
                return Err(e);
            }
        };

        // SAFETY: fresh buffer, fresh allocation sized from its requirements.
        if let Err(e) = unsafe { device.raw().bind_buffer_memory(handle, memory.handle(), 0) } {
            // SAFETY: as above; memory is freed when it drops.
            unsafe { device.raw().destroy_buffer(handle, None) };
            device.tracker().destroyed(ResourceKind::Buffer);
            return Err(e.into());
        }

        tracing::debug!(size, ?usage, ?properties, "Created buffer {handle:?}");

        Ok(Self {
            handle,
            memory,
            size,
            usage,
            device: Arc::clone(device),
        })
    }

    /// Create a buffer sized for `count` values of `T`.
    pub fn for_elements<T: Pod>(
        device: &Arc<LogicalDevice>,
        count: usize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let size = element_bytes::<T>(count)?;
        Self::new(device, size, usage, properties)
    }

    /// Create a host-visible, host-coherent buffer holding `data`.
    pub fn with_data<T: Pod>(
        device: &Arc<LogicalDevice>,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let mut buffer = Self::for_elements::<T>(
            device,
            data.len(),
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.upload_slice(data)?;
        Ok(buffer)
    }

    /// Create a device-local buffer and fill it from a temporary staging
    /// buffer with a blocking copy.
    pub fn device_local_with_data<T: Pod>(
        device: &Arc<LogicalDevice>,
        pool: &Arc<CommandPool>,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let staging = Self::with_data(device, data, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let buffer = Self::for_elements::<T>(
            device,
            data.len(),
            usage,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        staging.copy_to_buffer(pool, &buffer)?;
        Ok(buffer)
    }

    /// Raw buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    /// Requested size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Usage flags, including the implicit `TRANSFER_DST`.
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Bound memory.
    pub fn memory(&self) -> &DeviceMemory {
        &self.memory
    }

    /// Map, copy `bytes` to the start of the buffer, unmap.
    pub fn upload_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        check_capacity(bytes.len() as u64, self.size).inspect_err(|e| {
            tracing::error!(buffer = ?self.handle, "Upload rejected: {e}");
        })?;
        let mut mapped = self.memory.map()?;
        mapped.write(0, bytes)?;
        mapped.finish()
    }

    /// Upload a slice of plain-old-data values.
    pub fn upload_slice<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        self.upload_bytes(bytemuck::cast_slice(data))
    }

    /// Upload a single plain-old-data value.
    pub fn upload_value<T: Pod>(&mut self, value: &T) -> Result<()> {
        self.upload_bytes(bytemuck::bytes_of(value))
    }

    /// Copy the whole buffer back to the host. Host-visible memory only.
    pub fn read_back(&mut self) -> Result<Vec<u8>> {
        let size = self.size as usize;
        let mapped = self.memory.map()?;
        let mut out = vec![0_u8; size];
        mapped.read(0, &mut out)?;
        mapped.finish()?;
        Ok(out)
    }

    /// Copy this buffer into `dst` with a blocking one-time submission.
    pub fn copy_to_buffer(&self, pool: &Arc<CommandPool>, dst: &Self) -> Result<()> {
        check_capacity(self.size, dst.size)?;
        let region = vk::BufferCopy::default().size(self.size);
        pool.one_time_submit(|cmd| {
            cmd.copy_buffer(self, dst, &[region]);
            Ok(())
        })
    }

    /// Copy tightly packed pixels into mip level 0 of `image`, which must be
    /// in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_to_image(&self, pool: &Arc<CommandPool>, image: &Image) -> Result<()> {
        let extent = image.extent();
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        pool.one_time_submit(|cmd| {
            cmd.copy_buffer_to_image(
                self,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            Ok(())
        })
    }

    /// Destroy the buffer and free its memory. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::Buffer::null() {
            return;
        }
        tracing::debug!("Destroying buffer {:?}", self.handle);
        // SAFETY: callers ensure no in-flight work references the buffer.
        unsafe {
            self.device.raw().destroy_buffer(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::Buffer);
        self.handle = vk::Buffer::null();
        self.memory.destroy();
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::headless_device;

    #[test]
    fn capacity_check() {
        assert!(check_capacity(64, 64).is_ok());
        assert!(check_capacity(0, 64).is_ok());
        assert!(matches!(
            check_capacity(65, 64),
            Err(GpuError::BufferOverflow {
                data_size: 65,
                capacity: 64
            })
        ));
    }

    #[test]
    fn element_size_overflow_is_rejected() {
        assert_eq!(element_bytes::<u32>(16).ok(), Some(64));
        assert_eq!(element_bytes::<[f32; 4]>(0).ok(), Some(0));
        assert!(matches!(
            element_bytes::<u64>(usize::MAX),
            Err(GpuError::InvalidState(_))
        ));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn upload_then_read_back_round_trips() {
        let device = headless_device();
        let data: Vec<u32> = (0..256).collect();
        let mut buffer =
            Buffer::with_data(&device, &data, vk::BufferUsageFlags::STORAGE_BUFFER).unwrap();
        let bytes = buffer.read_back().unwrap();
        assert_eq!(bytes.as_slice(), bytemuck::cast_slice::<u32, u8>(&data));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn oversized_upload_is_rejected() {
        let device = headless_device();
        let mut buffer = Buffer::for_elements::<u32>(
            &device,
            4,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .unwrap();
        assert!(matches!(
            buffer.upload_slice(&[0_u32; 5]),
            Err(GpuError::BufferOverflow { .. })
        ));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn device_copy_then_read_back() {
        let device = headless_device();
        let pool = device
            .create_command_pool(device.graphics_queue(), vk::CommandPoolCreateFlags::TRANSIENT)
            .unwrap();
        let src =
            Buffer::with_data(&device, &[7_u8; 32], vk::BufferUsageFlags::TRANSFER_SRC).unwrap();
        let mut dst = device
            .create_buffer(
                32,
                vk::BufferUsageFlags::empty(),
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            )
            .unwrap();
        src.copy_to_buffer(&pool, &dst).unwrap();
        assert_eq!(dst.read_back().unwrap(), vec![7_u8; 32]);
    }
}
