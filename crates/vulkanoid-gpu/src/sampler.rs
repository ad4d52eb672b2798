//! Texture samplers.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::tracker::ResourceKind;
use ash::vk;
use std::sync::Arc;

/// Sampler parameters.
#[derive(Debug, Clone, Copy)]
pub struct SamplerDesc {
    pub filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode: vk::SamplerAddressMode,
    /// Maximum anisotropy; `None` disables anisotropic filtering.
    pub anisotropy: Option<f32>,
    /// Number of mip levels the sampler may reach.
    pub mip_levels: u32,
}

impl SamplerDesc {
    /// Linear filtering, repeat addressing, anisotropy off.
    pub fn linear(mip_levels: u32) -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            anisotropy: None,
            mip_levels,
        }
    }

    /// Request anisotropic filtering at `max` (clamped to the device limit).
    #[must_use]
    pub fn with_anisotropy(mut self, max: f32) -> Self {
        self.anisotropy = Some(max);
        self
    }
}

/// A sampler object.
pub struct Sampler {
    device: Arc<LogicalDevice>,
    handle: vk::Sampler,
}

impl Sampler {
    /// Create a sampler.
    ///
    /// Requesting anisotropy on a device without `samplerAnisotropy` fails
    /// with [`GpuError::UnsupportedFeature`].
    pub fn new(device: &Arc<LogicalDevice>, desc: &SamplerDesc) -> Result<Self> {
        let max_anisotropy = match desc.anisotropy {
            Some(_) if !device.sampler_anisotropy_enabled() => {
                return Err(GpuError::UnsupportedFeature("samplerAnisotropy".into()));
            }
            Some(requested) => Some(
                requested
                    .min(device.physical().capabilities.max_sampler_anisotropy)
                    .max(1.0),
            ),
            None => None,
        };

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .anisotropy_enable(max_anisotropy.is_some())
            .max_anisotropy(max_anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(0.0)
            .max_lod(desc.mip_levels as f32)
            .mip_lod_bias(0.0);

        // SAFETY: the device outlives the sampler through the Arc.
        let handle = unsafe { device.raw().create_sampler(&create_info, None) }?;
        device.tracker().created(ResourceKind::Sampler);
        tracing::debug!(?desc, "Created sampler {handle:?}");

        Ok(Self {
            device: Arc::clone(device),
            handle,
        })
    }

    /// Raw sampler handle.
    pub fn handle(&self) -> vk::Sampler {
        self.handle
    }

    /// Destroy the sampler. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::Sampler::null() {
            return;
        }
        tracing::debug!("Destroying sampler {:?}", self.handle);
        // SAFETY: no in-flight work samples through this sampler.
        unsafe {
            self.device.raw().destroy_sampler(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::Sampler);
        self.handle = vk::Sampler::null();
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.destroy();
    }
}
