//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Variants fall into four groups: configuration errors raised at startup,
/// resource-creation errors raised by a single factory call, runtime errors
/// that abort the frame loop, and caller-contract violations reported as
/// [`GpuError::InvalidState`]. Presentation staleness (suboptimal/out-of-date)
/// is not an error and is reported through [`crate::swapchain::PresentStatus`].
#[derive(Error, Debug)]
pub enum GpuError {
    /// The Vulkan loader could not be loaded.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No adapter satisfied the queue-family and presentation constraints.
    #[error("No capable GPU found")]
    NoCapableDevice,

    /// A required instance or device extension is not available.
    #[error("Required extension not supported: {0}")]
    MissingExtension(String),

    /// A feature needed by the requested operation is not enabled on the device.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// No memory type matches the resource's type bits and requested properties.
    #[error("No memory type matches type bits {type_bits:#b} with properties {properties:?}")]
    NoMatchingMemoryType {
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// An upload or copy is larger than the destination.
    #[error("Data of {data_size} bytes does not fit into {capacity} bytes")]
    BufferOverflow { data_size: u64, capacity: u64 },

    /// The layout pair is not part of the supported transition table.
    #[error("Unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// The format cannot be blitted with linear filtering.
    #[error("Format {0:?} does not support linear blitting")]
    UnsupportedBlitFormat(vk::Format),

    /// None of the candidate formats is supported.
    #[error("No supported format among candidates")]
    NoSupportedFormat,

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// A wait elapsed before the primitive was signaled.
    #[error("Timed out waiting for the GPU")]
    Timeout,

    /// The logical device was lost. Not recoverable.
    #[error("Device lost")]
    DeviceLost,

    /// The caller broke an ordering or state contract.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Any other unexpected Vulkan return code.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

impl GpuError {
    /// Whether the error must abort the frame loop.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::Vulkan(_) | Self::Loading(_))
    }
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::TIMEOUT => Self::Timeout,
            other => Self::Vulkan(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_is_distinct_from_timeout() {
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_DEVICE_LOST),
            GpuError::DeviceLost
        ));
        assert!(matches!(
            GpuError::from(vk::Result::TIMEOUT),
            GpuError::Timeout
        ));
        assert!(matches!(
            GpuError::from(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
        ));
    }

    #[test]
    fn fatal_classification() {
        assert!(GpuError::DeviceLost.is_fatal());
        assert!(!GpuError::Timeout.is_fatal());
        assert!(!GpuError::InvalidState("x".into()).is_fatal());
    }
}
