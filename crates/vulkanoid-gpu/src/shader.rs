//! Shader modules from SPIR-V bytecode.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::tracker::ResourceKind;
use ash::vk;
use std::ffi::{CStr, CString};
use std::io::Cursor;
use std::sync::Arc;

/// A compiled shader stage.
pub struct ShaderModule {
    device: Arc<LogicalDevice>,
    handle: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: CString,
}

impl ShaderModule {
    /// Create a module from SPIR-V bytes.
    ///
    /// The bytes must be a whole number of 32-bit words. Modules written with
    /// the opposite endianness are byte-swapped.
    pub fn new(
        device: &Arc<LogicalDevice>,
        spirv: &[u8],
        stage: vk::ShaderStageFlags,
        entry_point: &str,
    ) -> Result<Self> {
        let entry_point = CString::new(entry_point)
            .map_err(|_| GpuError::ShaderModule("entry point contains a NUL byte".into()))?;
        let code = ash::util::read_spv(&mut Cursor::new(spirv)).map_err(|e| {
            tracing::error!(?stage, len = spirv.len(), "Invalid SPIR-V: {e}");
            GpuError::ShaderModule(format!("invalid SPIR-V: {e}"))
        })?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        // SAFETY: the code slice is valid SPIR-V words.
        let handle = unsafe { device.raw().create_shader_module(&create_info, None) }
            .map_err(|e| GpuError::ShaderModule(e.to_string()))?;
        device.tracker().created(ResourceKind::ShaderModule);
        tracing::debug!(?stage, words = code.len(), "Created shader module {handle:?}");

        Ok(Self {
            device: Arc::clone(device),
            handle,
            stage,
            entry_point,
        })
    }

    /// Raw module handle.
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    /// Pipeline stage this module is bound to.
    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    /// Entry-point function name.
    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    /// Stage description for pipeline creation. Borrows the entry-point name.
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.handle)
            .name(&self.entry_point)
    }

    /// Destroy the module. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::ShaderModule::null() {
            return;
        }
        tracing::debug!("Destroying shader module {:?}", self.handle);
        // SAFETY: modules are only needed during pipeline creation.
        unsafe {
            self.device.raw().destroy_shader_module(self.handle, None);
        }
        self.device.tracker().destroyed(ResourceKind::ShaderModule);
        self.handle = vk::ShaderModule::null();
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    #[test]
    fn read_spv_rejects_truncated_words() {
        let bytes = [0x03_u8, 0x02, 0x23, 0x07, 0x00, 0x00];
        assert!(ash::util::read_spv(&mut Cursor::new(&bytes[..])).is_err());
    }

    #[test]
    fn read_spv_accepts_magic_header() {
        let bytes = 0x0723_0203_u32.to_le_bytes();
        let words = ash::util::read_spv(&mut Cursor::new(&bytes[..])).ok();
        assert_eq!(words, Some(vec![0x0723_0203]));
    }
}
