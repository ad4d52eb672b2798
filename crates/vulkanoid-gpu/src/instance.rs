//! Vulkan instance creation.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{c_void, CStr, CString};
use std::sync::Arc;

/// Standard validation layer.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Minimum API version requested from the loader.
pub const API_VERSION: u32 = vk::API_VERSION_1_1;

/// Instance creation parameters.
#[derive(Debug, Clone)]
pub struct InstanceDesc {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Request the validation layer and a debug messenger.
    pub validation: bool,
    /// Extensions required by the surface provider (empty when headless).
    pub extensions: Vec<&'static CStr>,
}

/// The root Vulkan object.
///
/// Owns the entry-point table, the instance function table, an optional
/// debug messenger, and the surface extension loader. Everything derived from
/// an instance holds an `Arc<Instance>`, so the instance is destroyed last.
pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger: Option<(vk::DebugUtilsMessengerEXT, ash::ext::debug_utils::Instance)>,
    surface_loader: ash::khr::surface::Instance,
    presentation_enabled: bool,
}

impl Instance {
    /// Create an instance from an explicitly supplied entry-point table.
    ///
    /// The entry is passed in rather than loaded globally so callers (and
    /// tests) decide which loader backs the instance.
    pub fn new(entry: ash::Entry, desc: &InstanceDesc) -> Result<Arc<Self>> {
        let app_name = CString::new(desc.app_name.as_str())
            .map_err(|_| GpuError::InvalidState("application name contains a NUL byte".into()))?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Vulkanoid")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(API_VERSION);

        // SAFETY: entry is a loaded entry-point table; a None layer name
        // queries the global extension list.
        let available_exts = unsafe { entry.enumerate_instance_extension_properties(None) }?;
        // SAFETY: entry is a loaded entry-point table.
        let available_layers = unsafe { entry.enumerate_instance_layer_properties() }?;

        let has_ext = |name: &CStr| {
            available_exts
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(name))
        };

        let missing: Vec<String> = desc
            .extensions
            .iter()
            .filter(|ext| !has_ext(ext))
            .map(|ext| ext.to_string_lossy().into_owned())
            .collect();
        if !missing.is_empty() {
            return Err(GpuError::MissingExtension(missing.join(", ")));
        }

        let mut extensions: Vec<&CStr> = desc.extensions.clone();
        let mut layers: Vec<&CStr> = Vec::new();

        let debug_utils = if desc.validation {
            let layer_available = available_layers
                .iter()
                .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
            let ext_available = has_ext(ash::ext::debug_utils::NAME);

            if layer_available {
                layers.push(VALIDATION_LAYER);
            } else {
                tracing::warn!(
                    "Validation layer {} not available",
                    VALIDATION_LAYER.to_string_lossy()
                );
            }
            if ext_available {
                extensions.push(ash::ext::debug_utils::NAME);
            } else {
                tracing::warn!("VK_EXT_debug_utils not available, validation output is lost");
            }
            layer_available && ext_available
        } else {
            false
        };

        #[cfg(target_os = "macos")]
        let create_flags = {
            if has_ext(ash::khr::portability_enumeration::NAME) {
                extensions.push(ash::khr::portability_enumeration::NAME);
            }
            vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
        };
        #[cfg(not(target_os = "macos"))]
        let create_flags = vk::InstanceCreateFlags::empty();

        let extension_ptrs: Vec<*const std::ffi::c_char> =
            extensions.iter().map(|ext| ext.as_ptr()).collect();
        let layer_ptrs: Vec<*const std::ffi::c_char> =
            layers.iter().map(|layer| layer.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extension_ptrs)
            .enabled_layer_names(&layer_ptrs)
            .flags(create_flags);

        // SAFETY: every pointer in create_info refers to locals that outlive
        // this call.
        let handle = unsafe { entry.create_instance(&create_info, None) }?;

        let debug_messenger = if debug_utils {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &handle);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));

            // SAFETY: the instance was created with VK_EXT_debug_utils enabled.
            match unsafe { loader.create_debug_utils_messenger(&messenger_info, None) } {
                Ok(messenger) => Some((messenger, loader)),
                Err(e) => {
                    tracing::warn!("Failed to create debug messenger: {e}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &handle);
        let presentation_enabled = desc
            .extensions
            .iter()
            .any(|ext| *ext == ash::khr::surface::NAME);

        tracing::info!(
            validation = debug_messenger.is_some(),
            extensions = extensions.len(),
            "Vulkan instance created"
        );

        Ok(Arc::new(Self {
            entry,
            handle,
            debug_messenger,
            surface_loader,
            presentation_enabled,
        }))
    }

    /// The entry-point table this instance was created from.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// The instance function table.
    pub fn raw(&self) -> &ash::Instance {
        &self.handle
    }

    /// The raw instance handle.
    pub fn handle(&self) -> vk::Instance {
        self.handle.handle()
    }

    /// Surface extension loader.
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    /// Whether `VK_KHR_surface` was enabled at creation.
    pub fn presentation_enabled(&self) -> bool {
        self.presentation_enabled
    }

    /// Whether the debug messenger is active.
    pub fn validation_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        // SAFETY: this is the last reference to the instance; every derived
        // object held an Arc to it and is gone.
        unsafe {
            if let Some((messenger, loader)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.handle.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader guarantees the callback data and its message are
    // valid for the duration of the callback.
    let message = unsafe { (*p_callback_data).message_as_c_str() }
        .map_or_else(|| "<no message>".into(), CStr::to_string_lossy);

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "vulkanoid::validation", "[{kind}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "vulkanoid::validation", "[{kind}] {message}");
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::debug!(target: "vulkanoid::validation", "[{kind}] {message}");
        }
        _ => {
            tracing::trace!(target: "vulkanoid::validation", "[{kind}] {message}");
        }
    }

    vk::FALSE
}
