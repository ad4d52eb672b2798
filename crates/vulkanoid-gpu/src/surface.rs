//! Presentation surfaces.
//!
//! The windowing layer is an external collaborator: it tells the core which
//! instance extensions presentation needs and turns its native window into a
//! `VkSurfaceKHR`. Any `raw-window-handle` window does both through
//! `ash-window`.

use crate::error::{GpuError, Result};
use crate::instance::Instance;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

/// Source of a platform surface.
pub trait SurfaceProvider {
    /// Instance extensions required to present to this provider's surface.
    fn required_extensions(&self) -> Result<Vec<&'static CStr>>;

    /// Create the native surface on `instance`.
    ///
    /// # Safety
    /// The provider's window must outlive the returned surface.
    unsafe fn create_surface(&self, instance: &Instance) -> Result<vk::SurfaceKHR>;
}

impl<W> SurfaceProvider for W
where
    W: HasDisplayHandle + HasWindowHandle,
{
    fn required_extensions(&self) -> Result<Vec<&'static CStr>> {
        let display = self
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;

        let names = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| GpuError::MissingExtension(format!("surface extensions: {e}")))?;

        // SAFETY: ash-window returns pointers into 'static extension name
        // constants.
        Ok(names
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect())
    }

    unsafe fn create_surface(&self, instance: &Instance) -> Result<vk::SurfaceKHR> {
        let display = self
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window = self
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        // SAFETY: the caller guarantees the window outlives the surface.
        unsafe {
            ash_window::create_surface(
                instance.entry(),
                instance.raw(),
                display.as_raw(),
                window.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))
    }
}

/// An owned presentation surface.
pub struct Surface {
    instance: Arc<Instance>,
    handle: vk::SurfaceKHR,
}

impl Surface {
    /// Create a surface from a provider.
    ///
    /// # Safety
    /// The provider's window must outlive the surface.
    pub unsafe fn new(instance: &Arc<Instance>, provider: &dyn SurfaceProvider) -> Result<Self> {
        if !instance.presentation_enabled() {
            return Err(GpuError::MissingExtension(
                ash::khr::surface::NAME.to_string_lossy().into_owned(),
            ));
        }
        // SAFETY: forwarded from the caller.
        let handle = unsafe { provider.create_surface(instance) }?;
        tracing::debug!("Created surface {handle:?}");
        Ok(Self {
            instance: Arc::clone(instance),
            handle,
        })
    }

    /// Raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Instance the surface was created on.
    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Whether `family` of `physical` can present to this surface.
    pub fn supports_family(&self, physical: vk::PhysicalDevice, family: u32) -> Result<bool> {
        // SAFETY: the physical device was enumerated from the same instance.
        let supported = unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_support(physical, family, self.handle)
        }?;
        Ok(supported)
    }

    /// Destroy the surface. Idempotent.
    pub fn destroy(&mut self) {
        if self.handle == vk::SurfaceKHR::null() {
            return;
        }
        tracing::debug!("Destroying surface {:?}", self.handle);
        // SAFETY: every swapchain on this surface holds an Arc<Surface> and is
        // therefore already gone.
        unsafe {
            self.instance.surface_loader().destroy_surface(self.handle, None);
        }
        self.handle = vk::SurfaceKHR::null();
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        self.destroy();
    }
}
