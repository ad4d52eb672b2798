//! Adapter enumeration and queue-family discovery.

use crate::capabilities::DeviceCapabilities;
use crate::error::{GpuError, Result};
use crate::image::find_supported_format;
use crate::instance::Instance;
use crate::surface::Surface;
use crate::swapchain::SwapchainSupport;
use ash::vk;
use std::collections::BTreeSet;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue families chosen on one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First graphics-capable family.
    pub graphics: u32,
    /// Family used for presentation, when a surface was supplied.
    pub present: Option<u32>,
    /// Dedicated transfer family if one exists, otherwise `graphics`.
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Distinct graphics and present families, ascending. One queue is
    /// created per entry; uploads go through the graphics queue, so the
    /// transfer family gets none.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut set = BTreeSet::from([self.graphics]);
        if let Some(present) = self.present {
            set.insert(present);
        }
        set.into_iter().collect()
    }

    /// Whether graphics and presentation share a family.
    pub fn presents_on_graphics(&self) -> bool {
        self.present.map_or(true, |present| present == self.graphics)
    }
}

/// Pick queue families from an adapter's family table.
///
/// `can_present` is consulted only when a surface is involved. Returns
/// `Ok(None)` when the adapter has no graphics family or, with a surface, no
/// family able to present.
pub fn classify_queue_families(
    families: &[vk::QueueFamilyProperties],
    can_present: Option<&mut dyn FnMut(u32) -> Result<bool>>,
) -> Result<Option<QueueFamilyIndices>> {
    let usable = |props: &vk::QueueFamilyProperties, flag: vk::QueueFlags| {
        props.queue_count > 0 && props.queue_flags.contains(flag)
    };

    let Some(graphics) = families
        .iter()
        .position(|props| usable(props, vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
    else {
        return Ok(None);
    };

    let present = match can_present {
        None => None,
        Some(can_present) => {
            if can_present(graphics)? {
                Some(graphics)
            } else {
                let mut found = None;
                for index in 0..families.len() as u32 {
                    if families[index as usize].queue_count > 0 && can_present(index)? {
                        found = Some(index);
                        break;
                    }
                }
                match found {
                    Some(index) => Some(index),
                    None => return Ok(None),
                }
            }
        }
    };

    let transfer = families
        .iter()
        .position(|props| {
            usable(props, vk::QueueFlags::TRANSFER)
                && !props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map_or(graphics, |index| index as u32);

    Ok(Some(QueueFamilyIndices {
        graphics,
        present,
        transfer,
    }))
}

/// Everything queried about an adapter at startup. Immutable afterwards.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    /// Adapter handle.
    pub handle: vk::PhysicalDevice,
    /// Name, vendor, limits and extensions.
    pub capabilities: DeviceCapabilities,
    /// Memory-type table.
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Chosen queue families.
    pub queue_families: QueueFamilyIndices,
    /// Surface support; `None` when enumerated without a surface.
    pub swapchain_support: Option<SwapchainSupport>,
    /// Preferred depth attachment format, if any candidate is supported.
    pub depth_format: Option<vk::Format>,
}

impl PhysicalDeviceInfo {
    /// Whether presentation was part of selection.
    pub fn supports_presentation(&self) -> bool {
        self.queue_families.present.is_some()
    }
}

/// Enumerates adapters that satisfy the graphics and presentation
/// constraints.
pub struct PhysicalDeviceSelector;

impl PhysicalDeviceSelector {
    /// All capable adapters in driver order.
    ///
    /// Adapters without a graphics family are dropped. With a surface, so are
    /// adapters that cannot present to it, lack `VK_KHR_swapchain`, or report
    /// no surface formats or present modes.
    pub fn enumerate(
        instance: &Instance,
        surface: Option<&Surface>,
    ) -> Result<Vec<PhysicalDeviceInfo>> {
        // SAFETY: the instance is alive.
        let adapters = unsafe { instance.raw().enumerate_physical_devices() }?;
        let capable = adapters
            .into_iter()
            .filter_map(|handle| {
                screen_adapter(handle, Self::inspect(instance, surface, handle))
            })
            .collect();
        require_capable(capable)
    }

    /// Query one adapter. `Ok(None)` when it fails a constraint.
    fn inspect(
        instance: &Instance,
        surface: Option<&Surface>,
        handle: vk::PhysicalDevice,
    ) -> Result<Option<PhysicalDeviceInfo>> {
        // SAFETY: handle was just enumerated from this instance.
        let capabilities = unsafe { DeviceCapabilities::query(instance.raw(), handle) };
        // SAFETY: as above.
        let families =
            unsafe { instance.raw().get_physical_device_queue_family_properties(handle) };

        let mut present_check = |family: u32| -> Result<bool> {
            surface.map_or(Ok(false), |surface| surface.supports_family(handle, family))
        };
        let classified = classify_queue_families(
            &families,
            surface
                .is_some()
                .then_some(&mut present_check as &mut dyn FnMut(u32) -> Result<bool>),
        )?;

        let Some(queue_families) = classified else {
            tracing::debug!(
                device = %capabilities.device_name,
                "Rejected adapter: missing graphics or present queue family"
            );
            return Ok(None);
        };

        let swapchain_support = match surface {
            Some(surface) => {
                if !capabilities.has_extension("VK_KHR_swapchain") {
                    tracing::debug!(
                        device = %capabilities.device_name,
                        "Rejected adapter: VK_KHR_swapchain not supported"
                    );
                    return Ok(None);
                }
                let support = SwapchainSupport::query(surface, handle)?;
                if !support.is_adequate() {
                    tracing::debug!(
                        device = %capabilities.device_name,
                        "Rejected adapter: no surface formats or present modes"
                    );
                    return Ok(None);
                }
                Some(support)
            }
            None => None,
        };

        // SAFETY: as above.
        let memory_properties =
            unsafe { instance.raw().get_physical_device_memory_properties(handle) };
        let depth_format = find_supported_format(
            instance.raw(),
            handle,
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .ok();

        tracing::debug!(
            device = %capabilities.device_name,
            ?queue_families,
            ?depth_format,
            "Capable adapter"
        );

        Ok(Some(PhysicalDeviceInfo {
            handle,
            capabilities,
            memory_properties,
            queue_families,
            swapchain_support,
            depth_format,
        }))
    }

    /// The first capable adapter.
    pub fn select_first(
        instance: &Instance,
        surface: Option<&Surface>,
    ) -> Result<PhysicalDeviceInfo> {
        Self::select(instance, surface, 0)
    }

    /// The capable adapter at `index` in enumeration order.
    pub fn select(
        instance: &Instance,
        surface: Option<&Surface>,
        index: usize,
    ) -> Result<PhysicalDeviceInfo> {
        let info = Self::enumerate(instance, surface)?
            .into_iter()
            .nth(index)
            .ok_or(GpuError::NoCapableDevice)?;
        tracing::info!("Selected GPU: {}", info.capabilities.summary());
        Ok(info)
    }
}

/// Keep an adapter only if inspecting it succeeded and it qualified.
///
/// A query error rejects that adapter alone; enumeration goes on.
fn screen_adapter<T>(handle: vk::PhysicalDevice, inspected: Result<Option<T>>) -> Option<T> {
    inspected.unwrap_or_else(|e| {
        tracing::warn!(adapter = ?handle, "Rejected adapter: query failed: {e}");
        None
    })
}

fn require_capable<T>(capable: Vec<T>) -> Result<Vec<T>> {
    if capable.is_empty() {
        tracing::error!("No adapter satisfies the graphics/presentation constraints");
        return Err(GpuError::NoCapableDevice);
    }
    Ok(capable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn adapter_without_graphics_is_excluded() {
        let families = [
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        assert_eq!(classify_queue_families(&families, None).ok(), Some(None));

        let mut always = |_: u32| -> Result<bool> { Ok(true) };
        assert_eq!(
            classify_queue_families(&families, Some(&mut always)).ok(),
            Some(None)
        );
    }

    #[test]
    fn zero_count_family_is_ignored() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let indices = classify_queue_families(&families, None).ok().flatten();
        assert_eq!(indices.map(|i| i.graphics), Some(1));
    }

    #[test]
    fn present_prefers_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let mut any = |_: u32| -> Result<bool> { Ok(true) };
        let indices = classify_queue_families(&families, Some(&mut any))
            .ok()
            .flatten();
        assert_eq!(indices.and_then(|i| i.present), Some(1));
        assert!(indices.is_some_and(|i| i.presents_on_graphics()));
    }

    #[test]
    fn present_falls_back_to_first_presenting_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let mut only_two = |index: u32| -> Result<bool> { Ok(index == 2) };
        let indices = classify_queue_families(&families, Some(&mut only_two))
            .ok()
            .flatten();
        assert_eq!(indices.map(|i| (i.graphics, i.present)), Some((0, Some(2))));
        assert!(indices.is_some_and(|i| !i.presents_on_graphics()));
    }

    #[test]
    fn adapter_that_cannot_present_is_excluded() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let mut never = |_: u32| -> Result<bool> { Ok(false) };
        assert_eq!(
            classify_queue_families(&families, Some(&mut never)).ok(),
            Some(None)
        );
    }

    #[test]
    fn dedicated_transfer_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let indices = classify_queue_families(&families, None).ok().flatten();
        assert_eq!(indices.map(|i| i.transfer), Some(1));
    }

    #[test]
    fn unique_families_are_deduplicated_and_sorted() {
        let shared = QueueFamilyIndices {
            graphics: 0,
            present: Some(0),
            transfer: 0,
        };
        assert_eq!(shared.unique_families(), vec![0]);

        let split = QueueFamilyIndices {
            graphics: 2,
            present: Some(0),
            transfer: 2,
        };
        assert_eq!(split.unique_families(), vec![0, 2]);

        let dedicated_transfer = QueueFamilyIndices {
            graphics: 0,
            present: Some(0),
            transfer: 1,
        };
        assert_eq!(dedicated_transfer.unique_families(), vec![0]);
    }

    #[test]
    fn present_check_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let mut lost = |_: u32| -> Result<bool> { Err(GpuError::DeviceLost) };
        assert!(matches!(
            classify_queue_families(&families, Some(&mut lost)),
            Err(GpuError::DeviceLost)
        ));
    }

    #[test]
    fn failing_adapter_query_rejects_only_that_adapter() {
        let inspected: Vec<Result<Option<u32>>> = vec![
            Err(GpuError::Vulkan(vk::Result::ERROR_SURFACE_LOST_KHR)),
            Ok(None),
            Ok(Some(2)),
        ];
        let capable: Vec<u32> = inspected
            .into_iter()
            .filter_map(|result| screen_adapter(vk::PhysicalDevice::null(), result))
            .collect();
        assert_eq!(capable, vec![2]);
        assert_eq!(require_capable(capable).ok(), Some(vec![2]));
    }

    #[test]
    fn only_failing_adapters_yield_no_capable_device() {
        let capable: Vec<u32> = [
            Err(GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)),
            Ok(None),
        ]
        .into_iter()
        .filter_map(|result| screen_adapter(vk::PhysicalDevice::null(), result))
        .collect();
        assert!(matches!(
            require_capable(capable),
            Err(GpuError::NoCapableDevice)
        ));
    }
}
