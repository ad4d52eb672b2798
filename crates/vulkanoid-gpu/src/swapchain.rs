//! Swapchain creation, presentation and rebuild.
//!
//! Acquire and present report a tri-state [`PresentStatus`]. Staleness is not
//! an error: the owner rebuilds with [`Swapchain::recreate`]. Acquiring again
//! from a swapchain already reported out of date, without rebuilding, is a
//! caller error.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::image::{transition_aspect, Image, ImageDesc, ImageView};
use crate::physical_device::QueueFamilyIndices;
use crate::render_pass::{Framebuffer, RenderPass};
use crate::surface::Surface;
use crate::sync::Semaphore;
use crate::tracker::ResourceKind;
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Surface format requested when the caller does not choose one.
pub const DEFAULT_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Surface capabilities, formats and present modes for one adapter.
#[derive(Debug, Clone)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    /// Query current support of `physical` for `surface`.
    pub fn query(surface: &Surface, physical: vk::PhysicalDevice) -> Result<Self> {
        let loader = surface.instance().surface_loader();
        // SAFETY: the physical device and surface share an instance.
        unsafe {
            Ok(Self {
                capabilities: loader
                    .get_physical_device_surface_capabilities(physical, surface.handle())?,
                formats: loader.get_physical_device_surface_formats(physical, surface.handle())?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(physical, surface.handle())?,
            })
        }
    }

    /// At least one format and one present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Select `preferred` if supported, otherwise the first supported format.
pub fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> Result<vk::SurfaceFormatKHR> {
    match available {
        [] => Err(GpuError::NoSupportedFormat),
        // A lone UNDEFINED entry means the surface takes any format.
        [only] if only.format == vk::Format::UNDEFINED => Ok(preferred),
        _ => Ok(available
            .iter()
            .copied()
            .find(|format| {
                format.format == preferred.format && format.color_space == preferred.color_space
            })
            .unwrap_or(available[0])),
    }
}

/// Select the present mode.
///
/// With `vsync` FIFO is used. Otherwise MAILBOX is preferred, falling back
/// to FIFO, which every surface supports.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync && available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width
                .max(capabilities.min_image_extent.width)
                .min(capabilities.max_image_extent.width),
            height: desired_height
                .max(capabilities.min_image_extent.height)
                .min(capabilities.max_image_extent.height),
        }
    }
}

/// `min + 1`, capped by `max` unless `max` is 0 (unbounded).
pub fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Concurrent sharing across both families when graphics and presentation
/// differ, exclusive otherwise.
pub fn sharing_mode(families: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    match families.present {
        Some(present) if present != families.graphics => (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, present],
        ),
        _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
    }
}

/// Status of an acquire or present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    /// Proceed.
    Success,
    /// Proceed this frame, rebuild before the next.
    Suboptimal,
    /// Abort this frame and rebuild now.
    OutOfDate,
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; `status` is `Success` or `Suboptimal`.
    Image { index: u32, status: PresentStatus },
    /// No image was acquired.
    OutOfDate,
}

/// Map the raw result of `vkAcquireNextImageKHR`.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Image {
            index,
            status: PresentStatus::Success,
        }),
        Ok((index, true)) => Ok(AcquireOutcome::Image {
            index,
            status: PresentStatus::Suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(e.into()),
    }
}

/// Map the raw result of `vkQueuePresentKHR`.
pub fn classify_present(result: VkResult<bool>) -> Result<PresentStatus> {
    match result {
        Ok(false) => Ok(PresentStatus::Success),
        Ok(true) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
        Err(e) => Err(e.into()),
    }
}

/// Tracks whether the swapchain may still be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresentationState {
    stale: bool,
    rebuild_requested: bool,
}

impl PresentationState {
    /// Fail if the swapchain was reported out of date and not rebuilt.
    pub fn check_acquire(&self) -> Result<()> {
        if self.stale {
            return Err(GpuError::InvalidState(
                "acquire on an out-of-date swapchain; rebuild first".into(),
            ));
        }
        Ok(())
    }

    /// Fold a status into the state.
    pub fn observe(&mut self, status: PresentStatus) {
        match status {
            PresentStatus::Success => {}
            PresentStatus::Suboptimal => self.rebuild_requested = true,
            PresentStatus::OutOfDate => {
                self.stale = true;
                self.rebuild_requested = true;
            }
        }
    }

    /// Whether a rebuild is due.
    pub fn needs_rebuild(&self) -> bool {
        self.rebuild_requested
    }

    /// Whether the swapchain is unusable until rebuilt.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Reset after a rebuild.
    pub fn rebuilt(&mut self) {
        *self = Self::default();
    }
}

/// Swapchain parameters.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    /// Requested extent, normally the window's inner size.
    pub extent: vk::Extent2D,
    pub preferred_format: vk::SurfaceFormatKHR,
    pub vsync: bool,
}

impl SwapchainDesc {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            extent: vk::Extent2D { width, height },
            preferred_format: DEFAULT_SURFACE_FORMAT,
            vsync: true,
        }
    }

    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    #[must_use]
    pub fn with_preferred_format(mut self, format: vk::SurfaceFormatKHR) -> Self {
        self.preferred_format = format;
        self
    }
}

/// Per-build resources, dropped wholesale on rebuild.
struct SwapchainParts {
    // Drop order matters: framebuffers, then the views they reference.
    framebuffers: Vec<Framebuffer>,
    image_views: Vec<Arc<ImageView>>,
    depth_view: Arc<ImageView>,
    color_view: Option<Arc<ImageView>>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

/// Presentable images, their views and framebuffers, and the shared depth
/// and multisample color attachments.
pub struct Swapchain {
    parts: Option<SwapchainParts>,
    desc: SwapchainDesc,
    state: PresentationState,
    render_pass: Arc<RenderPass>,
    surface: Arc<Surface>,
    device: Arc<LogicalDevice>,
}

impl Swapchain {
    /// The format a swapchain on `surface` would use. Create the render pass
    /// with this format before creating the swapchain.
    pub fn surface_format(
        device: &LogicalDevice,
        surface: &Surface,
        preferred: vk::SurfaceFormatKHR,
    ) -> Result<vk::SurfaceFormatKHR> {
        let support = SwapchainSupport::query(surface, device.physical().handle)?;
        select_surface_format(&support.formats, preferred)
    }

    /// Create a swapchain for `render_pass` on `surface`.
    pub fn new(
        device: &Arc<LogicalDevice>,
        surface: &Arc<Surface>,
        render_pass: &Arc<RenderPass>,
        desc: &SwapchainDesc,
    ) -> Result<Self> {
        let mut swapchain = Self {
            parts: None,
            desc: *desc,
            state: PresentationState::default(),
            render_pass: Arc::clone(render_pass),
            surface: Arc::clone(surface),
            device: Arc::clone(device),
        };
        swapchain.parts = Some(swapchain.build()?);
        Ok(swapchain)
    }

    fn build(&self) -> Result<SwapchainParts> {
        let device = &self.device;
        let loader = device.swapchain_loader()?;
        let support = SwapchainSupport::query(&self.surface, device.physical().handle)?;
        let caps = &support.capabilities;

        let format = select_surface_format(&support.formats, self.desc.preferred_format)?;
        let pass = *self.render_pass.desc();
        if format.format != pass.color_format {
            return Err(GpuError::SwapchainCreation(format!(
                "surface format {:?} does not match render pass color format {:?}",
                format.format, pass.color_format
            )));
        }
        let present_mode = select_present_mode(&support.present_modes, self.desc.vsync);
        let extent = calculate_extent(caps, self.desc.extent.width, self.desc.extent.height);
        let min_image_count = image_count(caps);
        let (sharing, family_indices) = sharing_mode(&device.physical().queue_families);

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.handle())
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        // SAFETY: the surface is alive and not bound to another swapchain
        // (the previous one was destroyed before rebuilding).
        let handle = unsafe { loader.create_swapchain(&create_info, None) }.map_err(|e| {
            tracing::error!(?extent, ?format, ?present_mode, "vkCreateSwapchainKHR failed: {e}");
            match e {
                vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
                other => GpuError::SwapchainCreation(other.to_string()),
            }
        })?;
        device.tracker().created(ResourceKind::Swapchain);

        let parts = self.build_attachments(handle, format, present_mode, extent);
        if parts.is_err() {
            // SAFETY: nothing references the new swapchain yet.
            unsafe { loader.destroy_swapchain(handle, None) };
            device.tracker().destroyed(ResourceKind::Swapchain);
        }
        let parts = parts?;

        tracing::info!(
            width = extent.width,
            height = extent.height,
            images = parts.images.len(),
            format = ?format.format,
            ?present_mode,
            ?sharing,
            "Swapchain created"
        );
        Ok(parts)
    }

    fn build_attachments(
        &self,
        handle: vk::SwapchainKHR,
        format: vk::SurfaceFormatKHR,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
    ) -> Result<SwapchainParts> {
        let device = &self.device;
        let pass = *self.render_pass.desc();

        // SAFETY: handle was just created.
        let images = unsafe { device.swapchain_loader()?.get_swapchain_images(handle) }?;
        let image_views = images
            .iter()
            .map(|&image| ImageView::for_raw_image(device, image, format.format).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        let depth_image = device.create_image(
            &ImageDesc::new(
                extent,
                pass.depth_format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )
            .with_samples(pass.samples),
        )?;
        let depth_view = device.create_image_view(
            &depth_image,
            transition_aspect(
                pass.depth_format,
                vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ),
        )?;

        let color_view = if pass.resolves() {
            let color_image: Arc<Image> = device.create_image(
                &ImageDesc::new(
                    extent,
                    format.format,
                    vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                        | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                )
                .with_samples(pass.samples),
            )?;
            Some(device.create_image_view(&color_image, vk::ImageAspectFlags::COLOR)?)
        } else {
            None
        };

        let framebuffers = image_views
            .iter()
            .map(|view| {
                let attachments = match &color_view {
                    Some(color) => vec![Arc::clone(color), Arc::clone(&depth_view), Arc::clone(view)],
                    None => vec![Arc::clone(view), Arc::clone(&depth_view)],
                };
                device.create_framebuffer(&self.render_pass, attachments, extent)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SwapchainParts {
            framebuffers,
            image_views,
            depth_view,
            color_view,
            handle,
            images,
            format,
            present_mode,
            extent,
        })
    }

    fn parts(&self) -> Result<&SwapchainParts> {
        self.parts
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("swapchain was destroyed".into()))
    }

    /// Raw swapchain handle, null after destruction.
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.parts
            .as_ref()
            .map_or(vk::SwapchainKHR::null(), |parts| parts.handle)
    }

    /// Current extent (zero after destruction).
    pub fn extent(&self) -> vk::Extent2D {
        self.parts
            .as_ref()
            .map_or_else(vk::Extent2D::default, |parts| parts.extent)
    }

    /// Chosen surface format.
    pub fn format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.parts.as_ref().map(|parts| parts.format)
    }

    /// Chosen present mode.
    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.parts.as_ref().map(|parts| parts.present_mode)
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.parts.as_ref().map_or(0, |parts| parts.images.len())
    }

    /// Framebuffer for swapchain image `index`.
    pub fn framebuffer(&self, index: u32) -> Result<&Framebuffer> {
        self.parts()?
            .framebuffers
            .get(index as usize)
            .ok_or_else(|| GpuError::InvalidState(format!("no swapchain image {index}")))
    }

    pub fn render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    pub fn surface(&self) -> &Arc<Surface> {
        &self.surface
    }

    /// Presentation state since the last rebuild.
    pub fn state(&self) -> PresentationState {
        self.state
    }

    /// Whether an acquire or present asked for a rebuild.
    pub fn needs_rebuild(&self) -> bool {
        self.state.needs_rebuild()
    }

    /// Acquire the next image, signaling `image_available` when it is ready.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_next_image(&mut self, image_available: &Semaphore) -> Result<AcquireOutcome> {
        self.state.check_acquire()?;
        let handle = self.parts()?.handle;
        // SAFETY: the swapchain is alive and not stale.
        let result = unsafe {
            self.device.swapchain_loader()?.acquire_next_image(
                handle,
                u64::MAX,
                image_available.handle(),
                vk::Fence::null(),
            )
        };
        let outcome = classify_acquire(result)?;
        match outcome {
            AcquireOutcome::Image { status, .. } => self.state.observe(status),
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date on acquire");
                self.state.observe(PresentStatus::OutOfDate);
            }
        }
        Ok(outcome)
    }

    /// Present image `index` once `render_finished` is signaled.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn present(&mut self, render_finished: &Semaphore, index: u32) -> Result<PresentStatus> {
        let queue = self
            .device
            .present_queue()
            .ok_or_else(|| GpuError::InvalidState("device has no present queue".into()))?;
        let swapchains = [self.parts()?.handle];
        let image_indices = [index];
        let wait_semaphores = [render_finished.handle()];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: the image was acquired and rendering to it is ordered by
        // the wait semaphore.
        let result = unsafe {
            self.device
                .swapchain_loader()?
                .queue_present(queue.handle(), &present_info)
        };
        let status = classify_present(result)?;
        if status != PresentStatus::Success {
            tracing::debug!(?status, "Present reported stale swapchain");
        }
        self.state.observe(status);
        Ok(status)
    }

    /// Wait for the device, destroy every per-build resource and build them
    /// again for `extent`.
    ///
    /// Safe to call repeatedly. Returns `Ok(false)` without touching anything
    /// when `extent` has zero area (minimized window).
    pub fn recreate(&mut self, extent: vk::Extent2D) -> Result<bool> {
        if extent.width == 0 || extent.height == 0 {
            tracing::debug!("Skipping swapchain rebuild for zero-area extent");
            return Ok(false);
        }
        self.device.wait_idle()?;
        self.destroy();
        self.desc.extent = extent;
        self.parts = Some(self.build()?);
        self.state.rebuilt();
        tracing::info!(
            width = self.extent().width,
            height = self.extent().height,
            "Swapchain rebuilt"
        );
        Ok(true)
    }

    /// Destroy framebuffers, views, attachments and the swapchain. Idempotent.
    pub fn destroy(&mut self) {
        let Some(parts) = self.parts.take() else {
            return;
        };
        let SwapchainParts {
            framebuffers,
            image_views,
            depth_view,
            color_view,
            handle,
            ..
        } = parts;
        drop(framebuffers);
        drop(image_views);
        drop(depth_view);
        drop(color_view);

        tracing::debug!("Destroying swapchain {handle:?}");
        if let Ok(loader) = self.device.swapchain_loader() {
            // SAFETY: views and framebuffers over the images are gone and the
            // caller waited for the device.
            unsafe { loader.destroy_swapchain(handle, None) };
            self.device.tracker().destroyed(ResourceKind::Swapchain);
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn unbounded_max_gives_min_plus_one() {
        assert_eq!(image_count(&caps(2, 0)), 3);
        assert_eq!(image_count(&caps(2, 8)), 3);
        assert_eq!(image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn preferred_format_or_first() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM),
            format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(
            select_surface_format(&available, DEFAULT_SURFACE_FORMAT)
                .ok()
                .map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
        assert_eq!(
            select_surface_format(&available[..1], DEFAULT_SURFACE_FORMAT)
                .ok()
                .map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert!(matches!(
            select_surface_format(&[], DEFAULT_SURFACE_FORMAT),
            Err(GpuError::NoSupportedFormat)
        ));
    }

    #[test]
    fn mailbox_unless_vsync() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_clamped_unless_fixed() {
        let c = caps(2, 0);
        assert_eq!(
            calculate_extent(&c, 8000, 0),
            vk::Extent2D {
                width: 4096,
                height: 1
            }
        );

        let mut fixed = c;
        fixed.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert_eq!(calculate_extent(&fixed, 1920, 1080), fixed.current_extent);
    }

    #[test]
    fn sharing_follows_queue_families() {
        let same = QueueFamilyIndices {
            graphics: 0,
            present: Some(0),
            transfer: 0,
        };
        assert_eq!(sharing_mode(&same), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilyIndices {
            graphics: 0,
            present: Some(2),
            transfer: 1,
        };
        assert_eq!(
            sharing_mode(&split),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }

    #[test]
    fn acquire_and_present_classification() {
        assert_eq!(
            classify_acquire(Ok((1, false))).ok(),
            Some(AcquireOutcome::Image {
                index: 1,
                status: PresentStatus::Success
            })
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).ok(),
            Some(AcquireOutcome::Image {
                index: 0,
                status: PresentStatus::Suboptimal
            })
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).ok(),
            Some(AcquireOutcome::OutOfDate)
        );
        assert!(matches!(
            classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)),
            Err(GpuError::DeviceLost)
        ));
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).ok(),
            Some(PresentStatus::OutOfDate)
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }

    #[test]
    fn second_acquire_after_out_of_date_is_rejected() {
        let mut state = PresentationState::default();
        assert!(state.check_acquire().is_ok());

        state.observe(PresentStatus::OutOfDate);
        assert!(state.is_stale());
        assert!(matches!(
            state.check_acquire(),
            Err(GpuError::InvalidState(_))
        ));

        state.rebuilt();
        assert!(state.check_acquire().is_ok());
        assert!(!state.needs_rebuild());
    }

    #[test]
    fn suboptimal_requests_rebuild_but_stays_usable() {
        let mut state = PresentationState::default();
        state.observe(PresentStatus::Suboptimal);
        assert!(state.needs_rebuild());
        assert!(state.check_acquire().is_ok());
    }
}
