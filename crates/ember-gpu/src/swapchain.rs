//! Swapchain management.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, VkResultExt};
use crate::object::ImageView;
use crate::selection::QueueFamilySelection;
use crate::surface::SurfaceSupport;
use ash::vk;
use std::sync::Arc;

/// Swapchain and depth preferences supplied by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    /// Preferred color format.
    pub format: vk::Format,
    /// Preferred color space.
    pub color_space: vk::ColorSpaceKHR,
    /// Requested number of images. Raised to the surface minimum plus one.
    pub image_count: Option<u32>,
    /// Wait for vertical blank when presenting.
    pub vsync: bool,
    /// Format of the depth buffer built alongside the swapchain.
    pub depth_format: vk::Format,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            image_count: None,
            vsync: true,
            depth_format: vk::Format::D32_SFLOAT,
        }
    }
}

/// How the surface format was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatChoice {
    /// Requested format and color space.
    Exact,
    /// Requested format with a different color space.
    ColorSpaceFallback,
    /// Neither matched; the first reported format.
    FirstAvailable,
}

/// Number of swapchain images to request.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: Option<u32>) -> u32 {
    let count = (capabilities.min_image_count + 1).max(requested.unwrap_or(0));
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Pick a surface format, preferring an exact match.
pub fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
) -> Option<(vk::SurfaceFormatKHR, FormatChoice)> {
    let preferred = vk::SurfaceFormatKHR { format, color_space };

    // A single UNDEFINED entry means the surface takes anything.
    if let [only] = available {
        if only.format == vk::Format::UNDEFINED {
            return Some((preferred, FormatChoice::Exact));
        }
    }

    if available.contains(&preferred) {
        return Some((preferred, FormatChoice::Exact));
    }

    if let Some(same_format) = available.iter().find(|f| f.format == format) {
        return Some((*same_format, FormatChoice::ColorSpaceFallback));
    }

    available
        .first()
        .map(|&first| (first, FormatChoice::FirstAvailable))
}

/// IDENTITY when supported, otherwise the current transform.
pub fn choose_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

/// First supported composite alpha mode in preference order.
pub fn choose_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> Option<vk::CompositeAlphaFlagsKHR> {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| capabilities.supported_composite_alpha.contains(mode))
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        // FIFO is always supported
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
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
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One presentable image and its view.
pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: ImageView,
}

/// A swapchain with one view per image.
///
/// Views always belong to the current swapchain handle; a rebuild produces a
/// fresh `Swapchain` with fresh views.
pub struct Swapchain {
    device: Arc<LogicalDevice>,
    raw: vk::SwapchainKHR,
    images: Vec<SwapchainImage>,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Build a swapchain for the device surface.
    ///
    /// `old` is handed to the driver for resource reuse. The caller drops it only
    /// after this returns successfully.
    pub fn build(
        device: &Arc<LogicalDevice>,
        surface: &SurfaceSupport,
        config: &SwapchainConfig,
        families: &QueueFamilySelection,
        extent: vk::Extent2D,
        old: Option<&Swapchain>,
    ) -> Result<Self> {
        let capabilities = &surface.capabilities;
        let image_count = choose_image_count(capabilities, config.image_count);

        let (surface_format, choice) =
            choose_surface_format(&surface.formats, config.format, config.color_space)
                .ok_or_else(|| GpuError::illegal_state("surface reports no formats"))?;
        match choice {
            FormatChoice::Exact => {}
            FormatChoice::ColorSpaceFallback => tracing::warn!(
                "Color space {:?} unavailable for {:?}, using {:?}",
                config.color_space,
                config.format,
                surface_format.color_space
            ),
            FormatChoice::FirstAvailable => tracing::warn!(
                "Surface format {:?} unavailable, using {:?}",
                config.format,
                surface_format.format
            ),
        }

        let composite_alpha = choose_composite_alpha(capabilities)
            .ok_or_else(|| GpuError::illegal_state("surface supports no composite alpha mode"))?;
        let present_mode = select_present_mode(&surface.present_modes, config.vsync);

        let family_indices = [families.graphics, families.present];
        let (sharing_mode, shared_families) = if families.shares_present() {
            (vk::SharingMode::EXCLUSIVE, &family_indices[..0])
        } else {
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.instance().surface())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(choose_pre_transform(capabilities))
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old.map_or(vk::SwapchainKHR::null(), |o| o.raw));

        let loader = device.swapchain_fns();
        let raw = unsafe {
            loader
                .create_swapchain(&create_info, None)
                .context("vkCreateSwapchainKHR")?
        };

        // From here on, drop destroys `raw` and whatever views were created.
        let mut swapchain = Self {
            device: device.clone(),
            raw,
            images: Vec::new(),
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode,
            extent,
        };

        let images = unsafe {
            loader
                .get_swapchain_images(raw)
                .context("vkGetSwapchainImagesKHR")?
        };

        for image in images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            let view = ImageView::new(device, &view_info)?;
            swapchain.images.push(SwapchainImage { image, view });
        }

        tracing::info!(
            "Created swapchain {}x{} with {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            swapchain.images.len(),
            surface_format.format,
            present_mode
        );

        Ok(swapchain)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.raw
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Views must go before the images they reference.
        self.images.clear();
        unsafe {
            self.device.swapchain_fns().destroy_swapchain(self.raw, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            ..Default::default()
        }
    }

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn image_count_is_min_plus_one_by_default() {
        assert_eq!(choose_image_count(&capabilities(2, 8), None), 3);
    }

    #[test]
    fn image_count_honours_larger_request() {
        assert_eq!(choose_image_count(&capabilities(2, 8), Some(5)), 5);
        assert_eq!(choose_image_count(&capabilities(2, 8), Some(1)), 3);
    }

    #[test]
    fn image_count_clamped_to_max() {
        assert_eq!(choose_image_count(&capabilities(2, 3), Some(6)), 3);
        assert_eq!(choose_image_count(&capabilities(3, 3), None), 3);
    }

    #[test]
    fn zero_max_means_unbounded() {
        assert_eq!(choose_image_count(&capabilities(2, 0), Some(16)), 16);
    }

    #[test]
    fn exact_surface_format_preferred() {
        let available = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let (chosen, choice) = choose_surface_format(
            &available,
            vk::Format::B8G8R8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )
        .unwrap();
        assert_eq!(chosen, available[1]);
        assert_eq!(choice, FormatChoice::Exact);
    }

    #[test]
    fn same_format_other_color_space_is_second_choice() {
        let available = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let (chosen, choice) = choose_surface_format(
            &available,
            vk::Format::B8G8R8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )
        .unwrap();
        assert_eq!(chosen, available[1]);
        assert_eq!(choice, FormatChoice::ColorSpaceFallback);
    }

    #[test]
    fn first_available_format_is_last_resort() {
        let available = [surface_format(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )];
        let (chosen, choice) = choose_surface_format(
            &available,
            vk::Format::B8G8R8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )
        .unwrap();
        assert_eq!(chosen, available[0]);
        assert_eq!(choice, FormatChoice::FirstAvailable);
    }

    #[test]
    fn undefined_format_accepts_preference() {
        let available = [surface_format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let (chosen, _) = choose_surface_format(
            &available,
            vk::Format::B8G8R8A8_SRGB,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        )
        .unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn no_formats_yields_none() {
        assert!(choose_surface_format(
            &[],
            vk::Format::B8G8R8A8_UNORM,
            vk::ColorSpaceKHR::SRGB_NONLINEAR
        )
        .is_none());
    }

    #[test]
    fn identity_transform_preferred() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY
                | vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..Default::default()
        };
        assert_eq!(
            choose_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );

        let caps = vk::SurfaceCapabilitiesKHR {
            supported_transforms: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            ..Default::default()
        };
        assert_eq!(
            choose_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::ROTATE_90
        );
    }

    #[test]
    fn composite_alpha_preference_order() {
        let caps = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::INHERIT
                | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
            ..Default::default()
        };
        assert_eq!(
            choose_composite_alpha(&caps),
            Some(vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED)
        );

        assert_eq!(
            choose_composite_alpha(&vk::SurfaceCapabilitiesKHR::default()),
            None
        );
    }

    #[test]
    fn present_mode_selection() {
        let modes = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(select_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn fixed_extent_is_used_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn undefined_extent_is_clamped() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let extent = calculate_extent(&caps, 1920, 10);
        assert_eq!((extent.width, extent.height), (1024, 64));
    }
}
