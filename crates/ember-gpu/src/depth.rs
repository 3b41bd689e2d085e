//! Depth attachment sized to the swapchain.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result};
use crate::memory::Image;
use crate::object::ImageView;
use ash::vk;
use std::sync::Arc;

/// Tiling to use for a depth attachment of the given format.
///
/// LINEAR is tried first, then OPTIMAL. `None` when neither supports depth
/// attachments.
pub fn choose_depth_tiling(properties: &vk::FormatProperties) -> Option<vk::ImageTiling> {
    let attachment = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
    if properties.linear_tiling_features.contains(attachment) {
        Some(vk::ImageTiling::LINEAR)
    } else if properties.optimal_tiling_features.contains(attachment) {
        Some(vk::ImageTiling::OPTIMAL)
    } else {
        None
    }
}

/// Aspect flags for a depth format, adding STENCIL for combined formats.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Depth image, memory and view. Rebuilt with the swapchain.
pub struct DepthBuffer {
    // Declared first so the view is destroyed before the image.
    view: ImageView,
    image: Image,
}

impl DepthBuffer {
    pub fn new(device: &Arc<LogicalDevice>, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        let tiling = choose_depth_tiling(&device.format_properties(format)).ok_or_else(|| {
            GpuError::illegal_state(format!(
                "{format:?} cannot be used as a depth attachment with any tiling"
            ))
        })?;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(tiling)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = Image::new(device, &image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        image.bind()?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(depth_aspect(format))
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = ImageView::new(device, &view_info)?;

        tracing::debug!(
            "Created depth buffer {}x{} {:?} ({:?} tiling)",
            extent.width,
            extent.height,
            format,
            tiling
        );

        Ok(Self { view, image })
    }

    pub fn view(&self) -> &ImageView {
        &self.view
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn format(&self) -> vk::Format {
        self.image.format()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(linear: vk::FormatFeatureFlags, optimal: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            linear_tiling_features: linear,
            optimal_tiling_features: optimal,
            ..Default::default()
        }
    }

    #[test]
    fn linear_tiling_tried_first() {
        let attachment = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            choose_depth_tiling(&properties(attachment, attachment)),
            Some(vk::ImageTiling::LINEAR)
        );
    }

    #[test]
    fn optimal_tiling_is_fallback() {
        assert_eq!(
            choose_depth_tiling(&properties(
                vk::FormatFeatureFlags::SAMPLED_IMAGE,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            )),
            Some(vk::ImageTiling::OPTIMAL)
        );
    }

    #[test]
    fn unsupported_format_has_no_tiling() {
        assert_eq!(
            choose_depth_tiling(&properties(
                vk::FormatFeatureFlags::empty(),
                vk::FormatFeatureFlags::SAMPLED_IMAGE
            )),
            None
        );
    }

    #[test]
    fn combined_formats_include_stencil() {
        assert_eq!(depth_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert!(depth_aspect(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
    }
}
