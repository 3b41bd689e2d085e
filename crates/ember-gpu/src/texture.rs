//! Sampled 2D textures.

use crate::command::CommandPool;
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, VkResultExt};
use crate::memory::{Buffer, Image};
use crate::object::{ImageView, Sampler};
use crate::queue::Queue;
use ash::vk;
use std::sync::Arc;

/// Image format for 8-bit pixels with `components` channels.
pub fn texture_format(components: u32, srgb: bool) -> Result<vk::Format> {
    match (components, srgb) {
        (1, false) => Ok(vk::Format::R8_UNORM),
        (1, true) => Ok(vk::Format::R8_SRGB),
        (2, false) => Ok(vk::Format::R8G8_UNORM),
        (2, true) => Ok(vk::Format::R8G8_SRGB),
        (4, false) => Ok(vk::Format::R8G8B8A8_UNORM),
        (4, true) => Ok(vk::Format::R8G8B8A8_SRGB),
        // RGB8 is rarely sampleable; needs expansion to RGBA first.
        (3, _) => Err(GpuError::not_yet_implemented(
            "three-component textures are not supported",
        )),
        (n, _) => Err(GpuError::illegal_argument(format!(
            "unsupported texture component count {n}"
        ))),
    }
}

/// Parameters for a 2D texture upload.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub components: u32,
    pub srgb: bool,
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, components: u32) -> Self {
        Self {
            width,
            height,
            components,
            srgb: true,
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
        }
    }

    /// Bytes of tightly packed pixel data this texture expects.
    pub fn byte_len(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.components)
    }
}

/// An image with a view and a sampler, ready for shader sampling.
pub struct Texture {
    // Field order is destruction order.
    sampler: Sampler,
    view: ImageView,
    image: Image,
    layout: vk::ImageLayout,
}

impl Texture {
    /// Upload `pixels` into a new device-local image and leave it shader-readable.
    ///
    /// Records into a buffer from `pool` and waits for `queue` to finish.
    pub(crate) fn upload_2d(
        device: &Arc<LogicalDevice>,
        pool: &mut CommandPool,
        queue: &Queue,
        desc: &TextureDesc,
        pixels: &[u8],
    ) -> Result<Self> {
        let format = texture_format(desc.components, desc.srgb)?;
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::illegal_argument("texture extent must be non-zero"));
        }
        if pixels.len() as u64 != desc.byte_len() {
            return Err(GpuError::illegal_argument(format!(
                "expected {} bytes of pixel data, got {}",
                desc.byte_len(),
                pixels.len()
            )));
        }

        let mut staging = Buffer::new(
            device,
            desc.byte_len(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.bind()?;
        staging.load(pixels)?;

        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        };
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let mut image = Image::new(device, &image_info, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        image.bind()?;

        let command_buffer = pool.allocate_primary()?;
        let recorded = (|| -> Result<()> {
            let recorder = pool.recorder(command_buffer)?;
            recorder.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            recorder.set_image_memory_barrier(
                image.handle(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            );
            let region = vk::BufferImageCopy::default()
                .image_subresource(
                    vk::ImageSubresourceLayers::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1),
                )
                .image_extent(extent);
            recorder.copy_buffer_to_image(
                &staging,
                &image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            recorder.set_image_memory_barrier(
                image.handle(),
                vk::ImageAspectFlags::COLOR,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            );
            recorder.end()?;
            queue.flush(&recorder)
        })();
        pool.free(&[command_buffer])?;
        recorded?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.handle())
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );
        let view = ImageView::new(device, &view_info)?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.filter)
            .min_filter(desc.filter)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(desc.address_mode)
            .address_mode_v(desc.address_mode)
            .address_mode_w(desc.address_mode)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::FLOAT_OPAQUE_BLACK);
        let sampler = unsafe {
            device
                .raw()
                .create_sampler(&sampler_info, None)
                .context("vkCreateSampler")?
        };

        tracing::debug!(
            "Uploaded {}x{} texture ({:?})",
            desc.width,
            desc.height,
            format
        );

        Ok(Self {
            sampler: Sampler::from_raw(device, sampler),
            view,
            image,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        })
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn view(&self) -> &ImageView {
        &self.view
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Combined-image-sampler descriptor info.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler.handle())
            .image_view(self.view.handle())
            .image_layout(self.layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn supported_component_counts() {
        assert_eq!(texture_format(1, false).unwrap(), vk::Format::R8_UNORM);
        assert_eq!(texture_format(2, true).unwrap(), vk::Format::R8G8_SRGB);
        assert_eq!(texture_format(4, true).unwrap(), vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn three_components_not_yet_implemented() {
        let err = texture_format(3, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotYetImplemented);
    }

    #[test]
    fn invalid_component_count_is_illegal_argument() {
        assert_eq!(
            texture_format(0, false).unwrap_err().kind(),
            ErrorKind::IllegalArgument
        );
        assert_eq!(
            texture_format(5, true).unwrap_err().kind(),
            ErrorKind::IllegalArgument
        );
    }

    #[test]
    fn byte_len_covers_all_pixels() {
        assert_eq!(TextureDesc::new(4, 2, 4).byte_len(), 32);
    }
}
