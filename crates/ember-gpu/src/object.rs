//! Owned wrappers for simple device-level handles.
//!
//! Each wrapper holds the device alive and destroys its handle on drop.

use crate::device::LogicalDevice;
use ash::vk;
use std::sync::Arc;

macro_rules! device_object {
    ($(#[$meta:meta])* $name:ident, $raw:ty, $destroy:ident) => {
        $(#[$meta])*
        pub struct $name {
            pub(crate) device: Arc<LogicalDevice>,
            pub(crate) raw: $raw,
        }

        impl $name {
            /// Take ownership of `raw`, which must have been created on `device`.
            pub(crate) fn from_raw(device: &Arc<LogicalDevice>, raw: $raw) -> Self {
                Self {
                    device: device.clone(),
                    raw,
                }
            }

            pub fn handle(&self) -> $raw {
                self.raw
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.raw).finish()
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                unsafe {
                    self.device.raw().$destroy(self.raw, None);
                }
            }
        }
    };
}

device_object!(
    /// An image view.
    ImageView,
    vk::ImageView,
    destroy_image_view
);
device_object!(Sampler, vk::Sampler, destroy_sampler);
device_object!(ShaderModule, vk::ShaderModule, destroy_shader_module);
device_object!(PipelineLayout, vk::PipelineLayout, destroy_pipeline_layout);
device_object!(
    /// A render pass describing attachments and subpasses.
    RenderPass,
    vk::RenderPass,
    destroy_render_pass
);
device_object!(Framebuffer, vk::Framebuffer, destroy_framebuffer);
device_object!(
    /// A graphics or compute pipeline.
    Pipeline,
    vk::Pipeline,
    destroy_pipeline
);
device_object!(
    DescriptorSetLayout,
    vk::DescriptorSetLayout,
    destroy_descriptor_set_layout
);
device_object!(
    /// A descriptor pool. Sets allocated from it are freed with the pool.
    DescriptorPool,
    vk::DescriptorPool,
    destroy_descriptor_pool
);
device_object!(Fence, vk::Fence, destroy_fence);
device_object!(Semaphore, vk::Semaphore, destroy_semaphore);

impl ImageView {
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> crate::Result<Self> {
        use crate::error::VkResultExt;
        let raw = unsafe {
            device
                .raw()
                .create_image_view(create_info, None)
                .context("vkCreateImageView")?
        };
        Ok(Self::from_raw(device, raw))
    }
}
