//! Descriptor set management.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, VkResultExt};
use crate::memory::Buffer;
use crate::object::{DescriptorPool, DescriptorSetLayout};
use crate::texture::Texture;
use ash::vk;
use std::sync::Arc;

/// Descriptor set layout builder.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorSetLayoutBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self
    }

    /// Add a uniform buffer binding.
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    /// Add a storage buffer binding.
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a combined image sampler binding.
    pub fn combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }
}

/// Pool sizes able to hold `max_sets` sets of the given layout bindings.
pub fn pool_sizes_for(
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    max_sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        let count = binding.descriptor_count * max_sets;
        match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
            Some(size) => size.descriptor_count += count,
            None => sizes.push(vk::DescriptorPoolSize {
                ty: binding.descriptor_type,
                descriptor_count: count,
            }),
        }
    }
    sizes
}

impl DescriptorSetLayout {
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<Self> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let raw = unsafe {
            device
                .raw()
                .create_descriptor_set_layout(&layout_info, None)
                .context("vkCreateDescriptorSetLayout")?
        };
        Ok(Self::from_raw(device, raw))
    }
}

impl DescriptorPool {
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<Self> {
        if max_sets == 0 || pool_sizes.is_empty() {
            return Err(GpuError::illegal_argument(
                "descriptor pool needs at least one set and one pool size",
            ));
        }

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let raw = unsafe {
            device
                .raw()
                .create_descriptor_pool(&create_info, None)
                .context("vkCreateDescriptorPool")?
        };
        Ok(Self::from_raw(device, raw))
    }

    /// Allocate one set per layout. Sets live until the pool is reset or dropped.
    pub fn allocate(&self, layouts: &[&DescriptorSetLayout]) -> Result<Vec<vk::DescriptorSet>> {
        let raw_layouts: Vec<vk::DescriptorSetLayout> = layouts.iter().map(|l| l.handle()).collect();
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.raw)
            .set_layouts(&raw_layouts);

        unsafe {
            self.device
                .raw()
                .allocate_descriptor_sets(&alloc_info)
                .context("vkAllocateDescriptorSets")
        }
    }

    /// Reset the pool, freeing all descriptor sets.
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .reset_descriptor_pool(self.raw, vk::DescriptorPoolResetFlags::empty())
                .context("vkResetDescriptorPool")
        }
    }
}

/// Resource bound by a [`DescriptorWrite`].
#[derive(Clone, Copy)]
pub enum DescriptorResource<'a> {
    UniformBuffer(&'a Buffer),
    StorageBuffer(&'a Buffer),
    CombinedImageSampler(&'a Texture),
}

impl DescriptorResource<'_> {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer(_) => vk::DescriptorType::UNIFORM_BUFFER,
            Self::StorageBuffer(_) => vk::DescriptorType::STORAGE_BUFFER,
            Self::CombinedImageSampler(_) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

/// One descriptor update.
#[derive(Clone, Copy)]
pub struct DescriptorWrite<'a> {
    pub set: vk::DescriptorSet,
    pub binding: u32,
    pub resource: DescriptorResource<'a>,
}

/// Apply `writes` in a single native call.
pub(crate) fn update_descriptor_sets(device: &LogicalDevice, writes: &[DescriptorWrite<'_>]) {
    let buffer_infos: Vec<vk::DescriptorBufferInfo> = writes
        .iter()
        .map(|write| match write.resource {
            DescriptorResource::UniformBuffer(buffer) | DescriptorResource::StorageBuffer(buffer) => {
                buffer.descriptor_info()
            }
            DescriptorResource::CombinedImageSampler(_) => vk::DescriptorBufferInfo::default(),
        })
        .collect();

    let image_infos: Vec<vk::DescriptorImageInfo> = writes
        .iter()
        .map(|write| match write.resource {
            DescriptorResource::CombinedImageSampler(texture) => texture.descriptor_info(),
            _ => vk::DescriptorImageInfo::default(),
        })
        .collect();

    let raw: Vec<vk::WriteDescriptorSet<'_>> = writes
        .iter()
        .enumerate()
        .map(|(i, write)| {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(write.set)
                .dst_binding(write.binding)
                .descriptor_type(write.resource.descriptor_type());
            match write.resource {
                DescriptorResource::CombinedImageSampler(_) => {
                    base.image_info(std::slice::from_ref(&image_infos[i]))
                }
                _ => base.buffer_info(std::slice::from_ref(&buffer_infos[i])),
            }
        })
        .collect();

    unsafe { device.raw().update_descriptor_sets(&raw, &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_records_bindings_in_order() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .combined_image_sampler(1, vk::ShaderStageFlags::FRAGMENT);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn pool_sizes_aggregate_per_type() {
        let builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .uniform_buffer(1, vk::ShaderStageFlags::FRAGMENT)
            .combined_image_sampler(2, vk::ShaderStageFlags::FRAGMENT);

        let sizes = pool_sizes_for(builder.bindings(), 4);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 8);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 4);
    }
}
