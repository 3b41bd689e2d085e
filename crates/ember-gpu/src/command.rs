//! Command pools, command buffers and recording.
//!
//! A [`CommandPool`] hands out [`CommandBuffer`] keys. A key stays valid until
//! the buffer is freed; after that every operation through it fails with an
//! illegal-state error, and a later allocation never revives it.

use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, VkResultExt};
use crate::memory::{Buffer, Image};
use crate::object::{Framebuffer, Pipeline, PipelineLayout, RenderPass};
use ash::vk;
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

new_key_type! {
    /// Handle to a command buffer owned by a [`CommandPool`].
    pub struct CommandBuffer;
}

/// Live command buffers of one pool.
#[derive(Debug, Default)]
pub struct CommandBufferSet {
    live: SlotMap<CommandBuffer, vk::CommandBuffer>,
}

impl CommandBufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track freshly allocated native buffers.
    pub fn insert_batch(&mut self, raw: &[vk::CommandBuffer]) -> Vec<CommandBuffer> {
        raw.iter().map(|&buffer| self.live.insert(buffer)).collect()
    }

    /// Native handle for a live buffer.
    pub fn get(&self, key: CommandBuffer) -> Result<vk::CommandBuffer> {
        self.live
            .get(key)
            .copied()
            .ok_or_else(|| GpuError::illegal_state("command buffer has been freed"))
    }

    pub fn contains(&self, key: CommandBuffer) -> bool {
        self.live.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Stop tracking `keys` and return their native handles.
    ///
    /// Nothing is removed unless every key is live.
    pub fn remove_batch(&mut self, keys: &[CommandBuffer]) -> Result<Vec<vk::CommandBuffer>> {
        if let Some(stale) = keys.iter().find(|&&key| !self.live.contains_key(key)) {
            return Err(GpuError::illegal_state(format!(
                "command buffer {stale:?} has been freed"
            )));
        }
        // Duplicate keys resolve to a single removal.
        Ok(keys.iter().filter_map(|&key| self.live.remove(key)).collect())
    }

    /// Stop tracking every buffer and return the native handles.
    pub fn drain(&mut self) -> Vec<vk::CommandBuffer> {
        self.live.drain().map(|(_, buffer)| buffer).collect()
    }
}

/// A command pool and the buffers allocated from it.
pub struct CommandPool {
    device: Arc<LogicalDevice>,
    raw: vk::CommandPool,
    queue_family: u32,
    buffers: CommandBufferSet,
}

impl CommandPool {
    pub(crate) fn new(
        device: &Arc<LogicalDevice>,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        let raw = unsafe {
            device
                .raw()
                .create_command_pool(&create_info, None)
                .context("vkCreateCommandPool")?
        };

        Ok(Self {
            device: device.clone(),
            raw,
            queue_family,
            buffers: CommandBufferSet::new(),
        })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.raw
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Number of live command buffers.
    pub fn live_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_live(&self, buffer: CommandBuffer) -> bool {
        self.buffers.contains(buffer)
    }

    /// Allocate `count` command buffers in one native call.
    pub fn allocate(
        &mut self,
        level: vk::CommandBufferLevel,
        count: u32,
    ) -> Result<Vec<CommandBuffer>> {
        if count == 0 {
            return Err(GpuError::illegal_argument(
                "command buffer count must be non-zero",
            ));
        }

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.raw)
            .level(level)
            .command_buffer_count(count);

        let raw = unsafe {
            self.device
                .raw()
                .allocate_command_buffers(&alloc_info)
                .context("vkAllocateCommandBuffers")?
        };

        Ok(self.buffers.insert_batch(&raw))
    }

    /// Allocate a single primary command buffer.
    pub fn allocate_primary(&mut self) -> Result<CommandBuffer> {
        let mut buffers = self.allocate(vk::CommandBufferLevel::PRIMARY, 1)?;
        buffers
            .pop()
            .ok_or_else(|| GpuError::illegal_state("driver returned no command buffer"))
    }

    /// Free the given buffers. They are invalid afterwards.
    pub fn free(&mut self, buffers: &[CommandBuffer]) -> Result<()> {
        let raw = self.buffers.remove_batch(buffers)?;
        if !raw.is_empty() {
            unsafe { self.device.raw().free_command_buffers(self.raw, &raw) };
        }
        Ok(())
    }

    /// Free every live buffer in one native call.
    pub fn clear(&mut self) {
        let raw = self.buffers.drain();
        if !raw.is_empty() {
            unsafe { self.device.raw().free_command_buffers(self.raw, &raw) };
        }
    }

    /// Reset every buffer of the pool to the initial state.
    ///
    /// None of the buffers may be pending execution.
    pub fn reset(&mut self, flags: vk::CommandPoolResetFlags) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .reset_command_pool(self.raw, flags)
                .context("vkResetCommandPool")
        }
    }

    /// Native handle of a live buffer.
    pub fn raw_buffer(&self, buffer: CommandBuffer) -> Result<vk::CommandBuffer> {
        self.buffers.get(buffer)
    }

    /// Recorder for a live buffer. The pool cannot free buffers while it exists.
    pub fn recorder(&self, buffer: CommandBuffer) -> Result<CommandRecorder<'_>> {
        Ok(CommandRecorder {
            device: &self.device,
            raw: self.buffers.get(buffer)?,
        })
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.clear();
        unsafe {
            self.device.raw().destroy_command_pool(self.raw, None);
        }
    }
}

/// Access masks for an image layout transition.
pub fn barrier_access_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (vk::AccessFlags, vk::AccessFlags) {
    let src = match old_layout {
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        _ => vk::AccessFlags::empty(),
    };

    let dst = match new_layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::MEMORY_READ,
        _ => vk::AccessFlags::empty(),
    };

    (src, dst)
}

/// Records commands into one live command buffer.
///
/// Everything between [`begin`](Self::begin) and [`end`](Self::end) is a single
/// recording session; recording outside a session is a caller error.
pub struct CommandRecorder<'a> {
    device: &'a LogicalDevice,
    raw: vk::CommandBuffer,
}

impl CommandRecorder<'_> {
    /// Native handle, for submission.
    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// Begin recording.
    pub fn begin(&self, usage: vk::CommandBufferUsageFlags) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default().flags(usage);
        unsafe {
            self.device
                .raw()
                .begin_command_buffer(self.raw, &begin_info)
                .context("vkBeginCommandBuffer")
        }
    }

    /// End recording.
    pub fn end(&self) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .end_command_buffer(self.raw)
                .context("vkEndCommandBuffer")
        }
    }

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: &Pipeline) {
        unsafe {
            self.device
                .raw()
                .cmd_bind_pipeline(self.raw, bind_point, pipeline.handle());
        }
    }

    /// Bind vertex buffers starting at `first_binding`. Offsets pair with buffers.
    pub fn bind_vertex_buffers(
        &self,
        first_binding: u32,
        buffers: &[&Buffer],
        offsets: &[vk::DeviceSize],
    ) -> Result<()> {
        if buffers.len() != offsets.len() {
            return Err(GpuError::illegal_argument(format!(
                "{} vertex buffers but {} offsets",
                buffers.len(),
                offsets.len()
            )));
        }
        let handles: Vec<vk::Buffer> = buffers.iter().map(|b| b.handle()).collect();
        unsafe {
            self.device
                .raw()
                .cmd_bind_vertex_buffers(self.raw, first_binding, &handles, offsets);
        }
        Ok(())
    }

    pub fn bind_index_buffer(
        &self,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device
                .raw()
                .cmd_bind_index_buffer(self.raw, buffer.handle(), offset, index_type);
        }
    }

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.raw().cmd_draw(
                self.raw,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.raw().cmd_draw_indexed(
                self.raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    pub fn copy_buffer(&self, src: &Buffer, dst: &Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            self.device
                .raw()
                .cmd_copy_buffer(self.raw, src.handle(), dst.handle(), regions);
        }
    }

    pub fn copy_buffer_to_image(
        &self,
        src: &Buffer,
        dst: &Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) {
        unsafe {
            self.device.raw().cmd_copy_buffer_to_image(
                self.raw,
                src.handle(),
                dst.handle(),
                dst_layout,
                regions,
            );
        }
    }

    /// Transition `image` between layouts with access masks derived from the layouts.
    pub fn set_image_memory_barrier(
        &self,
        image: vk::Image,
        aspect_mask: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) {
        let (src_access, dst_access) = barrier_access_masks(old_layout, new_layout);

        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            );

        unsafe {
            self.device.raw().cmd_pipeline_barrier(
                self.raw,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }

    pub fn begin_render_pass(
        &self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        render_area: vk::Rect2D,
        clear_values: &[vk::ClearValue],
        contents: vk::SubpassContents,
    ) {
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.device
                .raw()
                .cmd_begin_render_pass(self.raw, &begin_info, contents);
        }
    }

    pub fn end_render_pass(&self) {
        unsafe { self.device.raw().cmd_end_render_pass(self.raw) };
    }

    pub fn set_viewport(&self, viewports: &[vk::Viewport]) {
        unsafe { self.device.raw().cmd_set_viewport(self.raw, 0, viewports) };
    }

    pub fn set_scissor(&self, scissors: &[vk::Rect2D]) {
        unsafe { self.device.raw().cmd_set_scissor(self.raw, 0, scissors) };
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
        dynamic_offsets: &[u32],
    ) {
        unsafe {
            self.device.raw().cmd_bind_descriptor_sets(
                self.raw,
                bind_point,
                layout.handle(),
                first_set,
                sets,
                dynamic_offsets,
            );
        }
    }

    pub fn push_constants(
        &self,
        layout: &PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device
                .raw()
                .cmd_push_constants(self.raw, layout.handle(), stages, offset, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use ash::vk::Handle;

    fn raw_buffers(range: std::ops::Range<u64>) -> Vec<vk::CommandBuffer> {
        range.map(vk::CommandBuffer::from_raw).collect()
    }

    #[test]
    fn batch_allocation_tracks_every_buffer() {
        let mut set = CommandBufferSet::new();
        let keys = set.insert_batch(&raw_buffers(1..4));

        assert_eq!(keys.len(), 3);
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(keys[1]).unwrap(), vk::CommandBuffer::from_raw(2));
    }

    #[test]
    fn freed_buffer_is_illegal_state() {
        let mut set = CommandBufferSet::new();
        let keys = set.insert_batch(&raw_buffers(1..3));

        let freed = set.remove_batch(&keys[..1]).unwrap();
        assert_eq!(freed, vec![vk::CommandBuffer::from_raw(1)]);

        let err = set.get(keys[0]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert!(set.contains(keys[1]));
    }

    #[test]
    fn freed_key_never_revives() {
        let mut set = CommandBufferSet::new();
        let old = set.insert_batch(&raw_buffers(1..2))[0];
        set.remove_batch(&[old]).unwrap();

        // The slot is reused with a new generation.
        let fresh = set.insert_batch(&raw_buffers(7..8))[0];
        assert_ne!(old, fresh);
        assert!(!set.contains(old));
        assert!(set.get(old).is_err());
    }

    #[test]
    fn stale_key_in_batch_removes_nothing() {
        let mut set = CommandBufferSet::new();
        let keys = set.insert_batch(&raw_buffers(1..3));
        set.remove_batch(&keys[..1]).unwrap();

        let err = set.remove_batch(&keys).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert!(set.contains(keys[1]));
    }

    #[test]
    fn duplicate_keys_remove_once() {
        let mut set = CommandBufferSet::new();
        let keys = set.insert_batch(&raw_buffers(1..2));

        let freed = set.remove_batch(&[keys[0], keys[0]]).unwrap();
        assert_eq!(freed.len(), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn drain_invalidates_all() {
        let mut set = CommandBufferSet::new();
        let keys = set.insert_batch(&raw_buffers(1..5));

        assert_eq!(set.drain().len(), 4);
        assert!(set.is_empty());
        assert!(keys.iter().all(|&key| !set.contains(key)));
    }

    #[test]
    fn upload_transition_masks() {
        let (src, dst) = barrier_access_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(src, vk::AccessFlags::empty());
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);

        let (src, dst) = barrier_access_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(src, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn present_transition_masks() {
        let (src, dst) = barrier_access_masks(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(src, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(dst, vk::AccessFlags::MEMORY_READ);
    }
}
