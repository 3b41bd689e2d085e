//! The graphics device: logical device, swapchain, depth buffer, queues,
//! command pools and resource factories.

use crate::capabilities::DeviceCapabilitySnapshot;
use crate::command::CommandPool;
use crate::depth::DepthBuffer;
use crate::descriptors::{update_descriptor_sets, DescriptorWrite};
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, VkResultExt};
use crate::memory::{Buffer, Image};
use crate::object::{
    DescriptorPool, DescriptorSetLayout, Fence, Framebuffer, ImageView, Pipeline, PipelineLayout,
    RenderPass, Semaphore, ShaderModule,
};
use crate::pipeline::{GraphicsPipelineConfig, ShaderStage};
use crate::queue::Queue;
use crate::selection::AdapterSelection;
use crate::surface::SurfaceSupport;
use crate::swapchain::{Swapchain, SwapchainConfig};
use crate::texture::{Texture, TextureDesc};
use ash::vk;
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

new_key_type! {
    /// Handle to a command pool owned by a [`GraphicsDevice`].
    pub struct CommandPoolId;
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired(u32),
    /// Usable, but the swapchain should be rebuilt soon.
    Suboptimal(u32),
    /// No image was acquired; the swapchain must be rebuilt.
    OutOfDate,
}

/// Classify the raw result of `vkAcquireNextImageKHR`.
pub fn classify_acquire(result: ash::prelude::VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
        Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err::<AcquireOutcome, _>(e).context("vkAcquireNextImageKHR"),
    }
}

/// Whether a swapchain can be built for `extent`.
pub fn is_presentable(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

/// A logical device with its presentation state.
///
/// Teardown order: command pools, depth buffer, swapchain, then the logical
/// device once the last resource wrapper holding it is gone.
pub struct GraphicsDevice {
    command_pools: SlotMap<CommandPoolId, CommandPool>,
    depth_buffer: Option<DepthBuffer>,
    swapchain: Option<Swapchain>,
    graphics_queue: Queue,
    present_queue: Queue,
    queues: Vec<Queue>,
    snapshot: DeviceCapabilitySnapshot,
    surface: SurfaceSupport,
    selection: AdapterSelection,
    config: SwapchainConfig,
    device: Arc<LogicalDevice>,
}

impl GraphicsDevice {
    pub(crate) fn new(
        device: Arc<LogicalDevice>,
        snapshot: DeviceCapabilitySnapshot,
        selection: AdapterSelection,
        config: SwapchainConfig,
    ) -> Result<Self> {
        let queues: Vec<Queue> = selection
            .queue_families
            .unique_families()
            .into_iter()
            .map(|family| Queue::new(&device, family))
            .collect();

        let graphics_queue = Queue::new(&device, selection.queue_families.graphics);
        // Shared family means the same queue serves both roles.
        let present_queue = if selection.queue_families.shares_present() {
            graphics_queue.clone()
        } else {
            Queue::new(&device, selection.queue_families.present)
        };

        let surface = snapshot.surface.clone();
        let mut graphics = Self {
            command_pools: SlotMap::with_key(),
            depth_buffer: None,
            swapchain: None,
            graphics_queue,
            present_queue,
            queues,
            snapshot,
            surface,
            selection,
            config,
            device,
        };

        graphics.build_presentation()?;
        Ok(graphics)
    }

    /// Build the swapchain and depth buffer for the current surface state.
    ///
    /// The previous swapchain is retired only after its replacement exists.
    /// A zero-area surface, such as a window minimized at startup, is an
    /// illegal-state error.
    fn build_presentation(&mut self) -> Result<()> {
        let extent = self.surface.preferred_extent;
        if !is_presentable(extent) {
            return Err(GpuError::illegal_state(format!(
                "cannot build a swapchain for a {}x{} surface",
                extent.width, extent.height
            )));
        }
        let swapchain = Swapchain::build(
            &self.device,
            &self.surface,
            &self.config,
            &self.selection.queue_families,
            extent,
            self.swapchain.as_ref(),
        )?;
        self.swapchain = Some(swapchain);

        self.depth_buffer = None;
        self.depth_buffer = Some(DepthBuffer::new(
            &self.device,
            self.config.depth_format,
            extent,
        )?);
        Ok(())
    }

    pub fn logical_device(&self) -> &Arc<LogicalDevice> {
        &self.device
    }

    pub fn raw(&self) -> &ash::Device {
        self.device.raw()
    }

    /// Snapshot of the adapter this device was created on.
    pub fn adapter(&self) -> &DeviceCapabilitySnapshot {
        &self.snapshot
    }

    pub fn selection(&self) -> &AdapterSelection {
        &self.selection
    }

    pub fn swapchain_config(&self) -> &SwapchainConfig {
        &self.config
    }

    pub fn graphics_queue(&self) -> &Queue {
        &self.graphics_queue
    }

    pub fn present_queue(&self) -> &Queue {
        &self.present_queue
    }

    /// First created queue whose family exposes every flag in `flags`.
    pub fn queue_for(&self, flags: vk::QueueFlags) -> Option<&Queue> {
        self.queues.iter().find(|queue| {
            self.snapshot
                .queue_families
                .get(queue.family_index() as usize)
                .is_some_and(|family| family.supports(flags))
        })
    }

    pub fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| GpuError::illegal_state("swapchain has not been created"))
    }

    pub fn depth_buffer(&self) -> Result<&DepthBuffer> {
        self.depth_buffer
            .as_ref()
            .ok_or_else(|| GpuError::illegal_state("depth buffer has not been created"))
    }

    /// Acquire the next presentable image, signaling `semaphore` when it is ready.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn acquire_next_image(
        &self,
        semaphore: &Semaphore,
        fence: Option<&Fence>,
    ) -> Result<AcquireOutcome> {
        let swapchain = self.swapchain()?;
        let result = unsafe {
            self.device.swapchain_fns().acquire_next_image(
                swapchain.handle(),
                u64::MAX,
                semaphore.handle(),
                fence.map_or(vk::Fence::null(), Fence::handle),
            )
        };

        let outcome = classify_acquire(result)?;
        if outcome == AcquireOutcome::OutOfDate {
            tracing::debug!("Swapchain out of date on acquire");
        }
        Ok(outcome)
    }

    /// Rebuild the swapchain and depth buffer for a new framebuffer size.
    ///
    /// Returns `false` and keeps the current swapchain when the surface has
    /// zero area, as with a minimized window.
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> Result<bool> {
        self.wait_idle()?;

        let surface = SurfaceSupport::query(
            self.device.instance(),
            self.device.physical_device(),
            (width, height),
        )?;
        if !is_presentable(surface.preferred_extent) {
            tracing::debug!("Skipping swapchain rebuild for zero-sized surface");
            return Ok(false);
        }

        self.surface = surface;
        self.build_presentation()?;
        Ok(true)
    }

    /// Block until the device is idle.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle()
    }

    /// Index of the first memory type allowed by `type_bits` with all of `properties`.
    pub fn memory_type_from_properties(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        self.device.memory_type_from_properties(type_bits, properties)
    }

    /// Create a buffer with memory allocated but not yet bound.
    pub fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Buffer> {
        Buffer::new(&self.device, size, usage, properties)
    }

    /// Host-visible buffer, bound and ready to load.
    fn create_host_buffer(&self, size: u64, usage: vk::BufferUsageFlags) -> Result<Buffer> {
        let mut buffer = self.create_buffer(
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.bind()?;
        Ok(buffer)
    }

    /// Bound host-visible uniform buffer.
    pub fn create_uniform_buffer(&self, size: u64) -> Result<Buffer> {
        self.create_host_buffer(size, vk::BufferUsageFlags::UNIFORM_BUFFER)
    }

    /// Bound host-visible vertex buffer.
    pub fn create_vertex_buffer(&self, size: u64) -> Result<Buffer> {
        self.create_host_buffer(size, vk::BufferUsageFlags::VERTEX_BUFFER)
    }

    /// Bound host-visible index buffer.
    pub fn create_index_buffer(&self, size: u64) -> Result<Buffer> {
        self.create_host_buffer(size, vk::BufferUsageFlags::INDEX_BUFFER)
    }

    /// Create an image with memory allocated but not yet bound.
    pub fn create_image(
        &self,
        create_info: &vk::ImageCreateInfo<'_>,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Image> {
        Image::new(&self.device, create_info, properties)
    }

    pub fn create_image_view(&self, create_info: &vk::ImageViewCreateInfo<'_>) -> Result<ImageView> {
        ImageView::new(&self.device, create_info)
    }

    /// Create a command pool for `queue_family`, owned by this device.
    pub fn create_command_pool(
        &mut self,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<CommandPoolId> {
        let known = self
            .snapshot
            .queue_families
            .iter()
            .any(|f| f.index == queue_family);
        if !known {
            return Err(GpuError::illegal_argument(format!(
                "queue family {queue_family} does not exist"
            )));
        }

        let pool = CommandPool::new(&self.device, queue_family, flags)?;
        Ok(self.command_pools.insert(pool))
    }

    pub fn command_pool(&self, id: CommandPoolId) -> Result<&CommandPool> {
        self.command_pools
            .get(id)
            .ok_or_else(|| GpuError::illegal_state("command pool has been destroyed"))
    }

    pub fn command_pool_mut(&mut self, id: CommandPoolId) -> Result<&mut CommandPool> {
        self.command_pools
            .get_mut(id)
            .ok_or_else(|| GpuError::illegal_state("command pool has been destroyed"))
    }

    /// Wait for the device, free the pool's buffers and destroy it.
    ///
    /// Destroying an already destroyed pool does nothing.
    pub fn destroy_command_pool(&mut self, id: CommandPoolId) -> Result<()> {
        if !self.command_pools.contains_key(id) {
            return Ok(());
        }
        self.wait_idle()?;
        self.command_pools.remove(id);
        Ok(())
    }

    pub fn create_descriptor_set_layout(
        &self,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    ) -> Result<DescriptorSetLayout> {
        DescriptorSetLayout::new(&self.device, bindings)
    }

    pub fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<DescriptorPool> {
        DescriptorPool::new(&self.device, max_sets, pool_sizes)
    }

    pub fn allocate_descriptor_sets(
        &self,
        pool: &DescriptorPool,
        layouts: &[&DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        pool.allocate(layouts)
    }

    pub fn update_descriptor_sets(&self, writes: &[DescriptorWrite<'_>]) {
        update_descriptor_sets(&self.device, writes);
    }

    pub fn create_pipeline_layout(
        &self,
        set_layouts: &[&DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<PipelineLayout> {
        let raw: Vec<vk::DescriptorSetLayout> = set_layouts.iter().map(|l| l.handle()).collect();
        PipelineLayout::new(&self.device, &raw, push_constant_ranges)
    }

    pub fn create_render_pass(&self, create_info: &vk::RenderPassCreateInfo<'_>) -> Result<RenderPass> {
        RenderPass::new(&self.device, create_info)
    }

    /// Render pass targeting the swapchain color format and the depth buffer.
    pub fn create_swapchain_render_pass(&self) -> Result<RenderPass> {
        let color_format = self.swapchain()?.format();
        let depth_format = self.depth_buffer()?.format();
        RenderPass::for_swapchain(&self.device, color_format, Some(depth_format))
    }

    pub fn create_shader_module(&self, code: &[u32]) -> Result<ShaderModule> {
        ShaderModule::new(&self.device, code)
    }

    pub fn create_frame_buffer(
        &self,
        render_pass: &RenderPass,
        attachments: &[&ImageView],
        extent: vk::Extent2D,
    ) -> Result<Framebuffer> {
        Framebuffer::new(&self.device, render_pass, attachments, extent)
    }

    /// One framebuffer per swapchain image, each with the shared depth view.
    pub fn create_swapchain_framebuffers(&self, render_pass: &RenderPass) -> Result<Vec<Framebuffer>> {
        let swapchain = self.swapchain()?;
        let depth = self.depth_buffer()?;

        swapchain
            .images()
            .iter()
            .map(|image| {
                self.create_frame_buffer(
                    render_pass,
                    &[&image.view, depth.view()],
                    swapchain.extent(),
                )
            })
            .collect()
    }

    pub fn create_fence(&self, signaled: bool) -> Result<Fence> {
        Fence::new(&self.device, signaled)
    }

    pub fn create_semaphore(&self) -> Result<Semaphore> {
        Semaphore::new(&self.device)
    }

    pub fn create_graphics_pipeline(
        &self,
        config: &GraphicsPipelineConfig,
        stages: &[ShaderStage<'_>],
        layout: &PipelineLayout,
        render_pass: &RenderPass,
    ) -> Result<Pipeline> {
        Pipeline::graphics(&self.device, config, stages, layout, render_pass)
    }

    /// Upload a 2D texture through a staging buffer on the graphics queue.
    pub fn create_texture_2d(&self, desc: &TextureDesc, pixels: &[u8]) -> Result<Texture> {
        let mut pool = CommandPool::new(
            &self.device,
            self.graphics_queue.family_index(),
            vk::CommandPoolCreateFlags::TRANSIENT,
        )?;
        Texture::upload_2d(&self.device, &mut pool, &self.graphics_queue, desc, pixels)
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle on teardown: {e}");
        }
        self.command_pools.clear();
        self.depth_buffer = None;
        self.swapchain = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn acquire_results_are_classified() {
        assert_eq!(classify_acquire(Ok((2, false))).unwrap(), AcquireOutcome::Acquired(2));
        assert_eq!(classify_acquire(Ok((1, true))).unwrap(), AcquireOutcome::Suboptimal(1));
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
    }

    #[test]
    fn zero_area_surfaces_are_not_presentable() {
        assert!(is_presentable(vk::Extent2D { width: 800, height: 600 }));
        assert!(!is_presentable(vk::Extent2D { width: 0, height: 600 }));
        assert!(!is_presentable(vk::Extent2D { width: 800, height: 0 }));
    }

    #[test]
    fn acquire_failure_is_illegal_state() {
        let err = classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }
}
