//! Vulkan device abstraction for the Ember engine.
//!
//! This crate provides:
//! - Instance creation with validated entry-point tables
//! - Adapter capability snapshots and first-fit device selection
//! - Swapchain and depth buffer lifecycle
//! - Command pools with tracked command buffer validity
//! - Buffers, images and textures that own their memory

pub mod capabilities;
pub mod command;
pub mod context;
pub mod depth;
pub mod descriptors;
pub mod device;
pub mod error;
pub mod graphics;
pub mod instance;
pub mod loader;
pub mod memory;
pub mod object;
pub mod pipeline;
pub mod queue;
pub mod selection;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use capabilities::{DeviceCapabilitySnapshot, DeviceFeatures, GpuVendor, QueueFamilyInfo};
pub use command::{CommandBuffer, CommandPool, CommandRecorder};
pub use context::{GraphicsContext, GraphicsContextBuilder};
pub use depth::DepthBuffer;
pub use descriptors::{DescriptorResource, DescriptorSetLayoutBuilder, DescriptorWrite};
pub use device::LogicalDevice;
pub use error::{ErrorKind, GpuError, Result};
pub use graphics::{AcquireOutcome, CommandPoolId, GraphicsDevice};
pub use memory::{Buffer, Image, Mapping};
pub use object::{
    DescriptorPool, DescriptorSetLayout, Fence, Framebuffer, ImageView, Pipeline, PipelineLayout,
    RenderPass, Sampler, Semaphore, ShaderModule,
};
pub use pipeline::{GraphicsPipelineConfig, ShaderStage};
pub use queue::Queue;
pub use selection::{AdapterSelection, DeviceRequirements, QueueFamilySelection};
pub use surface::WindowSurface;
pub use swapchain::{Swapchain, SwapchainConfig};
pub use sync::{FrameSync, DEFAULT_FENCE_TIMEOUT_NS};
pub use texture::{Texture, TextureDesc};
