//! Synchronization primitives.

use crate::device::LogicalDevice;
use crate::error::{Result, VkResultExt};
use crate::object::{Fence, Semaphore};
use ash::vk;
use std::sync::Arc;

/// Default timeout for fence waits, in nanoseconds.
pub const DEFAULT_FENCE_TIMEOUT_NS: u64 = 100_000_000_000;

impl Fence {
    /// Create a fence, optionally already signaled.
    pub(crate) fn new(device: &Arc<LogicalDevice>, signaled: bool) -> Result<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let raw = unsafe {
            device
                .raw()
                .create_fence(&create_info, None)
                .context("vkCreateFence")?
        };
        Ok(Self::from_raw(device, raw))
    }

    /// Wait for the fence to be signaled.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .wait_for_fences(&[self.raw], true, timeout_ns)
                .context("vkWaitForFences")
        }
    }

    /// Reset the fence to unsignaled state.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn reset(&self) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .reset_fences(&[self.raw])
                .context("vkResetFences")
        }
    }

    /// Whether the fence is currently signaled.
    pub fn is_signaled(&self) -> Result<bool> {
        unsafe {
            self.device
                .raw()
                .get_fence_status(self.raw)
                .context("vkGetFenceStatus")
        }
    }
}

impl Semaphore {
    /// Create a binary semaphore.
    pub(crate) fn new(device: &Arc<LogicalDevice>) -> Result<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let raw = unsafe {
            device
                .raw()
                .create_semaphore(&create_info, None)
                .context("vkCreateSemaphore")?
        };
        Ok(Self::from_raw(device, raw))
    }
}

/// Per-frame synchronization resources.
pub struct FrameSync {
    /// Semaphore signaled when image is available
    pub image_available: Semaphore,
    /// Semaphore signaled when rendering is complete
    pub render_finished: Semaphore,
    /// Fence to wait for frame completion
    pub in_flight: Fence,
}

impl FrameSync {
    pub fn new(device: &Arc<LogicalDevice>) -> Result<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }

    /// Wait for the previous use of this frame to finish, then reset the fence.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_and_reset(&self) -> Result<()> {
        self.in_flight.wait(DEFAULT_FENCE_TIMEOUT_NS)?;
        self.in_flight.reset()
    }
}
