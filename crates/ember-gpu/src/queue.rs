//! Device queues.

use crate::command::CommandRecorder;
use crate::device::LogicalDevice;
use crate::error::{Result, VkResultExt};
use ash::prelude::VkResult;
use crate::object::Fence;
use crate::sync::DEFAULT_FENCE_TIMEOUT_NS;
use ash::vk;
use std::sync::Arc;

/// Map a present result to its raw code, logging the outcomes callers act on.
pub fn classify_present(result: VkResult<bool>) -> vk::Result {
    match result {
        Ok(false) => vk::Result::SUCCESS,
        Ok(true) => {
            tracing::debug!("Swapchain is suboptimal for the surface");
            vk::Result::SUBOPTIMAL_KHR
        }
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            tracing::debug!("Swapchain is out of date");
            vk::Result::ERROR_OUT_OF_DATE_KHR
        }
        Err(e) => {
            tracing::error!("vkQueuePresentKHR failed: {e}");
            e
        }
    }
}

/// Run `drain` when `waited` failed, then hand back the wait result.
///
/// Work that never signaled its fence may still be executing; it has to finish
/// before the fence or its command buffer is released.
fn drain_on_failed_wait(waited: Result<()>, drain: impl FnOnce() -> Result<()>) -> Result<()> {
    if let Err(e) = &waited {
        tracing::warn!("Fence wait failed ({e}), draining the device");
        if let Err(drain_error) = drain() {
            tracing::error!("Failed to drain the device: {drain_error}");
        }
    }
    waited
}

/// A device queue and the family it belongs to.
#[derive(Clone)]
pub struct Queue {
    device: Arc<LogicalDevice>,
    raw: vk::Queue,
    family_index: u32,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("raw", &self.raw)
            .field("family_index", &self.family_index)
            .finish()
    }
}

impl Queue {
    /// Fetch queue 0 of `family_index`.
    pub(crate) fn new(device: &Arc<LogicalDevice>, family_index: u32) -> Self {
        let raw = unsafe { device.raw().get_device_queue(family_index, 0) };
        Self {
            device: device.clone(),
            raw,
            family_index,
        }
    }

    pub fn handle(&self) -> vk::Queue {
        self.raw
    }

    pub fn family_index(&self) -> u32 {
        self.family_index
    }

    /// Submit one recorded command buffer, signaling `fence` on completion.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn submit(&self, command_buffer: &CommandRecorder<'_>, fence: Option<&Fence>) -> Result<()> {
        let command_buffers = [command_buffer.raw()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        self.submit_batch(&[submit_info], fence)
    }

    /// Submit prepared batches in one call.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn submit_batch(&self, submits: &[vk::SubmitInfo<'_>], fence: Option<&Fence>) -> Result<()> {
        let fence = fence.map_or(vk::Fence::null(), Fence::handle);
        unsafe {
            self.device
                .raw()
                .queue_submit(self.raw, submits, fence)
                .context("vkQueueSubmit")
        }
    }

    /// Present and return the raw result code.
    ///
    /// SUBOPTIMAL and OUT_OF_DATE are logged but left for the caller to act on.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn present(&self, present_info: &vk::PresentInfoKHR<'_>) -> vk::Result {
        let result = unsafe {
            self.device
                .swapchain_fns()
                .queue_present(self.raw, present_info)
        };
        classify_present(result)
    }

    /// Submit and block until the work completes.
    ///
    /// If the wait fails the device is drained before returning the error, so the
    /// command buffer is no longer pending when the call returns.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn flush(&self, command_buffer: &CommandRecorder<'_>) -> Result<()> {
        let fence = Fence::new(&self.device, false)?;
        self.submit(command_buffer, Some(&fence))?;
        drain_on_failed_wait(fence.wait(DEFAULT_FENCE_TIMEOUT_NS), || {
            self.device.wait_idle()
        })
    }

    /// Block until the queue is idle.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .raw()
                .queue_wait_idle(self.raw)
                .context("vkQueueWaitIdle")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, GpuError};
    use std::cell::Cell;

    #[test]
    fn present_results_map_to_raw_codes() {
        assert_eq!(classify_present(Ok(false)), vk::Result::SUCCESS);
        assert_eq!(classify_present(Ok(true)), vk::Result::SUBOPTIMAL_KHR);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            vk::Result::ERROR_OUT_OF_DATE_KHR
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_DEVICE_LOST)),
            vk::Result::ERROR_DEVICE_LOST
        );
    }

    #[test]
    fn successful_wait_does_not_drain() {
        let drained = Cell::new(false);
        let result = drain_on_failed_wait(Ok(()), || {
            drained.set(true);
            Ok(())
        });

        assert!(result.is_ok());
        assert!(!drained.get());
    }

    #[test]
    fn failed_wait_drains_and_keeps_the_wait_error() {
        let drained = Cell::new(false);
        let waited = Err::<(), _>(vk::Result::TIMEOUT).context("vkWaitForFences");
        let result = drain_on_failed_wait(waited, || {
            drained.set(true);
            Err(GpuError::illegal_state("device lost"))
        });

        assert!(drained.get());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(err.vk_result(), Some(vk::Result::TIMEOUT));
    }
}
