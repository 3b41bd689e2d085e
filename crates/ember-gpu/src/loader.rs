//! Validated tables of Vulkan entry points.
//!
//! `ash` resolves function pointers lazily and substitutes a panicking stub for
//! anything the driver does not export. The tables here check the commands this
//! crate relies on up front so a missing entry point fails at construction
//! instead of at first use.

use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::CStr;

/// Instance-level commands that must resolve.
pub const REQUIRED_INSTANCE_COMMANDS: &[&CStr] = &[
    c"vkDestroyInstance",
    c"vkEnumeratePhysicalDevices",
    c"vkEnumeratePhysicalDeviceGroups",
    c"vkGetPhysicalDeviceProperties",
    c"vkGetPhysicalDeviceFeatures",
    c"vkGetPhysicalDeviceMemoryProperties",
    c"vkGetPhysicalDeviceQueueFamilyProperties",
    c"vkGetPhysicalDeviceFormatProperties",
    c"vkEnumerateDeviceExtensionProperties",
    c"vkCreateDevice",
    c"vkGetDeviceProcAddr",
    c"vkDestroySurfaceKHR",
    c"vkGetPhysicalDeviceSurfaceSupportKHR",
    c"vkGetPhysicalDeviceSurfaceCapabilitiesKHR",
    c"vkGetPhysicalDeviceSurfaceFormatsKHR",
    c"vkGetPhysicalDeviceSurfacePresentModesKHR",
];

/// Device-level commands that must resolve.
pub const REQUIRED_DEVICE_COMMANDS: &[&CStr] = &[
    c"vkDestroyDevice",
    c"vkDeviceWaitIdle",
    c"vkGetDeviceQueue",
    c"vkQueueSubmit",
    c"vkQueueWaitIdle",
    c"vkCreateSwapchainKHR",
    c"vkDestroySwapchainKHR",
    c"vkGetSwapchainImagesKHR",
    c"vkAcquireNextImageKHR",
    c"vkQueuePresentKHR",
    c"vkAllocateMemory",
    c"vkFreeMemory",
    c"vkMapMemory",
    c"vkUnmapMemory",
    c"vkCreateBuffer",
    c"vkDestroyBuffer",
    c"vkBindBufferMemory",
    c"vkGetBufferMemoryRequirements",
    c"vkCreateImage",
    c"vkDestroyImage",
    c"vkBindImageMemory",
    c"vkGetImageMemoryRequirements",
    c"vkCreateImageView",
    c"vkDestroyImageView",
    c"vkCreateSampler",
    c"vkDestroySampler",
    c"vkCreateCommandPool",
    c"vkDestroyCommandPool",
    c"vkResetCommandPool",
    c"vkAllocateCommandBuffers",
    c"vkFreeCommandBuffers",
    c"vkBeginCommandBuffer",
    c"vkEndCommandBuffer",
    c"vkCmdBeginRenderPass",
    c"vkCmdEndRenderPass",
    c"vkCmdBindPipeline",
    c"vkCmdBindVertexBuffers",
    c"vkCmdBindIndexBuffer",
    c"vkCmdBindDescriptorSets",
    c"vkCmdPushConstants",
    c"vkCmdSetViewport",
    c"vkCmdSetScissor",
    c"vkCmdDraw",
    c"vkCmdDrawIndexed",
    c"vkCmdCopyBuffer",
    c"vkCmdCopyBufferToImage",
    c"vkCmdPipelineBarrier",
    c"vkCreateFence",
    c"vkDestroyFence",
    c"vkWaitForFences",
    c"vkResetFences",
    c"vkGetFenceStatus",
    c"vkCreateSemaphore",
    c"vkDestroySemaphore",
    c"vkCreateDescriptorSetLayout",
    c"vkDestroyDescriptorSetLayout",
    c"vkCreateDescriptorPool",
    c"vkDestroyDescriptorPool",
    c"vkResetDescriptorPool",
    c"vkAllocateDescriptorSets",
    c"vkUpdateDescriptorSets",
    c"vkCreatePipelineLayout",
    c"vkDestroyPipelineLayout",
    c"vkCreateRenderPass",
    c"vkDestroyRenderPass",
    c"vkCreateShaderModule",
    c"vkDestroyShaderModule",
    c"vkCreateFramebuffer",
    c"vkDestroyFramebuffer",
    c"vkCreateGraphicsPipelines",
    c"vkDestroyPipeline",
];

/// Names from `required` that `resolves` reports as unavailable.
pub fn missing_entry_points<F>(required: &[&CStr], mut resolves: F) -> Vec<String>
where
    F: FnMut(&CStr) -> bool,
{
    required
        .iter()
        .filter(|&&name| !resolves(name))
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Instance-level dispatch: loader entry, instance, and surface extension.
pub struct InstanceFunctions {
    entry: ash::Entry,
    instance: ash::Instance,
    surface: ash::khr::surface::Instance,
}

impl InstanceFunctions {
    /// Build the table, failing if any required instance command is unresolved.
    ///
    /// The instance is destroyed when validation fails.
    ///
    /// # Safety
    /// `instance` must have been created from `entry`.
    pub unsafe fn new(entry: ash::Entry, instance: ash::Instance) -> Result<Self> {
        let missing = missing_entry_points(REQUIRED_INSTANCE_COMMANDS, |name| {
            unsafe { entry.get_instance_proc_addr(instance.handle(), name.as_ptr()) }.is_some()
        });
        if !missing.is_empty() {
            unsafe { instance.destroy_instance(None) };
            return Err(GpuError::missing_entry_points(missing));
        }

        let surface = ash::khr::surface::Instance::new(&entry, &instance);
        Ok(Self {
            entry,
            instance,
            surface,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface(&self) -> &ash::khr::surface::Instance {
        &self.surface
    }
}

/// Device-level dispatch: core device commands plus the swapchain extension.
pub struct DeviceFunctions {
    device: ash::Device,
    swapchain: ash::khr::swapchain::Device,
}

impl DeviceFunctions {
    /// Build the table, failing if any required device command is unresolved.
    ///
    /// The device is destroyed when validation fails.
    ///
    /// # Safety
    /// `device` must have been created from `instance`.
    pub unsafe fn new(instance: &InstanceFunctions, device: ash::Device) -> Result<Self> {
        let get_device_proc_addr = instance.instance().fp_v1_0().get_device_proc_addr;
        let missing = missing_entry_points(REQUIRED_DEVICE_COMMANDS, |name| {
            unsafe { get_device_proc_addr(device.handle(), name.as_ptr()) }.is_some()
        });
        if !missing.is_empty() {
            unsafe { device.destroy_device(None) };
            return Err(GpuError::missing_entry_points(missing));
        }

        let swapchain = ash::khr::swapchain::Device::new(instance.instance(), &device);
        Ok(Self { device, swapchain })
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn swapchain(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain
    }

    pub fn handle(&self) -> vk::Device {
        self.device.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_unresolved_commands() {
        let required = [c"vkCreateDevice", c"vkCreateSwapchainKHR", c"vkQueuePresentKHR"];
        let missing = missing_entry_points(&required, |name| !name.to_bytes().ends_with(b"KHR"));

        assert_eq!(missing, vec!["vkCreateSwapchainKHR", "vkQueuePresentKHR"]);
    }

    #[test]
    fn recording_and_status_commands_are_validated() {
        for name in [
            c"vkCmdBeginRenderPass",
            c"vkCmdDrawIndexed",
            c"vkCmdPipelineBarrier",
            c"vkCmdPushConstants",
            c"vkGetFenceStatus",
            c"vkResetDescriptorPool",
        ] {
            assert!(REQUIRED_DEVICE_COMMANDS.contains(&name), "{name:?} not validated");
        }

        let missing = missing_entry_points(REQUIRED_DEVICE_COMMANDS, |name| {
            !name.to_bytes().starts_with(b"vkCmd")
        });
        assert_eq!(missing.len(), 14);
    }

    #[test]
    fn complete_table_has_no_gaps() {
        let missing = missing_entry_points(REQUIRED_DEVICE_COMMANDS, |_| true);
        assert!(missing.is_empty());
    }
}
