//! Logical device ownership.

use crate::error::{Result, VkResultExt};
use crate::instance::Instance;
use crate::loader::DeviceFunctions;
use crate::memory::memory_type_from_properties;
use ash::vk;
use std::sync::Arc;

/// A created `VkDevice` and the instance it was created from.
///
/// Every device-level object holds an `Arc` to this, so the device is destroyed
/// only after all of them are gone. The instance reference keeps the instance
/// alive for at least as long.
pub struct LogicalDevice {
    functions: DeviceFunctions,
    physical_device: vk::PhysicalDevice,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    instance: Arc<Instance>,
}

impl LogicalDevice {
    pub(crate) fn new(
        instance: Arc<Instance>,
        functions: DeviceFunctions,
        physical_device: vk::PhysicalDevice,
        memory_properties: vk::PhysicalDeviceMemoryProperties,
    ) -> Self {
        Self {
            functions,
            physical_device,
            memory_properties,
            instance,
        }
    }

    pub fn raw(&self) -> &ash::Device {
        self.functions.device()
    }

    pub fn handle(&self) -> vk::Device {
        self.functions.handle()
    }

    pub fn swapchain_fns(&self) -> &ash::khr::swapchain::Device {
        self.functions.swapchain()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Index of the first memory type allowed by `type_bits` with all of `properties`.
    pub fn memory_type_from_properties(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        memory_type_from_properties(&self.memory_properties, type_bits, properties)
    }

    /// Format support on the underlying adapter.
    pub fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .raw()
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }

    /// Block until the device is idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.raw().device_wait_idle().context("vkDeviceWaitIdle") }
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            self.raw().destroy_device(None);
        }
    }
}
