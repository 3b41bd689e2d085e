//! GPU context management.
//!
//! The context owns the instance and presentation surface, and the capability
//! snapshot of every adapter. Device creation matches requirements against
//! those snapshots and hands off to [`GraphicsDevice`].

use crate::capabilities::DeviceCapabilitySnapshot;
use crate::device::LogicalDevice;
use crate::error::{GpuError, Result, VkResultExt};
use crate::graphics::GraphicsDevice;
use crate::instance::{create_instance, platform_instance_extensions, Instance};
use crate::loader::DeviceFunctions;
use crate::selection::{select_adapter, DeviceGroupInfo, DeviceRequirements};
use crate::surface::{create_surface, required_surface_extensions, WindowSurface};
use crate::swapchain::SwapchainConfig;
use ash::vk;
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

/// Map enumerated device groups to adapter indices.
///
/// Members that are not in `physical_devices` are skipped.
pub fn resolve_device_groups(
    groups: &[vk::PhysicalDeviceGroupProperties<'_>],
    physical_devices: &[vk::PhysicalDevice],
) -> Vec<DeviceGroupInfo> {
    groups
        .iter()
        .map(|group| DeviceGroupInfo {
            adapters: group
                .physical_devices
                .iter()
                .take(group.physical_device_count as usize)
                .filter_map(|member| physical_devices.iter().position(|pd| pd == member))
                .collect(),
        })
        .filter(|group| !group.adapters.is_empty())
        .collect()
}

/// Builder for creating a graphics context.
pub struct GraphicsContextBuilder {
    app_name: String,
    enable_validation: bool,
    api_version: u32,
    extra_instance_extensions: Vec<CString>,
}

impl Default for GraphicsContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Ember".to_string(),
            enable_validation: cfg!(debug_assertions),
            api_version: vk::API_VERSION_1_1,
            extra_instance_extensions: Vec::new(),
        }
    }
}

impl GraphicsContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Instance API version to request.
    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Require an instance extension beyond what the window system needs.
    pub fn instance_extension(mut self, name: &CStr) -> Self {
        if !self.extra_instance_extensions.iter().any(|e| e.as_c_str() == name) {
            self.extra_instance_extensions.push(name.to_owned());
        }
        self
    }

    /// Build the context for `window`.
    ///
    /// The window must outlive the context and every device created from it.
    pub fn build<W>(self, window: &W) -> Result<GraphicsContext>
    where
        W: WindowSurface + ?Sized,
    {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }?;

        let mut extensions: Vec<&CStr> = required_surface_extensions(window)?;
        for name in platform_instance_extensions()
            .into_iter()
            .chain(self.extra_instance_extensions.iter().map(CString::as_c_str))
        {
            if !extensions.contains(&name) {
                extensions.push(name);
            }
        }

        let mut instance = unsafe {
            create_instance(
                entry,
                &self.app_name,
                self.api_version,
                &extensions,
                self.enable_validation,
            )?
        };
        unsafe { create_surface(&mut instance, window)? };

        let physical_devices = unsafe {
            instance
                .raw()
                .enumerate_physical_devices()
                .context("vkEnumeratePhysicalDevices")?
        };
        if physical_devices.is_empty() {
            return Err(GpuError::no_suitable_device());
        }

        let framebuffer_size = window.framebuffer_size();
        let adapters = physical_devices
            .iter()
            .map(|&pd| unsafe { DeviceCapabilitySnapshot::query(&instance, pd, framebuffer_size) })
            .collect::<Result<Vec<_>>>()?;

        let group_count = unsafe {
            instance
                .raw()
                .enumerate_physical_device_groups_len()
                .context("vkEnumeratePhysicalDeviceGroups")?
        };
        let mut groups = vec![vk::PhysicalDeviceGroupProperties::default(); group_count];
        unsafe {
            instance
                .raw()
                .enumerate_physical_device_groups(&mut groups)
                .context("vkEnumeratePhysicalDeviceGroups")?;
        }
        let device_groups = resolve_device_groups(&groups, &physical_devices);

        for adapter in &adapters {
            tracing::debug!("Found GPU: {}", adapter.summary());
        }
        tracing::info!(
            "Enumerated {} adapters in {} device groups",
            adapters.len(),
            device_groups.len()
        );

        Ok(GraphicsContext {
            instance: Arc::new(instance),
            adapters,
            device_groups,
        })
    }
}

/// Instance, surface and adapter snapshots.
pub struct GraphicsContext {
    instance: Arc<Instance>,
    adapters: Vec<DeviceCapabilitySnapshot>,
    device_groups: Vec<DeviceGroupInfo>,
}

impl GraphicsContext {
    /// Initialize with default settings.
    pub fn initialize<W>(app_name: &str, window: &W) -> Result<Self>
    where
        W: WindowSurface + ?Sized,
    {
        GraphicsContextBuilder::new().app_name(app_name).build(window)
    }

    pub fn instance(&self) -> &Arc<Instance> {
        &self.instance
    }

    /// Snapshots in enumeration order.
    pub fn adapters(&self) -> &[DeviceCapabilitySnapshot] {
        &self.adapters
    }

    /// Device groups in enumeration order.
    pub fn device_groups(&self) -> &[DeviceGroupInfo] {
        &self.device_groups
    }

    /// Create a device on the first adapter satisfying `requirements`.
    pub fn create_graphics_device(
        &self,
        requirements: &DeviceRequirements,
        swapchain_config: SwapchainConfig,
    ) -> Result<GraphicsDevice> {
        let swapchain_name = ash::khr::swapchain::NAME.to_string_lossy();
        if !requirements.extensions.iter().any(|e| *e == swapchain_name) {
            return Err(GpuError::illegal_argument(
                "device requirements must include VK_KHR_swapchain",
            ));
        }

        let selection = select_adapter(&self.adapters, &self.device_groups, requirements)
            .ok_or_else(|| GpuError::no_suitable_device())?;
        let snapshot = &self.adapters[selection.adapter];

        tracing::info!("Selected GPU: {}", snapshot.summary());
        if selection.is_device_group() {
            tracing::info!("Using device group of {} adapters", selection.group.len());
        }

        let families = selection.queue_families.unique_families();
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&snapshot.queue_families[family as usize].priorities)
            })
            .collect();

        let extension_names = requirements
            .extensions
            .iter()
            .map(|name| {
                CString::new(name.as_str())
                    .map_err(|_| GpuError::illegal_argument("extension name contains a NUL byte"))
            })
            .collect::<Result<Vec<_>>>()?;
        let extension_ptrs: Vec<*const c_char> =
            extension_names.iter().map(|name| name.as_ptr()).collect();

        let features = requirements.features.to_vk();

        let group_members: Vec<vk::PhysicalDevice> = selection
            .group
            .iter()
            .map(|&index| self.adapters[index].physical_device)
            .collect();
        let mut group_info =
            vk::DeviceGroupDeviceCreateInfo::default().physical_devices(&group_members);

        let mut create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_ptrs)
            .enabled_features(&features);
        if selection.is_device_group() {
            create_info = create_info.push_next(&mut group_info);
        }

        let device = unsafe {
            self.instance
                .raw()
                .create_device(snapshot.physical_device, &create_info, None)
                .context("vkCreateDevice")?
        };
        let functions = unsafe { DeviceFunctions::new(self.instance.functions(), device)? };

        let logical = Arc::new(LogicalDevice::new(
            self.instance.clone(),
            functions,
            snapshot.physical_device,
            snapshot.memory_properties,
        ));

        GraphicsDevice::new(logical, snapshot.clone(), selection, swapchain_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn group(members: &[u64]) -> vk::PhysicalDeviceGroupProperties<'static> {
        let mut props = vk::PhysicalDeviceGroupProperties {
            physical_device_count: members.len() as u32,
            ..Default::default()
        };
        for (slot, &raw) in props.physical_devices.iter_mut().zip(members) {
            *slot = vk::PhysicalDevice::from_raw(raw);
        }
        props
    }

    #[test]
    fn groups_map_to_enumeration_indices() {
        let physical_devices: Vec<_> = [10, 20, 30]
            .into_iter()
            .map(vk::PhysicalDevice::from_raw)
            .collect();
        let groups = [group(&[30]), group(&[10, 20])];

        let resolved = resolve_device_groups(&groups, &physical_devices);
        assert_eq!(resolved[0].adapters, vec![2]);
        assert_eq!(resolved[1].adapters, vec![0, 1]);
    }

    #[test]
    fn unknown_members_are_skipped() {
        let physical_devices = vec![vk::PhysicalDevice::from_raw(1)];
        let groups = [group(&[1, 99]), group(&[42])];

        let resolved = resolve_device_groups(&groups, &physical_devices);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].adapters, vec![0]);
    }

    #[test]
    fn builder_dedupes_instance_extensions() {
        let builder = GraphicsContextBuilder::new()
            .instance_extension(c"VK_EXT_debug_utils")
            .instance_extension(c"VK_EXT_debug_utils");
        assert_eq!(builder.extra_instance_extensions.len(), 1);
    }
}
