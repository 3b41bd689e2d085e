//! Vulkan instance creation.

use crate::error::{GpuError, Result, VkResultExt};
use crate::loader::InstanceFunctions;
use ash::vk;
use std::ffi::{c_char, CStr, CString};

/// Instance extensions enabled on top of the windowing requirements.
pub fn platform_instance_extensions() -> Vec<&'static CStr> {
    let extensions = vec![
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ];

    extensions
}

/// Validation layers to enable in debug builds.
pub fn validation_layers() -> Vec<&'static CStr> {
    vec![
        // Standard validation layer
        c"VK_LAYER_KHRONOS_validation",
    ]
}

/// Names from `requested` that are absent from `available`, in request order.
pub fn missing_extensions<'a, I>(requested: I, available: &[String]) -> Vec<String>
where
    I: IntoIterator<Item = &'a CStr>,
{
    requested
        .into_iter()
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !available.iter().any(|a| a == name))
        .collect()
}

/// Owned instance plus the presentation surface created against it.
///
/// Destroys the surface before the instance. Devices keep this alive through
/// shared ownership, so the instance always outlives them.
pub struct Instance {
    functions: InstanceFunctions,
    surface: vk::SurfaceKHR,
}

impl Instance {
    pub fn functions(&self) -> &InstanceFunctions {
        &self.functions
    }

    pub fn raw(&self) -> &ash::Instance {
        self.functions.instance()
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub(crate) fn set_surface(&mut self, surface: vk::SurfaceKHR) {
        self.surface = surface;
    }

    /// Whether `queue_family` of `physical_device` can present to the surface.
    pub(crate) fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<bool> {
        unsafe {
            self.functions
                .surface()
                .get_physical_device_surface_support(physical_device, queue_family, self.surface)
                .context("vkGetPhysicalDeviceSurfaceSupportKHR")
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.functions.surface().destroy_surface(self.surface, None);
            }
            self.functions.instance().destroy_instance(None);
        }
    }
}

/// Create a Vulkan instance with every extension in `extensions` enabled.
///
/// Fails with a single error naming every unavailable extension, and with an
/// illegal-state error if the loader is older than `api_version`.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: ash::Entry,
    app_name: &str,
    api_version: u32,
    extensions: &[&CStr],
    enable_validation: bool,
) -> Result<Instance> {
    let loader_version = entry
        .try_enumerate_instance_version()
        .context("vkEnumerateInstanceVersion")?
        .unwrap_or(vk::API_VERSION_1_0);
    if loader_version < api_version {
        return Err(GpuError::illegal_state(format!(
            "Vulkan loader supports {}.{}, {}.{} required",
            vk::api_version_major(loader_version),
            vk::api_version_minor(loader_version),
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version),
        )));
    }

    let available: Vec<String> = entry
        .enumerate_instance_extension_properties(None)
        .context("vkEnumerateInstanceExtensionProperties")?
        .iter()
        .map(|ext| {
            CStr::from_ptr(ext.extension_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        })
        .collect();

    let missing = missing_extensions(extensions.iter().copied(), &available);
    if !missing.is_empty() {
        return Err(GpuError::missing_extensions(missing));
    }

    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::illegal_argument("application name contains a NUL byte"))?;
    let engine_name = c"Ember";

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(api_version);

    let extension_names: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Collect layer names
    let mut layers = if enable_validation {
        validation_layers()
    } else {
        vec![]
    };

    // Drop requested layers that are not installed
    let available_layers = entry
        .enumerate_instance_layer_properties()
        .context("vkEnumerateInstanceLayerProperties")?;
    layers.retain(|layer| {
        let found = available_layers
            .iter()
            .any(|props| CStr::from_ptr(props.layer_name.as_ptr()) == *layer);
        if !found {
            tracing::warn!("Validation layer {} not available", layer.to_string_lossy());
        }
        found
    });

    let layer_names: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_names)
        .enabled_layer_names(&layer_names)
        .flags(create_flags);

    let instance = entry
        .create_instance(&create_info, None)
        .context("vkCreateInstance")?;

    let functions = InstanceFunctions::new(entry, instance)?;

    tracing::debug!(
        "Created Vulkan instance with {} extensions, {} layers",
        extension_names.len(),
        layer_names.len()
    );

    Ok(Instance {
        functions,
        surface: vk::SurfaceKHR::null(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_missing_extension_is_reported() {
        let available = vec!["VK_KHR_surface".to_string()];
        let requested = [
            c"VK_KHR_surface",
            c"VK_KHR_wayland_surface",
            c"VK_EXT_debug_utils",
        ];

        let missing = missing_extensions(requested, &available);
        assert_eq!(missing, vec!["VK_KHR_wayland_surface", "VK_EXT_debug_utils"]);
    }

    #[test]
    fn nothing_missing_when_all_present() {
        let available = vec!["VK_KHR_surface".to_string(), "VK_KHR_xcb_surface".to_string()];
        let missing = missing_extensions([c"VK_KHR_xcb_surface"], &available);
        assert!(missing.is_empty());
    }
}
