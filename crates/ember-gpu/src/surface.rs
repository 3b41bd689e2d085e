//! Surface management for windowed rendering.
//!
//! Provides abstractions for Vulkan surface creation and management,
//! hiding the raw-window-handle complexity from application code.

use crate::error::{GpuError, Result, VkResultExt};
use crate::instance::Instance;
use crate::swapchain::calculate_extent;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;

/// A window the context can present to.
///
/// Implemented by the platform layer; the GPU core only needs the raw handles
/// and the current sizes.
pub trait WindowSurface: HasDisplayHandle + HasWindowHandle {
    /// Current client-area size in physical pixels.
    fn client_size(&self) -> (u32, u32);

    /// Size of the drawable framebuffer in physical pixels.
    fn framebuffer_size(&self) -> (u32, u32) {
        self.client_size()
    }
}

/// Instance extensions the window system needs for surface creation.
pub fn required_surface_extensions<W>(window: &W) -> Result<Vec<&'static CStr>>
where
    W: WindowSurface + ?Sized,
{
    let display = window
        .display_handle()
        .map_err(|e| GpuError::surface_creation(format!("Failed to get display handle: {e}")))?;

    let names = ash_window::enumerate_required_extensions(display.as_raw())
        .context("ash_window::enumerate_required_extensions")?;

    // SAFETY: ash-window returns pointers to static, NUL-terminated extension names.
    Ok(names
        .iter()
        .map(|&name| unsafe { CStr::from_ptr(name) })
        .collect())
}

/// Create the presentation surface for `window` and attach it to `instance`.
///
/// # Safety
/// The window must outlive the instance.
pub unsafe fn create_surface<W>(instance: &mut Instance, window: &W) -> Result<()>
where
    W: WindowSurface + ?Sized,
{
    let display = window
        .display_handle()
        .map_err(|e| GpuError::surface_creation(format!("Failed to get display handle: {e}")))?;
    let window_handle = window
        .window_handle()
        .map_err(|e| GpuError::surface_creation(format!("Failed to get window handle: {e}")))?;

    let surface = ash_window::create_surface(
        instance.functions().entry(),
        instance.raw(),
        display.as_raw(),
        window_handle.as_raw(),
        None,
    )
    .map_err(|e| GpuError::surface_creation(e.to_string()))?;

    instance.set_surface(surface);
    Ok(())
}

/// Surface properties as seen by one adapter.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Swapchain extent derived from the capabilities and the window size.
    pub preferred_extent: vk::Extent2D,
}

impl SurfaceSupport {
    /// Query the surface as seen by `physical_device`.
    pub(crate) fn query(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        framebuffer_size: (u32, u32),
    ) -> Result<Self> {
        let loader = instance.functions().surface();
        let surface = instance.surface();

        unsafe {
            let capabilities = loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .context("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

            let formats = loader
                .get_physical_device_surface_formats(physical_device, surface)
                .context("vkGetPhysicalDeviceSurfaceFormatsKHR")?;

            let present_modes = loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .context("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

            let (width, height) = framebuffer_size;
            Ok(Self {
                preferred_extent: calculate_extent(&capabilities, width, height),
                capabilities,
                formats,
                present_modes,
            })
        }
    }
}
