//! GPU error types.
//!
//! Every error records the source location that raised it. Failures are never
//! recovered inside this crate; they surface to the caller immediately.

use ash::vk;
use std::panic::Location;
use thiserror::Error;

/// Coarse classification of a [`GpuError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller passed a malformed or out-of-range parameter.
    IllegalArgument,
    /// A precondition was violated or a required API call failed.
    IllegalState,
    /// The input is recognized but not supported.
    NotYetImplemented,
}

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// A Vulkan call returned a non-success code.
    #[error("{operation} failed: {result} (at {location})")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
        location: &'static Location<'static>,
    },

    /// The Vulkan runtime library could not be loaded.
    #[error("Failed to load Vulkan: {message} (at {location})")]
    Loading {
        message: String,
        location: &'static Location<'static>,
    },

    /// Required instance extensions are not available.
    #[error("Missing instance extensions: {} (at {location})", .names.join(", "))]
    MissingExtensions {
        names: Vec<String>,
        location: &'static Location<'static>,
    },

    /// Required loader, instance or device entry points did not resolve.
    #[error("Unresolved Vulkan entry points: {} (at {location})", .names.join(", "))]
    MissingEntryPoints {
        names: Vec<String>,
        location: &'static Location<'static>,
    },

    /// No adapter satisfied the device requirements.
    #[error("No suitable GPU found (at {location})")]
    NoSuitableDevice { location: &'static Location<'static> },

    /// Surface creation failed.
    #[error("Surface creation failed: {message} (at {location})")]
    SurfaceCreation {
        message: String,
        location: &'static Location<'static>,
    },

    /// Invalid parameter.
    #[error("Illegal argument: {message} (at {location})")]
    IllegalArgument {
        message: String,
        location: &'static Location<'static>,
    },

    /// Invalid state.
    #[error("Illegal state: {message} (at {location})")]
    IllegalState {
        message: String,
        location: &'static Location<'static>,
    },

    /// Recognized but unsupported input.
    #[error("Not yet implemented: {message} (at {location})")]
    NotYetImplemented {
        message: String,
        location: &'static Location<'static>,
    },
}

impl GpuError {
    #[track_caller]
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn not_yet_implemented(message: impl Into<String>) -> Self {
        Self::NotYetImplemented {
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn no_suitable_device() -> Self {
        Self::NoSuitableDevice {
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn surface_creation(message: impl Into<String>) -> Self {
        Self::SurfaceCreation {
            message: message.into(),
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn missing_extensions(names: Vec<String>) -> Self {
        Self::MissingExtensions {
            names,
            location: Location::caller(),
        }
    }

    #[track_caller]
    pub fn missing_entry_points(names: Vec<String>) -> Self {
        Self::MissingEntryPoints {
            names,
            location: Location::caller(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::IllegalArgument { .. } => ErrorKind::IllegalArgument,
            Self::NotYetImplemented { .. } => ErrorKind::NotYetImplemented,
            Self::Vulkan { .. }
            | Self::Loading { .. }
            | Self::MissingExtensions { .. }
            | Self::MissingEntryPoints { .. }
            | Self::NoSuitableDevice { .. }
            | Self::SurfaceCreation { .. }
            | Self::IllegalState { .. } => ErrorKind::IllegalState,
        }
    }

    /// Source location where the error was raised.
    pub fn location(&self) -> &'static Location<'static> {
        match self {
            Self::Vulkan { location, .. }
            | Self::Loading { location, .. }
            | Self::MissingExtensions { location, .. }
            | Self::MissingEntryPoints { location, .. }
            | Self::NoSuitableDevice { location }
            | Self::SurfaceCreation { location, .. }
            | Self::IllegalArgument { location, .. }
            | Self::IllegalState { location, .. }
            | Self::NotYetImplemented { location, .. } => location,
        }
    }

    /// The raw Vulkan result, if this error came from an API call.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::Vulkan { result, .. } => Some(*result),
            _ => None,
        }
    }
}

impl From<ash::LoadingError> for GpuError {
    #[track_caller]
    fn from(error: ash::LoadingError) -> Self {
        Self::Loading {
            message: error.to_string(),
            location: Location::caller(),
        }
    }
}

/// Attach the failing operation name to a raw Vulkan result.
pub trait VkResultExt<T> {
    /// Convert a non-success code into [`GpuError::Vulkan`] naming `operation`.
    fn context(self, operation: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[track_caller]
    fn context(self, operation: &'static str) -> Result<T> {
        let location = Location::caller();
        self.map_err(|result| GpuError::Vulkan {
            operation,
            result,
            location,
        })
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_failures_are_illegal_state() {
        let result: ash::prelude::VkResult<()> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = result.context("vkQueueSubmit").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::IllegalState);
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
        assert!(err.to_string().starts_with("vkQueueSubmit failed"));
    }

    #[test]
    fn location_points_at_raise_site() {
        let err = GpuError::illegal_argument("size too large");
        let line = line!() - 1;

        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
        assert_eq!(err.location().line(), line);
        assert!(err.location().file().ends_with("error.rs"));
    }

    #[test]
    fn missing_extensions_lists_every_name() {
        let err = GpuError::missing_extensions(vec![
            "VK_KHR_surface".to_string(),
            "VK_KHR_xlib_surface".to_string(),
        ]);

        let message = err.to_string();
        assert!(message.contains("VK_KHR_surface, VK_KHR_xlib_surface"));
        assert_eq!(err.kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn unsupported_input_kind() {
        let err = GpuError::not_yet_implemented("3-component textures");
        assert_eq!(err.kind(), ErrorKind::NotYetImplemented);
    }
}
