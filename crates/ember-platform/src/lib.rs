//! Platform abstraction for the Ember engine.
//!
//! Creates winit windows and exposes them to the GPU core as presentation
//! targets.

use std::sync::Arc;

use ember_gpu::WindowSurface;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use thiserror::Error;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::window::WindowAttributes;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(#[from] winit::error::OsError),
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("Invalid window configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    pub vsync: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
            vsync: true,
        }
    }
}

impl PlatformConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }
}

/// Window attributes for `config`.
pub fn window_attributes(config: &PlatformConfig) -> Result<WindowAttributes> {
    if config.width == 0 || config.height == 0 {
        return Err(PlatformError::InvalidConfig(format!(
            "window size {}x{} has zero area",
            config.width, config.height
        )));
    }

    Ok(WindowAttributes::default()
        .with_title(config.title.clone())
        .with_inner_size(LogicalSize::new(config.width, config.height))
        .with_resizable(config.resizable))
}

/// A winit window usable as a presentation target.
#[derive(Debug, Clone)]
pub struct Window(Arc<winit::window::Window>);

impl Window {
    /// Create a window on the running event loop.
    pub fn create(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> Result<Self> {
        let window = event_loop.create_window(window_attributes(config)?)?;
        tracing::info!(
            "Created window \"{}\" ({}x{})",
            config.title,
            config.width,
            config.height
        );
        Ok(Self(Arc::new(window)))
    }

    pub fn winit(&self) -> &winit::window::Window {
        &self.0
    }

    pub fn inner_size(&self) -> PhysicalSize<u32> {
        self.0.inner_size()
    }

    pub fn request_redraw(&self) {
        self.0.request_redraw();
    }
}

impl HasDisplayHandle for Window {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.0.display_handle()
    }
}

impl HasWindowHandle for Window {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.0.window_handle()
    }
}

impl WindowSurface for Window {
    fn client_size(&self) -> (u32, u32) {
        let size = self.0.inner_size();
        (size.width, size.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders() {
        let config = PlatformConfig::new("viewer")
            .with_size(800, 600)
            .with_vsync(false);

        assert_eq!(config.title, "viewer");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(!config.vsync);
        assert!(config.resizable);
    }

    #[test]
    fn attributes_follow_config() {
        let config = PlatformConfig::new("viewer").with_size(640, 480);
        let attributes = window_attributes(&config).unwrap();

        assert_eq!(attributes.title, "viewer");
        assert!(attributes.resizable);
        assert_eq!(
            attributes.inner_size,
            Some(LogicalSize::new(640, 480).into())
        );
    }

    #[test]
    fn zero_area_window_is_rejected() {
        let config = PlatformConfig::default().with_size(0, 480);
        assert!(matches!(
            window_attributes(&config),
            Err(PlatformError::InvalidConfig(_))
        ));
    }
}
