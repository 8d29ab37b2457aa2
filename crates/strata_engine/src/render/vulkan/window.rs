//! Window management using GLFW
//!
//! Owns the native window and turns GLFW events into the signals the engine
//! loop cares about.

use ash::vk;
use thiserror::Error;

use crate::config::WindowConfig;
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::gpu::PresentationTarget;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialised
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The native window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Window events the engine reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    /// Framebuffer resized to the given pixel size
    Resized(u32, u32),
    /// The user asked to close the window
    CloseRequested,
}

/// Translate one GLFW event
pub fn signal_for(event: &glfw::WindowEvent) -> Option<WindowSignal> {
    match *event {
        glfw::WindowEvent::FramebufferSize(width, height) => Some(WindowSignal::Resized(
            u32::try_from(width).unwrap_or(0),
            u32::try_from(height).unwrap_or(0),
        )),
        glfw::WindowEvent::Close => Some(WindowSignal::CloseRequested),
        _ => None,
    }
}

/// GLFW window without a client API context
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Open a window as described by `config`
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::GlfwError("Vulkan is not supported by GLFW".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Window created: {}x{} \"{}\"", config.width, config.height, config.title);
        Ok(Self { glfw, window, events })
    }

    /// Whether the window has been asked to close
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Set or clear the close flag
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the platform event queue
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
    }

    /// Drain queued events into engine signals
    pub fn drain_events(&self) -> Vec<WindowSignal> {
        glfw::flush_messages(&self.events)
            .filter_map(|(_, event)| signal_for(&event))
            .collect()
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (u32::try_from(width).unwrap_or(0), u32::try_from(height).unwrap_or(0))
    }

    /// Instance extensions GLFW needs to create a surface
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }
}

impl PresentationTarget for Window {
    fn create_surface(&mut self, instance: vk::Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::InitializationFailed(format!(
                "Failed to create Vulkan surface: {result:?}"
            )))
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.framebuffer_size();
        vk::Extent2D { width, height }
    }
}
