//! Ash-backed implementation of the device abstraction
//!
//! [`VulkanInstance`] and [`VulkanGpu`] implement [`crate::render::gpu::GpuInstance`]
//! and [`crate::render::gpu::Gpu`]; [`Window`] is the GLFW presentation target.

pub mod device;
pub mod instance;
pub mod memory;
pub mod render_pass;
pub mod swapchain;
pub mod window;

pub use device::{QueueFamilyIndices, VulkanGpu};
pub use instance::VulkanInstance;
pub use window::{Window, WindowError, WindowResult, WindowSignal};
