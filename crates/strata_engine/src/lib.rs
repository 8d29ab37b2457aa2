//! # Strata Engine
//!
//! Frame orchestration core for a Vulkan renderer.
//!
//! - **Frame scheduling**: updatables run once per frame in fixed, ordered stages
//! - **Resource transfer**: staging-buffer uploads, copies and image layout transitions
//! - **Frame orchestration**: image chain, per-frame command buffers and
//!   semaphore-chained submission of pluggable render stages
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use strata_engine::prelude::*;
//!
//! struct MyApp;
//!
//! impl Application for MyApp {
//!     fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError> {
//!         engine.add_stage(Box::new(ClearStage::new().with_color([0.1, 0.1, 0.1, 1.0])))?;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut app = MyApp;
//!     Engine::run(EngineConfig::default(), &mut app)?;
//!     Ok(())
//! }
//! ```

pub mod application;
pub mod config;
pub mod engine;
pub mod foundation;
pub mod render;
pub mod schedule;

pub use ash::vk;

/// Common imports for applications
pub mod prelude {
    pub use crate::application::{AppError, Application};
    pub use crate::config::{Config, EngineConfig, RendererConfig, WindowConfig};
    pub use crate::engine::{Engine, EngineError, RunState};
    pub use crate::foundation::logging;
    pub use crate::render::{ClearStage, RenderStage, StageId, VulkanError, VulkanResult};
    pub use crate::schedule::{UpdateHandle, UpdateStage, Updatable};
}
