//! Application trait and lifecycle management

use thiserror::Error;

use crate::engine::{Engine, EngineError};

/// Application lifecycle trait
///
/// Implement this trait to drive the engine from your own code.
pub trait Application {
    /// Initialize the application
    ///
    /// Called once after the window and Vulkan instance exist and before the
    /// frame orchestrator starts. Add render stages and register updatables
    /// here.
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError>;

    /// Called once per host loop iteration after the frame has run
    ///
    /// # Arguments
    /// * `engine` - Mutable reference to the engine
    /// * `delta_time` - Time since last frame in seconds
    fn update(&mut self, _engine: &mut Engine, _delta_time: f32) -> Result<(), AppError> {
        Ok(())
    }

    /// Called once while the engine is stopping, before GPU resources are released
    fn cleanup(&mut self, _engine: &mut Engine) {}
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Engine error propagated to application level
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Custom application error
    #[error("Application error: {0}")]
    Custom(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::error::VulkanError;

    #[test]
    fn test_engine_errors_convert_into_app_errors() {
        let error: AppError = EngineError::from(VulkanError::NoSuitableDevice).into();
        assert!(matches!(error, AppError::Engine(EngineError::Vulkan(VulkanError::NoSuitableDevice))));
        assert_eq!(error.to_string(), "Engine error: Vulkan error: No suitable GPU found");
    }
}
