//! Engine settings loaded from TOML or RON files

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name reported to the Vulkan driver
    pub application_name: String,
    /// Window options
    pub window: WindowConfig,
    /// Renderer options
    pub renderer: RendererConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            application_name: "Strata".to_string(),
            window: WindowConfig::default(),
            renderer: RendererConfig::default(),
        }
    }
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Load from `path`, or fall back to defaults when the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_from_file(path)
        } else {
            log::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}

/// Window creation options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Title bar text
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Strata".to_string(),
            width: 1280,
            height: 1280,
            resizable: true,
        }
    }
}

/// Renderer options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Request the Khronos validation layer (only enabled if installed)
    pub enable_validation: bool,
    /// Use MAILBOX presentation when the surface offers it
    pub prefer_mailbox: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: cfg!(debug_assertions),
            prefer_mailbox: true,
        }
    }
}
