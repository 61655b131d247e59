// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// `Config` mirrors the file and falls back to defaults section by section.
// The backend never sees it directly: `Config::rhi_config` turns it into an
// immutable `RhiConfig` once at startup, and that value is threaded through
// every component that needs a setting.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::pipeline::{DynamicState, PipelineConfig};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Hello, Vulkan!".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
    pub dynamic_states: Vec<DynamicState>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            dynamic_states: PipelineConfig::default().dynamic_states,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honored in debug builds
    pub validation_layers: bool,
    pub show_fps: bool,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

impl Config {
    /// Load configuration from config.toml; a missing file gives defaults,
    /// an unreadable or malformed one is an error
    pub fn load() -> Result<Self> {
        Self::load_from_path("config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Freeze the settings the backend needs
    pub fn rhi_config(&self) -> RhiConfig {
        RhiConfig {
            app_name: self.window.title.clone(),
            enable_validation: cfg!(debug_assertions) && self.debug.validation_layers,
            clear_color: self.graphics.clear_color,
            pipeline: PipelineConfig {
                dynamic_states: self.graphics.dynamic_states.clone(),
            },
        }
    }
}

/// Immutable backend settings, built once at startup
#[derive(Debug, Clone, PartialEq)]
pub struct RhiConfig {
    pub app_name: String,
    pub enable_validation: bool,
    pub clear_color: [f32; 4],
    pub pipeline: PipelineConfig,
}

impl Default for RhiConfig {
    fn default() -> Self {
        Self {
            app_name: WindowConfig::default().title,
            enable_validation: cfg!(debug_assertions),
            clear_color: GraphicsConfig::default().clear_color,
            pipeline: PipelineConfig::default(),
        }
    }
}
