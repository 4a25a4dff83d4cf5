// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Provides the fixed defaults (500x500 window, shaders/kernel.spv) if the
// config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub kernel: KernelConfig,
    pub debug: DebugConfig,
}

/// Window settings. The size is only the initial request; the window is not resizable.
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
            title: "Compute Renderer".to_string(),
            width: 500,
            height: 500,
        }
    }
}

/// Compute kernel location
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub path: PathBuf,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("shaders/kernel.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in debug builds.
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_fixed_setup() {
        let config = Config::default();
        assert_eq!((config.window.width, config.window.height), (500, 500));
        assert_eq!(config.kernel.path, PathBuf::from("shaders/kernel.spv"));
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [kernel]
            path = "build/raster.spv"

            [debug]
            show_fps = false
            "#,
        )
        .unwrap();

        assert_eq!(config.kernel.path, PathBuf::from("build/raster.spv"));
        assert!(!config.debug.show_fps);
        assert!(config.debug.validation_layers);
        assert_eq!(config.window.width, 500);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_path("no/such/config.toml").unwrap();
        assert_eq!(config.window.title, "Compute Renderer");
    }
}
