//! Engine configuration (`vge.toml`).
//!
//! Every field has a default, so a missing file or a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{Error, Result};

/// Top-level configuration, one TOML table per section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// `[window]` table
    #[serde(default)]
    pub window: WindowConfig,
    /// `[renderer]` table
    #[serde(default)]
    pub renderer: RendererConfig,
}

/// Initial window settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Initial width in pixels (default: 1280)
    #[serde(default = "default_width")]
    pub width: u32,
    /// Initial height in pixels (default: 720)
    #[serde(default = "default_height")]
    pub height: u32,
    /// Window title (default: "vge")
    #[serde(default = "default_title")]
    pub title: String,
}

/// Presentation and synchronization settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Enable Khronos validation layers (default: on in debug builds)
    #[serde(default = "default_validation")]
    pub validation: bool,
    /// Prefer MAILBOX over FIFO when the surface supports it (default: true)
    #[serde(default = "default_true")]
    pub prefer_low_latency: bool,
    /// Upper bound for frame fence waits in milliseconds. Unbounded when absent.
    #[serde(default)]
    pub fence_timeout_ms: Option<u64>,
    /// Color attachment clear value
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_title() -> String {
    "vge".to_string()
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}
fn default_true() -> bool {
    true
}
fn default_clear_color() -> [f32; 4] {
    [0.01, 0.01, 0.01, 1.0]
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: default_validation(),
            prefer_low_latency: default_true(),
            fence_timeout_ms: None,
            clear_color: default_clear_color(),
        }
    }
}

impl RendererConfig {
    /// Fence timeout in nanoseconds, `u64::MAX` when unbounded.
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms
            .map(|ms| ms.saturating_mul(1_000_000))
            .unwrap_or(u64::MAX)
    }
}

impl Config {
    /// Load from `path`, falling back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, is not valid
    /// TOML, or fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero window size, or the TOML parse error.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        if config.window.width == 0 || config.window.height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                config.window.width, config.window.height
            )));
        }
        Ok(config)
    }
}
