//! Bridge settings and configuration management.
//!
//! Settings come from several sources with increasing precedence: defaults,
//! a TOML or JSON file, `CHROMIUM_BRIDGE_*` environment variables, and CLI
//! arguments.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::browser::{LifecycleOptions, PresentationMode, ViewFrame};

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML configuration.
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),

    /// Failed to serialize TOML configuration.
    #[error("Failed to serialize TOML configuration: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// Failed to parse JSON configuration.
    #[error("Failed to parse JSON configuration: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Unsupported file format.
    #[error("Unsupported configuration file format: {0}")]
    UnsupportedFormat(String),
}

/// Main bridge settings.
///
/// # Example
///
/// ```rust
/// use chromium_bridge::config::BridgeSettings;
///
/// let settings = BridgeSettings::default()
///     .with_close_timeout(5000)
///     .with_window_size(1920, 1080);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Periodic pump frequency in Hz.
    #[serde(default = "default_pump_hz")]
    pub pump_hz: u32,

    /// Hard bound on a graceful close, in milliseconds.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Manual pump cadence while a close is pending, in milliseconds.
    #[serde(default = "default_close_poll_interval_ms")]
    pub close_poll_interval_ms: u64,

    /// Delay before reaping helpers after a force release, in milliseconds.
    #[serde(default = "default_reap_grace_ms")]
    pub reap_grace_ms: u64,

    /// Terminate orphaned helper processes after a force release.
    #[serde(default = "default_reap_enabled")]
    pub reap_enabled: bool,

    /// Helper executable path used to recognise re-parented helpers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helper_executable: Option<PathBuf>,

    /// Initial browser width in pixels.
    #[serde(default = "default_window_width")]
    pub window_width: u32,

    /// Initial browser height in pixels.
    #[serde(default = "default_window_height")]
    pub window_height: u32,

    /// Presentation mode used when the caller does not choose one.
    #[serde(default)]
    pub default_mode: PresentationMode,

    /// URL opened by the CLI host.
    #[serde(default = "default_start_url")]
    pub start_url: String,
}

// Default value functions for serde
fn default_pump_hz() -> u32 {
    30
}

fn default_close_timeout_ms() -> u64 {
    3000
}

fn default_close_poll_interval_ms() -> u64 {
    10
}

fn default_reap_grace_ms() -> u64 {
    1000
}

fn default_reap_enabled() -> bool {
    true
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    720
}

fn default_start_url() -> String {
    "about:blank".to_string()
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            pump_hz: default_pump_hz(),
            close_timeout_ms: default_close_timeout_ms(),
            close_poll_interval_ms: default_close_poll_interval_ms(),
            reap_grace_ms: default_reap_grace_ms(),
            reap_enabled: default_reap_enabled(),
            helper_executable: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            default_mode: PresentationMode::default(),
            start_url: default_start_url(),
        }
    }
}

fn parse_bool(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

impl BridgeSettings {
    /// Creates a new BridgeSettings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a TOML or JSON file, chosen by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "toml" => Ok(toml::from_str(&content)?),
            "json" => Ok(serde_json::from_str(&content)?),
            ext => Err(ConfigError::UnsupportedFormat(ext.to_string())),
        }
    }

    /// Saves settings to a file; the format follows the extension.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        let content = match extension.as_str() {
            "toml" => toml::to_string_pretty(self)?,
            "json" => serde_json::to_string_pretty(self)?,
            ext => return Err(ConfigError::UnsupportedFormat(ext.to_string())),
        };

        fs::write(path, content)?;
        Ok(())
    }

    /// Loads defaults overridden by `CHROMIUM_BRIDGE_*` variables, e.g.
    /// `CHROMIUM_BRIDGE_CLOSE_TIMEOUT_MS` or `CHROMIUM_BRIDGE_REAP_ENABLED`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CHROMIUM_BRIDGE_PUMP_HZ") {
            if let Ok(hz) = val.parse() {
                self.pump_hz = hz;
            }
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_CLOSE_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                self.close_timeout_ms = ms;
            }
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_CLOSE_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                self.close_poll_interval_ms = ms;
            }
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_REAP_GRACE_MS") {
            if let Ok(ms) = val.parse() {
                self.reap_grace_ms = ms;
            }
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_REAP_ENABLED") {
            self.reap_enabled = parse_bool(&val);
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_HELPER_EXECUTABLE") {
            self.helper_executable = Some(PathBuf::from(val));
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_WINDOW_WIDTH") {
            if let Ok(width) = val.parse() {
                self.window_width = width;
            }
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_WINDOW_HEIGHT") {
            if let Ok(height) = val.parse() {
                self.window_height = height;
            }
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_DEFAULT_MODE") {
            if let Ok(mode) = val.parse() {
                self.default_mode = mode;
            }
        }

        if let Ok(val) = env::var("CHROMIUM_BRIDGE_START_URL") {
            self.start_url = val;
        }
    }

    /// Returns these settings with environment overrides applied.
    pub fn merge_with_env(mut self) -> Self {
        self.apply_env_overrides();
        self
    }

    /// Returns these settings with CLI overrides applied.
    pub fn merge_with_args(mut self, args: &CliArgs) -> Self {
        if let Some(ref url) = args.url {
            self.start_url = url.clone();
        }
        if let Some(mode) = args.mode {
            self.default_mode = mode;
        }
        if let Some(timeout) = args.close_timeout_ms {
            self.close_timeout_ms = timeout;
        }
        if let Some(hz) = args.pump_hz {
            self.pump_hz = hz;
        }
        if let Some(reap) = args.reap_enabled {
            self.reap_enabled = reap;
        }
        if let Some(width) = args.width {
            self.window_width = width;
        }
        if let Some(height) = args.height {
            self.window_height = height;
        }
        self
    }

    /// Validates all settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pump_hz == 0 || self.pump_hz > 120 {
            return Err(ConfigError::ValidationError(
                "Pump frequency must be between 1 and 120 Hz".to_string(),
            ));
        }

        if self.close_timeout_ms < 100 {
            return Err(ConfigError::ValidationError(
                "Close timeout must be at least 100ms".to_string(),
            ));
        }
        if self.close_timeout_ms > 60000 {
            return Err(ConfigError::ValidationError(
                "Close timeout cannot exceed 60000ms".to_string(),
            ));
        }

        if self.close_poll_interval_ms == 0 || self.close_poll_interval_ms >= self.close_timeout_ms
        {
            return Err(ConfigError::ValidationError(format!(
                "Close poll interval must be between 1ms and the close timeout ({}ms)",
                self.close_timeout_ms
            )));
        }

        if self.reap_grace_ms > 30000 {
            return Err(ConfigError::ValidationError(
                "Reap grace delay cannot exceed 30000ms".to_string(),
            ));
        }

        if self.window_width < 100 || self.window_width > 7680 {
            return Err(ConfigError::ValidationError(
                "Window width must be between 100 and 7680 pixels".to_string(),
            ));
        }
        if self.window_height < 100 || self.window_height > 4320 {
            return Err(ConfigError::ValidationError(
                "Window height must be between 100 and 4320 pixels".to_string(),
            ));
        }

        if self.start_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Start URL cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Lifecycle timing for a [`BrowserHost`](crate::browser::BrowserHost).
    pub fn lifecycle_options(&self) -> LifecycleOptions {
        LifecycleOptions {
            pump_hz: self.pump_hz,
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            close_poll_interval: Duration::from_millis(self.close_poll_interval_ms),
            reap_grace: Duration::from_millis(self.reap_grace_ms),
            reap_enabled: self.reap_enabled,
        }
    }

    /// Initial view frame from the configured window size.
    pub fn initial_frame(&self) -> ViewFrame {
        ViewFrame::sized(
            i32::try_from(self.window_width).unwrap_or(i32::MAX),
            i32::try_from(self.window_height).unwrap_or(i32::MAX),
        )
    }

    // Builder-style methods

    /// Sets the close timeout in milliseconds.
    pub fn with_close_timeout(mut self, timeout_ms: u64) -> Self {
        self.close_timeout_ms = timeout_ms;
        self
    }

    /// Sets the pump frequency.
    pub fn with_pump_hz(mut self, hz: u32) -> Self {
        self.pump_hz = hz;
        self
    }

    /// Sets the reap grace delay in milliseconds.
    pub fn with_reap_grace(mut self, grace_ms: u64) -> Self {
        self.reap_grace_ms = grace_ms;
        self
    }

    /// Enables or disables helper reaping.
    pub fn with_reaping(mut self, enabled: bool) -> Self {
        self.reap_enabled = enabled;
        self
    }

    /// Sets the helper executable path.
    pub fn with_helper_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper_executable = Some(path.into());
        self
    }

    /// Sets the initial window size.
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_width = width;
        self.window_height = height;
        self
    }

    /// Sets the default presentation mode.
    pub fn with_mode(mut self, mode: PresentationMode) -> Self {
        self.default_mode = mode;
        self
    }
}

/// CLI overrides. All fields optional so they only replace what was given.
#[derive(Debug, Default, Clone)]
pub struct CliArgs {
    /// URL to open.
    pub url: Option<String>,
    /// Presentation mode.
    pub mode: Option<PresentationMode>,
    /// Close timeout in milliseconds.
    pub close_timeout_ms: Option<u64>,
    /// Pump frequency.
    pub pump_hz: Option<u32>,
    /// Enable helper reaping.
    pub reap_enabled: Option<bool>,
    /// Initial width.
    pub width: Option<u32>,
    /// Initial height.
    pub height: Option<u32>,
    /// Configuration file path.
    pub config_file: Option<PathBuf>,
}

impl CliArgs {
    /// Creates an empty CliArgs instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the full chain: defaults or file, then environment, then
    /// these arguments, then validation.
    pub fn load_settings(&self) -> Result<BridgeSettings, ConfigError> {
        let mut settings = if let Some(ref config_file) = self.config_file {
            BridgeSettings::from_file(config_file)?
        } else {
            BridgeSettings::default()
        };

        settings = settings.merge_with_env();
        settings = settings.merge_with_args(self);
        settings.validate()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.pump_hz, 30);
        assert_eq!(settings.close_timeout_ms, 3000);
        assert_eq!(settings.close_poll_interval_ms, 10);
        assert_eq!(settings.reap_grace_ms, 1000);
        assert!(settings.reap_enabled);
        assert_eq!(settings.default_mode, PresentationMode::Embedded);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_lifecycle_options_match_defaults() {
        assert_eq!(
            BridgeSettings::default().lifecycle_options(),
            LifecycleOptions::default()
        );
    }

    #[test]
    fn test_builder_methods() {
        let settings = BridgeSettings::default()
            .with_close_timeout(5000)
            .with_pump_hz(60)
            .with_reap_grace(250)
            .with_reaping(false)
            .with_window_size(1920, 1080)
            .with_mode(PresentationMode::Standalone);

        let options = settings.lifecycle_options();
        assert_eq!(options.close_timeout, Duration::from_secs(5));
        assert_eq!(options.pump_hz, 60);
        assert_eq!(options.reap_grace, Duration::from_millis(250));
        assert!(!options.reap_enabled);
        assert_eq!(settings.initial_frame(), ViewFrame::sized(1920, 1080));
        assert_eq!(settings.default_mode, PresentationMode::Standalone);
    }

    #[test]
    fn test_validation_rejects_bad_timing() {
        assert!(BridgeSettings::default().with_pump_hz(0).validate().is_err());
        assert!(BridgeSettings::default().with_close_timeout(50).validate().is_err());
        assert!(BridgeSettings::default().with_reap_grace(60_000).validate().is_err());

        let mut settings = BridgeSettings::default();
        settings.close_poll_interval_ms = 3000;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_window() {
        let settings = BridgeSettings::default().with_window_size(50, 720);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_cli_args_merge() {
        let args = CliArgs {
            url: Some("https://meet.example.com".to_string()),
            mode: Some(PresentationMode::Standalone),
            reap_enabled: Some(false),
            ..Default::default()
        };

        let settings = BridgeSettings::default().merge_with_args(&args);

        assert_eq!(settings.start_url, "https://meet.example.com");
        assert_eq!(settings.default_mode, PresentationMode::Standalone);
        assert!(!settings.reap_enabled);
        assert_eq!(settings.close_timeout_ms, 3000); // Unchanged
    }

    #[test]
    fn test_toml_partial_file_uses_defaults() {
        let parsed: BridgeSettings = toml::from_str(
            r#"
            close_timeout_ms = 4500
            default_mode = "standalone"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.close_timeout_ms, 4500);
        assert_eq!(parsed.default_mode, PresentationMode::Standalone);
        assert_eq!(parsed.pump_hz, 30);
        assert!(parsed.reap_enabled);
    }

    #[test]
    fn test_json_serialization() {
        let settings = BridgeSettings::default().with_helper_executable("/opt/app/Helper");
        let json_str = serde_json::to_string_pretty(&settings).unwrap();
        let parsed: BridgeSettings = serde_json::from_str(&json_str).unwrap();

        assert_eq!(parsed.close_timeout_ms, settings.close_timeout_ms);
        assert_eq!(parsed.helper_executable, settings.helper_executable);
        assert_eq!(parsed.default_mode, settings.default_mode);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = BridgeSettings::default().to_file("settings.yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
