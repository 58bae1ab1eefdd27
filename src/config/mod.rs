//! Configuration module for chromium-bridge.
//!
//! - Loading settings from files (TOML/JSON)
//! - Environment variable overrides
//! - CLI argument overrides
//! - Validation and defaults
//!
//! # Example
//!
//! ```rust,no_run
//! use chromium_bridge::config::BridgeSettings;
//!
//! let settings = BridgeSettings::from_file("bridge.toml").unwrap().merge_with_env();
//! let options = settings.lifecycle_options();
//! ```

mod settings;

pub use settings::{BridgeSettings, CliArgs, ConfigError};
