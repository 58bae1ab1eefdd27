//! # Chromium Bridge
//!
//! Lifecycle management for an embedded Chromium-based browser engine.
//!
//! The crate owns one browser at a time and guarantees that tearing it down
//! never hangs the host: a graceful close is bounded in time, a timed-out
//! close falls back to an immediate release, and helper processes the engine
//! leaves behind are reaped after a short grace delay.
//!
//! ## Features
//!
//! - **Engine Handle**: one-time initialization and shutdown of the engine
//! - **Message Pump**: periodic 30 Hz pump while a browser is live
//! - **Safe Close**: manual pumping during close, 3 second hard deadline
//! - **Force Release**: immediate handle drop plus deferred helper reaping
//! - **Observer Events**: load, URL, title and close notifications
//! - **Flexible Configuration**: TOML/JSON files, environment variables, CLI arguments
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use chromium_bridge::prelude::*;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let settings = BridgeSettings::default();
//!     let host = BrowserHost::new(
//!         Rc::new(MockEngine::new()),
//!         Arc::new(HelperProcessReaper::new()),
//!         settings.lifecycle_options(),
//!     );
//!
//!     tokio::task::LocalSet::new()
//!         .run_until(async {
//!             host.create_browser("https://example.com", settings.initial_frame(), settings.default_mode)
//!                 .await;
//!             host.close_browser().await;
//!             host.shutdown().await;
//!         })
//!         .await;
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`browser`]: Engine interface, pump, session, close and release coordinators
//! - [`process`]: Helper process discovery and termination
//! - [`config`]: Configuration loading and management
//!
//! ## Threading
//!
//! All lifecycle state lives on one UI-affine thread. [`browser::BrowserHost`]
//! is `!Send` and runs inside a `tokio::task::LocalSet`; only the helper
//! reaper leaves that thread, on tokio's blocking pool.

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Full version string with name
pub const FULL_VERSION: &str = concat!(env!("CARGO_PKG_NAME"), " v", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Module Exports
// ============================================================================

/// Engine interface, pump driver, browser session and teardown coordinators.
pub mod browser;

/// Helper process table access and the child process reaper.
pub mod process;

/// Configuration management for loading settings from files, env, and CLI.
pub mod config;

// ============================================================================
// Re-exports for Convenience
// ============================================================================

// Browser types
pub use browser::{
    Browser, BrowserHost, BrowserObserver, CloseAck, CloseOutcome, Engine, EngineError,
    EngineState, LifecycleEvent, LifecycleOptions, MockEngine, PresentationMode, SessionId,
    ViewFrame, ViewHandle,
};

// CEF-specific types (when feature enabled)
#[cfg(feature = "cef-browser")]
pub use browser::CefEngine;

// Process types
pub use process::{ChildProcessReaper, HelperProcessReaper, HelperRole, ReapReport};

// Config types
pub use config::{BridgeSettings, CliArgs, ConfigError};

// ============================================================================
// Prelude Module
// ============================================================================

/// Prelude module for convenient imports.
///
/// ```rust
/// use chromium_bridge::prelude::*;
/// ```
pub mod prelude {
    pub use crate::browser::{
        BrowserHost, BrowserObserver, CloseOutcome, LifecycleEvent, MockEngine, PresentationMode,
        ViewFrame, ViewHandle,
    };
    pub use crate::config::{BridgeSettings, CliArgs};
    pub use crate::process::HelperProcessReaper;
    pub use crate::{FULL_VERSION, NAME, VERSION};
}
