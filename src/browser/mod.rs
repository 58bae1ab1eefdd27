//! Browser lifecycle: engine handle, pump, session and safe teardown.
//!
//! # Submodules
//!
//! - [`engine`] - Engine/browser traits and the mock engine
//! - [`handle`] - One-time engine init/shutdown
//! - [`pump`] - Periodic message-pump driver
//! - [`session`] - The single live browser and its cached state
//! - [`events`] - Observer fan-out of lifecycle events
//! - [`safe_close`] - Graceful, bounded-time close
//! - [`force_release`] - Immediate release and reaper scheduling
//! - [`host`] - The lifecycle context object tying everything together
//! - [`cef_engine`] - CEF backend (requires `cef-browser` feature)

pub mod engine;
pub mod events;
pub mod force_release;
pub mod handle;
pub mod host;
pub mod pump;
pub mod safe_close;
pub mod session;

/// CEF engine backend (requires `cef-browser` feature).
#[cfg(feature = "cef-browser")]
pub mod cef_engine;

pub use engine::{
    Browser, CloseAck, CreateRequest, CreatedBrowser, Engine, EngineError, EngineEvent, EventSink,
    MockEngine, PresentationMode, SurfaceId, ViewFrame,
};
pub use events::{BrowserObserver, EventNotifier, LifecycleEvent, RecordingObserver};
pub use force_release::DEFAULT_REAP_GRACE;
pub use handle::{EngineHandle, EngineState};
pub use host::{BrowserHost, LifecycleOptions};
pub use pump::{PumpDriver, DEFAULT_PUMP_HZ};
pub use safe_close::{
    CloseOutcome, CloseRequest, CloseState, DEFAULT_CLOSE_POLL_INTERVAL, DEFAULT_CLOSE_TIMEOUT,
};
pub use session::{SessionId, SessionPhase, ViewHandle};

#[cfg(feature = "cef-browser")]
pub use cef_engine::CefEngine;
