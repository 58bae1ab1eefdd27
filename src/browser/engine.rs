//! Engine abstraction layer.
//!
//! The rendering engine is an external collaborator. This module describes the
//! narrow surface the lifecycle layer needs from it, as two traits:
//!
//! - [`Engine`]: engine-wide init/shutdown, browser creation and the
//!   single-iteration message pump.
//! - [`Browser`]: one browser handle. Dropping the boxed handle releases it.
//!
//! Engine notifications (load state, address, title) are pushed into an
//! [`EventSink`] handed over at creation time and drained by the host after
//! every pump iteration, so they are always observed on the UI context.
//!
//! A scriptable [`MockEngine`] is provided for tests and for running the
//! binary without a real engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use chromium_bridge::browser::{CloseAck, MockEngine};
//!
//! let engine = MockEngine::new().with_close_ack(CloseAck::AfterPumps(3));
//! assert!(engine.initialize().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Errors reported by an engine backend.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Native engine initialization failed (missing resources, unsupported OS, ...).
    #[error("engine initialization failed: {0}")]
    InitFailed(String),

    /// The engine refused to create a browser.
    #[error("engine refused to create a browser: {0}")]
    CreateRefused(String),

    /// An operation needed an initialized engine.
    #[error("engine is not initialized")]
    NotInitialized,
}

/// Notifications produced by the engine while it is pumped.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Main frame started loading.
    LoadingStarted,
    /// Estimated load progress in `0.0..=1.0`.
    LoadProgress(f64),
    /// Main frame finished loading.
    LoadingFinished,
    /// Committed address changed.
    AddressChanged(String),
    /// Document title changed.
    TitleChanged(String),
}

/// Channel end the engine pushes [`EngineEvent`]s into.
pub type EventSink = mpsc::UnboundedSender<EngineEvent>;

/// How a browser is presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresentationMode {
    /// The engine renders into a surface the host places in its own view tree.
    #[default]
    Embedded,
    /// The engine owns a self-contained top-level window. Needed for content
    /// that requires the native screen-capture picker.
    Standalone,
}

impl std::fmt::Display for PresentationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresentationMode::Embedded => write!(f, "embedded"),
            PresentationMode::Standalone => write!(f, "standalone"),
        }
    }
}

impl std::str::FromStr for PresentationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "embedded" => Ok(PresentationMode::Embedded),
            "standalone" => Ok(PresentationMode::Standalone),
            other => Err(format!(
                "Unknown presentation mode: {}. Valid modes are: embedded, standalone",
                other
            )),
        }
    }
}

/// Initial placement of a browser view, in host coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewFrame {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl ViewFrame {
    /// Creates a frame anchored at the origin.
    pub fn sized(width: i32, height: i32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Opaque native drawable owned by the host once returned (an `NSView`,
/// X11 window id, `HWND`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

/// Parameters for [`Engine::create_browser`].
#[derive(Debug, Clone)]
pub struct CreateRequest {
    /// Initial URL to load.
    pub url: String,
    /// Initial frame of the view or window.
    pub frame: ViewFrame,
    /// Embedded or standalone presentation.
    pub mode: PresentationMode,
}

/// Result of a successful browser creation.
pub struct CreatedBrowser {
    /// Exclusive handle to the new browser.
    pub browser: Box<dyn Browser>,
    /// Drawable surface, present only for [`PresentationMode::Embedded`].
    pub surface: Option<SurfaceId>,
}

/// Engine-wide primitives.
///
/// Implementations are main-thread affine and therefore not `Send`. Every
/// method is called from the UI context that owns the [`BrowserHost`].
///
/// [`BrowserHost`]: crate::browser::BrowserHost
pub trait Engine {
    /// Initializes the engine subsystem, spawning its helper processes lazily.
    fn initialize(&self) -> Result<(), EngineError>;

    /// Releases all engine-wide resources. Only called after [`initialize`]
    /// succeeded and after every browser was released.
    ///
    /// [`initialize`]: Engine::initialize
    fn shutdown(&self);

    /// Creates a browser for `request`.
    ///
    /// Engine notifications for this browser must be pushed into `events`.
    fn create_browser(
        &self,
        request: &CreateRequest,
        events: EventSink,
    ) -> Result<CreatedBrowser, EngineError>;

    /// Runs exactly one iteration of the engine's cooperative message loop.
    fn pump_once(&self);
}

/// Operations on one browser handle.
///
/// Dropping the box drops host-side ownership without waiting for the engine.
pub trait Browser {
    /// Starts loading `url` in the main frame.
    fn navigate(&self, url: &str);

    /// Runs `code` in the main frame. Results are not reported back.
    fn execute_script(&self, code: &str);

    /// Engine-reported URL of the main frame.
    fn url(&self) -> Option<String>;

    /// Engine-reported document title.
    fn title(&self) -> Option<String>;

    /// Asks the engine to close the browser. Completion is observed through
    /// [`is_closed`](Browser::is_closed) after further pump iterations.
    fn close_async(&self);

    /// Whether the engine finished closing this browser.
    fn is_closed(&self) -> bool;
}

// ============================================================================
// Mock Engine
// ============================================================================

/// When a [`MockEngine`] browser acknowledges a close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAck {
    /// On the first pump after `close_async`.
    Immediately,
    /// On the first pump at least this long after `close_async`.
    AfterDelay(Duration),
    /// After this many pumps following `close_async`.
    AfterPumps(u32),
    /// Never; simulates a wedged engine.
    Never,
}

#[derive(Default)]
struct MockEngineState {
    init_failure: Option<String>,
    create_refusal: Option<String>,
    close_ack: Option<CloseAck>,
    initialized: bool,
    shut_down: bool,
    init_calls: u32,
    pump_count: u64,
    created: u32,
    released: u32,
    close_requests: u32,
    next_surface: u64,
    scripts: Vec<String>,
    navigations: Vec<String>,
    browsers: Vec<Weak<RefCell<MockBrowserState>>>,
}

struct MockBrowserState {
    url: String,
    title: Option<String>,
    events: EventSink,
    pending: VecDeque<Vec<EngineEvent>>,
    close_ack: CloseAck,
    close_requested_at: Option<Instant>,
    pumps_since_close: u32,
    closed: bool,
}

impl MockBrowserState {
    fn queue_navigation(&mut self, url: &str) {
        self.pending.push_back(vec![
            EngineEvent::LoadingStarted,
            EngineEvent::AddressChanged(url.to_string()),
            EngineEvent::LoadProgress(0.3),
        ]);
        self.pending.push_back(vec![
            EngineEvent::LoadProgress(1.0),
            EngineEvent::TitleChanged(mock_title(url)),
            EngineEvent::LoadingFinished,
        ]);
    }

    fn step(&mut self) {
        if self.closed {
            return;
        }

        if let Some(requested_at) = self.close_requested_at {
            self.pumps_since_close += 1;
            self.closed = match self.close_ack {
                CloseAck::Immediately => true,
                CloseAck::AfterDelay(delay) => Instant::now() >= requested_at + delay,
                CloseAck::AfterPumps(n) => self.pumps_since_close >= n,
                CloseAck::Never => false,
            };
            if self.closed {
                trace!("Mock browser acknowledged close for {}", self.url);
            }
            return;
        }

        if let Some(batch) = self.pending.pop_front() {
            for event in batch {
                if let EngineEvent::TitleChanged(ref title) = event {
                    self.title = Some(title.clone());
                }
                // Receiver gone means the host already released this browser.
                let _ = self.events.send(event);
            }
        }
    }
}

fn mock_title(url: &str) -> String {
    let host = url
        .split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or(url);
    format!("Mock page - {}", host)
}

/// Scriptable in-process engine used by tests and by the binary when no real
/// backend is compiled in.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// host owns another.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Rc<RefCell<MockEngineState>>,
}

impl MockEngine {
    /// Creates a mock engine that initializes, creates browsers and
    /// acknowledges close requests on the next pump.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes [`Engine::initialize`] fail with `reason`.
    pub fn with_init_failure(self, reason: impl Into<String>) -> Self {
        self.state.borrow_mut().init_failure = Some(reason.into());
        self
    }

    /// Makes [`Engine::create_browser`] fail with `reason`.
    pub fn with_create_refusal(self, reason: impl Into<String>) -> Self {
        self.state.borrow_mut().create_refusal = Some(reason.into());
        self
    }

    /// Sets the close acknowledgement policy for browsers created afterwards.
    pub fn with_close_ack(self, ack: CloseAck) -> Self {
        self.state.borrow_mut().close_ack = Some(ack);
        self
    }

    /// Changes the close acknowledgement policy, including for live browsers.
    pub fn set_close_ack(&self, ack: CloseAck) {
        let mut state = self.state.borrow_mut();
        state.close_ack = Some(ack);
        for browser in state.browsers.iter().filter_map(Weak::upgrade) {
            browser.borrow_mut().close_ack = ack;
        }
    }

    /// Marks every live browser as closed by the engine, as if the user closed
    /// a standalone window.
    pub fn simulate_window_closed(&self) {
        for browser in self.state.borrow().browsers.iter().filter_map(Weak::upgrade) {
            browser.borrow_mut().closed = true;
        }
    }

    /// Queues an out-of-order progress update for every live browser.
    pub fn simulate_progress(&self, progress: f64) {
        for browser in self.state.borrow().browsers.iter().filter_map(Weak::upgrade) {
            browser
                .borrow_mut()
                .pending
                .push_back(vec![EngineEvent::LoadProgress(progress)]);
        }
    }

    /// Number of [`Engine::pump_once`] invocations so far.
    pub fn pump_count(&self) -> u64 {
        self.state.borrow().pump_count
    }

    /// Number of [`Engine::initialize`] invocations so far.
    pub fn init_calls(&self) -> u32 {
        self.state.borrow().init_calls
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.borrow().shut_down
    }

    /// Browsers created so far.
    pub fn created_browsers(&self) -> u32 {
        self.state.borrow().created
    }

    /// Browser handles dropped by the host so far.
    pub fn released_browsers(&self) -> u32 {
        self.state.borrow().released
    }

    /// Browser handles still held by the host.
    pub fn live_browsers(&self) -> usize {
        self.state
            .borrow()
            .browsers
            .iter()
            .filter(|b| b.strong_count() > 0)
            .count()
    }

    /// Number of `close_async` calls so far.
    pub fn close_requests(&self) -> u32 {
        self.state.borrow().close_requests
    }

    /// Scripts passed to `execute_script`, in order.
    pub fn executed_scripts(&self) -> Vec<String> {
        self.state.borrow().scripts.clone()
    }

    /// URLs passed to `navigate`, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.state.borrow().navigations.clone()
    }
}

impl Engine for MockEngine {
    fn initialize(&self) -> Result<(), EngineError> {
        let mut state = self.state.borrow_mut();
        state.init_calls += 1;
        if let Some(reason) = state.init_failure.clone() {
            return Err(EngineError::InitFailed(reason));
        }
        state.initialized = true;
        debug!("Mock engine initialized");
        Ok(())
    }

    fn shutdown(&self) {
        let mut state = self.state.borrow_mut();
        state.initialized = false;
        state.shut_down = true;
        debug!("Mock engine shut down");
    }

    fn create_browser(
        &self,
        request: &CreateRequest,
        events: EventSink,
    ) -> Result<CreatedBrowser, EngineError> {
        let mut state = self.state.borrow_mut();
        if !state.initialized {
            return Err(EngineError::NotInitialized);
        }
        if let Some(reason) = state.create_refusal.clone() {
            return Err(EngineError::CreateRefused(reason));
        }

        let mut browser_state = MockBrowserState {
            url: request.url.clone(),
            title: None,
            events,
            pending: VecDeque::new(),
            close_ack: state.close_ack.unwrap_or(CloseAck::Immediately),
            close_requested_at: None,
            pumps_since_close: 0,
            closed: false,
        };
        browser_state.queue_navigation(&request.url);
        let inner = Rc::new(RefCell::new(browser_state));

        state.browsers.retain(|b| b.strong_count() > 0);
        state.browsers.push(Rc::downgrade(&inner));
        state.created += 1;

        let surface = match request.mode {
            PresentationMode::Embedded => {
                state.next_surface += 1;
                Some(SurfaceId(state.next_surface))
            }
            PresentationMode::Standalone => None,
        };

        Ok(CreatedBrowser {
            browser: Box::new(MockBrowser {
                inner,
                engine: self.state.clone(),
            }),
            surface,
        })
    }

    fn pump_once(&self) {
        let browsers: Vec<_> = {
            let mut state = self.state.borrow_mut();
            state.pump_count += 1;
            state.browsers.iter().filter_map(Weak::upgrade).collect()
        };
        for browser in browsers {
            browser.borrow_mut().step();
        }
    }
}

/// Browser handle produced by [`MockEngine`].
pub struct MockBrowser {
    inner: Rc<RefCell<MockBrowserState>>,
    engine: Rc<RefCell<MockEngineState>>,
}

impl Browser for MockBrowser {
    fn navigate(&self, url: &str) {
        self.engine.borrow_mut().navigations.push(url.to_string());
        let mut inner = self.inner.borrow_mut();
        inner.url = url.to_string();
        inner.queue_navigation(url);
    }

    fn execute_script(&self, code: &str) {
        self.engine.borrow_mut().scripts.push(code.to_string());
    }

    fn url(&self) -> Option<String> {
        Some(self.inner.borrow().url.clone())
    }

    fn title(&self) -> Option<String> {
        self.inner.borrow().title.clone()
    }

    fn close_async(&self) {
        self.engine.borrow_mut().close_requests += 1;
        let mut inner = self.inner.borrow_mut();
        if inner.close_requested_at.is_none() {
            inner.close_requested_at = Some(Instant::now());
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }
}

impl Drop for MockBrowser {
    fn drop(&mut self) {
        self.engine.borrow_mut().released += 1;
    }
}
