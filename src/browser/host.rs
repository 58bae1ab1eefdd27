//! The lifecycle context object.
//!
//! [`BrowserHost`] owns every piece of lifecycle state: the engine handle,
//! the single browser session slot, the pump driver, the observer slot and
//! the pending reap tasks. It is `!Send` and must live on the UI-affine thread,
//! inside a [`LocalSet`](tokio::task::LocalSet).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use chromium_bridge::browser::{BrowserHost, LifecycleOptions, MockEngine, PresentationMode, ViewFrame};
//! use chromium_bridge::process::HelperProcessReaper;
//!
//! # async fn run() {
//! let host = BrowserHost::new(
//!     Rc::new(MockEngine::new()),
//!     Arc::new(HelperProcessReaper::new()),
//!     LifecycleOptions::default(),
//! );
//! let view = host
//!     .create_browser("https://meet.example.com", ViewFrame::sized(1280, 720), PresentationMode::Embedded)
//!     .await;
//! assert!(view.is_some());
//! host.close_browser().await;
//! host.shutdown().await;
//! # }
//! ```

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::browser::engine::{CreateRequest, Engine, PresentationMode, ViewFrame};
use crate::browser::events::{BrowserObserver, EventNotifier, LifecycleEvent};
use crate::browser::force_release::{ForceReleaseCoordinator, DEFAULT_REAP_GRACE};
use crate::browser::handle::{EngineHandle, EngineState};
use crate::browser::pump::{PumpDriver, DEFAULT_PUMP_HZ};
use crate::browser::safe_close::{
    CloseOutcome, SafeCloseCoordinator, DEFAULT_CLOSE_POLL_INTERVAL, DEFAULT_CLOSE_TIMEOUT,
};
use crate::browser::session::{BrowserSession, SessionId, SessionPhase, ViewHandle};
use crate::process::{ChildProcessReaper, ReapReport};

/// Timing and reaping knobs for a [`BrowserHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Periodic pump frequency while a browser is live.
    pub pump_hz: u32,
    /// Hard bound on a graceful close.
    pub close_timeout: Duration,
    /// Manual pump cadence while waiting for a close.
    pub close_poll_interval: Duration,
    /// Delay between a force release and helper reaping.
    pub reap_grace: Duration,
    /// Whether force releases schedule the helper reaper at all.
    pub reap_enabled: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            pump_hz: DEFAULT_PUMP_HZ,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            close_poll_interval: DEFAULT_CLOSE_POLL_INTERVAL,
            reap_grace: DEFAULT_REAP_GRACE,
            reap_enabled: true,
        }
    }
}

pub(crate) struct HostInner {
    handle: EngineHandle,
    session: RefCell<Option<BrowserSession>>,
    pump: PumpDriver,
    notifier: EventNotifier,
    reaper: Arc<dyn ChildProcessReaper>,
    options: LifecycleOptions,
    pending_reaps: RefCell<Vec<JoinHandle<Option<ReapReport>>>>,
    this: Weak<HostInner>,
}

impl HostInner {
    pub(crate) fn stop_pump(&self) {
        self.pump.stop();
    }

    pub(crate) fn session_id(&self) -> Option<SessionId> {
        self.session.borrow().as_ref().map(BrowserSession::id)
    }

    pub(crate) fn owns_session(&self, id: SessionId) -> bool {
        self.session_id() == Some(id)
    }

    /// Runs `f` against the current session if it is still `id`.
    pub(crate) fn with_session<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut BrowserSession) -> R,
    ) -> Option<R> {
        let mut slot = self.session.borrow_mut();
        match slot.as_mut() {
            Some(session) if session.id() == id => Some(f(session)),
            _ => None,
        }
    }

    /// One synchronous engine iteration outside the periodic driver.
    pub(crate) fn pump_manually(&self) {
        self.handle.engine().pump_once();
        self.dispatch_events();
    }

    fn dispatch_events(&self) {
        let events = match self.session.borrow_mut().as_mut() {
            Some(session) => session.drain_events(),
            None => return,
        };
        // The session borrow is released so observers may call back in.
        for event in &events {
            self.notifier.deliver(event);
        }
    }

    fn on_pump_tick(&self) {
        self.handle.engine().pump_once();
        self.dispatch_events();

        let closed_by_engine = self
            .session
            .borrow()
            .as_ref()
            .filter(|s| s.is_live() && s.browser().is_closed())
            .map(BrowserSession::id);
        if let Some(id) = closed_by_engine {
            info!("Browser session {} was closed by the engine", id);
            self.stop_pump();
            self.release_session(id);
        }
    }

    /// Drops the session's browser handle and notifies the observer. Returns
    /// `false` when `id` is not the current session.
    pub(crate) fn release_session(&self, id: SessionId) -> bool {
        let taken = {
            let mut slot = self.session.borrow_mut();
            if slot.as_ref().map(BrowserSession::id) == Some(id) {
                slot.take()
            } else {
                None
            }
        };

        match taken {
            Some(session) => {
                drop(session);
                debug!("Browser session {} released", id);
                self.notifier.deliver(&LifecycleEvent::BrowserClosed);
                true
            }
            None => false,
        }
    }

    /// Runs the helper reaper on the blocking pool after the grace delay,
    /// on behalf of the released session `released`.
    ///
    /// The helper tree is shared by every browser of the host process, so the
    /// reap is skipped if another session is live once the grace expires.
    /// Resolves to `None` when skipped.
    pub(crate) fn schedule_reap(&self, released: SessionId) {
        if !self.options.reap_enabled {
            debug!("Helper reaping disabled; skipping");
            return;
        }

        let host = self.this.clone();
        let reaper = self.reaper.clone();
        let grace = self.options.reap_grace;
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(grace).await;

            // Runs on the UI context, so the session slot is stable here.
            let live = host.upgrade().and_then(|inner| inner.session_id());
            if let Some(live) = live {
                info!(
                    "Skipping helper reap for session {}: session {} is live",
                    released, live
                );
                return None;
            }

            match tokio::task::spawn_blocking(move || reaper.reap()).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Helper reaper task failed: {}", e);
                    None
                }
            }
        });
        debug!(
            "Helper reaping for session {} scheduled in {:?}",
            released, grace
        );

        let mut pending = self.pending_reaps.borrow_mut();
        pending.retain(|task| !task.is_finished());
        pending.push(task);
    }
}

/// Cloneable handle to the lifecycle context.
#[derive(Clone)]
pub struct BrowserHost {
    inner: Rc<HostInner>,
}

impl BrowserHost {
    pub fn new(
        engine: Rc<dyn Engine>,
        reaper: Arc<dyn ChildProcessReaper>,
        options: LifecycleOptions,
    ) -> Self {
        let pump = PumpDriver::with_hz(options.pump_hz);
        Self {
            inner: Rc::new_cyclic(|this| HostInner {
                handle: EngineHandle::new(engine),
                session: RefCell::new(None),
                pump,
                notifier: EventNotifier::new(),
                reaper,
                options,
                pending_reaps: RefCell::new(Vec::new()),
                this: this.clone(),
            }),
        }
    }

    pub fn options(&self) -> &LifecycleOptions {
        &self.inner.options
    }

    // ========================================================================
    // Engine lifecycle
    // ========================================================================

    /// Initializes the engine. Idempotent while ready.
    pub fn initialize(&self) -> bool {
        self.inner.handle.initialize()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.handle.is_ready()
    }

    pub fn engine_state(&self) -> EngineState {
        self.inner.handle.state()
    }

    /// Force-releases any live browser, shuts the engine down and waits for
    /// every scheduled helper reap.
    pub async fn shutdown(&self) {
        if !self.inner.handle.is_ready() {
            warn!(
                "Shutdown requested in engine state {}",
                self.inner.handle.state()
            );
            return;
        }

        ForceReleaseCoordinator::new(&self.inner).run(None);
        self.inner.handle.shutdown();
        self.inner.notifier.clear_observer();

        for task in self.take_pending_reaps() {
            match task.await {
                Ok(Some(report)) => debug!(
                    "Helper reap: {} terminated, {} failed",
                    report.terminated.len(),
                    report.failures.len()
                ),
                Ok(None) => {}
                Err(e) => warn!("Helper reap did not complete: {}", e),
            }
        }
    }

    // ========================================================================
    // Observer
    // ========================================================================

    pub fn set_observer(&self, observer: Weak<dyn BrowserObserver>) {
        self.inner.notifier.set_observer(observer);
    }

    pub fn clear_observer(&self) {
        self.inner.notifier.clear_observer();
    }

    // ========================================================================
    // Session
    // ========================================================================

    pub fn has_browser(&self) -> bool {
        self.inner.session.borrow().is_some()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.session_id()
    }

    /// Whether the periodic pump is currently scheduled.
    pub fn is_pumping(&self) -> bool {
        self.inner.pump.is_running()
    }

    /// Creates the browser, initializing the engine on first use.
    ///
    /// A live browser is closed gracefully first; one already closing is
    /// force-released. Returns `None` if the engine is unavailable or refuses
    /// the creation.
    pub async fn create_browser(
        &self,
        url: &str,
        frame: ViewFrame,
        mode: PresentationMode,
    ) -> Option<ViewHandle> {
        if !self.ensure_initialized() {
            return None;
        }

        let existing = self
            .inner
            .session
            .borrow()
            .as_ref()
            .map(|s| (s.id(), s.phase()));
        match existing {
            Some((id, SessionPhase::Live)) => {
                info!("Replacing live browser session {}", id);
                self.close_browser().await;
            }
            Some((id, SessionPhase::Closing)) => {
                info!("Replacing closing browser session {}", id);
                ForceReleaseCoordinator::new(&self.inner).run(Some(id));
            }
            None => {}
        }
        // Another create may have slipped in while the close was awaited.
        if let Some(id) = self.inner.session_id() {
            ForceReleaseCoordinator::new(&self.inner).run(Some(id));
        }
        if !self.inner.handle.is_ready() {
            warn!("Engine went away while replacing the browser");
            return None;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let request = CreateRequest {
            url: url.to_string(),
            frame,
            mode,
        };
        let created = match self.inner.handle.engine().create_browser(&request, events_tx) {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to create {} browser for {}: {}", mode, url, e);
                return None;
            }
        };

        let session = BrowserSession::new(created.browser, mode, events_rx);
        let id = session.id();
        let view = match (mode, created.surface) {
            (PresentationMode::Embedded, Some(surface)) => ViewHandle::Embedded {
                session: id,
                surface,
            },
            (PresentationMode::Embedded, None) => {
                error!("Engine returned no surface for embedded browser {}", url);
                return None;
            }
            (PresentationMode::Standalone, _) => ViewHandle::Standalone { session: id },
        };

        *self.inner.session.borrow_mut() = Some(session);
        self.inner.notifier.open_session();
        self.start_pump();

        info!("Browser session {} created ({}) for {}", id, mode, url);
        Some(view)
    }

    pub fn navigate(&self, url: &str) {
        let slot = self.inner.session.borrow();
        match slot.as_ref() {
            Some(session) if session.is_live() => {
                debug!("Navigating session {} to {}", session.id(), url);
                session.browser().navigate(url);
            }
            Some(session) => debug!("Session {} is closing; ignoring navigation", session.id()),
            None => debug!("No active browser; ignoring navigation to {}", url),
        }
    }

    pub fn execute_script(&self, code: &str) {
        let slot = self.inner.session.borrow();
        match slot.as_ref() {
            Some(session) if session.is_live() => {
                debug!("Executing {} bytes of script in session {}", code.len(), session.id());
                session.browser().execute_script(code);
            }
            Some(session) => debug!("Session {} is closing; ignoring script", session.id()),
            None => debug!("No active browser; ignoring script"),
        }
    }

    pub fn current_url(&self) -> Option<String> {
        self.inner
            .session
            .borrow()
            .as_ref()
            .and_then(BrowserSession::current_url)
    }

    pub fn current_title(&self) -> Option<String> {
        self.inner
            .session
            .borrow()
            .as_ref()
            .and_then(BrowserSession::current_title)
    }

    pub fn load_progress(&self) -> Option<f64> {
        self.inner
            .session
            .borrow()
            .as_ref()
            .map(BrowserSession::load_progress)
    }

    /// Closes the browser gracefully, falling back to a force release after
    /// the close timeout. A request arriving while a close is in flight
    /// returns [`CloseOutcome::Coalesced`] immediately.
    pub async fn close_browser(&self) -> CloseOutcome {
        let current = self
            .inner
            .session
            .borrow()
            .as_ref()
            .map(|s| (s.id(), s.phase()));
        let id = match current {
            None => {
                debug!("Close requested with no active browser");
                return CloseOutcome::NoBrowser;
            }
            Some((id, SessionPhase::Closing)) => {
                debug!("Close of session {} already in flight", id);
                return CloseOutcome::Coalesced;
            }
            Some((id, SessionPhase::Live)) => id,
        };

        SafeCloseCoordinator::new(
            &self.inner,
            id,
            self.inner.options.close_timeout,
            self.inner.options.close_poll_interval,
        )
        .run()
        .await
    }

    /// Drops the browser immediately and schedules helper reaping. Returns
    /// whether there was a browser to release.
    pub fn force_release(&self) -> bool {
        ForceReleaseCoordinator::new(&self.inner).run(None)
    }

    /// Takes the most recently scheduled reap task, if any. Earlier ones stay
    /// pending and are still awaited by [`shutdown`](Self::shutdown).
    pub fn take_pending_reap(&self) -> Option<JoinHandle<Option<ReapReport>>> {
        self.inner.pending_reaps.borrow_mut().pop()
    }

    /// Takes every reap task not yet awaited, oldest first.
    pub fn take_pending_reaps(&self) -> Vec<JoinHandle<Option<ReapReport>>> {
        self.inner.pending_reaps.borrow_mut().drain(..).collect()
    }

    fn ensure_initialized(&self) -> bool {
        match self.inner.handle.state() {
            EngineState::Ready => true,
            EngineState::Uninitialized => self.inner.handle.initialize(),
            state => {
                warn!("Cannot create a browser in engine state {}", state);
                false
            }
        }
    }

    fn start_pump(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.pump.start(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_pump_tick();
            }
        });
    }
}
