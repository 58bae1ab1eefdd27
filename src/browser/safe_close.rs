//! Graceful, bounded-time close of the active browser.
//!
//! Closing while the periodic pump keeps firing lets pump ticks race the
//! engine's own teardown, which crashes inside the engine on focus
//! transitions. The coordinator therefore runs a strict sequence:
//!
//! ```text
//! Idle -> PumpStopped -> CloseAsked -> WaitingForCompletion -> Completed
//!                                                            \-> TimedOut -> force release
//! ```
//!
//! While waiting it pumps the engine by hand, one iteration per poll, so the
//! engine can finish its asynchronous close. The caller's future resolves no
//! later than the deadline.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::browser::force_release::ForceReleaseCoordinator;
use crate::browser::host::HostInner;
use crate::browser::session::SessionId;

/// Hard bound on a graceful close.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay between manual pump iterations while waiting for the engine.
pub const DEFAULT_CLOSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Progress of one close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseState {
    PumpStopped,
    CloseAsked,
    WaitingForCompletion,
    Completed,
    TimedOut,
}

impl std::fmt::Display for CloseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseState::PumpStopped => write!(f, "PumpStopped"),
            CloseState::CloseAsked => write!(f, "CloseAsked"),
            CloseState::WaitingForCompletion => write!(f, "WaitingForCompletion"),
            CloseState::Completed => write!(f, "Completed"),
            CloseState::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// How a close call ended, from the caller's point of view. Every variant
/// means the caller may treat the browser as gone (or never there).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// There was no browser to close.
    NoBrowser,
    /// Another close was already in flight; it will finish the job.
    Coalesced,
    /// The engine confirmed the close before the deadline.
    Completed,
    /// The deadline passed (or the session was torn down underneath the
    /// close) and the session was force-released.
    ForceReleased,
}

/// In-flight close of one session.
#[derive(Debug, Clone)]
pub struct CloseRequest {
    session: SessionId,
    requested_at: DateTime<Utc>,
    started: Instant,
    deadline: Instant,
    state: CloseState,
}

impl CloseRequest {
    pub fn new(session: SessionId, timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            session,
            requested_at: Utc::now(),
            started,
            deadline: started + timeout,
            state: CloseState::PumpStopped,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn requested_at(&self) -> DateTime<Utc> {
        self.requested_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> CloseState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Next wake-up: one poll interval away, but never past the deadline.
    pub fn next_poll(&self, now: Instant, poll_interval: Duration) -> Instant {
        (now + poll_interval).min(self.deadline)
    }

    fn advance(&mut self, next: CloseState) {
        trace!("Close of session {}: {} -> {}", self.session, self.state, next);
        self.state = next;
    }
}

/// Single-use driver for one [`CloseRequest`].
pub(crate) struct SafeCloseCoordinator<'a> {
    host: &'a HostInner,
    request: CloseRequest,
    poll_interval: Duration,
}

impl<'a> SafeCloseCoordinator<'a> {
    pub(crate) fn new(
        host: &'a HostInner,
        session: SessionId,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            host,
            request: CloseRequest::new(session, timeout),
            poll_interval,
        }
    }

    pub(crate) async fn run(mut self) -> CloseOutcome {
        let id = self.request.session();
        info!("Closing browser session {}", id);

        // Stop periodic ticks before anything else touches the handle.
        self.host.stop_pump();
        self.request.advance(CloseState::PumpStopped);

        let asked = self.host.with_session(id, |session| {
            session.mark_closing();
            session.browser().close_async();
        });
        if asked.is_none() {
            debug!("Session {} vanished before close was issued", id);
            return CloseOutcome::ForceReleased;
        }
        self.request.advance(CloseState::CloseAsked);
        self.request.advance(CloseState::WaitingForCompletion);

        loop {
            if !self.host.owns_session(id) {
                debug!("Session {} was released while its close was pending", id);
                return CloseOutcome::ForceReleased;
            }

            self.host.pump_manually();

            let closed = self
                .host
                .with_session(id, |session| session.browser().is_closed())
                .unwrap_or(false);
            if closed {
                self.request.advance(CloseState::Completed);
                self.host.release_session(id);
                info!(
                    "Browser session {} closed gracefully after {:?}",
                    id,
                    self.request.elapsed()
                );
                return CloseOutcome::Completed;
            }

            let now = Instant::now();
            if self.request.is_expired(now) {
                self.request.advance(CloseState::TimedOut);
                warn!(
                    "Browser session {} did not confirm close within {:?}; forcing release",
                    id,
                    self.request.elapsed()
                );
                ForceReleaseCoordinator::new(self.host).run(Some(id));
                return CloseOutcome::ForceReleased;
            }

            sleep_until(self.request.next_poll(now, self.poll_interval)).await;
        }
    }
}
