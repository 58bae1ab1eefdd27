//! Immediate, non-cooperative release of the active browser.
//!
//! Used when a graceful close timed out and when the engine is shut down.
//! The browser handle is dropped without waiting for the engine; helper
//! processes that may outlive it are reaped after a grace delay, which lets
//! the engine finish any cleanup it had in flight before its helpers are
//! killed. A reap whose grace expires while a newer session is live is
//! skipped, since that session shares the helper tree.

use std::time::Duration;
use tracing::{debug, info};

use crate::browser::host::HostInner;
use crate::browser::session::SessionId;

/// Delay between a force release and the helper process reaper.
pub const DEFAULT_REAP_GRACE: Duration = Duration::from_secs(1);

pub(crate) struct ForceReleaseCoordinator<'a> {
    host: &'a HostInner,
}

impl<'a> ForceReleaseCoordinator<'a> {
    pub(crate) fn new(host: &'a HostInner) -> Self {
        Self { host }
    }

    /// Releases `session`, or whatever session is current when `None`.
    /// Returns whether a session was released.
    pub(crate) fn run(self, session: Option<SessionId>) -> bool {
        self.host.stop_pump();

        let Some(id) = session.or_else(|| self.host.session_id()) else {
            debug!("Force release requested with no active browser");
            return false;
        };

        if !self.host.release_session(id) {
            debug!("Session {} already released", id);
            return false;
        }

        info!("Browser session {} force-released", id);
        self.host.schedule_reap(id);
        true
    }
}
