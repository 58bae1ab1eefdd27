//! The single live browser and its cached state.
//!
//! A [`BrowserSession`] exclusively owns the engine's browser handle. URL,
//! title and load progress are cached from engine notifications so queries
//! never call into the engine while it may be mid-teardown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::browser::engine::{Browser, EngineEvent, PresentationMode, SurfaceId};
use crate::browser::events::LifecycleEvent;

/// Identifier of one browser session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the host gets back from a successful create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewHandle {
    /// A drawable surface for the host to place in its view hierarchy.
    Embedded {
        session: SessionId,
        surface: SurfaceId,
    },
    /// The engine opened its own top-level window.
    Standalone { session: SessionId },
}

impl ViewHandle {
    pub fn session(&self) -> SessionId {
        match self {
            ViewHandle::Embedded { session, .. } | ViewHandle::Standalone { session } => *session,
        }
    }

    pub fn surface(&self) -> Option<SurfaceId> {
        match self {
            ViewHandle::Embedded { surface, .. } => Some(*surface),
            ViewHandle::Standalone { .. } => None,
        }
    }
}

/// Whether the session accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Live,
    /// A graceful close is in flight; commands are ignored.
    Closing,
}

/// Owner of the one active browser handle.
pub struct BrowserSession {
    id: SessionId,
    browser: Box<dyn Browser>,
    mode: PresentationMode,
    created_at: DateTime<Utc>,
    phase: SessionPhase,
    url: Option<String>,
    title: Option<String>,
    progress: f64,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

impl BrowserSession {
    pub(crate) fn new(
        browser: Box<dyn Browser>,
        mode: PresentationMode,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            browser,
            mode,
            created_at: Utc::now(),
            phase: SessionPhase::Live,
            url: None,
            title: None,
            progress: 0.0,
            events,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn mode(&self) -> PresentationMode {
        self.mode
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase == SessionPhase::Live
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn browser(&self) -> &dyn Browser {
        self.browser.as_ref()
    }

    pub(crate) fn mark_closing(&mut self) {
        self.phase = SessionPhase::Closing;
    }

    /// Last known URL. A live session falls back to asking the engine when
    /// no address notification arrived yet; a closing one never does.
    pub fn current_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| self.is_live().then(|| self.browser.url()).flatten())
    }

    pub fn current_title(&self) -> Option<String> {
        self.title.clone()
    }

    pub fn load_progress(&self) -> f64 {
        self.progress
    }

    /// Drains queued engine notifications into the cache and returns the
    /// observer events they produce, in order.
    pub(crate) fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            if let Some(lifecycle) = self.apply(event) {
                out.push(lifecycle);
            }
        }
        out
    }

    /// Applies one notification. Progress is kept monotonically
    /// non-decreasing within a navigation; repeated URL/title values are
    /// swallowed.
    fn apply(&mut self, event: EngineEvent) -> Option<LifecycleEvent> {
        match event {
            EngineEvent::LoadingStarted => {
                self.progress = 0.0;
                Some(LifecycleEvent::LoadStarted)
            }
            EngineEvent::LoadProgress(progress) => {
                if progress.is_nan() {
                    return None;
                }
                let progress = progress.clamp(0.0, 1.0);
                if progress < self.progress {
                    trace!(
                        "Ignoring regressing load progress {} < {} in session {}",
                        progress,
                        self.progress,
                        self.id
                    );
                    return None;
                }
                self.progress = progress;
                Some(LifecycleEvent::LoadProgress { progress })
            }
            EngineEvent::LoadingFinished => Some(LifecycleEvent::LoadFinished),
            EngineEvent::AddressChanged(url) => {
                if self.url.as_deref() == Some(url.as_str()) {
                    return None;
                }
                self.url = Some(url.clone());
                Some(LifecycleEvent::UrlChanged { url })
            }
            EngineEvent::TitleChanged(title) => {
                if self.title.as_deref() == Some(title.as_str()) {
                    return None;
                }
                self.title = Some(title.clone());
                Some(LifecycleEvent::TitleChanged { title })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullBrowser;

    impl Browser for NullBrowser {
        fn navigate(&self, _url: &str) {}
        fn execute_script(&self, _code: &str) {}
        fn url(&self) -> Option<String> {
            Some("about:blank".to_string())
        }
        fn title(&self) -> Option<String> {
            None
        }
        fn close_async(&self) {}
        fn is_closed(&self) -> bool {
            false
        }
    }

    fn session() -> (BrowserSession, mpsc::UnboundedSender<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BrowserSession::new(Box::new(NullBrowser), PresentationMode::Embedded, rx),
            tx,
        )
    }

    #[test]
    fn test_url_falls_back_to_engine_query() {
        let (mut session, tx) = session();
        assert_eq!(session.current_url().as_deref(), Some("about:blank"));

        tx.send(EngineEvent::AddressChanged("https://meet.example.com".into()))
            .unwrap();
        session.drain_events();
        assert_eq!(
            session.current_url().as_deref(),
            Some("https://meet.example.com")
        );
    }

    #[test]
    fn test_closing_session_answers_from_cache_only() {
        let (mut session, tx) = session();
        session.mark_closing();
        assert_eq!(session.current_url(), None);

        tx.send(EngineEvent::AddressChanged("https://meet.example.com".into()))
            .unwrap();
        session.drain_events();
        assert_eq!(
            session.current_url().as_deref(),
            Some("https://meet.example.com")
        );
    }

    #[test]
    fn test_progress_is_monotonic_within_navigation() {
        let (mut session, tx) = session();
        for event in [
            EngineEvent::LoadingStarted,
            EngineEvent::LoadProgress(0.4),
            EngineEvent::LoadProgress(0.2),
            EngineEvent::LoadProgress(1.7),
            EngineEvent::LoadProgress(f64::NAN),
        ] {
            tx.send(event).unwrap();
        }

        let events = session.drain_events();
        assert_eq!(
            events,
            vec![
                LifecycleEvent::LoadStarted,
                LifecycleEvent::LoadProgress { progress: 0.4 },
                LifecycleEvent::LoadProgress { progress: 1.0 },
            ]
        );
        assert_eq!(session.load_progress(), 1.0);

        // A new navigation resets the floor.
        tx.send(EngineEvent::LoadingStarted).unwrap();
        tx.send(EngineEvent::LoadProgress(0.1)).unwrap();
        let events = session.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(session.load_progress(), 0.1);
    }

    #[test]
    fn test_repeated_title_is_swallowed() {
        let (mut session, tx) = session();
        tx.send(EngineEvent::TitleChanged("Meet".into())).unwrap();
        tx.send(EngineEvent::TitleChanged("Meet".into())).unwrap();
        tx.send(EngineEvent::TitleChanged("Meet - call".into())).unwrap();

        let events = session.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(session.current_title().as_deref(), Some("Meet - call"));
    }

    #[test]
    fn test_closing_phase() {
        let (mut session, _tx) = session();
        assert!(session.is_live());
        session.mark_closing();
        assert_eq!(session.phase(), SessionPhase::Closing);
        assert!(!session.is_live());
    }

    #[test]
    fn test_view_handle_accessors() {
        let id = SessionId::new();
        let embedded = ViewHandle::Embedded {
            session: id,
            surface: SurfaceId(7),
        };
        assert_eq!(embedded.session(), id);
        assert_eq!(embedded.surface(), Some(SurfaceId(7)));
        assert_eq!(ViewHandle::Standalone { session: id }.surface(), None);
    }
}
