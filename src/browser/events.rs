//! Lifecycle event fan-out to a single observer.
//!
//! The host holds at most one observer, non-owning (`Weak`). Delivery happens
//! synchronously on the UI context, in order of occurrence. Once the
//! browser-closed event went out, the notifier is sealed until the next
//! session opens, so nothing trails a close.

use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::trace;

/// Receives browser lifecycle callbacks. Every method has an empty default so
/// implementors only override what they care about.
pub trait BrowserObserver {
    fn on_load_start(&self) {}
    fn on_load_progress(&self, _progress: f64) {}
    fn on_load_finish(&self) {}
    fn on_url_changed(&self, _url: &str) {}
    fn on_title_changed(&self, _title: &str) {}
    fn on_browser_closed(&self) {}
}

/// Serializable form of the observer callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LifecycleEvent {
    LoadStarted,
    LoadProgress { progress: f64 },
    LoadFinished,
    UrlChanged { url: String },
    TitleChanged { title: String },
    BrowserClosed,
}

impl LifecycleEvent {
    fn dispatch(&self, observer: &dyn BrowserObserver) {
        match self {
            LifecycleEvent::LoadStarted => observer.on_load_start(),
            LifecycleEvent::LoadProgress { progress } => observer.on_load_progress(*progress),
            LifecycleEvent::LoadFinished => observer.on_load_finish(),
            LifecycleEvent::UrlChanged { url } => observer.on_url_changed(url),
            LifecycleEvent::TitleChanged { title } => observer.on_title_changed(title),
            LifecycleEvent::BrowserClosed => observer.on_browser_closed(),
        }
    }
}

/// Single-slot observer registry.
#[derive(Default)]
pub struct EventNotifier {
    observer: RefCell<Option<Weak<dyn BrowserObserver>>>,
    sealed: Cell<bool>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `observer`, replacing any previous one.
    pub fn set_observer(&self, observer: Weak<dyn BrowserObserver>) {
        *self.observer.borrow_mut() = Some(observer);
    }

    pub fn clear_observer(&self) {
        self.observer.borrow_mut().take();
    }

    pub fn has_observer(&self) -> bool {
        self.observer
            .borrow()
            .as_ref()
            .is_some_and(|o| o.strong_count() > 0)
    }

    /// Re-arms delivery for a new session.
    pub(crate) fn open_session(&self) {
        self.sealed.set(false);
    }

    /// Delivers `event`. Returns `false` when it was dropped (no observer,
    /// observer gone, or notifier sealed by a previous close).
    pub fn deliver(&self, event: &LifecycleEvent) -> bool {
        if self.sealed.get() {
            trace!("Dropping {:?} after browser close", event);
            return false;
        }
        if *event == LifecycleEvent::BrowserClosed {
            self.sealed.set(true);
        }

        // Upgrade before dispatch so the observer may clear or replace itself
        // from inside the callback.
        let observer: Option<Rc<dyn BrowserObserver>> =
            self.observer.borrow().as_ref().and_then(Weak::upgrade);
        match observer {
            Some(observer) => {
                event.dispatch(observer.as_ref());
                true
            }
            None => false,
        }
    }
}

/// Observer that records every event, in order. Useful for tests and for
/// logging hosts.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<LifecycleEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.borrow().clone()
    }

    /// Number of browser-closed notifications received.
    pub fn closed_count(&self) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|e| **e == LifecycleEvent::BrowserClosed)
            .count()
    }

    fn push(&self, event: LifecycleEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl BrowserObserver for RecordingObserver {
    fn on_load_start(&self) {
        self.push(LifecycleEvent::LoadStarted);
    }

    fn on_load_progress(&self, progress: f64) {
        self.push(LifecycleEvent::LoadProgress { progress });
    }

    fn on_load_finish(&self) {
        self.push(LifecycleEvent::LoadFinished);
    }

    fn on_url_changed(&self, url: &str) {
        self.push(LifecycleEvent::UrlChanged {
            url: url.to_string(),
        });
    }

    fn on_title_changed(&self, title: &str) {
        self.push(LifecycleEvent::TitleChanged {
            title: title.to_string(),
        });
    }

    fn on_browser_closed(&self) {
        self.push(LifecycleEvent::BrowserClosed);
    }
}
