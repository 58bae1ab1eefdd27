//! CEF (Chromium Embedded Framework) engine backend.
//!
//! Runs CEF with an external message pump: the host's [`PumpDriver`] and the
//! safe-close loop call [`Engine::pump_once`], which performs exactly one
//! `do_message_loop_work` iteration on the calling (UI) thread. Load, address
//! and title callbacks are forwarded into the session's [`EventSink`]; the
//! life-span handler flips a shared flag once CEF is done with the browser.
//!
//! Embedded browsers render off-screen and are exposed through a
//! [`SurfaceId`]; standalone browsers get their own top-level window.
//!
//! [`PumpDriver`]: crate::browser::PumpDriver

use cef::{
    App, AppCallbacks, BrowserSettings, CefContext, CefString, Client, ClientCallbacks,
    DisplayHandler, DisplayHandlerCallbacks, Frame, LifeSpanHandler, LifeSpanHandlerCallbacks,
    LoadHandler, LoadHandlerCallbacks, LogSeverity, Rect, Settings, TransitionType, WindowInfo,
};
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::browser::engine::{
    Browser, CreateRequest, CreatedBrowser, Engine, EngineError, EngineEvent, EventSink,
    PresentationMode, SurfaceId,
};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_FRAME_RATE: i32 = 30;

// ============================================================================
// CEF Callbacks Implementation
// ============================================================================

/// Application callbacks for CEF lifecycle.
struct BridgeAppCallbacks;

impl AppCallbacks for BridgeAppCallbacks {
    fn on_before_command_line_processing(
        &self,
        _process_type: &CefString,
        command_line: &mut cef::command_line::CommandLine,
    ) {
        command_line.append_switch("no-first-run", "");
        command_line.append_switch("no-default-browser-check", "");
        debug!("CEF command line configured");
    }
}

/// Client callbacks wiring the per-browser handlers.
struct BridgeClientCallbacks {
    life_span_handler: LifeSpanHandler,
    load_handler: LoadHandler,
    display_handler: DisplayHandler,
}

impl ClientCallbacks for BridgeClientCallbacks {
    fn get_life_span_handler(&self) -> Option<LifeSpanHandler> {
        Some(self.life_span_handler.clone())
    }

    fn get_load_handler(&self) -> Option<LoadHandler> {
        Some(self.load_handler.clone())
    }

    fn get_display_handler(&self) -> Option<DisplayHandler> {
        Some(self.display_handler.clone())
    }
}

/// Marks the browser closed once CEF has torn it down.
struct BridgeLifeSpanHandler {
    closed: Arc<AtomicBool>,
}

impl LifeSpanHandlerCallbacks for BridgeLifeSpanHandler {
    fn on_after_created(&self, _browser: &cef::Browser) {
        debug!("CEF browser created");
    }

    fn do_close(&self, _browser: &cef::Browser) -> bool {
        // Allow the close to proceed.
        false
    }

    fn on_before_close(&self, _browser: &cef::Browser) {
        info!("CEF browser closed");
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Forwards main-frame load state into the session event queue.
struct BridgeLoadHandler {
    sink: EventSink,
}

impl LoadHandlerCallbacks for BridgeLoadHandler {
    fn on_loading_state_change(
        &self,
        _browser: &cef::Browser,
        is_loading: bool,
        _can_go_back: bool,
        _can_go_forward: bool,
    ) {
        let event = if is_loading {
            EngineEvent::LoadingStarted
        } else {
            EngineEvent::LoadingFinished
        };
        // The session may already be gone; a closed queue is fine.
        let _ = self.sink.send(event);
    }

    fn on_load_start(&self, _browser: &cef::Browser, frame: &Frame, _transition: TransitionType) {
        if frame.is_main() {
            trace!("Main frame load started: {}", frame.get_url().to_string());
        }
    }
}

/// Forwards address, title and progress changes.
struct BridgeDisplayHandler {
    sink: EventSink,
}

impl DisplayHandlerCallbacks for BridgeDisplayHandler {
    fn on_address_change(&self, _browser: &cef::Browser, frame: &Frame, url: &CefString) {
        if frame.is_main() {
            let _ = self.sink.send(EngineEvent::AddressChanged(url.to_string()));
        }
    }

    fn on_title_change(&self, _browser: &cef::Browser, title: &CefString) {
        let _ = self.sink.send(EngineEvent::TitleChanged(title.to_string()));
    }

    fn on_loading_progress_change(&self, _browser: &cef::Browser, progress: f64) {
        let _ = self.sink.send(EngineEvent::LoadProgress(progress));
    }
}

// ============================================================================
// CefBrowserHandle
// ============================================================================

/// Owning handle to one CEF browser.
///
/// Dropping a handle whose browser never finished closing forces the close,
/// which is how a force release reaches CEF.
pub struct CefBrowserHandle {
    browser: cef::Browser,
    closed: Arc<AtomicBool>,
}

impl Browser for CefBrowserHandle {
    fn navigate(&self, url: &str) {
        match self.browser.get_main_frame() {
            Some(frame) => frame.load_url(&CefString::new(url)),
            None => warn!("No main frame; cannot navigate to {}", url),
        }
    }

    fn execute_script(&self, code: &str) {
        match self.browser.get_main_frame() {
            Some(frame) => frame.execute_java_script(&CefString::new(code), "", 0),
            None => warn!("No main frame; script dropped"),
        }
    }

    fn url(&self) -> Option<String> {
        self.browser
            .get_main_frame()
            .map(|frame| frame.get_url().to_string())
            .filter(|url| !url.is_empty())
    }

    fn title(&self) -> Option<String> {
        None
    }

    fn close_async(&self) {
        match self.browser.get_host() {
            Some(host) => host.close_browser(false),
            None => {
                warn!("CEF browser has no host; treating it as closed");
                self.closed.store(true, Ordering::SeqCst);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for CefBrowserHandle {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            if let Some(host) = self.browser.get_host() {
                debug!("Force-closing CEF browser on release");
                host.close_browser(true);
            }
        }
    }
}

// ============================================================================
// CefEngine Implementation
// ============================================================================

/// CEF engine driven by an external message pump on the UI thread.
pub struct CefEngine {
    context: RefCell<Option<CefContext>>,
    next_surface: Cell<u64>,
}

impl CefEngine {
    pub fn new() -> Self {
        Self {
            context: RefCell::new(None),
            next_surface: Cell::new(1),
        }
    }

    fn window_info(&self, request: &CreateRequest) -> (WindowInfo, Option<SurfaceId>) {
        let bounds = Rect {
            x: request.frame.x,
            y: request.frame.y,
            width: request.frame.width,
            height: request.frame.height,
        };
        match request.mode {
            PresentationMode::Embedded => {
                let surface = SurfaceId(self.next_surface.get());
                self.next_surface.set(surface.0 + 1);
                let info = WindowInfo {
                    bounds,
                    ..WindowInfo::default()
                }
                .set_as_windowless(0);
                (info, Some(surface))
            }
            PresentationMode::Standalone => (
                WindowInfo {
                    bounds,
                    ..WindowInfo::default()
                },
                None,
            ),
        }
    }
}

impl Default for CefEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for CefEngine {
    fn initialize(&self) -> Result<(), EngineError> {
        let mut settings = Settings::default();
        settings.windowless_rendering_enabled = true;
        settings.no_sandbox = true;
        settings.multi_threaded_message_loop = false;
        settings.external_message_pump = true;
        settings.log_severity = LogSeverity::WARNING;

        let context = CefContext::initialize(settings, Some(App::new(BridgeAppCallbacks)), None)
            .map_err(|e| EngineError::InitFailed(e.to_string()))?;
        *self.context.borrow_mut() = Some(context);

        info!("CEF context initialized");
        Ok(())
    }

    fn shutdown(&self) {
        if self.context.borrow_mut().take().is_some() {
            info!("Shutting down CEF context");
            cef::shutdown();
        }
    }

    fn create_browser(
        &self,
        request: &CreateRequest,
        events: EventSink,
    ) -> Result<CreatedBrowser, EngineError> {
        if self.context.borrow().is_none() {
            return Err(EngineError::NotInitialized);
        }

        let closed = Arc::new(AtomicBool::new(false));
        let client = Client::new(BridgeClientCallbacks {
            life_span_handler: LifeSpanHandler::new(BridgeLifeSpanHandler {
                closed: closed.clone(),
            }),
            load_handler: LoadHandler::new(BridgeLoadHandler {
                sink: events.clone(),
            }),
            display_handler: DisplayHandler::new(BridgeDisplayHandler { sink: events }),
        });

        let mut browser_settings = BrowserSettings::default();
        browser_settings.windowless_frame_rate = DEFAULT_FRAME_RATE;

        let (window_info, surface) = self.window_info(request);
        let browser = cef::Browser::create(
            &window_info,
            &client,
            &CefString::new(&request.url),
            &browser_settings,
            None,
            None,
        )
        .map_err(|e| EngineError::CreateRefused(e.to_string()))?;

        info!("CEF browser created ({}) for {}", request.mode, request.url);
        Ok(CreatedBrowser {
            browser: Box::new(CefBrowserHandle { browser, closed }),
            surface,
        })
    }

    fn pump_once(&self) {
        cef::do_message_loop_work();
    }
}
