//! Integration tests for the browser lifecycle
//!
//! Drives [`BrowserHost`] against the mock engine on a paused tokio clock, so
//! the 30 Hz pump, the 3 second close deadline and the 1 second reap grace
//! are all observed deterministically.

use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::LocalSet;
use tokio::time::{sleep, Instant};

use chromium_bridge::browser::{
    BrowserHost, CloseAck, CloseOutcome, EngineState, LifecycleEvent, LifecycleOptions,
    MockEngine, PresentationMode, RecordingObserver, ViewFrame, ViewHandle,
};
use chromium_bridge::process::{ChildProcessReaper, ReapReport};

const MEET_URL: &str = "https://meet.example.com";

/// Reaper that only counts invocations.
#[derive(Default)]
struct CountingReaper {
    calls: AtomicUsize,
}

impl CountingReaper {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ChildProcessReaper for CountingReaper {
    fn reap(&self) -> ReapReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ReapReport::default()
    }
}

fn host_with(engine: &MockEngine, reaper: &Arc<CountingReaper>) -> BrowserHost {
    host_with_options(engine, reaper, LifecycleOptions::default())
}

fn host_with_options(
    engine: &MockEngine,
    reaper: &Arc<CountingReaper>,
    options: LifecycleOptions,
) -> BrowserHost {
    BrowserHost::new(Rc::new(engine.clone()), reaper.clone(), options)
}

fn frame() -> ViewFrame {
    ViewFrame::sized(1280, 720)
}

async fn create_embedded(host: &BrowserHost, url: &str) -> ViewHandle {
    host.create_browser(url, frame(), PresentationMode::Embedded)
        .await
        .expect("browser should be created")
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_create_initializes_engine_lazily() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            assert_eq!(host.engine_state(), EngineState::Uninitialized);

            let view = create_embedded(&host, MEET_URL).await;

            assert!(host.is_initialized());
            assert_eq!(engine.init_calls(), 1);
            assert!(view.surface().is_some());
            assert_eq!(Some(view.session()), host.session_id());
            assert!(host.is_pumping());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_meet_page_reports_url_title_and_progress() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));

            create_embedded(&host, MEET_URL).await;
            sleep(Duration::from_millis(200)).await;

            assert_eq!(host.current_url().as_deref(), Some(MEET_URL));
            assert_eq!(
                host.current_title().as_deref(),
                Some("Mock page - meet.example.com")
            );
            assert_eq!(host.load_progress(), Some(1.0));

            assert_eq!(
                observer.events(),
                vec![
                    LifecycleEvent::LoadStarted,
                    LifecycleEvent::UrlChanged {
                        url: MEET_URL.to_string()
                    },
                    LifecycleEvent::LoadProgress { progress: 0.3 },
                    LifecycleEvent::LoadProgress { progress: 1.0 },
                    LifecycleEvent::TitleChanged {
                        title: "Mock page - meet.example.com".to_string()
                    },
                    LifecycleEvent::LoadFinished,
                ]
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_standalone_has_no_surface() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            let view = host
                .create_browser(MEET_URL, frame(), PresentationMode::Standalone)
                .await
                .expect("standalone browser");

            assert!(matches!(view, ViewHandle::Standalone { .. }));
            assert_eq!(view.surface(), None);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_init_failure_returns_none_and_allows_retry() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new().with_init_failure("missing resources");
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            assert!(host
                .create_browser(MEET_URL, frame(), PresentationMode::Embedded)
                .await
                .is_none());
            assert_eq!(host.engine_state(), EngineState::Uninitialized);
            assert!(!host.has_browser());

            assert!(host
                .create_browser(MEET_URL, frame(), PresentationMode::Embedded)
                .await
                .is_none());
            assert_eq!(engine.init_calls(), 2);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_create_refusal_leaves_no_session() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new().with_create_refusal("out of memory");
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            let view = host
                .create_browser(MEET_URL, frame(), PresentationMode::Embedded)
                .await;

            assert!(view.is_none());
            assert!(!host.has_browser());
            assert!(!host.is_pumping());
            assert!(host.is_initialized());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_create_while_live_closes_previous_first() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));

            let first = create_embedded(&host, "https://a.example.com").await;
            let second = create_embedded(&host, "https://b.example.com").await;

            assert_ne!(first.session(), second.session());
            assert_eq!(engine.created_browsers(), 2);
            assert_eq!(engine.close_requests(), 1);
            assert_eq!(engine.live_browsers(), 1);
            assert_eq!(observer.closed_count(), 1);
            assert_eq!(host.session_id(), Some(second.session()));
            assert!(host.is_pumping());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_create_while_closing_force_releases_old_session() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new().with_close_ack(CloseAck::Never);
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            let first = create_embedded(&host, "https://a.example.com").await;

            let closing = host.clone();
            let pending_close = tokio::task::spawn_local(async move { closing.close_browser().await });
            sleep(Duration::from_millis(50)).await;

            let second = create_embedded(&host, "https://b.example.com").await;

            assert_eq!(pending_close.await.unwrap(), CloseOutcome::ForceReleased);
            assert_ne!(first.session(), second.session());
            assert_eq!(host.session_id(), Some(second.session()));
            assert_eq!(engine.live_browsers(), 1);
            assert!(host.is_pumping());
        })
        .await;
}

// ============================================================================
// Pumping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pump_runs_at_thirty_hz_while_live() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            create_embedded(&host, MEET_URL).await;
            let before = engine.pump_count();
            sleep(Duration::from_secs(1)).await;
            let pumps = engine.pump_count() - before;

            assert!((29..=31).contains(&pumps), "got {} pumps", pumps);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_no_pumps_after_close() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            create_embedded(&host, MEET_URL).await;
            sleep(Duration::from_millis(100)).await;

            assert_eq!(host.close_browser().await, CloseOutcome::Completed);
            let after_close = engine.pump_count();
            sleep(Duration::from_secs(2)).await;

            assert_eq!(engine.pump_count(), after_close);
            assert!(!host.is_pumping());
        })
        .await;
}

// ============================================================================
// Closing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_repeated_create_close_cycles_leave_nothing_behind() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));

            for i in 0..5 {
                create_embedded(&host, &format!("https://site{}.example.com", i)).await;
                sleep(Duration::from_millis(100)).await;

                let started = Instant::now();
                assert_eq!(host.close_browser().await, CloseOutcome::Completed);
                assert!(started.elapsed() < Duration::from_secs(3));

                assert!(!host.has_browser());
                assert!(!host.is_pumping());
            }

            assert_eq!(engine.created_browsers(), 5);
            assert_eq!(engine.released_browsers(), 5);
            assert_eq!(engine.live_browsers(), 0);
            assert_eq!(observer.closed_count(), 5);
            assert_eq!(reaper.calls(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_delayed_ack_completes_without_force_release() {
    LocalSet::new()
        .run_until(async {
            let engine =
                MockEngine::new().with_close_ack(CloseAck::AfterDelay(Duration::from_millis(500)));
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            create_embedded(&host, MEET_URL).await;

            let started = Instant::now();
            let outcome = host.close_browser().await;
            let elapsed = started.elapsed();

            assert_eq!(outcome, CloseOutcome::Completed);
            assert!(elapsed >= Duration::from_millis(500), "closed after {:?}", elapsed);
            assert!(elapsed < Duration::from_millis(600), "closed after {:?}", elapsed);
            assert!(!host.has_browser());
            assert_eq!(engine.close_requests(), 1);
            assert_eq!(engine.live_browsers(), 0);

            assert!(host.take_pending_reap().is_none());
            sleep(Duration::from_secs(2)).await;
            assert_eq!(reaper.calls(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_wedged_close_times_out_then_reaps_after_grace() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new().with_close_ack(CloseAck::Never);
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));

            create_embedded(&host, MEET_URL).await;

            let started = Instant::now();
            let outcome = host.close_browser().await;
            let elapsed = started.elapsed();

            assert_eq!(outcome, CloseOutcome::ForceReleased);
            assert!(elapsed >= Duration::from_secs(3), "closed after {:?}", elapsed);
            assert!(elapsed < Duration::from_millis(3020), "closed after {:?}", elapsed);
            assert!(!host.has_browser());
            assert_eq!(engine.live_browsers(), 0);
            assert_eq!(observer.closed_count(), 1);

            let reap = host.take_pending_reap().expect("reap should be scheduled");
            sleep(Duration::from_millis(900)).await;
            assert_eq!(reaper.calls(), 0);

            assert!(reap.await.unwrap().is_some());
            assert_eq!(reaper.calls(), 1);
            assert!(started.elapsed() >= Duration::from_secs(4));
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_close_notifies_once() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new().with_close_ack(CloseAck::AfterPumps(3));
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));

            create_embedded(&host, MEET_URL).await;

            let (first, second) = tokio::join!(host.close_browser(), host.close_browser());

            assert_eq!(first, CloseOutcome::Completed);
            assert_eq!(second, CloseOutcome::Coalesced);
            assert_eq!(engine.close_requests(), 1);
            assert_eq!(observer.closed_count(), 1);
            assert_eq!(
                observer.events().last(),
                Some(&LifecycleEvent::BrowserClosed)
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_close_without_browser() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            assert_eq!(host.close_browser().await, CloseOutcome::NoBrowser);
            assert!(!host.force_release());
            assert_eq!(engine.init_calls(), 0);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_engine_side_close_is_detected() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));

            host.create_browser(MEET_URL, frame(), PresentationMode::Standalone)
                .await
                .expect("standalone browser");
            sleep(Duration::from_millis(100)).await;

            engine.simulate_window_closed();
            sleep(Duration::from_millis(100)).await;

            assert!(!host.has_browser());
            assert!(!host.is_pumping());
            assert_eq!(engine.released_browsers(), 1);
            assert_eq!(observer.closed_count(), 1);
            assert_eq!(host.close_browser().await, CloseOutcome::NoBrowser);
        })
        .await;
}

// ============================================================================
// Force release and reaping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_force_release_drops_handle_immediately() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            create_embedded(&host, MEET_URL).await;

            assert!(host.force_release());
            assert!(!host.has_browser());
            assert!(!host.is_pumping());
            assert_eq!(engine.live_browsers(), 0);
            assert_eq!(engine.close_requests(), 0);

            let report = host.take_pending_reap().expect("reap scheduled").await.unwrap();
            assert!(report.is_some());
            assert_eq!(reaper.calls(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_replacement_session_helpers_survive_stale_reap() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new().with_close_ack(CloseAck::Never);
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            create_embedded(&host, MEET_URL).await;
            let first = host.session_id();

            // The close of the first session times out and is force-released.
            create_embedded(&host, "https://second.example.com").await;
            assert!(host.has_browser());
            assert_ne!(host.session_id(), first);

            sleep(Duration::from_millis(1100)).await;
            assert_eq!(reaper.calls(), 0);
            assert!(host.has_browser());

            let reap = host.take_pending_reap().expect("reap should be scheduled");
            assert_eq!(reap.await.unwrap(), None);
            assert_eq!(reaper.calls(), 0);
            assert_eq!(engine.live_browsers(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_awaits_every_pending_reap() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let started = Instant::now();

            create_embedded(&host, MEET_URL).await;
            assert!(host.force_release());
            create_embedded(&host, "https://second.example.com").await;
            assert!(host.force_release());
            assert_eq!(reaper.calls(), 0);

            host.shutdown().await;

            assert_eq!(reaper.calls(), 2);
            assert!(started.elapsed() >= Duration::from_secs(1));
            assert!(host.take_pending_reap().is_none());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_reaping_can_be_disabled() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let options = LifecycleOptions {
                reap_enabled: false,
                ..LifecycleOptions::default()
            };
            let host = host_with_options(&engine, &reaper, options);

            create_embedded(&host, MEET_URL).await;
            assert!(host.force_release());

            assert!(host.take_pending_reap().is_none());
            sleep(Duration::from_secs(2)).await;
            assert_eq!(reaper.calls(), 0);
        })
        .await;
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_commands_without_browser_are_ignored() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            host.navigate("https://example.com");
            host.execute_script("document.title");

            assert!(engine.navigations().is_empty());
            assert!(engine.executed_scripts().is_empty());
            assert_eq!(host.current_url(), None);
            assert_eq!(host.current_title(), None);
            assert_eq!(host.load_progress(), None);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_navigate_and_execute_reach_live_browser() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            create_embedded(&host, MEET_URL).await;
            sleep(Duration::from_millis(200)).await;

            host.navigate("https://other.example.com/room");
            host.execute_script("console.log('hi')");
            sleep(Duration::from_millis(200)).await;

            assert_eq!(engine.navigations(), vec!["https://other.example.com/room"]);
            assert_eq!(engine.executed_scripts(), vec!["console.log('hi')"]);
            assert_eq!(
                host.current_url().as_deref(),
                Some("https://other.example.com/room")
            );
            assert_eq!(
                host.current_title().as_deref(),
                Some("Mock page - other.example.com")
            );
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_commands_during_close_are_ignored() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new().with_close_ack(CloseAck::AfterPumps(5));
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            create_embedded(&host, MEET_URL).await;

            let closing = host.clone();
            let pending_close = tokio::task::spawn_local(async move { closing.close_browser().await });
            sleep(Duration::from_millis(15)).await;

            host.navigate("https://late.example.com");
            host.execute_script("late()");

            assert_eq!(pending_close.await.unwrap(), CloseOutcome::Completed);
            assert!(engine.navigations().is_empty());
            assert!(engine.executed_scripts().is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_regressing_progress_is_not_reported() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));

            create_embedded(&host, MEET_URL).await;
            sleep(Duration::from_millis(200)).await;

            engine.simulate_progress(0.5);
            sleep(Duration::from_millis(100)).await;

            assert_eq!(host.load_progress(), Some(1.0));
            assert!(!observer
                .events()
                .contains(&LifecycleEvent::LoadProgress { progress: 0.5 }));
        })
        .await;
}

// ============================================================================
// Observer
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dropped_observer_is_skipped() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));
            drop(observer);

            create_embedded(&host, MEET_URL).await;
            sleep(Duration::from_millis(200)).await;

            assert_eq!(host.close_browser().await, CloseOutcome::Completed);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_cleared_observer_receives_nothing() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));
            host.clear_observer();

            create_embedded(&host, MEET_URL).await;
            sleep(Duration::from_millis(200)).await;
            host.close_browser().await;

            assert!(observer.events().is_empty());
        })
        .await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_live_browser_and_awaits_reap() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);
            let observer = RecordingObserver::new();
            host.set_observer(Rc::<RecordingObserver>::downgrade(&observer));

            create_embedded(&host, MEET_URL).await;
            host.shutdown().await;

            assert_eq!(host.engine_state(), EngineState::Shutdown);
            assert!(engine.is_shut_down());
            assert!(!host.has_browser());
            assert_eq!(engine.live_browsers(), 0);
            assert_eq!(observer.closed_count(), 1);
            assert_eq!(reaper.calls(), 1);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_create_after_shutdown_is_refused() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let reaper = Arc::new(CountingReaper::default());
            let host = host_with(&engine, &reaper);

            assert!(host.initialize());
            host.shutdown().await;

            assert!(host
                .create_browser(MEET_URL, frame(), PresentationMode::Embedded)
                .await
                .is_none());
            assert!(!host.initialize());
            assert_eq!(engine.created_browsers(), 0);
            assert_eq!(engine.init_calls(), 1);
        })
        .await;
}
