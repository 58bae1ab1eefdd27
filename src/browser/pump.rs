//! Periodic driver for the engine's cooperative message loop.
//!
//! The driver is a `spawn_local` task on the UI context's [`LocalSet`]; it
//! never leaves the thread that owns the browser handle.
//!
//! [`LocalSet`]: tokio::task::LocalSet

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace};

/// Default pump frequency.
pub const DEFAULT_PUMP_HZ: u32 = 30;

/// Converts a frequency to the tick period (30 Hz ≈ 33 ms).
pub fn period_for_hz(hz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(hz.max(1)))
}

struct RunningPump {
    task: JoinHandle<()>,
    stopped: Rc<Cell<bool>>,
}

/// Repeating timer invoking a tick callback at a fixed frequency.
///
/// At most one timer task exists at a time. [`start`](PumpDriver::start) and
/// [`stop`](PumpDriver::stop) are both idempotent, and `stop` may be called
/// from inside the tick callback.
pub struct PumpDriver {
    period: Duration,
    running: RefCell<Option<RunningPump>>,
    ticks: Rc<Cell<u64>>,
}

impl PumpDriver {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: RefCell::new(None),
            ticks: Rc::new(Cell::new(0)),
        }
    }

    pub fn with_hz(hz: u32) -> Self {
        Self::new(period_for_hz(hz))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.running.borrow().is_some()
    }

    /// Total ticks delivered over the driver's lifetime.
    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    /// Starts invoking `tick` every period. No-op if already running.
    ///
    /// Must be called from within a `LocalSet`.
    pub fn start<F>(&self, mut tick: F)
    where
        F: FnMut() + 'static,
    {
        let mut running = self.running.borrow_mut();
        if running.is_some() {
            trace!("Pump already running");
            return;
        }

        let stopped = Rc::new(Cell::new(false));
        let task_stopped = stopped.clone();
        let ticks = self.ticks.clone();
        let period = self.period;

        let task = tokio::task::spawn_local(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of an interval completes immediately.
            timer.tick().await;
            loop {
                timer.tick().await;
                if task_stopped.get() {
                    break;
                }
                ticks.set(ticks.get() + 1);
                tick();
                if task_stopped.get() {
                    break;
                }
            }
        });

        *running = Some(RunningPump { task, stopped });
        debug!("Pump started at {:?} per tick", period);
    }

    /// Halts the timer. No-op if not running.
    pub fn stop(&self) {
        let running = self.running.borrow_mut().take();
        if let Some(pump) = running {
            pump.stopped.set(true);
            pump.task.abort();
            debug!("Pump stopped");
        }
    }
}

impl Drop for PumpDriver {
    fn drop(&mut self) {
        self.stop();
    }
}
