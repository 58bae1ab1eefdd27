//! Integration tests for helper process reaping
//!
//! A wedged close ends in a force release; one grace period later the real
//! [`HelperProcessReaper`] runs against a scripted process table.

use std::io;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::LocalSet;
use tokio::time::sleep;

use chromium_bridge::browser::{
    BrowserHost, CloseAck, CloseOutcome, LifecycleOptions, MockEngine, PresentationMode, ViewFrame,
};
use chromium_bridge::process::{
    HelperProcessReaper, HelperRole, ProcessInfo, ProcessTable, ReapError, ReapedProcess,
};

const HOST_PID: u32 = 4000;

/// Process table with a fixed snapshot that records terminations.
struct ScriptedTable {
    processes: Vec<ProcessInfo>,
    killed: Mutex<Vec<u32>>,
}

impl ScriptedTable {
    fn new(processes: Vec<ProcessInfo>) -> Arc<Self> {
        Arc::new(Self {
            processes,
            killed: Mutex::new(Vec::new()),
        })
    }

    fn killed(&self) -> Vec<u32> {
        self.killed.lock().clone()
    }
}

impl ProcessTable for ScriptedTable {
    fn snapshot(&self) -> io::Result<Vec<ProcessInfo>> {
        Ok(self.processes.clone())
    }

    fn terminate(&self, pid: u32) -> Result<(), ReapError> {
        self.killed.lock().push(pid);
        Ok(())
    }
}

fn process(pid: u32, ppid: u32, command: &str) -> ProcessInfo {
    ProcessInfo {
        pid,
        ppid,
        command: command.to_string(),
    }
}

fn engine_tree() -> Vec<ProcessInfo> {
    vec![
        process(1, 0, "/sbin/init"),
        process(HOST_PID, 1, "/opt/app/host"),
        process(4001, HOST_PID, "/opt/app/Helper --type=gpu-process"),
        process(4002, HOST_PID, "/opt/app/Helper --type=renderer --renderer-client-id=7"),
        process(
            4003,
            HOST_PID,
            "/opt/app/Helper --type=utility --utility-sub-type=network.mojom.NetworkService",
        ),
        process(4004, HOST_PID, "/opt/app/Helper --type=zygote"),
        process(5001, 1, "/usr/bin/chrome --type=renderer"),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_close_reaps_owned_helpers() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new().with_close_ack(CloseAck::Never);
            let table = ScriptedTable::new(engine_tree());
            let reaper = HelperProcessReaper::with_table(table.clone(), HOST_PID);
            let host = BrowserHost::new(
                Rc::new(engine.clone()),
                Arc::new(reaper),
                LifecycleOptions::default(),
            );

            host.create_browser(
                "https://meet.example.com",
                ViewFrame::sized(1280, 720),
                PresentationMode::Embedded,
            )
            .await
            .expect("browser should be created");

            assert_eq!(host.close_browser().await, CloseOutcome::ForceReleased);
            assert!(table.killed().is_empty());

            let report = host
                .take_pending_reap()
                .expect("reap should be scheduled")
                .await
                .unwrap()
                .expect("no session is live, so the reap runs");

            assert_eq!(report.examined, 7);
            assert_eq!(
                report.terminated,
                vec![
                    ReapedProcess {
                        pid: 4001,
                        role: HelperRole::Gpu
                    },
                    ReapedProcess {
                        pid: 4002,
                        role: HelperRole::Renderer
                    },
                    ReapedProcess {
                        pid: 4003,
                        role: HelperRole::Network
                    },
                ]
            );
            assert!(report.is_clean());
            assert_eq!(table.killed(), vec![4001, 4002, 4003]);
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_graceful_close_never_reaps() {
    LocalSet::new()
        .run_until(async {
            let engine = MockEngine::new();
            let table = ScriptedTable::new(engine_tree());
            let reaper = HelperProcessReaper::with_table(table.clone(), HOST_PID);
            let host = BrowserHost::new(
                Rc::new(engine.clone()),
                Arc::new(reaper),
                LifecycleOptions::default(),
            );

            host.create_browser(
                "https://meet.example.com",
                ViewFrame::sized(1280, 720),
                PresentationMode::Standalone,
            )
            .await
            .expect("browser should be created");

            assert_eq!(host.close_browser().await, CloseOutcome::Completed);
            sleep(Duration::from_secs(5)).await;

            assert!(table.killed().is_empty());
        })
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_reparented_helpers_matched_by_executable() {
    LocalSet::new()
        .run_until(async {
            let mut processes = engine_tree();
            processes.push(process(
                6001,
                1,
                "/opt/app/Helper --type=utility --utility-sub-type=storage.mojom.StorageService",
            ));
            let table = ScriptedTable::new(processes);
            let reaper = HelperProcessReaper::with_table(table.clone(), HOST_PID)
                .with_helper_executable("/opt/app/Helper");

            let engine = MockEngine::new();
            let host = BrowserHost::new(
                Rc::new(engine.clone()),
                Arc::new(reaper),
                LifecycleOptions::default(),
            );
            host.create_browser(
                "https://meet.example.com",
                ViewFrame::sized(1280, 720),
                PresentationMode::Embedded,
            )
            .await
            .expect("browser should be created");

            host.shutdown().await;

            let killed = table.killed();
            assert!(killed.contains(&6001));
            assert!(!killed.contains(&5001));
            assert!(!killed.contains(&4004));
            assert!(!killed.contains(&HOST_PID));
        })
        .await;
}
