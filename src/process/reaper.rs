//! Reclamation of engine helper processes that outlive a force-released
//! browser.
//!
//! Only processes that are both tagged with a helper role (GPU, renderer,
//! network, storage) and owned by the host are terminated. Everything else in
//! the host's tree, including zygotes and crash handlers, is left alone.
//! Reaping is best-effort: failures are logged and reported, never raised.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::process::table::{ProcessInfo, ProcessTable, ReapError, SystemProcessTable};

/// Upper bound on parent links followed when checking ancestry.
const MAX_ANCESTRY_DEPTH: usize = 32;

/// Engine helper roles eligible for reaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HelperRole {
    Gpu,
    Renderer,
    Network,
    Storage,
}

impl std::fmt::Display for HelperRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HelperRole::Gpu => write!(f, "gpu"),
            HelperRole::Renderer => write!(f, "renderer"),
            HelperRole::Network => write!(f, "network"),
            HelperRole::Storage => write!(f, "storage"),
        }
    }
}

impl HelperRole {
    /// Classifies a Chromium-style helper command line.
    pub fn classify(command: &str) -> Option<Self> {
        let mut process_type = None;
        let mut utility_sub_type = None;
        for arg in command.split_whitespace() {
            if let Some(value) = arg.strip_prefix("--type=") {
                process_type = Some(value);
            } else if let Some(value) = arg.strip_prefix("--utility-sub-type=") {
                utility_sub_type = Some(value);
            }
        }

        match process_type? {
            "gpu-process" => Some(HelperRole::Gpu),
            "renderer" => Some(HelperRole::Renderer),
            "utility" => match utility_sub_type? {
                "network.mojom.NetworkService" => Some(HelperRole::Network),
                "storage.mojom.StorageService" => Some(HelperRole::Storage),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A helper that was terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapedProcess {
    pub pid: u32,
    pub role: HelperRole,
}

/// A helper that could not be terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapFailure {
    pub pid: u32,
    pub role: HelperRole,
    pub reason: String,
}

/// Outcome of one reaping pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReapReport {
    /// Processes inspected in the snapshot.
    pub examined: usize,
    pub terminated: Vec<ReapedProcess>,
    pub failures: Vec<ReapFailure>,
}

impl ReapReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Terminates orphaned engine helpers. Runs on the blocking pool.
pub trait ChildProcessReaper: Send + Sync {
    fn reap(&self) -> ReapReport;
}

/// Reaper that finds helpers by role tag and ownership.
pub struct HelperProcessReaper {
    table: Arc<dyn ProcessTable>,
    host_pid: u32,
    helper_executable: Option<String>,
    // Held for a whole pass; overlapping force releases reap one at a time.
    pass: Mutex<()>,
}

impl HelperProcessReaper {
    /// Reaper over the real process table, owned by the current process.
    pub fn new() -> Self {
        Self::with_table(Arc::new(SystemProcessTable), std::process::id())
    }

    pub fn with_table(table: Arc<dyn ProcessTable>, host_pid: u32) -> Self {
        Self {
            table,
            host_pid,
            helper_executable: None,
            pass: Mutex::new(()),
        }
    }

    /// Also treats helpers whose command line contains `path` as owned, even
    /// when they were re-parented away from the host.
    pub fn with_helper_executable(mut self, path: impl Into<String>) -> Self {
        self.helper_executable = Some(path.into());
        self
    }

    fn is_descendant(&self, pid: u32, parents: &HashMap<u32, u32>) -> bool {
        let mut current = pid;
        for _ in 0..MAX_ANCESTRY_DEPTH {
            match parents.get(&current) {
                Some(&parent) if parent == self.host_pid => return true,
                Some(&parent) if parent != 0 && parent != current => current = parent,
                _ => return false,
            }
        }
        false
    }

    fn is_owned(&self, process: &ProcessInfo, parents: &HashMap<u32, u32>) -> bool {
        if self.is_descendant(process.pid, parents) {
            return true;
        }
        self.helper_executable
            .as_deref()
            .is_some_and(|exe| !exe.is_empty() && process.command.contains(exe))
    }

    /// Selects the helpers this reaper would terminate.
    pub fn find_helpers(&self, processes: &[ProcessInfo]) -> Vec<(u32, HelperRole)> {
        let parents: HashMap<u32, u32> = processes.iter().map(|p| (p.pid, p.ppid)).collect();
        processes
            .iter()
            .filter(|p| p.pid != self.host_pid)
            .filter_map(|p| HelperRole::classify(&p.command).map(|role| (p, role)))
            .filter(|(p, _)| self.is_owned(p, &parents))
            .map(|(p, role)| (p.pid, role))
            .collect()
    }
}

impl Default for HelperProcessReaper {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildProcessReaper for HelperProcessReaper {
    fn reap(&self) -> ReapReport {
        let _pass = self.pass.lock();
        let processes = match self.table.snapshot() {
            Ok(processes) => processes,
            Err(e) => {
                warn!("Could not enumerate processes for helper reaping: {}", e);
                return ReapReport::default();
            }
        };

        let mut report = ReapReport {
            examined: processes.len(),
            ..ReapReport::default()
        };

        for (pid, role) in self.find_helpers(&processes) {
            match self.table.terminate(pid) {
                Ok(()) => {
                    debug!("Terminated {} helper {}", role, pid);
                    report.terminated.push(ReapedProcess { pid, role });
                }
                // Already gone is the outcome we wanted.
                Err(ReapError::NotFound(_)) => {
                    debug!("{} helper {} exited before reaping", role, pid);
                }
                Err(e) => {
                    warn!("Failed to terminate {} helper {}: {}", role, pid, e);
                    report.failures.push(ReapFailure {
                        pid,
                        role,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.terminated.is_empty() && report.failures.is_empty() {
            debug!("No orphaned helper processes found");
        } else {
            info!(
                "Reaped {} helper process(es), {} failure(s)",
                report.terminated.len(),
                report.failures.len()
            );
        }
        report
    }
}
