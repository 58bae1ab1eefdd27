//! OS process table access.

use std::io;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, trace};

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub ppid: u32,
    /// Full command line, arguments joined by spaces.
    pub command: String,
}

/// Failure to terminate a single process.
#[derive(Debug, Error)]
pub enum ReapError {
    /// The process exited before it could be signalled.
    #[error("process {0} no longer exists")]
    NotFound(u32),

    /// Signalling was refused by the OS.
    #[error("permission denied terminating process {0}")]
    PermissionDenied(u32),

    #[error("failed to terminate process {pid}: {reason}")]
    Failed { pid: u32, reason: String },
}

/// Snapshot and termination primitives. Split out so reaping policy can be
/// tested without touching real processes.
pub trait ProcessTable: Send + Sync {
    /// Lists all processes visible to the current user.
    fn snapshot(&self) -> io::Result<Vec<ProcessInfo>>;

    /// Terminates `pid` immediately.
    fn terminate(&self, pid: u32) -> Result<(), ReapError>;
}

/// Process table backed by the operating system.
///
/// Enumeration shells out to `ps`, available on both Linux and macOS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> io::Result<Vec<ProcessInfo>> {
        if cfg!(windows) {
            debug!("Process enumeration is not supported on this platform");
            return Ok(Vec::new());
        }

        let output = Command::new("ps")
            .args(["-A", "-o", "pid=,ppid=,args="])
            .output()?;
        if !output.status.success() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("ps exited with {}", output.status),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let processes: Vec<ProcessInfo> = stdout.lines().filter_map(parse_ps_line).collect();
        trace!("Process snapshot contains {} entries", processes.len());
        Ok(processes)
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> Result<(), ReapError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let target = i32::try_from(pid).map_err(|_| ReapError::Failed {
            pid,
            reason: "pid out of range".to_string(),
        })?;
        match kill(Pid::from_raw(target), Signal::SIGKILL) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(ReapError::NotFound(pid)),
            Err(Errno::EPERM) => Err(ReapError::PermissionDenied(pid)),
            Err(e) => Err(ReapError::Failed {
                pid,
                reason: e.to_string(),
            }),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: u32) -> Result<(), ReapError> {
        let status = Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .status()
            .map_err(|e| ReapError::Failed {
                pid,
                reason: e.to_string(),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ReapError::Failed {
                pid,
                reason: format!("taskkill exited with {}", status),
            })
        }
    }
}

/// Parses one `ps -o pid=,ppid=,args=` line.
pub fn parse_ps_line(line: &str) -> Option<ProcessInfo> {
    let mut fields = line.trim_start().splitn(2, char::is_whitespace);
    let pid = fields.next()?.parse().ok()?;
    let rest = fields.next()?.trim_start();
    let mut fields = rest.splitn(2, char::is_whitespace);
    let ppid = fields.next()?.parse().ok()?;
    let command = fields.next().unwrap_or("").trim().to_string();
    Some(ProcessInfo { pid, ppid, command })
}
