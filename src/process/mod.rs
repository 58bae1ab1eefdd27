//! Engine helper process reclamation.
//!
//! - [`table`] - process table snapshot and termination primitives
//! - [`reaper`] - helper-role classification and the reaping policy

pub mod reaper;
pub mod table;

pub use reaper::{
    ChildProcessReaper, HelperProcessReaper, HelperRole, ReapFailure, ReapReport, ReapedProcess,
};
pub use table::{ProcessInfo, ProcessTable, ReapError, SystemProcessTable};
