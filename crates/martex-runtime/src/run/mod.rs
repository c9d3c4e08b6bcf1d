//! Report run lifecycle: the state machine and the per-run logger.

mod logger;
mod state;

pub use logger::{RunLogEntries, RunLogger};
pub use state::{ReportRunState, can_start, prepare_for_start};
