//! Agent runtime: cluster watches, queue workers, reconciliation ticker and
//! control socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod watch;

pub use error::DaemonError;
pub use protocol::{
    request_reconcile, request_status, request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{
    init_tracing, reconcile_now, run, run_with, start_blocking, AgentState, WatchMode,
};
