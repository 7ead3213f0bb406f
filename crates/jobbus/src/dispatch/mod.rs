//! Seams between the intake channels and the execution engine.

pub mod pool;
pub mod router;

pub use pool::DispatchPool;
pub use router::ResultRouter;

use crate::error::DispatchError;
use crate::message::{MultiFilesJob, MultiFilesResult};

/// Accepts jobs for execution.
///
/// `dispatch` returns once the job is handed off; completion is reported
/// later through a [`ResultHandler`].
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: MultiFilesJob) -> Result<(), DispatchError>;
}

/// Receives finished results and delivers them to their outbox.
pub trait ResultHandler: Send + Sync {
    fn handle_result(&self, result: MultiFilesResult);
}

/// The execution engine behind a [`DispatchPool`].
pub trait JobExecutor: Send + Sync {
    fn execute(&self, job: &MultiFilesJob) -> Result<MultiFilesResult, DispatchError>;
}
