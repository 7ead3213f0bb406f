//! Filesystem deposit intake: `jobs/` inbox, `accepted/` staging and
//! `results/` outbox under each configured root.

pub mod handler;
pub mod layout;
pub mod lock;
pub mod service;
pub mod watcher;

pub use handler::{
    DepositHandler, META_ACCEPTED_DIRECTORY, META_INBOX_DIRECTORY, META_ORIGINAL_FILENAME,
    META_ROOT_DIRECTORY,
};
pub use layout::{
    result_file_name, DepositRegistry, DepositRoot, ACCEPTED_SUBDIR, JOBS_SUBDIR, RESULTS_SUBDIR,
};
pub use lock::{locker_for, FileLocker, LockFileLocker};
#[cfg(unix)]
pub use lock::FlockLocker;
pub use service::{reconcile_staging, DepositService};
pub use watcher::{ClaimFn, DirectoryWatcher, JobFileFilter, PollSchedule};
