use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::deposit::layout::{
    ensure_directory, move_file, remove_if_exists, result_file_name, DepositRegistry,
    RESULTS_SUBDIR,
};
use crate::dispatch::{Dispatcher, ResultHandler};
use crate::error::{ArchiveError, DepositError, DispatchError};
use crate::message::{Messages, Meta, MultiFilesJob, MultiFilesResult, Source, WorkItem};

/// Meta key: deposit root the job came from.
pub const META_ROOT_DIRECTORY: &str = "deposit_root_directory";
/// Meta key: file name of the deposited archive.
pub const META_ORIGINAL_FILENAME: &str = "original_filename";
/// Meta key: inbox the archive was claimed from.
pub const META_INBOX_DIRECTORY: &str = "inbox_directory";
/// Meta key: staging directory holding the claimed archive.
pub const META_ACCEPTED_DIRECTORY: &str = "accepted_directory";

/// How long the id of an expired job is remembered to drop its late result.
const EXPIRED_RETENTION: Duration = Duration::from_secs(60 * 60);

struct InFlightJob {
    item: WorkItem,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct JobTable {
    in_flight: HashMap<Uuid, InFlightJob>,
    /// Expired job ids and when they expired.
    expired: HashMap<Uuid, Instant>,
}

/// The deposit state machine.
///
/// `handle_job_file` moves a claimed file into staging and dispatches it;
/// `handle_result` (usually reached through the result router) publishes
/// the outcome. Failures after the file has been accepted never escape:
/// they become error results and are published like any other result.
pub struct DepositHandler {
    registry: Arc<DepositRegistry>,
    dispatcher: Arc<dyn Dispatcher>,
    messages: Arc<Messages>,
    dispatch_timeout: Option<Duration>,
    expired_retention: Duration,
    jobs: Mutex<JobTable>,
    publish_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DepositHandler {
    pub fn new(
        registry: Arc<DepositRegistry>,
        dispatcher: Arc<dyn Dispatcher>,
        messages: Arc<Messages>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            messages,
            dispatch_timeout: None,
            expired_retention: EXPIRED_RETENTION,
            jobs: Mutex::new(JobTable::default()),
            publish_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Jobs still running after `timeout` are reported as aborted by
    /// [`DepositHandler::expire_overdue`].
    pub fn with_dispatch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    /// Expired job ids are forgotten after `retention`; a result arriving
    /// later than that is published like any other.
    pub fn with_expired_retention(mut self, retention: Duration) -> Self {
        self.expired_retention = retention;
        self
    }

    pub fn registry(&self) -> &DepositRegistry {
        &self.registry
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout
    }

    /// Number of dispatched jobs still waiting for a result.
    pub fn in_flight_count(&self) -> usize {
        self.jobs().in_flight.len()
    }

    /// Claims `file` from its inbox and dispatches it.
    ///
    /// Returns an error only when the file could not be accepted; it is then
    /// still in the inbox and will be seen again on a later scan. Once the
    /// file is staged, the returned job id is the one its result is
    /// published under.
    pub fn handle_job_file(&self, file: &Path) -> Result<Uuid, DepositError> {
        let _span = info_span!("claim", file = %file.display()).entered();

        let root = self.registry.root_of_inbox_file(file)?;
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| DepositError::NotAnInboxFile(file.to_path_buf()))?;

        let accepted_dir = root.accepted_dir();
        ensure_directory(&accepted_dir)?;
        let staged = accepted_dir.join(&file_name);
        if staged.exists() {
            return Err(DepositError::AlreadyStaged(staged));
        }
        std::fs::rename(file, &staged).map_err(|e| DepositError::MoveFile {
            from: file.to_path_buf(),
            to: staged.clone(),
            source: e,
        })?;
        debug!("Accepted {} into {}", file_name, accepted_dir.display());

        let mut meta = Meta::new();
        meta.insert(META_ROOT_DIRECTORY.to_string(), path_value(root.path()));
        meta.insert(META_ORIGINAL_FILENAME.to_string(), Value::String(file_name));
        meta.insert(META_INBOX_DIRECTORY.to_string(), path_value(&root.jobs_dir()));
        meta.insert(META_ACCEPTED_DIRECTORY.to_string(), path_value(&accepted_dir));

        let item = WorkItem::generate(Source::Directory, root.application_name(), meta)?;
        let job_id = item.job_id();
        info!("Accepted deposit as {}", item);

        let mut job = MultiFilesJob::new(item.clone());
        let unpacked = File::open(&staged)
            .map_err(|e| ArchiveError::io(&staged, e))
            .and_then(|archive| job.add_archive(archive));

        match unpacked {
            Ok(count) => debug!("Unpacked {} files for job {}", count, job_id),
            Err(e) => {
                warn!("Failed to unpack {}: {}", staged.display(), e);
                let result = job.build_error_result(&e, &self.messages);
                job.destroy();
                self.publish_logged(result);
                return Ok(job_id);
            }
        }

        self.track(&item);
        if let Err(e) = self.dispatcher.dispatch(job) {
            warn!("Failed to dispatch job {}: {}", job_id, e);
            self.jobs().in_flight.remove(&job_id);
            let result =
                MultiFilesResult::error(&item, item.error_message_id(), &e, &self.messages);
            self.publish_logged(result);
        }

        Ok(job_id)
    }

    /// Publishes `result` into the outbox of the deposit it belongs to and
    /// returns the published path. The result is destroyed either way.
    pub fn publish(&self, mut result: MultiFilesResult) -> Result<PathBuf, DepositError> {
        let _span = info_span!("publish", job_id = %result.job_id()).entered();

        let outcome = self.publish_artifact(&mut result);
        result.destroy();
        outcome
    }

    fn publish_artifact(&self, result: &mut MultiFilesResult) -> Result<PathBuf, DepositError> {
        let root = result
            .meta_str(META_ROOT_DIRECTORY)
            .map(PathBuf::from)
            .ok_or(DepositError::MissingMeta(META_ROOT_DIRECTORY))?;
        let original = result
            .meta_str(META_ORIGINAL_FILENAME)
            .map(str::to_string)
            .ok_or(DepositError::MissingMeta(META_ORIGINAL_FILENAME))?;
        let staged = result
            .meta_str(META_ACCEPTED_DIRECTORY)
            .map(|dir| Path::new(dir).join(&original));

        let artifact = result.zip_result_files_if_not_error()?;

        let results_dir = root.join(RESULTS_SUBDIR);
        ensure_directory(&results_dir)?;
        let target = results_dir.join(result_file_name(&original, &artifact));

        self.serialized(&target, || {
            remove_if_exists(&target)?;
            move_file(&artifact, &target)
        })?;

        if result.is_error() {
            warn!("Published error result {}", target.display());
        } else {
            info!("Published result {}", target.display());
        }

        if let Some(staged) = staged {
            if let Err(e) = remove_if_exists(&staged) {
                warn!("Failed to remove staged archive: {}", e);
            }
        }

        Ok(target)
    }

    /// Publishes abort results for every job whose dispatch deadline has
    /// passed. Results arriving later for those jobs are discarded until the
    /// expired id is forgotten.
    pub fn expire_overdue(&self) -> usize {
        let now = Instant::now();
        let retention = self.expired_retention;
        let overdue: Vec<InFlightJob> = {
            let mut jobs = self.jobs();
            jobs.expired
                .retain(|_, expired_at| now.saturating_duration_since(*expired_at) < retention);

            let ids: Vec<Uuid> = jobs
                .in_flight
                .iter()
                .filter(|(_, job)| job.deadline.is_some_and(|deadline| deadline <= now))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    jobs.expired.insert(id, now);
                    jobs.in_flight.remove(&id)
                })
                .collect()
        };

        let timeout = self.dispatch_timeout.unwrap_or_default();
        for job in &overdue {
            warn!("Job {} did not complete within {:?}", job.item.job_id(), timeout);
            let cause = DispatchError::TimedOut(timeout);
            let result = MultiFilesResult::error(
                &job.item,
                job.item.abort_message_id(),
                &cause,
                &self.messages,
            );
            self.publish_logged(result);
        }

        overdue.len()
    }

    fn track(&self, item: &WorkItem) {
        // A deadline beyond what `Instant` can represent means no deadline.
        let deadline = self
            .dispatch_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
        self.jobs().in_flight.insert(
            item.job_id(),
            InFlightJob {
                item: item.clone(),
                deadline,
            },
        );
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, JobTable> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_logged(&self, result: MultiFilesResult) {
        let job_id = result.job_id();
        if let Err(e) = self.publish(result) {
            error!("Result of job {} was not delivered: {}", job_id, e);
        }
    }

    /// Runs `f` while holding the lock for `target`, so that concurrent
    /// publishes of the same artifact name do not interleave.
    fn serialized<T>(&self, target: &Path, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self
                .publish_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(target.to_path_buf()).or_default())
        };

        let out = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        let mut locks = self
            .publish_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if locks.get(target).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(target);
        }
        out
    }
}

impl ResultHandler for DepositHandler {
    fn handle_result(&self, mut result: MultiFilesResult) {
        let job_id = result.job_id();
        {
            let mut jobs = self.jobs();
            if jobs.expired.remove(&job_id).is_some() {
                warn!("Discarding late result for expired job {}", job_id);
                drop(jobs);
                result.destroy();
                return;
            }
            jobs.in_flight.remove(&job_id);
        }

        self.publish_logged(result);
    }
}

fn path_value(path: &Path) -> Value {
    Value::String(path.to_string_lossy().into_owned())
}
