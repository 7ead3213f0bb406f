use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crossbeam_channel::{after, select, tick, Receiver, TryRecvError};
use glob::Pattern;
use tracing::{debug, error, info, info_span, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::DepositConfig;
use crate::deposit::layout::{ensure_directory, DepositRoot};
use crate::deposit::lock::FileLocker;
use crate::error::{ConfigError, DepositError};

/// Downstream receiver of claim events. Called with the inbox path while the
/// file is locked; the lock is released once it returns.
pub type ClaimFn = Arc<dyn Fn(&Path) -> Result<Uuid, DepositError> + Send + Sync>;

/// File-name glob selecting job archives in an inbox.
#[derive(Debug, Clone)]
pub struct JobFileFilter {
    pattern: Pattern,
}

impl JobFileFilter {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let pattern = Pattern::new(pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern })
    }

    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.pattern.matches(name))
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// When a watcher scans: once after `initial_delay`, then every `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    interval: Duration,
    initial_delay: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, initial_delay: Duration) -> Result<Self, DepositError> {
        if interval.is_zero() {
            return Err(DepositError::InvalidSchedule(
                "poll interval must be positive".to_string(),
            ));
        }
        Ok(Self {
            interval,
            initial_delay,
        })
    }

    pub fn from_config(config: &DepositConfig) -> Result<Self, DepositError> {
        Self::new(config.poll_interval(), config.initial_delay())
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

/// Scans the inbox of one deposit root and claims files that are complete.
///
/// A file is complete once its size and modification time are unchanged
/// between two consecutive scans.
pub struct DirectoryWatcher {
    root: DepositRoot,
    filter: JobFileFilter,
    locker: Arc<dyn FileLocker>,
    claim: ClaimFn,
    observed: HashMap<PathBuf, Fingerprint>,
}

impl DirectoryWatcher {
    pub fn new(
        root: DepositRoot,
        filter: JobFileFilter,
        locker: Arc<dyn FileLocker>,
        claim: ClaimFn,
    ) -> Self {
        Self {
            root,
            filter,
            locker,
            claim,
            observed: HashMap::new(),
        }
    }

    pub fn root(&self) -> &DepositRoot {
        &self.root
    }

    /// Runs one scan and returns the number of files claimed.
    pub fn scan_once(&mut self) -> Result<usize, DepositError> {
        self.scan(&|| true)
    }

    /// Moves the watcher onto its own thread. It stops once `shutdown`
    /// receives a message or is disconnected; a claim in progress is
    /// always finished first.
    pub fn spawn(
        self,
        schedule: PollSchedule,
        shutdown: Receiver<()>,
    ) -> Result<JoinHandle<()>, DepositError> {
        let root = self.root.path().to_path_buf();
        thread::Builder::new()
            .name(format!("jobbus-watch-{}", self.root.application_name()))
            .spawn(move || self.run(schedule, shutdown))
            .map_err(|e| DepositError::SpawnWatcher { root, source: e })
    }

    fn run(mut self, schedule: PollSchedule, shutdown: Receiver<()>) {
        info!(
            "Watching {} every {:?}",
            self.root.jobs_dir().display(),
            schedule.interval()
        );

        select! {
            recv(shutdown) -> _ => {
                debug!("Watcher for {} stopped before first scan", self.root.path().display());
                return;
            }
            recv(after(schedule.initial_delay())) -> _ => {}
        }

        let ticker = tick(schedule.interval());
        loop {
            let keep_going = || matches!(shutdown.try_recv(), Err(TryRecvError::Empty));
            if let Err(e) = self.scan(&keep_going) {
                error!("Scan of {} failed: {}", self.root.jobs_dir().display(), e);
            }

            select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => {}
            }
        }

        info!("Stopped watching {}", self.root.jobs_dir().display());
    }

    fn scan(&mut self, keep_going: &dyn Fn() -> bool) -> Result<usize, DepositError> {
        let _span = info_span!("scan_cycle", root = %self.root.path().display()).entered();

        let inbox = self.root.jobs_dir();
        ensure_directory(&inbox)?;

        let mut seen = HashSet::new();
        let mut stable = Vec::new();
        for (path, fingerprint) in self.list_candidates(&inbox)? {
            match self.observed.insert(path.clone(), fingerprint) {
                Some(previous) if previous == fingerprint => stable.push(path.clone()),
                _ => debug!("Waiting for {} to settle", path.display()),
            }
            seen.insert(path);
        }
        self.observed.retain(|path, _| seen.contains(path));

        let mut claimed = 0;
        for path in stable {
            if !keep_going() {
                debug!("Shutdown requested, leaving remaining files for later");
                break;
            }

            if !self.locker.try_lock(&path) {
                debug!("{} is claimed elsewhere", path.display());
                continue;
            }
            let outcome = (self.claim)(&path);
            self.locker.unlock(&path);

            match outcome {
                Ok(job_id) => {
                    self.observed.remove(&path);
                    claimed += 1;
                    debug!("Claimed {} as job {}", path.display(), job_id);
                }
                Err(e) => warn!("Failed to claim {}: {}", path.display(), e),
            }
        }

        if claimed > 0 {
            info!("Claimed {} file(s) from {}", claimed, inbox.display());
        }
        Ok(claimed)
    }

    fn list_candidates(&self, inbox: &Path) -> Result<Vec<(PathBuf, Fingerprint)>, DepositError> {
        let scan_failed = |source: std::io::Error| DepositError::ScanFailed {
            path: inbox.to_path_buf(),
            source,
        };
        let mut candidates = Vec::new();

        for entry in WalkDir::new(inbox).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(scan_failed(e.into())),
                Err(e) => {
                    debug!("Skipping unreadable inbox entry: {}", e);
                    continue;
                }
            };

            if entry.depth() == 0 {
                if !entry.file_type().is_dir() {
                    return Err(scan_failed(std::io::Error::other("inbox is not a directory")));
                }
                continue;
            }

            if !entry.file_type().is_file() || !self.filter.matches(entry.path()) {
                continue;
            }

            match entry.metadata() {
                Ok(metadata) => {
                    let fingerprint = Fingerprint::of(&metadata);
                    candidates.push((entry.into_path(), fingerprint));
                }
                Err(e) => debug!("Skipping {}: {}", entry.path().display(), e),
            }
        }

        Ok(candidates)
    }
}
