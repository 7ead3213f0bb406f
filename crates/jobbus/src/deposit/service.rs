//! Runs the watchers of every deposit root, plus the timeout reaper.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::DepositConfig;
use crate::deposit::handler::DepositHandler;
use crate::deposit::layout::DepositRegistry;
use crate::deposit::lock::FileLocker;
use crate::deposit::watcher::{ClaimFn, DirectoryWatcher, JobFileFilter, PollSchedule};
use crate::error::{DispatchError, Result};

/// Handle to the running directory intake. Stopping it (explicitly or on
/// drop) stops every watcher and waits for claims in progress.
pub struct DepositService {
    stop: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl DepositService {
    pub fn start(
        config: &DepositConfig,
        handler: Arc<DepositHandler>,
        locker: Arc<dyn FileLocker>,
    ) -> Result<Self> {
        let registry = handler.registry();
        if registry.is_empty() {
            info!("No deposit roots configured, directory intake disabled");
            return Ok(Self::idle());
        }

        let filter = JobFileFilter::new(&config.job_file_pattern)?;
        let schedule = PollSchedule::from_config(config)?;

        for root in registry.roots() {
            root.ensure_directories()?;
        }

        if config.reconcile_staging_on_startup {
            reconcile_staging(registry, &filter);
        }

        let (stop, shutdown) = bounded::<()>(0);
        let mut service = Self {
            stop: Some(stop),
            threads: Vec::with_capacity(registry.len() + 1),
        };

        for root in registry.roots() {
            let claim_handler = Arc::clone(&handler);
            let claim: ClaimFn = Arc::new(move |path: &Path| claim_handler.handle_job_file(path));
            let watcher =
                DirectoryWatcher::new(root.clone(), filter.clone(), Arc::clone(&locker), claim);
            service
                .threads
                .push(watcher.spawn(schedule, shutdown.clone())?);
        }

        if let Some(timeout) = handler.dispatch_timeout() {
            let reaper = Arc::clone(&handler);
            let period = reap_period(timeout);
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name("jobbus-reaper".to_string())
                .spawn(move || {
                    let ticker = tick(period);
                    loop {
                        select! {
                            recv(shutdown) -> _ => break,
                            recv(ticker) -> _ => {
                                let expired = reaper.expire_overdue();
                                if expired > 0 {
                                    warn!("Aborted {} overdue job(s)", expired);
                                }
                            }
                        }
                    }
                    debug!("Timeout reaper stopped");
                })
                .map_err(|e| DispatchError::SpawnFailed(e.to_string()))?;
            service.threads.push(handle);
        }

        info!(
            "Directory intake started for {} deposit root(s), pattern '{}'",
            registry.len(),
            filter.as_str()
        );
        Ok(service)
    }

    fn idle() -> Self {
        Self {
            stop: None,
            threads: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    /// Stops all watchers and joins them. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if self.stop.take().is_none() && self.threads.is_empty() {
            return;
        }

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Deposit thread panicked");
            }
        }
        info!("Directory intake stopped");
    }
}

impl Drop for DepositService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Moves archives left in staging by an earlier run back into their inbox
/// so they are claimed again. A staged file whose name is already present
/// in the inbox is left alone. Returns the number of files moved.
pub fn reconcile_staging(registry: &DepositRegistry, filter: &JobFileFilter) -> usize {
    let mut restored = 0;

    for root in registry.roots() {
        let accepted = root.accepted_dir();
        if !accepted.is_dir() {
            continue;
        }

        let staged = WalkDir::new(&accepted)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && filter.matches(e.path()));

        for entry in staged {
            let target = root.jobs_dir().join(entry.file_name());
            if target.exists() {
                warn!(
                    "Not restoring {}: {} already exists",
                    entry.path().display(),
                    target.display()
                );
                continue;
            }

            match std::fs::rename(entry.path(), &target) {
                Ok(()) => {
                    info!("Restored staged archive {}", target.display());
                    restored += 1;
                }
                Err(e) => error!(
                    "Failed to restore staged archive {}: {}",
                    entry.path().display(),
                    e
                ),
            }
        }
    }

    restored
}

fn reap_period(timeout: Duration) -> Duration {
    (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
}
