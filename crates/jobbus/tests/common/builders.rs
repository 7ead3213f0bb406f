//! Builders for configurations, archive entries and a scripted executor.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};

use jobbus::archive::ArchiveEntry;
use jobbus::config::{Config, DepositConfig, DepositRootConfig, LockStrategy, LoggingConfig};
use jobbus::deposit::DepositRoot;
use jobbus::{DispatchError, JobExecutor, MultiFilesJob, MultiFilesResult};

/// Builder for creating `Config` instances.
pub struct ConfigBuilder {
    roots: Vec<DepositRootConfig>,
    worker_count: usize,
    poll_interval_ms: u64,
    initial_delay_ms: u64,
    lock_strategy: LockStrategy,
    reconcile_staging_on_startup: bool,
    dispatch_timeout_secs: Option<u64>,
    messages: HashMap<String, String>,
}

impl ConfigBuilder {
    /// Defaults tuned for tests: fast polling, no initial delay.
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            worker_count: 2,
            poll_interval_ms: 20,
            initial_delay_ms: 0,
            lock_strategy: LockStrategy::default(),
            reconcile_staging_on_startup: false,
            dispatch_timeout_secs: None,
            messages: HashMap::new(),
        }
    }

    pub fn root(mut self, root: &DepositRoot) -> Self {
        self.roots.push(DepositRootConfig {
            path: root.path().to_string_lossy().into_owned(),
            application_name: root.application_name().to_string(),
        });
        self
    }

    pub fn roots(self, roots: &[DepositRoot]) -> Self {
        roots.iter().fold(self, |builder, root| builder.root(root))
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn lock_strategy(mut self, strategy: LockStrategy) -> Self {
        self.lock_strategy = strategy;
        self
    }

    pub fn reconcile_staging(mut self, enabled: bool) -> Self {
        self.reconcile_staging_on_startup = enabled;
        self
    }

    pub fn dispatch_timeout_secs(mut self, secs: u64) -> Self {
        self.dispatch_timeout_secs = Some(secs);
        self
    }

    pub fn message(mut self, id: &str, template: &str) -> Self {
        self.messages.insert(id.to_string(), template.to_string());
        self
    }

    pub fn build(self) -> Config {
        Config {
            version: "1.0".to_string(),
            deposit: DepositConfig {
                roots: self.roots,
                job_file_pattern: "*.zip".to_string(),
                poll_interval_ms: self.poll_interval_ms,
                initial_delay_ms: self.initial_delay_ms,
                lock_strategy: self.lock_strategy,
                reconcile_staging_on_startup: self.reconcile_staging_on_startup,
                dispatch_timeout_secs: self.dispatch_timeout_secs,
            },
            worker_count: self.worker_count,
            messages: self.messages,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn entry(name: &str, content: &str) -> ArchiveEntry {
    ArchiveEntry::new(name, content)
}

pub fn two_inputs() -> Vec<ArchiveEntry> {
    vec![entry("a.txt", "alpha"), entry("b.txt", "beta")]
}

/// What the scripted executor does with each job.
#[derive(Debug, Clone)]
pub enum Script {
    /// Emits `out.txt` holding the concatenated input files.
    Concat,
    /// Emits exactly these files.
    Outputs(Vec<ArchiveEntry>),
    /// Fails with this message.
    Fail(String),
}

/// A `JobExecutor` whose behaviour is fixed by a `Script`, optionally
/// held back until a gate is released.
pub struct ScriptedExecutor {
    script: Script,
    gate: Option<Receiver<()>>,
    executed: AtomicUsize,
    seen_inputs: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            gate: None,
            executed: AtomicUsize::new(0),
            seen_inputs: Mutex::new(Vec::new()),
        })
    }

    /// Executor that blocks every job until the returned sender sends or is
    /// dropped.
    pub fn gated(script: Script) -> (Arc<Self>, Sender<()>) {
        let (release, gate) = bounded(0);
        let executor = Arc::new(Self {
            script,
            gate: Some(gate),
            executed: AtomicUsize::new(0),
            seen_inputs: Mutex::new(Vec::new()),
        });
        (executor, release)
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    pub fn seen_inputs(&self) -> Vec<Vec<String>> {
        self.seen_inputs.lock().unwrap().clone()
    }
}

impl JobExecutor for ScriptedExecutor {
    fn execute(&self, job: &MultiFilesJob) -> Result<MultiFilesResult, DispatchError> {
        if let Some(gate) = &self.gate {
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }

        self.seen_inputs.lock().unwrap().push(
            job.file_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        self.executed.fetch_add(1, Ordering::SeqCst);

        let mut result = MultiFilesResult::success_for(job.item());
        match &self.script {
            Script::Concat => {
                let mut combined = Vec::new();
                for name in job.file_names() {
                    let data = job
                        .read_file(name)
                        .map_err(|e| DispatchError::Execution(e.to_string()))?
                        .unwrap_or_default();
                    combined.extend_from_slice(&data);
                }
                result
                    .add_file("out.txt", &mut &combined[..])
                    .map_err(|e| DispatchError::Execution(e.to_string()))?;
            }
            Script::Outputs(entries) => {
                for entry in entries {
                    result
                        .add_file(&entry.name, &mut &entry.data[..])
                        .map_err(|e| DispatchError::Execution(e.to_string()))?;
                }
            }
            Script::Fail(message) => return Err(DispatchError::Execution(message.clone())),
        }
        Ok(result)
    }
}
