use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};

use crate::dispatch::{Dispatcher, JobExecutor, ResultHandler};
use crate::error::DispatchError;
use crate::message::{Messages, MultiFilesJob};

/// Thread pool that runs jobs through a [`JobExecutor`] and hands every
/// outcome, success or failure, to a [`ResultHandler`].
pub struct DispatchPool {
    job_sender: Sender<MultiFilesJob>,
    job_receiver: Receiver<MultiFilesJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl DispatchPool {
    /// Starts `worker_count` worker threads.
    pub fn new(
        executor: Arc<dyn JobExecutor>,
        results: Arc<dyn ResultHandler>,
        messages: Arc<Messages>,
        worker_count: usize,
    ) -> Result<Self, DispatchError> {
        if worker_count == 0 {
            return Err(DispatchError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let (job_sender, job_receiver) = unbounded::<MultiFilesJob>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_executor = Arc::clone(&executor);
            let worker_results = Arc::clone(&results);
            let worker_messages = Arc::clone(&messages);

            let handle = thread::Builder::new()
                .name(format!("jobbus-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(
                        worker_id,
                        job_rx,
                        shutdown_flag,
                        worker_executor,
                        worker_results,
                        worker_messages,
                    );
                })
                .map_err(|e| {
                    shutdown.store(true, Ordering::Relaxed);
                    DispatchError::SpawnFailed(e.to_string())
                })?;

            workers.push(handle);
        }

        info!("Started {} dispatch workers", worker_count);

        Ok(Self {
            job_sender,
            job_receiver,
            workers: Mutex::new(workers),
            shutdown,
        })
    }

    pub fn queued(&self) -> usize {
        self.job_sender.len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down dispatch pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Joins all workers. Jobs still queued are abandoned and their inputs
    /// released; their deposits stay staged for reconciliation.
    pub fn wait(&self) {
        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));

        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        let mut abandoned = 0;
        for mut job in self.job_receiver.try_iter() {
            warn!("Abandoning queued job {} on shutdown", job.job_id());
            job.destroy();
            abandoned += 1;
        }

        info!(
            "All dispatch workers have stopped ({} queued jobs abandoned)",
            abandoned
        );
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl Dispatcher for DispatchPool {
    fn dispatch(&self, job: MultiFilesJob) -> Result<(), DispatchError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(DispatchError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| DispatchError::ChannelClosed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<MultiFilesJob>,
    shutdown: Arc<AtomicBool>,
    executor: Arc<dyn JobExecutor>,
    results: Arc<dyn ResultHandler>,
    messages: Arc<Messages>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(mut job) => {
                debug!("Worker {} executing job {}", worker_id, job.job_id());

                let outcome = catch_unwind(AssertUnwindSafe(|| executor.execute(&job)))
                    .unwrap_or_else(|_| {
                        Err(DispatchError::Execution("executor panicked".to_string()))
                    });

                let result = match outcome {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Job {} failed: {}", job.job_id(), e);
                        job.build_error_result(&e, &messages)
                    }
                };

                job.destroy();
                results.handle_result(result);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
