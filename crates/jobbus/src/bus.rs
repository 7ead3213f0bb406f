use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::deposit::{locker_for, DepositHandler, DepositRegistry, DepositService};
use crate::dispatch::{DispatchPool, Dispatcher, JobExecutor, ResultRouter};
use crate::error::Result;
use crate::message::{Messages, Source};

/// A running job bus.
///
/// Other intake channels submit through [`JobBus::dispatcher`] and register
/// their result handler on [`JobBus::router`].
pub struct JobBus {
    messages: Arc<Messages>,
    router: Arc<ResultRouter>,
    pool: Arc<DispatchPool>,
    handler: Arc<DepositHandler>,
    service: DepositService,
}

impl JobBus {
    pub fn start(config: &Config, executor: Arc<dyn JobExecutor>) -> Result<Self> {
        let messages = Arc::new(Messages::with_overrides(&config.messages));
        let registry = Arc::new(DepositRegistry::from_config(&config.deposit)?);
        let router = Arc::new(ResultRouter::new());

        let pool = Arc::new(DispatchPool::new(
            executor,
            router.clone(),
            Arc::clone(&messages),
            config.worker_count,
        )?);

        let handler = Arc::new(
            DepositHandler::new(registry, pool.clone(), Arc::clone(&messages))
                .with_dispatch_timeout(config.deposit.dispatch_timeout()),
        );
        router.register(Source::Directory, &handler);

        let locker = locker_for(config.deposit.lock_strategy);
        let service = match DepositService::start(&config.deposit, Arc::clone(&handler), locker) {
            Ok(service) => service,
            Err(e) => {
                pool.shutdown();
                pool.wait();
                return Err(e);
            }
        };

        info!(
            "Job bus started with {} workers and {} deposit root(s)",
            config.worker_count,
            handler.registry().len()
        );

        Ok(Self {
            messages,
            router,
            pool,
            handler,
            service,
        })
    }

    pub fn dispatcher(&self) -> Arc<dyn Dispatcher> {
        self.pool.clone()
    }

    pub fn router(&self) -> &Arc<ResultRouter> {
        &self.router
    }

    pub fn deposit_handler(&self) -> &Arc<DepositHandler> {
        &self.handler
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Stops the watchers, then the workers. Jobs still queued are abandoned
    /// and their deposits stay in staging.
    pub fn shutdown(&mut self) {
        self.service.stop();
        self.pool.shutdown();
        self.pool.wait();
    }
}

impl Drop for JobBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}
