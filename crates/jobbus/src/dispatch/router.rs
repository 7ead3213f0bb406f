use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use log::{debug, error};

use crate::dispatch::ResultHandler;
use crate::message::{MultiFilesResult, Source};

/// Delivers results to the handler registered for their intake channel.
#[derive(Default)]
pub struct ResultRouter {
    handlers: RwLock<HashMap<Source, Weak<dyn ResultHandler>>>,
}

impl ResultRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for results of `source`, replacing any previous one.
    /// The router does not keep the handler alive.
    pub fn register<H: ResultHandler + 'static>(&self, source: Source, handler: &Arc<H>) {
        let weak: Weak<dyn ResultHandler> = Arc::downgrade(handler) as Weak<dyn ResultHandler>;
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(source, weak);
        debug!("Registered result handler for {}", source);
    }

    pub fn unregister(&self, source: Source) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&source);
    }

    /// Hands `result` to its handler. Returns false if nobody could take it,
    /// in which case the result is destroyed.
    pub fn route(&self, mut result: MultiFilesResult) -> bool {
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&result.source())
            .and_then(Weak::upgrade);

        match handler {
            Some(handler) => {
                handler.handle_result(result);
                true
            }
            None => {
                error!(
                    "No result handler for source {}, dropping result of job {}",
                    result.source(),
                    result.job_id()
                );
                result.destroy();
                false
            }
        }
    }
}

impl ResultHandler for ResultRouter {
    fn handle_result(&self, result: MultiFilesResult) {
        self.route(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Meta, WorkItem};
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Collecting {
        seen: Mutex<Vec<Uuid>>,
    }

    impl ResultHandler for Collecting {
        fn handle_result(&self, result: MultiFilesResult) {
            self.seen.lock().unwrap().push(result.job_id());
        }
    }

    fn result(source: Source) -> MultiFilesResult {
        MultiFilesResult::success_for(&WorkItem::generate(source, "lab", Meta::new()).unwrap())
    }

    #[test]
    fn test_routes_by_source() {
        let router = ResultRouter::new();
        let directory = Arc::new(Collecting::default());
        let email = Arc::new(Collecting::default());
        router.register(Source::Directory, &directory);
        router.register(Source::Email, &email);

        let r = result(Source::Directory);
        let id = r.job_id();
        assert!(router.route(r));

        assert_eq!(*directory.seen.lock().unwrap(), vec![id]);
        assert!(email.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unroutable_result_is_dropped() {
        let router = ResultRouter::new();
        assert!(!router.route(result(Source::Rest)));
    }

    #[test]
    fn test_dropped_handler_is_not_kept_alive() {
        let router = ResultRouter::new();
        let handler = Arc::new(Collecting::default());
        router.register(Source::Directory, &handler);
        drop(handler);

        assert!(!router.route(result(Source::Directory)));
    }

    #[test]
    fn test_unregister() {
        let router = ResultRouter::new();
        let handler = Arc::new(Collecting::default());
        router.register(Source::Soap, &handler);
        router.unregister(Source::Soap);

        assert!(!router.route(result(Source::Soap)));
    }
}
