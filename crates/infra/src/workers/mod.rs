//! Background tasks and the dispatch worker.

mod dispatch_worker;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub use dispatch_worker::{DispatchError, DispatchOutcome, DispatchWorker, SkipReason};

/// Handle to control and join a background task.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: Arc<Notify>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn `body` with a shutdown signal it should select on.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(Arc<Notify>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = Arc::new(Notify::new());
        let join = tokio::spawn(body(shutdown.clone()));
        Self {
            name,
            shutdown,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Request graceful shutdown and wait for the task to stop.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.join.await {
            tracing::warn!(worker = self.name, error = %e, "worker did not stop cleanly");
        }
    }
}
