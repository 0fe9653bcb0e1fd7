//! Process wiring for dispatch: queue strategies, consumers, the connectivity
//! supervisor and the outcome logger.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use mailflow_core::Clock;

use crate::mail::MailTransport;
use crate::queue::{
    Connectivity, ConnectivitySupervisor, ConsumerConfig, JobHandler, JobQueue, LocalConsumer,
    LocalQueue, QueueSelector, Strategy, SupervisorConfig, spawn_outcome_logger,
};
use crate::rate_limit::RateLimiter;
use crate::store::CampaignStore;
use crate::workers::{DispatchWorker, WorkerHandle};

/// How long `shutdown` waits for in-flight outcomes to be logged.
const OUTCOME_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Broker address. `None` runs with the local queue only.
    pub redis_url: Option<String>,
    pub supervisor: SupervisorConfig,
    pub consumer: ConsumerConfig,
}

/// Running dispatch machinery. Drop order does not matter; call `shutdown`
/// to stop background tasks gracefully.
pub struct DispatchRuntime {
    selector: Arc<QueueSelector>,
    supervisor: Arc<ConnectivitySupervisor>,
    workers: Vec<WorkerHandle>,
    outcome_logger: JoinHandle<()>,
}

impl core::fmt::Debug for DispatchRuntime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchRuntime")
            .field("selector", &self.selector)
            .field("workers", &self.workers.iter().map(|w| w.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl DispatchRuntime {
    /// Start every background task. Must be called inside a tokio runtime.
    pub fn start(
        config: RuntimeConfig,
        store: Arc<dyn CampaignStore>,
        limiter: Arc<dyn RateLimiter>,
        transport: Arc<dyn MailTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let supervisor = Arc::new(ConnectivitySupervisor::new());
        let (local, firings) = LocalQueue::new();

        #[cfg(feature = "redis")]
        let broker = open_broker(config.redis_url.as_deref(), clock.clone());
        #[cfg(not(feature = "redis"))]
        {
            if config.redis_url.is_some() {
                warn!("redis support not compiled in; queue runs in local mode only");
            }
        }

        #[cfg(feature = "redis")]
        let durable = broker.clone().map(|b| b as Arc<dyn JobQueue>);
        #[cfg(not(feature = "redis"))]
        let durable: Option<Arc<dyn JobQueue>> = None;

        let selector = Arc::new(QueueSelector::new(
            Arc::new(local.clone()) as Arc<dyn JobQueue>,
            durable,
        ));
        let mut workers = vec![selector.follow(supervisor.subscribe())];

        let worker: Arc<dyn JobHandler> = Arc::new(DispatchWorker::new(
            store,
            limiter,
            transport,
            selector.clone(),
            clock,
        ));

        let (outcomes, outcome_rx) = mpsc::unbounded_channel();
        let outcome_logger = spawn_outcome_logger(outcome_rx);

        workers.push(LocalConsumer::spawn(firings, worker.clone(), outcomes.clone()));

        #[cfg(feature = "redis")]
        {
            if let Some(broker) = broker {
                workers.push(crate::queue::BrokerConsumer::spawn(
                    broker.clone(),
                    worker.clone(),
                    outcomes.clone(),
                    supervisor.subscribe(),
                    config.consumer.clone(),
                ));
                workers.push(supervisor.clone().spawn(broker, config.supervisor.clone()));
            }
        }
        #[cfg(not(feature = "redis"))]
        let _ = (&config.consumer, &config.supervisor);

        drop(outcomes);
        info!(strategy = selector.active().as_str(), "dispatch runtime started");

        Self {
            selector,
            supervisor,
            workers,
            outcome_logger,
        }
    }

    /// Queue used by the scheduler; routes to the active strategy.
    pub fn queue(&self) -> Arc<QueueSelector> {
        self.selector.clone()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.supervisor.current()
    }

    pub fn active_strategy(&self) -> Strategy {
        self.selector.active()
    }

    pub fn supervisor(&self) -> Arc<ConnectivitySupervisor> {
        self.supervisor.clone()
    }

    pub async fn shutdown(self) {
        for worker in self.workers.into_iter().rev() {
            worker.shutdown().await;
        }

        let mut logger = self.outcome_logger;
        if tokio::time::timeout(OUTCOME_DRAIN_TIMEOUT, &mut logger)
            .await
            .is_err()
        {
            warn!("outcome logger still busy at shutdown; aborting");
            logger.abort();
        }
        info!("dispatch runtime stopped");
    }
}

#[cfg(feature = "redis")]
fn open_broker(
    redis_url: Option<&str>,
    clock: Arc<dyn Clock>,
) -> Option<Arc<crate::queue::BrokerQueue>> {
    let url = redis_url?;
    match crate::queue::BrokerQueue::open(url, crate::queue::QUEUE_NAME, clock) {
        Ok(broker) => Some(Arc::new(broker)),
        Err(err) => {
            warn!(error = %err, "broker address rejected; queue runs in local mode only");
            None
        }
    }
}
