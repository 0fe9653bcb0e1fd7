//! Service wiring: store, rate limiter, mail transport and the dispatch runtime.

use std::sync::Arc;

use thiserror::Error;

use mailflow_core::{Clock, SystemClock};
use mailflow_infra::mail::{EtherealProvisioner, MailTransport, SmtpMailTransport};
use mailflow_infra::queue::{
    ConnectivitySupervisor, ConsumerConfig, QueueSelector, SupervisorConfig,
};
use mailflow_infra::rate_limit::{RateLimitError, RateLimiter, select_rate_limiter};
use mailflow_infra::store::{CampaignStore, InMemoryStore, PostgresStore, StoreError};
use mailflow_infra::{CampaignScheduler, DispatchRuntime, RuntimeConfig};

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("rate limiter setup failed: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// Everything a request handler needs.
pub struct AppServices {
    pub store: Arc<dyn CampaignStore>,
    pub scheduler: CampaignScheduler<dyn CampaignStore, QueueSelector>,
    pub provisioner: EtherealProvisioner,
    pub connectivity: Arc<ConnectivitySupervisor>,
}

impl core::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppServices")
            .field("broker", &self.connectivity.current())
            .finish_non_exhaustive()
    }
}

/// Collaborators the services are built from.
pub struct ServiceDeps {
    pub store: Arc<dyn CampaignStore>,
    pub limiter: Arc<dyn RateLimiter>,
    pub transport: Arc<dyn MailTransport>,
    pub provisioner: EtherealProvisioner,
    pub clock: Arc<dyn Clock>,
    pub runtime: RuntimeConfig,
}

impl ServiceDeps {
    /// In-memory store and limiter, real SMTP, local queue only.
    pub fn in_memory() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            store: Arc::new(InMemoryStore::with_clock(clock.clone())),
            limiter: Arc::new(mailflow_infra::rate_limit::InMemoryRateLimiter::new(
                clock.clone(),
            )),
            transport: Arc::new(SmtpMailTransport::new()),
            provisioner: EtherealProvisioner::new(),
            clock,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl AppServices {
    /// Start the dispatch runtime and wrap the services around it.
    pub fn start(deps: ServiceDeps) -> (Arc<Self>, DispatchRuntime) {
        let runtime = DispatchRuntime::start(
            deps.runtime,
            deps.store.clone(),
            deps.limiter,
            deps.transport,
            deps.clock.clone(),
        );

        let services = Self {
            scheduler: CampaignScheduler::new(deps.store.clone(), runtime.queue(), deps.clock),
            store: deps.store,
            provisioner: deps.provisioner,
            connectivity: runtime.supervisor(),
        };
        (Arc::new(services), runtime)
    }
}

/// Build services from process configuration.
pub async fn build_services(
    config: &AppConfig,
) -> Result<(Arc<AppServices>, DispatchRuntime), StartupError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn CampaignStore> = match &config.database_url {
        Some(url) => {
            tracing::info!("store: postgres");
            Arc::new(PostgresStore::connect(url).await?)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            Arc::new(InMemoryStore::with_clock(clock.clone()))
        }
    };

    let limiter = select_rate_limiter(Some(&config.redis_url), clock.clone())?;

    let runtime = RuntimeConfig {
        redis_url: Some(config.redis_url.clone()),
        supervisor: SupervisorConfig {
            probe_interval: config.broker_probe_interval,
            ..SupervisorConfig::default()
        },
        consumer: ConsumerConfig::default(),
    };

    Ok(AppServices::start(ServiceDeps {
        store,
        limiter,
        transport: Arc::new(SmtpMailTransport::new()),
        provisioner: EtherealProvisioner::new(),
        clock,
        runtime,
    }))
}
