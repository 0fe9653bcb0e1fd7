//! Broker connectivity supervision.
//!
//! The supervisor is the single owner of the broker up/down state. Dependents
//! subscribe and keep their own snapshot; nothing reads a shared flag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::QueueError;
use super::types::Connectivity;
use crate::workers::WorkerHandle;

/// Cheap liveness check against the broker.
#[async_trait]
pub trait BrokerProbe: Send + Sync {
    async fn ping(&self) -> Result<(), QueueError>;
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub probe_interval: Duration,
    /// A probe slower than this counts as a failure.
    pub probe_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// Owns broker connectivity and publishes transitions.
#[derive(Debug)]
pub struct ConnectivitySupervisor {
    state: watch::Sender<Connectivity>,
}

impl Default for ConnectivitySupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivitySupervisor {
    /// Starts Down until the first successful probe.
    pub fn new() -> Self {
        let (state, _) = watch::channel(Connectivity::Down);
        Self { state }
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    /// Record an observation. Returns true when it changed the state.
    pub fn report(&self, observed: Connectivity) -> bool {
        self.state.send_if_modified(|current| {
            if *current == observed {
                return false;
            }
            *current = observed;
            true
        })
    }

    /// Probe the broker on an interval until shut down.
    pub fn spawn(self: Arc<Self>, probe: Arc<dyn BrokerProbe>, config: SupervisorConfig) -> WorkerHandle {
        WorkerHandle::spawn("connectivity-supervisor", move |shutdown| async move {
            let mut interval = tokio::time::interval(config.probe_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = interval.tick() => {
                        let result = match tokio::time::timeout(config.probe_timeout, probe.ping()).await {
                            Ok(result) => result,
                            Err(_) => Err(QueueError::Unavailable("probe timed out".to_string())),
                        };

                        match result {
                            Ok(()) => {
                                if self.report(Connectivity::Up) {
                                    info!("broker connected; new jobs go to the durable queue");
                                }
                            }
                            Err(err) => {
                                if self.report(Connectivity::Down) {
                                    warn!(error = %err, "broker unreachable; falling back to local queue");
                                } else {
                                    debug!(error = %err, "broker still unreachable");
                                }
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default)]
    struct ToggleProbe {
        up: AtomicBool,
    }

    #[async_trait]
    impl BrokerProbe for ToggleProbe {
        async fn ping(&self) -> Result<(), QueueError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(QueueError::Unavailable("connection refused".to_string()))
            }
        }
    }

    #[test]
    fn report_only_signals_real_transitions() {
        let supervisor = ConnectivitySupervisor::new();
        assert_eq!(supervisor.current(), Connectivity::Down);
        assert!(!supervisor.report(Connectivity::Down));
        assert!(supervisor.report(Connectivity::Up));
        assert!(!supervisor.report(Connectivity::Up));
        assert_eq!(supervisor.current(), Connectivity::Up);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_probe_transitions() {
        let supervisor = Arc::new(ConnectivitySupervisor::new());
        let probe = Arc::new(ToggleProbe::default());
        let mut rx = supervisor.subscribe();

        let handle = supervisor.clone().spawn(
            probe.clone(),
            SupervisorConfig {
                probe_interval: Duration::from_secs(1),
                probe_timeout: Duration::from_millis(500),
            },
        );

        probe.up.store(true, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Up);

        probe.up.store(false, Ordering::SeqCst);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Down);

        handle.shutdown().await;
    }
}
