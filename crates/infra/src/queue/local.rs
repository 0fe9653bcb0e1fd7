//! In-process fallback queue.
//!
//! Timers live only in this process: envelopes queued here are lost on restart,
//! and a failed handler is not retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::outcome::{JobOutcome, OutcomeSender};
use super::types::{QueueEnvelope, Strategy};
use super::{JobHandler, JobQueue, QueueError};
use crate::workers::WorkerHandle;

/// Receiving end of the local queue: envelopes whose timer has elapsed.
#[derive(Debug)]
pub struct LocalFirings {
    rx: mpsc::UnboundedReceiver<QueueEnvelope>,
}

impl LocalFirings {
    pub async fn recv(&mut self) -> Option<QueueEnvelope> {
        self.rx.recv().await
    }
}

/// Timer-based queue. `delay == 0` fires on the next scheduler tick.
#[derive(Debug, Clone)]
pub struct LocalQueue {
    fired: mpsc::UnboundedSender<QueueEnvelope>,
    armed: Arc<AtomicUsize>,
}

impl LocalQueue {
    pub fn new() -> (Self, LocalFirings) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                fired: tx,
                armed: Arc::new(AtomicUsize::new(0)),
            },
            LocalFirings { rx },
        )
    }

    /// Timers armed but not yet fired.
    pub fn armed(&self) -> usize {
        self.armed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for LocalQueue {
    async fn enqueue(&self, envelope: QueueEnvelope) -> Result<(), QueueError> {
        if self.fired.is_closed() {
            return Err(QueueError::Closed);
        }

        debug!(
            job_id = %envelope.job_id,
            kind = envelope.kind.as_str(),
            delay_ms = envelope.delay.as_millis() as u64,
            "local queue: scheduling job"
        );

        let fired = self.fired.clone();
        let armed = self.armed.clone();
        armed.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            if envelope.delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(envelope.delay).await;
            }
            armed.fetch_sub(1, Ordering::SeqCst);
            // Receiver gone means the process is shutting down.
            let _ = fired.send(envelope);
        });

        Ok(())
    }
}

/// Runs fired local envelopes through the handler, one task per envelope.
#[derive(Debug)]
pub struct LocalConsumer;

impl LocalConsumer {
    pub fn spawn(
        mut firings: LocalFirings,
        handler: Arc<dyn JobHandler>,
        outcomes: OutcomeSender,
    ) -> WorkerHandle {
        WorkerHandle::spawn("local-consumer", move |shutdown| async move {
            info!("local queue consumer started");
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    fired = firings.recv() => {
                        let Some(envelope) = fired else { break };
                        let handler = handler.clone();
                        let outcomes = outcomes.clone();
                        tokio::spawn(async move {
                            let outcome = match handler.handle(&envelope).await {
                                Ok(result) => JobOutcome::Completed {
                                    envelope,
                                    strategy: Strategy::Local,
                                    result,
                                },
                                Err(err) => JobOutcome::Failed {
                                    envelope,
                                    strategy: Strategy::Local,
                                    error: err.to_string(),
                                    attempt: 1,
                                    will_retry: false,
                                },
                            };
                            let _ = outcomes.send(outcome);
                        });
                    }
                }
            }
            info!("local queue consumer stopped");
        })
    }
}
