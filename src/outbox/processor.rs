use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::OutboxMessage;
use crate::messaging::{MessagePublisher, PublishError, TopicMapper};
use crate::metrics::Metrics;
use crate::store::{OutboxRepository, StoreError};

// ============================================================================
// Outbox Processor - relays committed outbox rows to the broker
// ============================================================================
//
// Per run:  IDLE -> CLAIMING -> PUBLISHING(0..N) -> IDLE
//
// Every claimed message ends the run PROCESSED (publish acknowledged) or
// FAILED (any publish error, including timeout). One message failing never
// stops the rest of the batch. Delivery is at-least-once: a crash between
// publish and mark leaves the row PENDING and it is published again.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub publish_timeout: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// What one run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub processed: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("Outbox store error: {0}")]
    Store(#[from] StoreError),
}

/// Clears the in-flight flag when the run ends, including by panic.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OutboxProcessor<S> {
    store: Arc<S>,
    publisher: Arc<dyn MessagePublisher>,
    topics: Arc<TopicMapper>,
    config: OutboxProcessorConfig,
    metrics: Option<Arc<Metrics>>,
    in_flight: AtomicBool,
}

impl<S: OutboxRepository + 'static> OutboxProcessor<S> {
    pub fn new(
        store: Arc<S>,
        publisher: Arc<dyn MessagePublisher>,
        topics: Arc<TopicMapper>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            topics,
            config,
            metrics: None,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Claim one batch and drive every message in it to a terminal state.
    ///
    /// Returns an empty report without touching the store if another run is
    /// still in flight. Fails only if the store itself fails; the message
    /// being handled then stays PENDING for the next run.
    pub async fn run_once(&self) -> Result<BatchReport, ProcessorError> {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            tracing::debug!("Previous outbox run still in flight, skipping");
            return Ok(BatchReport::default());
        };

        let batch = self.store.claim_pending(self.config.batch_size).await?;
        let mut report = BatchReport {
            claimed: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        tracing::debug!(claimed = batch.len(), "Claimed outbox batch");
        if let Some(metrics) = &self.metrics {
            metrics.record_batch();
        }

        for message in &batch {
            if self.deliver(message).await? {
                report.processed += 1;
            } else {
                report.failed += 1;
            }
        }

        self.refresh_stats().await;

        tracing::info!(
            claimed = report.claimed,
            processed = report.processed,
            failed = report.failed,
            "Outbox batch finished"
        );
        Ok(report)
    }

    /// Publish one message and record the outcome. `Ok(true)` if it was
    /// delivered, `Ok(false)` if it was marked FAILED.
    async fn deliver(&self, message: &OutboxMessage) -> Result<bool, ProcessorError> {
        let destination = self
            .topics
            .topic_for(&message.aggregate_type, &message.event_type);

        let started = Instant::now();
        let outcome = match tokio::time::timeout(
            self.config.publish_timeout,
            self.publisher.publish(&destination, &message.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::Timeout(self.config.publish_timeout)),
        };
        let elapsed = started.elapsed().as_secs_f64();

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(&message.event_type, elapsed, outcome.is_ok());
        }

        match outcome {
            Ok(()) => {
                if self.store.mark_processed(message.id).await? {
                    tracing::debug!(
                        message_id = %message.id,
                        event_type = %message.event_type,
                        destination = %destination,
                        "Outbox message processed"
                    );
                } else {
                    tracing::warn!(
                        message_id = %message.id,
                        event_type = %message.event_type,
                        "Message was already terminal when marking processed; delivered more than once"
                    );
                }
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    message_id = %message.id,
                    event_type = %message.event_type,
                    destination = %destination,
                    error = %e,
                    "Publish failed, marking outbox message FAILED"
                );
                self.store.mark_failed(message.id).await?;
                Ok(false)
            }
        }
    }

    async fn refresh_stats(&self) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        match self.store.stats().await {
            Ok(stats) => metrics.update_outbox_stats(&stats),
            Err(e) => tracing::warn!(error = %e, "Failed to read outbox stats"),
        }
    }

    /// Poll until `shutdown` flips to true or its sender is dropped.
    ///
    /// A failing or panicking run is logged and the next tick proceeds.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Outbox processor started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match AssertUnwindSafe(self.run_once()).catch_unwind().await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "Outbox run ended early, retrying next tick");
                        }
                        Err(panic) => {
                            tracing::error!(panic = %panic_message(&*panic), "Outbox run panicked, retrying next tick");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Outbox processor stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ============================================================================
// Unit Tests
// ============================================================================
