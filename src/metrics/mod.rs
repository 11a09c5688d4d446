// Private module declaration
mod server;

use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::store::OutboxStats;
use crate::utils::CircuitState;

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Covers:
// - Outbox delivery (throughput, failures, publish latency)
// - Outbox backlog as seen by the store
// - Order lifecycle counters
// - Circuit breaker state of the broker transport
//
// Scraped via /metrics
// ============================================================================

pub struct Metrics {
    registry: Registry,

    // Outbox Delivery
    pub outbox_published: IntCounterVec,
    pub outbox_failed: IntCounterVec,
    pub outbox_publish_duration: HistogramVec,
    pub outbox_batches: IntCounter,

    // Outbox Backlog
    pub outbox_pending: IntGauge,
    pub outbox_processed_rows: IntGauge,
    pub outbox_failed_rows: IntGauge,

    // Orders
    pub orders_created: IntCounter,
    pub orders_confirmed: IntCounter,

    // Circuit Breaker
    pub circuit_breaker_state: IntGauge,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let outbox_published = IntCounterVec::new(
            Opts::new(
                "outbox_messages_published_total",
                "Outbox messages delivered to the broker",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_published.clone()))?;

        let outbox_failed = IntCounterVec::new(
            Opts::new(
                "outbox_messages_failed_total",
                "Outbox messages marked FAILED",
            ),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_failed.clone()))?;

        let outbox_publish_duration = HistogramVec::new(
            HistogramOpts::new(
                "outbox_publish_duration_seconds",
                "Time spent publishing one outbox message",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event_type"],
        )?;
        registry.register(Box::new(outbox_publish_duration.clone()))?;

        let outbox_batches = IntCounter::new("outbox_batches_total", "Processor runs that claimed work")?;
        registry.register(Box::new(outbox_batches.clone()))?;

        let outbox_pending = IntGauge::new("outbox_pending_messages", "Outbox rows in PENDING")?;
        registry.register(Box::new(outbox_pending.clone()))?;

        let outbox_processed_rows =
            IntGauge::new("outbox_processed_messages", "Outbox rows in PROCESSED")?;
        registry.register(Box::new(outbox_processed_rows.clone()))?;

        let outbox_failed_rows = IntGauge::new("outbox_failed_messages", "Outbox rows in FAILED")?;
        registry.register(Box::new(outbox_failed_rows.clone()))?;

        let orders_created = IntCounter::new("orders_created_total", "Orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let orders_confirmed = IntCounter::new("orders_confirmed_total", "Orders confirmed")?;
        registry.register(Box::new(orders_confirmed.clone()))?;

        let circuit_breaker_state = IntGauge::new(
            "circuit_breaker_state",
            "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry,
            outbox_published,
            outbox_failed,
            outbox_publish_duration,
            outbox_batches,
            outbox_pending,
            outbox_processed_rows,
            outbox_failed_rows,
            orders_created,
            orders_confirmed,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record the outcome of one publish attempt
    pub fn record_publish(&self, event_type: &str, duration_secs: f64, success: bool) {
        if success {
            self.outbox_published.with_label_values(&[event_type]).inc();
        } else {
            self.outbox_failed.with_label_values(&[event_type]).inc();
        }
        self.outbox_publish_duration
            .with_label_values(&[event_type])
            .observe(duration_secs);
    }

    pub fn record_batch(&self) {
        self.outbox_batches.inc();
    }

    pub fn update_outbox_stats(&self, stats: &OutboxStats) {
        self.outbox_pending.set(stats.pending as i64);
        self.outbox_processed_rows.set(stats.processed as i64);
        self.outbox_failed_rows.set(stats.failed as i64);
    }

    pub fn update_circuit_breaker_state(&self, state: CircuitState) {
        self.circuit_breaker_state.set(state.gauge_value());
    }
}
