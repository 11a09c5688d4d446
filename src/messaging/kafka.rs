use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};

use super::{MessagePublisher, PublishError};
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};

/// Kafka-compatible broker publisher. `publish` resolves once the broker has
/// acknowledged the record, or fails once `delivery_timeout` has passed.
///
/// The deadline is enforced inside the circuit breaker so that a broker that
/// never answers still counts toward opening it. Keep `delivery_timeout`
/// below any timeout the caller puts around `publish`.
pub struct KafkaPublisher {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    delivery_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl KafkaPublisher {
    pub fn new(brokers: &str, delivery_timeout: Duration) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", delivery_timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()
            .map_err(|e| PublishError::Transport(format!("Failed to create producer: {e}")))?;

        tracing::info!(brokers = %brokers, "Kafka producer created");

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new("kafka", CircuitBreakerConfig::default()),
            delivery_timeout,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state().await
    }
}

#[async_trait]
impl MessagePublisher for KafkaPublisher {
    async fn publish(&self, destination: &str, payload: &str) -> Result<(), PublishError> {
        let result = self
            .circuit_breaker
            .call_with_timeout(self.delivery_timeout, async {
                let record = FutureRecord::<(), str>::to(destination).payload(payload);
                self.producer
                    .send(record, Timeout::After(self.delivery_timeout))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| e)
            })
            .await;

        if let Some(metrics) = &self.metrics {
            metrics.update_circuit_breaker_state(self.circuit_breaker.state().await);
        }

        match result {
            Ok(()) => {
                tracing::debug!(topic = %destination, "Broker acknowledged message");
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(topic = %destination, "Circuit breaker open - broker unavailable");
                Err(PublishError::CircuitOpen("kafka".to_string()))
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(error = %e, topic = %destination, "Failed to publish to broker");
                Err(PublishError::Transport(e.to_string()))
            }
            Err(CircuitBreakerError::TimedOut(limit)) => {
                tracing::error!(topic = %destination, ?limit, "Broker did not acknowledge in time");
                Err(PublishError::Timeout(limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_broker_opens_circuit() {
        // nothing listens on port 1, so every delivery times out
        let publisher = KafkaPublisher::new("127.0.0.1:1", Duration::from_millis(100)).unwrap();

        for _ in 0..CircuitBreakerConfig::default().failure_threshold {
            assert!(publisher.publish("orders-test", "{}").await.is_err());
        }

        assert_eq!(publisher.circuit_state().await, CircuitState::Open);
        assert!(matches!(
            publisher.publish("orders-test", "{}").await,
            Err(PublishError::CircuitOpen(_))
        ));
    }
}
