// ============================================================================
// Messaging - delivery of outbox messages to external consumers
// ============================================================================
//
// The processor only knows the MessagePublisher port. A publish returns Ok
// only once the transport has accepted the message; anything else is a
// failure and the message will be marked FAILED.
//
// ============================================================================

mod kafka;
mod logging;
mod topics;

use async_trait::async_trait;

pub use kafka::KafkaPublisher;
pub use logging::LoggingPublisher;
pub use topics::TopicMapper;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),

    #[error("Publish timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Message rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Deliver `payload` to `destination`, returning once it is accepted.
    async fn publish(&self, destination: &str, payload: &str) -> Result<(), PublishError>;
}
