use async_trait::async_trait;

use super::{MessagePublisher, PublishError};

/// Publisher for running without a broker. Logs and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl MessagePublisher for LoggingPublisher {
    async fn publish(&self, destination: &str, payload: &str) -> Result<(), PublishError> {
        tracing::info!(destination = %destination, payload = %payload, "Published message");
        Ok(())
    }
}
