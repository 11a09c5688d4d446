use tokio::sync::broadcast;

use crate::domain::order::OrderEvent;

/// In-process fan-out of committed domain events.
///
/// Best-effort only: events sent with no subscribers are dropped and slow
/// subscribers may lag. Durable delivery goes through the outbox.
#[derive(Clone)]
pub struct EventNotifier {
    sender: broadcast::Sender<OrderEvent>,
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrderEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: OrderEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                tracing::trace!(event_type = event.event_type(), "No in-process subscribers");
                0
            }
        }
    }
}
