use async_trait::async_trait;
use boxoffice_core::events::EventPublisher;
use boxoffice_shared::EngineEvent;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Fans engine events out to in-process subscribers (SSE streams, metrics).
#[derive(Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<EngineEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn sender(&self) -> broadcast::Sender<EngineEvent> {
        self.tx.clone()
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: EngineEvent) {
        let name = event.name();
        match serde_json::to_string(&event) {
            Ok(payload) => info!(event = name, %payload, "event published"),
            Err(e) => debug!(event = name, error = %e, "event not serializable for logging"),
        }
        // No subscribers is normal outside of open SSE streams.
        if self.tx.send(event).is_err() {
            debug!(event = name, "no subscribers for event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_shared::models::events::TicketScannedEvent;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = BroadcastPublisher::new(16);
        let mut rx = bus.subscribe();

        let event = EngineEvent::TicketScanned(TicketScannedEvent {
            ticket_id: Uuid::new_v4(),
            ticket_number: "BX-0000000001".into(),
            showtime_id: Uuid::new_v4(),
            timestamp: 0,
        });
        bus.publish(event.clone()).await;

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_silent() {
        let bus = BroadcastPublisher::new(4);
        bus.publish(EngineEvent::TicketScanned(TicketScannedEvent {
            ticket_id: Uuid::new_v4(),
            ticket_number: "BX-0000000002".into(),
            showtime_id: Uuid::new_v4(),
            timestamp: 0,
        }))
        .await;
    }
}
