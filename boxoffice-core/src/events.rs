use async_trait::async_trait;
use boxoffice_shared::EngineEvent;
use tokio::sync::Mutex;

/// Outbound notification of engine state changes. Publishing never fails the
/// operation that produced the event.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EngineEvent);
}

/// Keeps every published event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().await.clone()
    }

    pub async fn names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(EngineEvent::name).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: EngineEvent) {
        self.events.lock().await.push(event);
    }
}
