use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fire-and-forget, at-least-once event publication to the messaging layer.
/// Callers never gate on the result; a publish failure is logged and the
/// operation that triggered it proceeds.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, user_id: Uuid, event_type: &str, context: serde_json::Value);
}

/// Default publisher: emits the event on the log stream only.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, user_id: Uuid, event_type: &str, context: serde_json::Value) {
        tracing::info!(%user_id, event_type, %context, "published user event");
    }
}

/// Publisher that records every event, for assertions in tests.
pub struct RecordingPublisher {
    pub events: Mutex<Vec<(Uuid, String, serde_json::Value)>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, user_id: Uuid, event_type: &str, context: serde_json::Value) {
        self.events
            .lock()
            .await
            .push((user_id, event_type.to_string(), context));
    }
}
