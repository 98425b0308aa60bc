//! Broadcast fan-out for pipeline events.

use tokio::sync::broadcast;

use crate::types::EventEnvelope;

const CHANNEL_CAPACITY: usize = 1000;

/// Fan-out point between the pipeline and its observers (the SSE
/// route). Clones share one channel. A subscriber that falls more than
/// the channel capacity behind loses the oldest events instead of
/// backpressuring the pipeline.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Deliver an envelope to every current subscriber. Returns how
    /// many received it; with no subscribers the event is dropped.
    pub fn publish(&self, envelope: EventEnvelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// New subscription. Only events published from this point on are
    /// delivered to it.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;
    use uuid::Uuid;

    fn sample_event() -> Event {
        Event::StageStarted {
            session_id: Uuid::new_v4(),
            stage: "documenter".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let envelope = EventEnvelope::new(sample_event());
        let sent = bus.publish(envelope.clone());
        assert_eq!(sent, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, envelope.id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let envelope = EventEnvelope::new(sample_event());
        let envelope_id = envelope.id;

        let sent = bus.publish(envelope);
        assert_eq!(sent, 2);

        assert_eq!(rx1.recv().await.unwrap().id, envelope_id);
        assert_eq!(rx2.recv().await.unwrap().id, envelope_id);
    }

    #[tokio::test]
    async fn test_no_subscribers_drops_the_event() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(EventEnvelope::new(sample_event())), 0);
    }

    #[tokio::test]
    async fn test_clones_share_one_channel() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let mut rx = bus.subscribe();

        clone.publish(EventEnvelope::new(sample_event()));
        assert!(rx.recv().await.is_ok());
    }
}
