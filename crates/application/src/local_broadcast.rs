// 简单的本地事件总线实现
use crate::broadcaster::{BroadcastError, EventPublisher};
use async_trait::async_trait;
use domain::EventEnvelope;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct LocalEventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl LocalEventBus {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.sender.subscribe())
    }
}

impl Default for LocalEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for LocalEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<(), BroadcastError> {
        let key = event.event.event_key();
        // 没有订阅者时 send 会失败，此时事件没有消费者，直接丢弃
        if self.sender.send(event).is_err() {
            tracing::debug!(event_key = key, "no subscribers for event");
        }
        Ok(())
    }
}

// 事件流，落后过多时跳过丢失的事件继续消费
pub struct EventStream {
    receiver: broadcast::Receiver<EventEnvelope>,
}

impl EventStream {
    pub fn new(receiver: broadcast::Receiver<EventEnvelope>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event stream lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ChatEvent, ChatId, MessageId};
    use uuid::Uuid;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = LocalEventBus::new();
        let mut stream = bus.subscribe();

        let event = ChatEvent::MessageDeleted {
            chat_id: ChatId::from(Uuid::new_v4()),
            message_id: MessageId::random(),
        };
        bus.publish(EventEnvelope::new(event.clone())).await.unwrap();

        let received = stream.recv().await.expect("event");
        assert_eq!(received.event, event);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = LocalEventBus::new();
        let event = ChatEvent::ChatParticipantLeft {
            chat_id: ChatId::from(Uuid::new_v4()),
            user_id: Uuid::new_v4().into(),
        };
        assert!(bus.publish(EventEnvelope::new(event)).await.is_ok());
    }
}
