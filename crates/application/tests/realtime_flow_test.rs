//! 注册表、事件总线与分发器的端到端流程

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use application::{
    ApplicationError, AuthError, ChatDirectory, CloseReason, ConnectionRegistry, ConnectionSink,
    DeliveryError, EventPublisher, InboundOutcome, LocalEventBus, MessageStore,
    RealtimeEventDispatcher, TokenVerifier,
};
use async_trait::async_trait;
use chrono::Utc;
use domain::{ChatEvent, ChatId, ChatMessage, EventEnvelope, MessageId, UserId};
use serde_json::{json, Value};
use uuid::Uuid;

struct UuidVerifier;

impl TokenVerifier for UuidVerifier {
    fn verify(&self, raw_token: &str) -> Result<UserId, AuthError> {
        raw_token
            .trim_start_matches("Bearer ")
            .parse()
            .map_err(|_| AuthError::InvalidToken("not a uuid".into()))
    }
}

struct Directory(HashMap<UserId, HashSet<ChatId>>);

#[async_trait]
impl ChatDirectory for Directory {
    async fn chats_for_user(&self, user_id: UserId) -> Result<HashSet<ChatId>, ApplicationError> {
        Ok(self.0.get(&user_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct Store {
    messages: Mutex<HashMap<MessageId, ChatMessage>>,
}

#[async_trait]
impl MessageStore for Store {
    async fn persist_and_return(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
        message_id: Option<MessageId>,
    ) -> Result<ChatMessage, ApplicationError> {
        let id = message_id.unwrap_or_else(MessageId::random);
        let mut messages = self.messages.lock().unwrap();
        let stored = messages
            .entry(id)
            .or_insert_with(|| ChatMessage::new(id, chat_id, sender_id, content, Utc::now()));
        Ok(stored.clone())
    }
}

#[derive(Default)]
struct Socket {
    frames: Mutex<Vec<Value>>,
}

impl Socket {
    fn types(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| f["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl ConnectionSink for Socket {
    fn is_open(&self) -> bool {
        true
    }

    async fn send(&self, frame: &str) -> Result<(), DeliveryError> {
        let value = serde_json::from_str(frame).map_err(|e| DeliveryError::Failed(e.to_string()))?;
        self.frames.lock().unwrap().push(value);
        Ok(())
    }

    async fn close(&self, _reason: CloseReason) {}
}

fn new_message(chat_id: ChatId, content: &str) -> String {
    json!({ "type": "NEW_MESSAGE", "payload": { "chatId": chat_id, "content": content } })
        .to_string()
}

#[tokio::test]
async fn two_users_two_chats_scenario() {
    let (user_a, user_b) = (UserId::from(Uuid::new_v4()), UserId::from(Uuid::new_v4()));
    let (c1, c2) = (ChatId::from(Uuid::new_v4()), ChatId::from(Uuid::new_v4()));
    let directory = Directory(HashMap::from([
        (user_a, HashSet::from([c1, c2])),
        (user_b, HashSet::from([c1])),
    ]));
    let registry = ConnectionRegistry::new(
        Arc::new(UuidVerifier),
        Arc::new(directory),
        Arc::new(Store::default()),
    );

    let a = Arc::new(Socket::default());
    let b = Arc::new(Socket::default());
    let reg_a = registry
        .register(Some(&format!("Bearer {}", user_a)), a.clone())
        .await
        .unwrap();
    registry
        .register(Some(&format!("Bearer {}", user_b)), b.clone())
        .await
        .unwrap();

    let outcome = registry
        .handle_inbound_message(reg_a.connection_id, &new_message(c1, "hello both"))
        .await;
    assert!(matches!(outcome, InboundOutcome::Broadcast(report) if report.delivered == 2));
    assert_eq!(a.types(), vec!["NEW_MESSAGE"]);
    assert_eq!(b.types(), vec!["NEW_MESSAGE"]);

    registry
        .handle_inbound_message(reg_a.connection_id, &new_message(c2, "only me"))
        .await;
    assert_eq!(a.types(), vec!["NEW_MESSAGE", "NEW_MESSAGE"]);
    assert_eq!(b.types(), vec!["NEW_MESSAGE"]);
}

#[tokio::test]
async fn bus_events_reach_connected_members() {
    let user = UserId::from(Uuid::new_v4());
    let chat = ChatId::from(Uuid::new_v4());
    let directory = Arc::new(Directory(HashMap::from([(user, HashSet::from([chat]))])));
    let registry = Arc::new(ConnectionRegistry::new(
        Arc::new(UuidVerifier),
        directory.clone(),
        Arc::new(Store::default()),
    ));
    let dispatcher = RealtimeEventDispatcher::new(registry.clone(), directory);

    let socket = Arc::new(Socket::default());
    registry
        .register(Some(&user.to_string()), socket.clone())
        .await
        .unwrap();

    let bus = LocalEventBus::new();
    let mut events = bus.subscribe();
    bus.publish(EventEnvelope::new(ChatEvent::MessageDeleted {
        chat_id: chat,
        message_id: MessageId::random(),
    }))
    .await
    .unwrap();

    let envelope = events.recv().await.unwrap();
    dispatcher.handle(&envelope.event).await.unwrap();

    assert_eq!(socket.types(), vec!["MESSAGE_DELETED"]);
}

#[tokio::test]
async fn redelivered_message_keeps_its_identity() {
    let user = UserId::from(Uuid::new_v4());
    let chat = ChatId::from(Uuid::new_v4());
    let registry = ConnectionRegistry::new(
        Arc::new(UuidVerifier),
        Arc::new(Directory(HashMap::from([(user, HashSet::from([chat]))]))),
        Arc::new(Store::default()),
    );
    let socket = Arc::new(Socket::default());
    let reg = registry
        .register(Some(&user.to_string()), socket.clone())
        .await
        .unwrap();

    let message_id = Uuid::new_v4();
    let raw = json!({
        "type": "NEW_MESSAGE",
        "payload": { "chatId": chat, "content": "once", "messageId": message_id }
    })
    .to_string();
    registry.handle_inbound_message(reg.connection_id, &raw).await;
    registry.handle_inbound_message(reg.connection_id, &raw).await;

    let frames = socket.frames.lock().unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["payload"], frames[1]["payload"]);
}
