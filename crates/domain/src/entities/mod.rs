//! 领域实体定义

pub mod message;
pub mod notification;
pub mod websocket;

pub use message::ChatMessage;
pub use notification::{
    DeviceToken, Platform, PushMessage, PushNotification, PushOutcome, PushSendResult,
};
pub use websocket::{
    ChatParticipantsChangedPayload, ErrorPayload, IncomingWebSocketMessage, MessageDeletedPayload,
    OutgoingWebSocketMessage, ProfilePictureUpdatedPayload, SendMessagePayload, INVALID_JSON,
};
