use std::sync::Arc;

use domain::ChatEvent;
use tracing::warn;

use crate::push::service::PushNotificationService;

/// 把聊天事件转换为推送通知，目前只处理新消息
pub struct NotificationEventListener {
    service: Arc<PushNotificationService>,
}

impl NotificationEventListener {
    pub fn new(service: Arc<PushNotificationService>) -> Self {
        Self { service }
    }

    pub async fn handle(&self, event: &ChatEvent) {
        match event {
            ChatEvent::NewMessage {
                sender_id,
                sender_username,
                recipient_ids,
                chat_id,
                message,
            } => {
                if let Err(err) = self
                    .service
                    .send_new_message_notifications(
                        recipient_ids,
                        *sender_id,
                        sender_username,
                        message,
                        *chat_id,
                    )
                    .await
                {
                    warn!(chat_id = %chat_id, error = %err, "failed to send new message notifications");
                }
            }
            ChatEvent::MessageDeleted { .. }
            | ChatEvent::ProfilePictureUpdated { .. }
            | ChatEvent::ChatParticipantsJoined { .. }
            | ChatEvent::ChatParticipantLeft { .. } => {}
        }
    }
}
