//! 把总线上的聊天事件转换为实时帧并扇出到在线连接

use std::sync::Arc;

use domain::{
    ChatEvent, ChatParticipantsChangedPayload, MessageDeletedPayload, OutgoingWebSocketMessage,
    ProfilePictureUpdatedPayload,
};
use tracing::{debug, instrument};

use crate::error::ApplicationError;
use crate::registry::{ConnectionRegistry, DeliveryReport};
use crate::repository::ChatDirectory;

pub struct RealtimeEventDispatcher {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<dyn ChatDirectory>,
}

impl RealtimeEventDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, directory: Arc<dyn ChatDirectory>) -> Self {
        Self {
            registry,
            directory,
        }
    }

    /// 处理单个事件。新消息已由发送路径广播，这里忽略。
    ///
    /// 成员变更只通知客户端，不会修改注册表的成员索引。
    #[instrument(skip(self, event), fields(event_key = event.event_key()))]
    pub async fn handle(&self, event: &ChatEvent) -> Result<DeliveryReport, ApplicationError> {
        let report = match event {
            ChatEvent::NewMessage { .. } => DeliveryReport::default(),
            ChatEvent::MessageDeleted {
                chat_id,
                message_id,
            } => {
                let frame = OutgoingWebSocketMessage::MessageDeleted(MessageDeletedPayload {
                    chat_id: *chat_id,
                    message_id: *message_id,
                });
                self.registry.broadcast(*chat_id, &frame).await
            }
            ChatEvent::ProfilePictureUpdated { user_id, new_url } => {
                // 目录查询不持有注册表锁
                let chats = self.directory.chats_for_user(*user_id).await?;
                let frame =
                    OutgoingWebSocketMessage::ProfilePictureUpdated(ProfilePictureUpdatedPayload {
                        user_id: *user_id,
                        new_url: new_url.clone(),
                    });
                self.registry.broadcast_to_chats(&chats, &frame).await
            }
            ChatEvent::ChatParticipantsJoined { chat_id, .. }
            | ChatEvent::ChatParticipantLeft { chat_id, .. } => {
                let frame = OutgoingWebSocketMessage::ChatParticipantsChanged(
                    ChatParticipantsChangedPayload { chat_id: *chat_id },
                );
                self.registry.broadcast(*chat_id, &frame).await
            }
        };

        debug!(delivered = report.delivered, "realtime event dispatched");
        Ok(report)
    }
}
