use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use application::{CloseReason, ConnectionSink, DeliveryError};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message as WsMessage, Utf8Bytes, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::state::AppState;

/// WebSocket 写操作命令
///
/// 所有对 WebSocket sender 的写操作都经由发送任务串行执行
#[derive(Debug)]
enum WsCommand {
    SendText(String),
    SendPong(Bytes),
    Close(CloseReason),
}

/// 注册表看到的连接出站端：有界队列 + 写入超时
pub struct ChannelSink {
    commands: mpsc::Sender<WsCommand>,
    open: AtomicBool,
    send_timeout: Duration,
}

impl ChannelSink {
    fn new(commands: mpsc::Sender<WsCommand>, send_timeout: Duration) -> Self {
        Self {
            commands,
            open: AtomicBool::new(true),
            send_timeout,
        }
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionSink for ChannelSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.commands.is_closed()
    }

    async fn send(&self, frame: &str) -> Result<(), DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::Closed);
        }
        self.commands
            .send_timeout(WsCommand::SendText(frame.to_string()), self.send_timeout)
            .await
            .map_err(|err| match err {
                SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
                SendTimeoutError::Closed(_) => DeliveryError::Closed,
            })
    }

    async fn close(&self, reason: CloseReason) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self
                .commands
                .send_timeout(WsCommand::Close(reason), self.send_timeout)
                .await;
        }
    }
}

/// 运行单个 WebSocket 连接直到断开
///
/// 升级总会完成，认证在打开的连接上进行：失败时以关闭帧结束连接。
pub async fn serve_connection(socket: WebSocket, state: AppState, auth_header: Option<String>) {
    let (mut sender, mut incoming) = socket.split();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(state.websocket.outbound_buffer);
    let sink = Arc::new(ChannelSink::new(cmd_tx.clone(), state.websocket.send_timeout()));

    // 发送任务：统一处理所有对 WebSocket sender 的写操作
    let mut send_task = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                WsCommand::SendText(text) => {
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        tracing::warn!("Failed to send text message");
                        break;
                    }
                }
                WsCommand::SendPong(data) => {
                    if sender.send(WsMessage::Pong(data)).await.is_err() {
                        tracing::warn!("Failed to send pong message");
                        break;
                    }
                }
                WsCommand::Close(reason) => {
                    let frame = CloseFrame {
                        code: reason.code(),
                        reason: Utf8Bytes::from_static(reason.reason()),
                    };
                    let _ = sender.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            }
        }
        tracing::debug!("websocket send task finished");
    });

    let registration = match state
        .registry
        .register(auth_header.as_deref(), sink.clone())
        .await
    {
        Ok(registration) => registration,
        Err(_) => {
            // 注册表已排入关闭帧，等待发送任务写出
            drop(cmd_tx);
            drop(sink);
            let _ = send_task.await;
            return;
        }
    };
    let connection_id = registration.connection_id;

    // 接收循环：处理来自客户端的帧
    let registry = state.registry.clone();
    let recv_loop = async {
        while let Some(Ok(message)) = incoming.next().await {
            match message {
                WsMessage::Text(text) => {
                    registry
                        .handle_inbound_message(connection_id, text.as_str())
                        .await;
                }
                WsMessage::Ping(data) => {
                    if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                        break;
                    }
                }
                WsMessage::Pong(_) => {}
                WsMessage::Binary(_) => {
                    tracing::debug!(connection_id = %connection_id, "ignoring binary frame");
                }
                WsMessage::Close(_) => {
                    tracing::debug!(connection_id = %connection_id, "client closed connection");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => {}
        _ = recv_loop => {}
    }

    sink.mark_closed();
    state.registry.deregister(connection_id).await;
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_times_out_when_queue_is_full() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx, Duration::from_millis(20));

        sink.send("first").await.unwrap();
        assert_eq!(sink.send("second").await, Err(DeliveryError::Timeout));
    }

    #[tokio::test]
    async fn close_enqueues_a_single_close_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx, Duration::from_millis(20));

        sink.close(CloseReason::AuthenticationFailed).await;
        sink.close(CloseReason::GoingAway).await;

        assert!(!sink.is_open());
        assert!(matches!(
            rx.recv().await,
            Some(WsCommand::Close(CloseReason::AuthenticationFailed))
        ));
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.send("late").await, Err(DeliveryError::Closed));
    }

    #[tokio::test]
    async fn dropped_receiver_reports_closed() {
        let (tx, rx) = mpsc::channel(1);
        let sink = ChannelSink::new(tx, Duration::from_millis(20));
        drop(rx);

        assert!(!sink.is_open());
        assert_eq!(sink.send("frame").await, Err(DeliveryError::Closed));
    }
}
