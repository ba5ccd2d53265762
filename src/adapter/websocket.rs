//! WebSocket channel adapter
//!
//! Manages many concurrent browser sessions. Each session registers a
//! `Connection` under its session id, which doubles as the chat id for
//! routing replies.

use super::{AdapterStatus, ChannelAdapter, Connection, DeliveryReport, StatusCell};
use crate::bus::InboundPublisher;
use crate::config::{BusConfig, UnknownChatPolicy};
use crate::error::{RelayError, Result};
use crate::types::{Channel, InboundMessage, Metadata, OutboundMessage, WireFrame};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Action value that carries a chat message; anything else is out-of-band
const CHAT_ACTION: &str = "chat";

/// WebSocket channel adapter
pub struct WebSocketAdapter {
    /// Taken from the bus on start
    unknown_chat: RwLock<UnknownChatPolicy>,
    status: StatusCell,
    publisher: RwLock<Option<InboundPublisher>>,

    /// Live connections (session_id → handle)
    connections: RwLock<HashMap<String, Arc<dyn Connection>>>,
}

impl WebSocketAdapter {
    /// Create a stopped adapter
    pub fn new() -> Self {
        Self {
            unknown_chat: RwLock::new(UnknownChatPolicy::default()),
            status: StatusCell::new(),
            publisher: RwLock::new(None),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Current lifecycle status
    pub fn status(&self) -> AdapterStatus {
        self.status.get()
    }

    /// Whether a session currently has a live connection
    pub async fn is_registered(&self, session_id: &str) -> bool {
        self.connections.read().await.contains_key(session_id)
    }

    /// Ids of all live sessions
    pub async fn sessions(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    fn parse_chat(session_id: &str, raw: &[u8]) -> Option<InboundMessage> {
        let data = match serde_json::from_slice::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => {
                tracing::debug!(session = %session_id, "Dropping non-object payload");
                return None;
            }
            Err(e) => {
                tracing::debug!(session = %session_id, error = %e, "Dropping unparseable payload");
                return None;
            }
        };

        let action = data
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or(CHAT_ACTION);
        if action != CHAT_ACTION {
            tracing::debug!(session = %session_id, action = %action, "Ignoring control payload");
            return None;
        }

        let content = data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let metadata: Metadata = data.into_iter().collect();

        Some(
            InboundMessage::new(Channel::WebSocket, session_id, session_id, content)
                .with_metadata(metadata),
        )
    }

    /// Write a frame to one connection, evicting it on failure
    async fn deliver(
        &self,
        session_id: &str,
        connection: &Arc<dyn Connection>,
        frame: &WireFrame,
    ) -> bool {
        match connection.send_frame(frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    session = %session_id,
                    error = %e,
                    "WebSocket send failed, dropping connection"
                );
                self.evict(session_id, connection).await;
                false
            }
        }
    }

    /// Remove a failed handle unless it was already replaced by a newer one
    async fn evict(&self, session_id: &str, connection: &Arc<dyn Connection>) {
        let mut connections = self.connections.write().await;
        if connections
            .get(session_id)
            .is_some_and(|current| same_connection(current, connection))
        {
            connections.remove(session_id);
        }
    }

    async fn fan_out(&self, frame: &WireFrame) -> DeliveryReport {
        let targets: Vec<(String, Arc<dyn Connection>)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, conn)| (id.clone(), conn.clone()))
            .collect();

        let results = join_all(
            targets
                .iter()
                .map(|(id, conn)| self.deliver(id, conn, frame)),
        )
        .await;

        let delivered = results.iter().filter(|ok| **ok).count();
        DeliveryReport {
            delivered,
            failed: results.len() - delivered,
            fallback: false,
        }
    }
}

impl Default for WebSocketAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn same_connection(a: &Arc<dyn Connection>, b: &Arc<dyn Connection>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

#[async_trait]
impl ChannelAdapter for WebSocketAdapter {
    fn channel(&self) -> Channel {
        Channel::WebSocket
    }

    async fn start(&self, publisher: InboundPublisher, config: &BusConfig) -> Result<()> {
        *self.unknown_chat.write().await = config.unknown_chat;
        *self.publisher.write().await = Some(publisher);
        self.status.set(AdapterStatus::Running);
        tracing::info!(unknown_chat = ?config.unknown_chat, "WebSocket adapter started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.status.set(AdapterStatus::Stopping);

        let dropped = {
            let mut connections = self.connections.write().await;
            let count = connections.len();
            connections.clear();
            count
        };
        *self.publisher.write().await = None;

        self.status.set(AdapterStatus::Stopped);
        tracing::info!(connections = dropped, "WebSocket adapter stopped");
        Ok(())
    }

    async fn register(&self, connection: Arc<dyn Connection>, session_id: &str) -> Result<()> {
        if !self.is_running() {
            return Err(RelayError::Connection {
                session: session_id.to_string(),
                reason: "WebSocket adapter not running".to_string(),
            });
        }

        connection.accept().await?;

        let replaced = {
            let mut connections = self.connections.write().await;
            // `stop` may have run while the handshake was pending
            if !self.is_running() {
                return Err(RelayError::Connection {
                    session: session_id.to_string(),
                    reason: "WebSocket adapter stopped during handshake".to_string(),
                });
            }
            connections
                .insert(session_id.to_string(), connection)
                .is_some()
        };

        tracing::info!(session = %session_id, replaced, "WebSocket connected");
        Ok(())
    }

    async fn unregister(&self, session_id: &str) {
        if self.connections.write().await.remove(session_id).is_some() {
            tracing::info!(session = %session_id, "WebSocket disconnected");
        }
    }

    async fn handle_incoming(&self, session_id: &str, raw: &[u8]) -> Result<()> {
        let Some(message) = Self::parse_chat(session_id, raw) else {
            return Ok(());
        };

        let publisher = self
            .publisher
            .read()
            .await
            .clone()
            .ok_or_else(|| RelayError::Routing("WebSocket adapter not started".to_string()))?;

        publisher.publish(message)
    }

    async fn send(&self, message: &OutboundMessage) -> DeliveryReport {
        let frame = WireFrame::from(message);
        let target = self.connections.read().await.get(&message.chat_id).cloned();

        if let Some(connection) = target {
            let ok = self.deliver(&message.chat_id, &connection, &frame).await;
            return DeliveryReport {
                delivered: usize::from(ok),
                failed: usize::from(!ok),
                fallback: false,
            };
        }

        let unknown_chat = *self.unknown_chat.read().await;
        match unknown_chat {
            UnknownChatPolicy::Broadcast => {
                tracing::debug!(chat_id = %message.chat_id, "No connection for chat, broadcasting");
                DeliveryReport {
                    fallback: true,
                    ..self.fan_out(&frame).await
                }
            }
            UnknownChatPolicy::Drop => {
                tracing::warn!(chat_id = %message.chat_id, "No connection for chat, message dropped");
                DeliveryReport {
                    fallback: true,
                    ..Default::default()
                }
            }
        }
    }

    async fn broadcast(&self, content: &str, kind: &str) -> DeliveryReport {
        self.fan_out(&WireFrame::notice(kind, content)).await
    }

    async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    fn is_running(&self) -> bool {
        self.status.get() == AdapterStatus::Running
    }
}
