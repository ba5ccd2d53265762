//! Canonical message envelopes shared by adapters, the bus, and the runtime
//!
//! Envelopes serialize with snake_case keys so the outbound wire shape matches
//! what browser clients already parse.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Open key-value metadata attached to envelopes
pub type Metadata = HashMap<String, serde_json::Value>;

/// Transport identity, used as the routing key between bus and adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    WebSocket,
    Cli,
    Telegram,
    Discord,
    Slack,
    WhatsApp,
    /// Internal notices produced by the runtime itself
    System,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::WebSocket => "websocket",
            Channel::Cli => "cli",
            Channel::Telegram => "telegram",
            Channel::Discord => "discord",
            Channel::Slack => "slack",
            Channel::WhatsApp => "whatsapp",
            Channel::System => "system",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message received from a channel, normalized for the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Unique message identifier (msg-<uuid>)
    pub id: String,

    /// Channel the message arrived on
    pub channel: Channel,

    /// Originating principal
    pub sender_id: String,

    /// Conversation key that replies are routed by
    pub chat_id: String,

    /// Message text
    pub content: String,

    /// Transport-supplied extras (the raw payload for websocket clients)
    #[serde(default)]
    pub metadata: Metadata,

    /// Unix timestamp in milliseconds
    pub timestamp: i64,
}

impl InboundMessage {
    /// Create a new inbound message with generated id and timestamp
    pub fn new(
        channel: Channel,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            channel,
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Replace the metadata map
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Start a reply addressed to the same channel and chat
    pub fn reply(&self, content: impl Into<String>) -> OutboundMessage {
        OutboundMessage::new(self.channel, &self.chat_id, content)
    }
}

/// A message (or one chunk of a streamed message) headed back to a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel whose adapter owns the target chat
    pub channel: Channel,

    /// Target chat
    pub chat_id: String,

    /// Message text, or the chunk text when streaming
    pub content: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Part of a token stream rather than a complete message
    #[serde(default)]
    pub is_stream_chunk: bool,

    /// Terminates the stream for this chat
    #[serde(default)]
    pub is_stream_end: bool,
}

impl OutboundMessage {
    /// Create a complete (non-streamed) message
    pub fn new(channel: Channel, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            channel,
            chat_id: chat_id.into(),
            content: content.into(),
            metadata: Metadata::new(),
            is_stream_chunk: false,
            is_stream_end: false,
        }
    }

    /// Create a stream chunk
    pub fn chunk(channel: Channel, chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            is_stream_chunk: true,
            ..Self::new(channel, chat_id, content)
        }
    }

    /// Mark this message as the end of its stream
    pub fn end_stream(mut self) -> Self {
        self.is_stream_chunk = true;
        self.is_stream_end = true;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Transport-facing frame written to client connections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    /// "stream", "message", or a broadcast kind such as "notification"
    #[serde(rename = "type")]
    pub kind: String,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_stream_end: Option<bool>,
}

impl WireFrame {
    /// Frame for a broadcast notice
    pub fn notice(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            content: content.into(),
            metadata: None,
            is_stream_end: None,
        }
    }
}

impl From<&OutboundMessage> for WireFrame {
    fn from(message: &OutboundMessage) -> Self {
        let kind = if message.is_stream_chunk { "stream" } else { "message" };
        Self {
            kind: kind.to_string(),
            content: message.content.clone(),
            metadata: Some(message.metadata.clone()),
            is_stream_end: Some(message.is_stream_end),
        }
    }
}
