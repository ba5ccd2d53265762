//! # a3s-relay
//!
//! Channel bus and permission-gated tools for the A3S agent runtime.
//!
//! ## Overview
//!
//! `a3s-relay` moves messages between chat transports (WebSocket, chat
//! platforms, CLI) and the agent runtime, and controls which tools the agent
//! may call on behalf of a conversation.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_relay::{ChannelBus, ChannelConnection, Channel, OutboundMessage, WebSocketAdapter};
//! use a3s_relay::adapter::ChannelAdapter;
//! use std::sync::Arc;
//!
//! # async fn example() -> a3s_relay::Result<()> {
//! let bus = ChannelBus::default();
//! let ws = Arc::new(WebSocketAdapter::default());
//! bus.register_adapter(ws.clone()).await?;
//! bus.start().await?;
//!
//! // A socket task owns `frames` and writes each one to the peer
//! let (conn, mut frames) = ChannelConnection::new("chat-1", 64);
//! ws.register(Arc::new(conn), "chat-1").await?;
//!
//! let mut inbound = bus.subscribe();
//! ws.handle_incoming("chat-1", br#"{"action":"chat","message":"hi"}"#).await?;
//! let message = inbound.next().await.expect("inbound message");
//!
//! bus.route(message.reply("hello")).await?;
//! let _frame = frames.recv().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **ChannelAdapter** trait: one per transport, owns its connections
//! - **ChannelBus**: adapter routing table, inbound fan-out, per-chat ordering
//! - **StreamWriter**: exclusive, ordered streamed reply to one chat
//! - **ToolRegistry** / **ToolPolicy** / **ToolGate**: tool lookup,
//!   profile-based permissions, and checked invocation

pub mod adapter;
pub mod bus;
pub mod config;
pub mod error;
pub mod tools;
pub mod types;

// Re-export core types
pub use adapter::{
    AdapterStatus, ChannelAdapter, ChannelConnection, Connection, DeliveryReport,
    WebSocketAdapter,
};
pub use bus::{ChannelBus, InboundPublisher, InboundSubscription, StreamWriter};
pub use config::{
    BusConfig, PolicyConfig, ProfileSpec, RelayConfig, ToolsConfig, UnknownChatPolicy,
};
pub use error::{RelayError, Result};
pub use tools::{
    CallerContext, Tool, ToolDefinition, ToolGate, ToolOutput, ToolPolicy, ToolRegistry,
};
pub use types::{Channel, InboundMessage, Metadata, OutboundMessage, WireFrame};
