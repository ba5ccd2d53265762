//! Channel adapter trait: the core abstraction for transports
//!
//! Every transport (WebSocket, chat platforms, CLI, etc.) implements
//! `ChannelAdapter`. An adapter owns its session → connection map, turns
//! transport payloads into `InboundMessage`s, and writes `OutboundMessage`s
//! back to the right connection. The bus only ever sees adapters through
//! this trait.

use crate::bus::InboundPublisher;
use crate::config::BusConfig;
use crate::error::{RelayError, Result};
use crate::types::{Channel, OutboundMessage, WireFrame};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod websocket;

pub use websocket::WebSocketAdapter;

/// A live, bidirectional transport handle for one session
///
/// Implementations wrap the transport's writer; reading is driven by the
/// transport task, which feeds payloads to `ChannelAdapter::handle_incoming`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Complete the transport handshake
    async fn accept(&self) -> Result<()> {
        Ok(())
    }

    /// Write one frame to the peer
    async fn send_frame(&self, frame: &WireFrame) -> Result<()>;
}

/// Core trait for channel adapters
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Channel this adapter serves
    fn channel(&self) -> Channel;

    /// Attach the bus publisher and begin accepting sessions
    ///
    /// Delivery settings such as the unknown-chat policy come from `config`.
    async fn start(&self, publisher: InboundPublisher, config: &BusConfig) -> Result<()>;

    /// Drop every connection and detach from the bus
    async fn stop(&self) -> Result<()>;

    /// Accept a connection and store it under `session_id`
    ///
    /// Re-registering a session replaces the previous handle without
    /// closing it.
    async fn register(&self, connection: Arc<dyn Connection>, session_id: &str) -> Result<()>;

    /// Forget a session; unknown ids are ignored
    async fn unregister(&self, session_id: &str);

    /// Parse a transport payload and publish it if it is a chat message
    async fn handle_incoming(&self, session_id: &str, raw: &[u8]) -> Result<()>;

    /// Deliver a message to its chat, applying the unknown-chat policy
    ///
    /// Per-connection failures are logged and never returned.
    async fn send(&self, message: &OutboundMessage) -> DeliveryReport;

    /// Best-effort notice to every live connection
    async fn broadcast(&self, content: &str, kind: &str) -> DeliveryReport;

    /// Number of live connections
    async fn connection_count(&self) -> usize;

    /// Whether the adapter is running
    fn is_running(&self) -> bool;
}

/// Outcome of a send or broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Frames written successfully
    pub delivered: usize,

    /// Connections whose write failed (and were evicted)
    pub failed: usize,

    /// The chat had no live connection, so the unknown-chat policy applied
    pub fallback: bool,
}

impl DeliveryReport {
    pub fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.fallback |= other.fallback;
    }
}

/// Adapter lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Stopped,
    Running,
    Stopping,
}

/// Lock-free status cell shared by adapter implementations
pub struct StatusCell(AtomicU8);

impl StatusCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(AdapterStatus::Stopped as u8))
    }

    pub fn get(&self) -> AdapterStatus {
        match self.0.load(Ordering::SeqCst) {
            1 => AdapterStatus::Running,
            2 => AdapterStatus::Stopping,
            _ => AdapterStatus::Stopped,
        }
    }

    pub fn set(&self, status: AdapterStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// `Connection` backed by an mpsc queue of encoded JSON frames
///
/// For transports whose socket writer runs in its own task: the task drains
/// the receiver and writes each frame to the socket. A closed receiver means
/// the socket is gone, which surfaces as a send failure.
pub struct ChannelConnection {
    session: String,
    tx: mpsc::Sender<Bytes>,
}

impl ChannelConnection {
    /// Create a connection and the receiver its writer task should drain
    pub fn new(session: impl Into<String>, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                session: session.into(),
                tx,
            },
            rx,
        )
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn accept(&self) -> Result<()> {
        if self.tx.is_closed() {
            return Err(RelayError::Connection {
                session: self.session.clone(),
                reason: "writer closed before handshake".to_string(),
            });
        }
        Ok(())
    }

    async fn send_frame(&self, frame: &WireFrame) -> Result<()> {
        let encoded = serde_json::to_vec(frame)?;
        self.tx
            .send(Bytes::from(encoded))
            .await
            .map_err(|_| RelayError::Connection {
                session: self.session.clone(),
                reason: "connection closed".to_string(),
            })
    }
}
