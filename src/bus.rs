//! Channel bus: switchboard between adapters and the agent runtime
//!
//! Inbound messages fan out to every subscriber. Outbound messages are routed
//! to the adapter that owns their channel. Sends for the same chat pass
//! through a per-chat lane, so concurrent producers cannot reorder or
//! interleave a chat's stream.

use crate::adapter::{ChannelAdapter, DeliveryReport};
use crate::config::BusConfig;
use crate::error::{RelayError, Result};
use crate::types::{Channel, InboundMessage, Metadata, OutboundMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Live inbound subscribers
#[derive(Default)]
struct SubscriberSet {
    senders: Mutex<Vec<mpsc::UnboundedSender<InboundMessage>>>,
}

impl SubscriberSet {
    fn add(&self) -> InboundSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        InboundSubscription { rx }
    }

    fn publish(&self, message: InboundMessage) -> Result<()> {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|tx| !tx.is_closed());

        let Some((last, rest)) = senders.split_last() else {
            return Err(RelayError::Routing(format!(
                "No subscriber for inbound message from {} chat '{}'",
                message.channel, message.chat_id
            )));
        };

        for tx in rest {
            let _ = tx.send(message.clone());
        }
        let _ = last.send(message);
        Ok(())
    }

    fn len(&self) -> usize {
        let mut senders = self.senders.lock().unwrap_or_else(|e| e.into_inner());
        senders.retain(|tx| !tx.is_closed());
        senders.len()
    }
}

/// Cloneable handle adapters use to publish inbound messages
#[derive(Clone)]
pub struct InboundPublisher {
    subscribers: Arc<SubscriberSet>,
}

impl InboundPublisher {
    /// Hand a message to every subscriber
    ///
    /// Fails with `Routing` only when nobody is subscribed.
    pub fn publish(&self, message: InboundMessage) -> Result<()> {
        tracing::debug!(
            channel = %message.channel,
            chat_id = %message.chat_id,
            id = %message.id,
            "Publishing inbound message"
        );
        self.subscribers.publish(message)
    }
}

/// Receiving end of an inbound subscription
pub struct InboundSubscription {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl InboundSubscription {
    /// Wait for the next message; `None` once the bus is gone
    pub async fn next(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Take a message if one is already queued
    pub fn try_next(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }

    /// Consume the subscription as a `Stream`
    pub fn into_stream(self) -> UnboundedReceiverStream<InboundMessage> {
        UnboundedReceiverStream::new(self.rx)
    }
}

type LaneKey = (Channel, String);

/// Per-chat FIFO locks, created on demand and pruned when idle
#[derive(Default)]
struct LaneTable {
    lanes: Mutex<HashMap<LaneKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl LaneTable {
    async fn acquire(self: &Arc<Self>, key: LaneKey) -> LaneGuard {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
            lanes.entry(key.clone()).or_default().clone()
        };
        let guard = lane.clone().lock_owned().await;
        LaneGuard {
            table: Arc::clone(self),
            key,
            lane: Some(lane),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Exclusive hold on one chat's lane
struct LaneGuard {
    table: Arc<LaneTable>,
    key: LaneKey,
    lane: Option<Arc<tokio::sync::Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LaneGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let Some(lane) = self.lane.take() else {
            return;
        };
        let mut lanes = self.table.lanes.lock().unwrap_or_else(|e| e.into_inner());
        // Only the table and this guard still reference the lane: nobody is waiting
        if Arc::strong_count(&lane) == 2 {
            lanes.remove(&self.key);
        }
    }
}

/// Central switchboard between adapters and the agent runtime
pub struct ChannelBus {
    config: BusConfig,

    /// Routing table (channel → owning adapter)
    adapters: RwLock<HashMap<Channel, Arc<dyn ChannelAdapter>>>,

    subscribers: Arc<SubscriberSet>,
    lanes: Arc<LaneTable>,
    running: AtomicBool,
}

impl ChannelBus {
    /// Create a bus with no adapters
    ///
    /// A zero outbound capacity is raised to one.
    pub fn new(mut config: BusConfig) -> Self {
        if config.outbound_capacity == 0 {
            tracing::warn!("Outbound capacity of zero raised to one");
            config.outbound_capacity = 1;
        }
        Self {
            config,
            adapters: RwLock::new(HashMap::new()),
            subscribers: Arc::new(SubscriberSet::default()),
            lanes: Arc::new(LaneTable::default()),
            running: AtomicBool::new(false),
        }
    }

    /// Bus settings
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Add the adapter for a channel
    ///
    /// Each channel has exactly one adapter. If the bus is already running the
    /// adapter is started immediately.
    pub async fn register_adapter(&self, adapter: Arc<dyn ChannelAdapter>) -> Result<()> {
        let channel = adapter.channel();
        {
            let mut adapters = self.adapters.write().await;
            if adapters.contains_key(&channel) {
                return Err(RelayError::Config(format!(
                    "Adapter already registered for channel '{}'",
                    channel
                )));
            }
            adapters.insert(channel, adapter.clone());
        }

        if self.is_running() {
            adapter.start(self.publisher(), &self.config).await?;
        }

        tracing::info!(channel = %channel, "Adapter registered");
        Ok(())
    }

    /// Get the adapter serving a channel
    pub async fn adapter(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.read().await.get(&channel).cloned()
    }

    /// Channels with a registered adapter
    pub async fn channels(&self) -> Vec<Channel> {
        self.adapters.read().await.keys().copied().collect()
    }

    /// Start every registered adapter
    pub async fn start(&self) -> Result<()> {
        let adapters: Vec<_> = self.adapters.read().await.values().cloned().collect();
        for adapter in &adapters {
            adapter.start(self.publisher(), &self.config).await?;
        }
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(adapters = adapters.len(), "Channel bus started");
        Ok(())
    }

    /// Stop every registered adapter
    ///
    /// Keeps going past individual failures and reports the first one.
    pub async fn shutdown(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        let adapters: Vec<_> = self.adapters.read().await.values().cloned().collect();

        let mut first_error = None;
        for adapter in adapters {
            if let Err(e) = adapter.stop().await {
                tracing::warn!(channel = %adapter.channel(), error = %e, "Adapter failed to stop");
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("Channel bus stopped");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle for adapters to publish inbound messages
    pub fn publisher(&self) -> InboundPublisher {
        InboundPublisher {
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Subscribe to inbound messages from every channel
    pub fn subscribe(&self) -> InboundSubscription {
        self.subscribers.add()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Publish an inbound message to all subscribers
    pub fn publish(&self, message: InboundMessage) -> Result<()> {
        self.publisher().publish(message)
    }

    /// Route an outbound message to its channel's adapter
    ///
    /// Waits for the chat's lane, so it must not be called for a chat whose
    /// `StreamWriter` is held by the calling task.
    pub async fn route(&self, message: OutboundMessage) -> Result<DeliveryReport> {
        let adapter = self.adapter_for(message.channel).await?;
        let _lane = self
            .lanes
            .acquire((message.channel, message.chat_id.clone()))
            .await;

        let report = adapter.send(&message).await;
        tracing::debug!(
            channel = %message.channel,
            chat_id = %message.chat_id,
            delivered = report.delivered,
            failed = report.failed,
            fallback = report.fallback,
            "Routed outbound message"
        );
        Ok(report)
    }

    /// Open an exclusive stream to one chat
    ///
    /// Other routes and streams for the same chat wait until the writer
    /// finishes (or is dropped).
    pub async fn stream(&self, channel: Channel, chat_id: &str) -> Result<StreamWriter> {
        let adapter = self.adapter_for(channel).await?;
        let lane = self.lanes.acquire((channel, chat_id.to_string())).await;
        Ok(StreamWriter {
            adapter,
            channel,
            chat_id: chat_id.to_string(),
            metadata: Metadata::new(),
            lane: Some(lane),
            finished: false,
        })
    }

    /// Send a notice through every adapter
    pub async fn broadcast(&self, content: &str, kind: &str) -> DeliveryReport {
        let adapters: Vec<_> = self.adapters.read().await.values().cloned().collect();
        let mut total = DeliveryReport::default();
        for adapter in adapters {
            total.merge(adapter.broadcast(content, kind).await);
        }
        total
    }

    /// Spawn a task that routes queued outbound messages in arrival order
    ///
    /// The task ends when every sender is dropped.
    pub fn spawn_outbound(self: &Arc<Self>) -> (mpsc::Sender<OutboundMessage>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(self.config.outbound_capacity);
        let bus = Arc::clone(self);

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let chat_id = message.chat_id.clone();
                if let Err(e) = bus.route(message).await {
                    tracing::warn!(chat_id = %chat_id, error = %e, "Failed to route queued message");
                }
            }
            tracing::debug!("Outbound queue closed");
        });

        (tx, handle)
    }

    async fn adapter_for(&self, channel: Channel) -> Result<Arc<dyn ChannelAdapter>> {
        self.adapter(channel)
            .await
            .ok_or_else(|| RelayError::Routing(format!("No adapter for channel '{}'", channel)))
    }

    #[cfg(test)]
    fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}

impl Default for ChannelBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

/// Exclusive writer for one streamed response
///
/// Holds the chat's lane until `finish` is called. Dropping an unfinished
/// writer sends an empty end-of-stream chunk in the background.
pub struct StreamWriter {
    adapter: Arc<dyn ChannelAdapter>,
    channel: Channel,
    chat_id: String,
    metadata: Metadata,
    lane: Option<LaneGuard>,
    finished: bool,
}

impl StreamWriter {
    /// Attach metadata to every chunk of this stream
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// Send one chunk
    pub async fn chunk(&mut self, content: impl Into<String>) -> DeliveryReport {
        let message = self.message(content);
        self.adapter.send(&message).await
    }

    /// Send the final chunk and release the lane
    pub async fn finish(mut self, content: impl Into<String>) -> DeliveryReport {
        let message = self.message(content).end_stream();
        let report = self.adapter.send(&message).await;
        self.finished = true;
        report
    }

    fn message(&self, content: impl Into<String>) -> OutboundMessage {
        let mut message = OutboundMessage::chunk(self.channel, &self.chat_id, content);
        message.metadata = self.metadata.clone();
        message
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let message = self.message("").end_stream();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(chat_id = %self.chat_id, "Stream dropped unfinished, closing it");
                let adapter = Arc::clone(&self.adapter);
                let lane = self.lane.take();
                handle.spawn(async move {
                    adapter.send(&message).await;
                    drop(lane);
                });
            }
            Err(_) => {
                tracing::warn!(chat_id = %self.chat_id, "Stream dropped outside a runtime, end marker lost");
            }
        }
    }
}
