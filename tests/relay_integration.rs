//! Relay integration tests
//!
//! End-to-end tests driving the full loop: transport payload → WebSocket
//! adapter → bus → runtime → gated tool call → streamed reply → transport.

use a3s_relay::tools::builtin;
use a3s_relay::{
    BusConfig, CallerContext, Channel, ChannelAdapter, ChannelBus, ChannelConnection,
    OutboundMessage, RelayConfig, RelayError, ToolGate, ToolPolicy, ToolRegistry,
    UnknownChatPolicy, WebSocketAdapter, WireFrame,
};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

async fn running_bus(config: BusConfig) -> (Arc<ChannelBus>, Arc<WebSocketAdapter>) {
    let ws = Arc::new(WebSocketAdapter::new());
    let bus = Arc::new(ChannelBus::new(config));
    bus.register_adapter(ws.clone()).await.unwrap();
    bus.start().await.unwrap();
    (bus, ws)
}

async fn connect(ws: &WebSocketAdapter, session: &str) -> mpsc::Receiver<Bytes> {
    let (conn, rx) = ChannelConnection::new(session, 64);
    ws.register(Arc::new(conn), session).await.unwrap();
    rx
}

fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<WireFrame> {
    let mut frames = Vec::new();
    while let Ok(bytes) = rx.try_recv() {
        frames.push(serde_json::from_slice(&bytes).unwrap());
    }
    frames
}

fn workspace() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("a3s-relay-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn gate(workspace: &std::path::Path) -> ToolGate {
    let config = RelayConfig::from_json(&format!(
        r#"{{"tools": {{"workspace": {}}}}}"#,
        serde_json::to_string(&workspace.display().to_string()).unwrap()
    ))
    .unwrap();

    let mut registry = ToolRegistry::new();
    builtin::register_all(&mut registry, &config.tools).unwrap();
    let policy = ToolPolicy::from_config(&config.policy).unwrap();
    ToolGate::new(Arc::new(registry), Arc::new(policy))
}

// ─── Inbound ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_payload_published_to_runtime() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let _rx = connect(&ws, "c1").await;
    let mut inbound = bus.subscribe();

    ws.handle_incoming("c1", br#"{"action":"chat","message":"hi"}"#)
        .await
        .unwrap();

    let message = inbound.next().await.unwrap();
    assert_eq!(message.channel, Channel::WebSocket);
    assert_eq!(message.sender_id, "c1");
    assert_eq!(message.chat_id, "c1");
    assert_eq!(message.content, "hi");
    assert_eq!(message.metadata["action"], "chat");
}

#[tokio::test]
async fn test_malformed_and_control_payloads_ignored() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let mut inbound = bus.subscribe();

    ws.handle_incoming("c1", b"{not json").await.unwrap();
    ws.handle_incoming("c1", br#"[1, 2]"#).await.unwrap();
    ws.handle_incoming("c1", br#"{"action":"ping"}"#).await.unwrap();

    assert!(inbound.try_next().is_none());
}

#[tokio::test]
async fn test_every_subscriber_sees_each_message() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let mut first = bus.subscribe();
    let mut second = bus.subscribe();

    ws.handle_incoming("c1", br#"{"message":"hello"}"#).await.unwrap();

    assert_eq!(first.next().await.unwrap().content, "hello");
    assert_eq!(second.next().await.unwrap().content, "hello");
}

// ─── Outbound & Streaming ────────────────────────────────────────

#[tokio::test]
async fn test_stream_chunks_arrive_in_order() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let mut rx = connect(&ws, "c1").await;

    bus.route(OutboundMessage::chunk(Channel::WebSocket, "c1", "partial"))
        .await
        .unwrap();
    bus.route(OutboundMessage::chunk(Channel::WebSocket, "c1", "partial done").end_stream())
        .await
        .unwrap();

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].kind, "stream");
    assert_eq!(frames[0].content, "partial");
    assert_eq!(frames[0].is_stream_end, Some(false));
    assert_eq!(frames[1].content, "partial done");
    assert_eq!(frames[1].is_stream_end, Some(true));
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let mut rx1 = connect(&ws, "c1").await;
    let mut rx2 = connect(&ws, "c2").await;

    bus.route(OutboundMessage::new(Channel::WebSocket, "c1", "for one"))
        .await
        .unwrap();
    bus.route(OutboundMessage::new(Channel::WebSocket, "c2", "for two"))
        .await
        .unwrap();

    let one = drain(&mut rx1);
    let two = drain(&mut rx2);
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].content, "for one");
    assert_eq!(two.len(), 1);
    assert_eq!(two[0].content, "for two");
}

#[tokio::test]
async fn test_unknown_chat_broadcasts_by_default() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let mut rx1 = connect(&ws, "c1").await;
    let mut rx2 = connect(&ws, "c2").await;

    let report = bus
        .route(OutboundMessage::new(Channel::WebSocket, "ghost", "to everyone"))
        .await
        .unwrap();

    assert!(report.fallback);
    assert_eq!(report.delivered, 2);
    assert_eq!(drain(&mut rx1)[0].content, "to everyone");
    assert_eq!(drain(&mut rx2)[0].content, "to everyone");
}

#[tokio::test]
async fn test_unknown_chat_dropped_when_configured() {
    let config = BusConfig {
        unknown_chat: UnknownChatPolicy::Drop,
        ..Default::default()
    };
    let (bus, ws) = running_bus(config).await;
    let mut rx = connect(&ws, "c1").await;

    let report = bus
        .route(OutboundMessage::new(Channel::WebSocket, "ghost", "nobody"))
        .await
        .unwrap();

    assert!(report.fallback);
    assert_eq!(report.delivered, 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_closed_connection_evicted() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let rx = connect(&ws, "c1").await;
    drop(rx);

    let report = bus
        .route(OutboundMessage::new(Channel::WebSocket, "c1", "hello?"))
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(ws.connection_count().await, 0);
}

#[tokio::test]
async fn test_route_without_adapter() {
    let bus = ChannelBus::default();
    let err = bus
        .route(OutboundMessage::new(Channel::Telegram, "c1", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Routing(_)));
}

#[tokio::test]
async fn test_concurrent_streams_do_not_interleave() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let mut rx = connect(&ws, "c1").await;

    let mut tasks = Vec::new();
    for producer in ["a", "b", "c"] {
        let bus = bus.clone();
        tasks.push(tokio::spawn(async move {
            let mut writer = bus.stream(Channel::WebSocket, "c1").await.unwrap();
            for i in 0..5 {
                writer.chunk(format!("{}{}", producer, i)).await;
                tokio::task::yield_now().await;
            }
            writer.finish(format!("{}-end", producer)).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 18);
    for response in frames.chunks(6) {
        let producer = &response[0].content[..1];
        assert!(response.iter().all(|f| f.content.starts_with(producer)));
        assert!(response[..5].iter().all(|f| f.is_stream_end == Some(false)));
        assert_eq!(response[5].is_stream_end, Some(true));
    }
}

// ─── Lifecycle ───────────────────────────────────────────────────

#[tokio::test]
async fn test_shutdown_drops_connections() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let _rx = connect(&ws, "c1").await;

    bus.shutdown().await.unwrap();

    assert!(!bus.is_running());
    assert!(!ws.is_running());
    assert_eq!(ws.connection_count().await, 0);

    let (conn, _rx) = ChannelConnection::new("c2", 4);
    assert!(matches!(
        ws.register(Arc::new(conn), "c2").await,
        Err(RelayError::Connection { .. })
    ));
}

#[tokio::test]
async fn test_outbound_queue_and_broadcast() {
    let (bus, ws) = running_bus(BusConfig::default()).await;
    let mut rx = connect(&ws, "c1").await;

    let (tx, handle) = bus.spawn_outbound();
    for i in 0..3 {
        tx.send(OutboundMessage::new(Channel::WebSocket, "c1", format!("m{}", i)))
            .await
            .unwrap();
    }
    drop(tx);
    handle.await.unwrap();

    let report = bus.broadcast("maintenance at noon", "system").await;
    assert_eq!(report.delivered, 1);

    let contents: Vec<_> = drain(&mut rx).into_iter().map(|f| f.content).collect();
    assert_eq!(contents, vec!["m0", "m1", "m2", "maintenance at noon"]);
}

// ─── Full Loop ───────────────────────────────────────────────────

#[tokio::test]
async fn test_runtime_loop_with_gated_tools() {
    let dir = workspace();
    std::fs::write(dir.join("README.md"), "relay docs").unwrap();

    let (bus, ws) = running_bus(BusConfig::default()).await;
    let mut rx = connect(&ws, "c1").await;
    let mut inbound = bus.subscribe();
    let gate = gate(&dir);

    // Minimal runtime: read the requested file, stream it back
    let runtime = {
        let bus = bus.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            let message = inbound.next().await.unwrap();
            let ctx = CallerContext::new("readonly").for_chat(message.channel, &message.chat_id);

            let denied = gate
                .invoke(
                    "write_file",
                    &serde_json::json!({"path": "x.txt", "content": "x"}),
                    &ctx,
                )
                .await;
            assert!(matches!(denied, Err(RelayError::PolicyDenied { .. })));

            let output = gate
                .invoke("read_file", &serde_json::json!({"path": message.content}), &ctx)
                .await
                .unwrap();

            let mut writer = bus.stream(message.channel, &message.chat_id).await.unwrap();
            writer.chunk("Contents: ").await;
            writer.finish(output.content).await;
        })
    };

    ws.handle_incoming("c1", br#"{"action":"chat","message":"README.md"}"#)
        .await
        .unwrap();
    runtime.await.unwrap();

    let frames = drain(&mut rx);
    let text: String = frames.iter().map(|f| f.content.as_str()).collect();
    assert_eq!(text, "Contents: relay docs");
    assert_eq!(frames.last().unwrap().is_stream_end, Some(true));
    assert!(!dir.join("x.txt").exists());

    let visible: Vec<_> = gate
        .available("readonly")
        .unwrap()
        .into_iter()
        .map(|d| d.name.clone())
        .collect();
    assert_eq!(visible, vec!["list_dir", "read_file"]);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_coding_profile_runs_shell() {
    let dir = workspace();
    let gate = gate(&dir);

    let output = tokio_test::assert_ok!(
        gate.invoke(
            "shell",
            &serde_json::json!({"command": "echo built > out.txt && cat out.txt"}),
            &CallerContext::new("coding"),
        )
        .await
    );
    assert!(output.success);
    assert_eq!(output.content.trim(), "built");

    let err = gate
        .invoke(
            "shell",
            &serde_json::json!({"command": "true"}),
            &CallerContext::new("minimal"),
        )
        .await
        .unwrap_err();
    assert!(err.is_policy_denied());

    std::fs::remove_dir_all(&dir).unwrap();
}
