//! Orchestrator behavior against a live server, covering both transports
//! and the invisible fallback between them.

use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use parley_client::{ChatConnection, ChatHandle, ConnectionConfig};
use parley_core::mock::{MockProvider, MockResponse};
use parley_core::state::{ChatEvent, LoadingState};
use parley_server::{start, EchoProvider, ServerConfig};

async fn boot_server(responses: Vec<MockResponse>) -> u16 {
    let provider = Arc::new(MockProvider::new(responses));
    start(ServerConfig { port: 0 }, provider).await.unwrap().port
}

fn config(port: u16) -> ConnectionConfig {
    let mut cfg = ConnectionConfig::new(format!("http://127.0.0.1:{port}"))
        .with_channel(format!("ws://127.0.0.1:{port}/ws"));
    cfg.reconnect_attempts = 0;
    cfg
}

async fn wait_connected(handle: &ChatHandle) {
    for _ in 0..200 {
        if handle.transport_connected() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("channel never connected");
}

async fn next_event(events: &mut UnboundedReceiver<ChatEvent>) -> Option<ChatEvent> {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .ok()
        .flatten()
}

/// Collect events until the turn's terminal event, inclusive.
async fn collect_turn(events: &mut UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Some(event) = next_event(events).await {
        let terminal = event.is_terminal();
        out.push(event);
        if terminal {
            break;
        }
    }
    out
}

fn final_message(events: &[ChatEvent]) -> &str {
    match events.last() {
        Some(ChatEvent::Message(msg)) => &msg.content,
        other => panic!("expected terminal message, got {other:?}"),
    }
}

fn assert_single_terminal(events: &[ChatEvent]) {
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

fn assert_updates_grow(events: &[ChatEvent]) {
    let mut prev = String::new();
    for event in events {
        if let ChatEvent::StreamingUpdate { content, .. } = event {
            assert!(
                content.starts_with(&prev),
                "buffer shrank: {prev:?} -> {content:?}"
            );
            prev = content.clone();
        }
    }
}

#[tokio::test]
async fn channel_turn_reassembles_chunks() {
    let port = boot_server(vec![MockResponse::stream_chunks(&["Hel", "lo, ", "world"])]).await;
    let (handle, mut events) = ChatConnection::spawn(config(port)).unwrap();
    wait_connected(&handle).await;

    handle.send_message("hi", vec![]);
    let turn = collect_turn(&mut events).await;

    assert_eq!(final_message(&turn), "Hello, world");
    assert_single_terminal(&turn);
    assert_updates_grow(&turn);
    // The completion flag fires exactly once, on the full buffer.
    let complete: Vec<_> = turn
        .iter()
        .filter_map(|e| match e {
            ChatEvent::StreamingUpdate { content, is_complete: true } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(complete, vec!["Hello, world"]);
    handle.shutdown();
}

#[tokio::test]
async fn http_turn_without_channel_behaves_identically() {
    let port = boot_server(vec![MockResponse::stream_chunks(&["Hel", "lo, ", "world"])]).await;
    let cfg = ConnectionConfig::new(format!("http://127.0.0.1:{port}"));
    let (handle, mut events) = ChatConnection::spawn(cfg).unwrap();

    handle.send_message("hi", vec![]);
    let turn = collect_turn(&mut events).await;

    assert_eq!(final_message(&turn), "Hello, world");
    assert_single_terminal(&turn);
    assert_updates_grow(&turn);
    handle.shutdown();
}

#[tokio::test]
async fn dead_channel_falls_back_to_http_invisibly() {
    let port = boot_server(vec![MockResponse::stream_chunks(&["via ", "http"])]).await;
    // Channel endpoint points nowhere; every turn must take the HTTP path.
    let mut cfg = ConnectionConfig::new(format!("http://127.0.0.1:{port}"))
        .with_channel("ws://127.0.0.1:9/ws");
    cfg.reconnect_attempts = 0;
    let (handle, mut events) = ChatConnection::spawn(cfg).unwrap();

    handle.send_message("hi", vec![]);
    let turn = collect_turn(&mut events).await;

    assert_eq!(final_message(&turn), "via http");
    assert!(
        !turn.iter().any(|e| matches!(e, ChatEvent::Error(_))),
        "fallback must not surface an error"
    );
    handle.shutdown();
}

/// Channel server that streams a partial turn and then drops the socket.
async fn boot_flaky_channel() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                // Wait for the client frame, send one chunk, die mid-stream.
                let _ = ws.next().await;
                let _ = ws
                    .send(Message::Text(
                        r#"{"type":"chunk","content":"doomed "}"#.into(),
                    ))
                    .await;
            }
        }
    });
    port
}

#[tokio::test]
async fn midstream_channel_loss_replays_over_http() {
    let http_port = boot_server(vec![MockResponse::stream_chunks(&["re", "played"])]).await;
    let ws_port = boot_flaky_channel().await;

    let mut cfg = ConnectionConfig::new(format!("http://127.0.0.1:{http_port}"))
        .with_channel(format!("ws://127.0.0.1:{ws_port}"));
    cfg.reconnect_attempts = 0;
    let (handle, mut events) = ChatConnection::spawn(cfg).unwrap();
    wait_connected(&handle).await;

    handle.send_message("hi", vec![]);
    let turn = collect_turn(&mut events).await;

    // The partial channel buffer is discarded; the terminal message is the
    // clean HTTP replay and the consumer never sees an error.
    assert_eq!(final_message(&turn), "replayed");
    assert_single_terminal(&turn);
    assert!(!turn.iter().any(|e| matches!(e, ChatEvent::Error(_))));
    let last_update = turn
        .iter()
        .filter_map(|e| match e {
            ChatEvent::StreamingUpdate { content, .. } => Some(content.as_str()),
            _ => None,
        })
        .last();
    assert_eq!(last_update, Some("replayed"));
    handle.shutdown();
}

/// Channel server that sends a duplicate terminal frame after the first.
async fn boot_duplicating_channel() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                let _ = ws.next().await;
                for frame in [
                    r#"{"type":"chunk","content":"once"}"#,
                    r#"{"type":"complete"}"#,
                    r#"{"type":"chunk","content":"stale"}"#,
                    r#"{"type":"complete"}"#,
                ] {
                    let _ = ws.send(Message::Text(frame.into())).await;
                }
                while ws.next().await.is_some() {}
            }
        }
    });
    port
}

#[tokio::test]
async fn duplicate_terminal_frames_close_the_turn_once() {
    let http_port = boot_server(vec![]).await;
    let ws_port = boot_duplicating_channel().await;

    let mut cfg = ConnectionConfig::new(format!("http://127.0.0.1:{http_port}"))
        .with_channel(format!("ws://127.0.0.1:{ws_port}"));
    cfg.reconnect_attempts = 0;
    let (handle, mut events) = ChatConnection::spawn(cfg).unwrap();
    wait_connected(&handle).await;

    handle.send_message("hi", vec![]);
    let turn = collect_turn(&mut events).await;
    assert_eq!(final_message(&turn), "once");

    // Give the stale frames time to arrive; none may produce events beyond
    // the idle transition that closed the turn.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut extras = Vec::new();
    while let Ok(event) = events.try_recv() {
        extras.push(event);
    }
    assert!(
        extras
            .iter()
            .all(|e| matches!(e, ChatEvent::LoadingState(_))),
        "stale frames leaked events: {extras:?}"
    );
    handle.shutdown();
}

#[tokio::test]
async fn stop_cancels_the_turn_without_a_terminal_event() {
    // A paced provider leaves room to stop mid-stream.
    let provider = Arc::new(EchoProvider::with_delay(Duration::from_millis(50)));
    let port = start(ServerConfig { port: 0 }, provider).await.unwrap().port;
    let cfg = ConnectionConfig::new(format!("http://127.0.0.1:{port}"));
    let (handle, mut events) = ChatConnection::spawn(cfg).unwrap();

    handle.send_message("a reasonably long prompt with many words to stream", vec![]);

    // Wait for streaming to begin, then stop.
    loop {
        match next_event(&mut events).await {
            Some(ChatEvent::StreamingUpdate { .. }) => break,
            Some(ChatEvent::LoadingState(_)) => {}
            other => panic!("unexpected event before streaming: {other:?}"),
        }
    }
    handle.stop_message();

    // Drain what's left; the stopped turn must not produce a terminal event.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let mut saw_idle = false;
    while let Ok(event) = events.try_recv() {
        assert!(!event.is_terminal(), "stopped turn emitted {event:?}");
        if matches!(event, ChatEvent::LoadingState(LoadingState::Idle)) {
            saw_idle = true;
        }
    }
    assert!(saw_idle, "stop must return the turn state to idle");

    // The orchestrator accepts a fresh turn afterwards.
    handle.send_message("again", vec![]);
    let turn = collect_turn(&mut events).await;
    assert!(final_message(&turn).contains("again"));
    handle.shutdown();
}

#[tokio::test]
async fn second_send_during_a_turn_is_ignored() {
    // Paced tokens keep the first turn in flight while the second send lands.
    let provider = Arc::new(EchoProvider::with_delay(Duration::from_millis(50)));
    let port = start(ServerConfig { port: 0 }, provider).await.unwrap().port;
    let cfg = ConnectionConfig::new(format!("http://127.0.0.1:{port}"));
    let (handle, mut events) = ChatConnection::spawn(cfg).unwrap();

    handle.send_message("the first of two competing prompts", vec![]);
    loop {
        match next_event(&mut events).await {
            Some(ChatEvent::StreamingUpdate { .. }) => break,
            Some(ChatEvent::LoadingState(_)) => {}
            other => panic!("unexpected event before streaming: {other:?}"),
        }
    }
    handle.send_message("the second, which must be dropped", vec![]);

    let turn = collect_turn(&mut events).await;
    assert!(final_message(&turn).contains("the first of two competing prompts"));

    // The dropped send starts no turn of its own.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut extras = Vec::new();
    while let Ok(event) = events.try_recv() {
        extras.push(event);
    }
    assert!(
        extras.iter().all(|e| !e.is_terminal()),
        "ignored send produced a turn: {extras:?}"
    );
    handle.shutdown();
}

#[tokio::test]
async fn streaming_probe_reflects_server_capability() {
    let port = boot_server(vec![]).await;
    let client = parley_client::SseClient::new(format!("http://127.0.0.1:{port}")).unwrap();
    assert!(client.supports_streaming().await);

    let dead = parley_client::SseClient::new("http://127.0.0.1:9").unwrap();
    assert!(!dead.supports_streaming().await);
}

#[tokio::test]
async fn server_rejection_surfaces_its_reason() {
    let port = boot_server(vec![]).await;
    let cfg = ConnectionConfig::new(format!("http://127.0.0.1:{port}"));
    let (handle, mut events) = ChatConnection::spawn(cfg).unwrap();

    handle.send_message("this is spam", vec![]);
    let turn = collect_turn(&mut events).await;
    match turn.last() {
        Some(ChatEvent::Error(text)) => {
            assert_eq!(text, "Content blocked by safety guidelines");
        }
        other => panic!("expected blocked error, got {other:?}"),
    }
    handle.shutdown();
}
