// ABOUTME: End-to-end tests running SseTransport on a real listener with reqwest clients
// ABOUTME: Covers broadcast fan-out, point-in-time snapshots, disconnect cleanup, and shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::time::Duration;

use bytes::Bytes;
use tokio_stream::{Stream, StreamExt};

use ssebridge::{ErrorKind, Payload, SseTransport, Transport, TransportConfig};

/// Upper bound for anything that should happen "promptly"
const WAIT: Duration = Duration::from_secs(5);

type ByteStream = std::pin::Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Reads raw SSE bytes from one stream connection
struct StreamClient {
    body: ByteStream,
    buffer: Vec<u8>,
}

impl StreamClient {
    /// Read until one complete event (terminated by a blank line) is buffered
    async fn next_event(&mut self) -> String {
        loop {
            if let Some(end) = find_event_end(&self.buffer) {
                let event: Vec<u8> = self.buffer.drain(..end).collect();
                return String::from_utf8(event).expect("utf-8 event");
            }
            let chunk = tokio::time::timeout(WAIT, self.body.next())
                .await
                .expect("event in time")
                .expect("stream open")
                .expect("read chunk");
            self.buffer.extend_from_slice(&chunk);
        }
    }

    /// Assert no event arrives within a short window
    async fn expect_silence(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(200), self.body.next()).await;
        assert!(next.is_err(), "unexpected data: {next:?}");
        assert!(self.buffer.is_empty());
    }
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n").map(|i| i + 2)
}

fn test_config() -> TransportConfig {
    TransportConfig::new("127.0.0.1", 0).with_keep_alive(None)
}

async fn started(config: TransportConfig) -> (SseTransport, String) {
    let transport = SseTransport::new(config);
    transport.start().await.expect("start");
    let base = format!("http://{}", transport.local_addr().expect("bound"));
    (transport, base)
}

async fn open_stream(base: &str, path: &str) -> (reqwest::header::HeaderMap, StreamClient) {
    let response = reqwest::get(format!("{base}{path}")).await.expect("connect");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let headers = response.headers().clone();
    let client = StreamClient {
        body: Box::pin(response.bytes_stream()),
        buffer: Vec::new(),
    };
    (headers, client)
}

async fn stream(base: &str) -> StreamClient {
    let (headers, client) = open_stream(base, "/sse").await;
    assert_eq!(
        headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    client
}

async fn wait_for_count(transport: &SseTransport, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while transport.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} connections, have {}",
            transport.connection_count()
        )
    });
}

// ============================================================================
// Broadcast
// ============================================================================

#[tokio::test]
async fn send_hello_reaches_stream_first() {
    let (transport, base) = started(test_config()).await;
    let mut client = stream(&base).await;

    transport
        .send(Payload::from_static(b"hello"))
        .await
        .expect("send");

    assert_eq!(client.next_event().await, "data:hello\n\n");
    transport.stop().await;
}

#[tokio::test]
async fn every_stream_receives_exactly_one_event_per_send() {
    let (transport, base) = started(test_config()).await;
    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(stream(&base).await);
    }
    assert_eq!(transport.connection_count(), 3);

    transport
        .send(Payload::from_static(b"line1\nline2"))
        .await
        .expect("send");
    transport
        .send(Payload::from_static(b"next"))
        .await
        .expect("send");

    for client in &mut clients {
        assert_eq!(client.next_event().await, "data:line1\ndata:line2\n\n");
        assert_eq!(client.next_event().await, "data:next\n\n");
        client.expect_silence().await;
    }

    transport.stop().await;
}

#[tokio::test]
async fn late_stream_misses_earlier_send_but_gets_next() {
    let (transport, base) = started(test_config()).await;
    let mut early = stream(&base).await;

    transport
        .send(Payload::from_static(b"before"))
        .await
        .expect("send");
    let mut late = stream(&base).await;
    transport
        .send(Payload::from_static(b"after"))
        .await
        .expect("send");

    assert_eq!(early.next_event().await, "data:before\n\n");
    assert_eq!(early.next_event().await, "data:after\n\n");
    assert_eq!(late.next_event().await, "data:after\n\n");

    transport.stop().await;
}

#[tokio::test]
async fn events_arrive_in_send_order() {
    let (transport, base) = started(test_config()).await;
    let mut client = stream(&base).await;

    for i in 0..50 {
        transport
            .send(Payload::from(format!("event-{i}")))
            .await
            .expect("send");
    }
    for i in 0..50 {
        assert_eq!(client.next_event().await, format!("data:event-{i}\n\n"));
    }

    transport.stop().await;
}

#[tokio::test]
async fn binary_payload_is_base64_framed() {
    let (transport, base) = started(test_config()).await;
    let mut client = stream(&base).await;

    transport
        .send(Payload::from_static(&[0xff, 0xfe, 0x00]))
        .await
        .expect("send");
    assert_eq!(client.next_event().await, "data://4A\n\n");

    transport.stop().await;
}

#[tokio::test]
async fn stream_path_query_string_is_ignored() {
    let (transport, base) = started(test_config()).await;
    let (headers, mut client) = open_stream(&base, "/sse?client=test").await;

    assert_eq!(
        headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("text/event-stream")
    );
    assert_eq!(
        headers
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
    wait_for_count(&transport, 1).await;

    transport
        .send(Payload::from_static(b"with query"))
        .await
        .expect("send");
    assert_eq!(client.next_event().await, "data:with query\n\n");

    transport.stop().await;
}

#[tokio::test]
async fn get_elsewhere_serves_status_page_without_registering() {
    let (transport, base) = started(test_config()).await;

    let response = reqwest::get(format!("{base}/")).await.expect("get");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let page = response.text().await.expect("body");
    assert!(page.contains("/sse"));
    assert_eq!(transport.connection_count(), 0);

    transport.stop().await;
}

// ============================================================================
// Disconnects
// ============================================================================

#[tokio::test]
async fn peer_disconnect_is_removed_and_send_still_succeeds() {
    let (transport, base) = started(
        TransportConfig::new("127.0.0.1", 0).with_keep_alive(Some(Duration::from_millis(20))),
    )
    .await;

    let mut staying = stream(&base).await;
    let leaving = stream(&base).await;
    assert_eq!(transport.connection_count(), 2);

    drop(leaving);

    tokio::time::timeout(WAIT, async {
        while transport.connection_count() != 1 {
            transport
                .send(Payload::from_static(b"probe"))
                .await
                .expect("send never fails on dead peers");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("disconnected stream deregistered");

    transport
        .send(Payload::from_static(b"final"))
        .await
        .expect("send");
    loop {
        let event = staying.next_event().await;
        if event.starts_with(':') || event == "data:probe\n\n" {
            continue;
        }
        assert_eq!(event, "data:final\n\n");
        break;
    }

    transport.stop().await;
}

#[tokio::test]
async fn slow_stream_is_evicted_without_blocking_others() {
    let (transport, base) = started(test_config().with_max_pending_events(4)).await;
    let mut fast = stream(&base).await;
    let stalled = stream(&base).await;

    // The stalled client never reads; its socket buffers and then its outbox fill up
    let payload = Payload::from(vec![b'x'; 64 * 1024]);
    tokio::time::timeout(WAIT, async {
        while transport.connection_count() == 2 {
            transport.send(payload.clone()).await.expect("send");
            fast.next_event().await;
        }
    })
    .await
    .expect("stalled stream evicted");

    assert_eq!(transport.connection_count(), 1);
    drop(stalled);
    transport
        .send(Payload::from_static(b"still flowing"))
        .await
        .expect("send");
    loop {
        let event = fast.next_event().await;
        if event == "data:still flowing\n\n" {
            break;
        }
    }

    transport.stop().await;
}

// ============================================================================
// Inbound
// ============================================================================

#[tokio::test]
async fn post_body_reaches_receive_subscription() {
    let (transport, base) = started(test_config()).await;
    let mut inbound = transport.receive();

    let response = reqwest::Client::new()
        .post(format!("{base}/message"))
        .header("content-type", "application/json")
        .body(r#"{"x":1}"#)
        .send()
        .await
        .expect("post");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("application/json")
    );
    assert_eq!(response.text().await.expect("body"), "{}");

    let payload = tokio::time::timeout(WAIT, inbound.next())
        .await
        .expect("payload in time")
        .expect("item")
        .expect("ok");
    assert_eq!(payload, r#"{"x":1}"#);

    transport.stop().await;
}

#[tokio::test]
async fn every_subscription_sees_posts_in_order() {
    let (transport, base) = started(test_config()).await;
    let mut first = transport.receive();
    let mut second = transport.receive();
    let client = reqwest::Client::new();

    for i in 0..10 {
        client
            .post(format!("{base}/"))
            .body(format!("msg-{i}"))
            .send()
            .await
            .expect("post");
    }

    for subscription in [&mut first, &mut second] {
        for i in 0..10 {
            let payload = subscription.next().await.expect("item").expect("ok");
            assert_eq!(payload, format!("msg-{i}"));
        }
    }

    transport.stop().await;
}

#[tokio::test]
async fn options_preflight_over_the_wire() {
    let (transport, base) = started(test_config()).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{base}/sse"))
        .send()
        .await
        .expect("options");

    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    for (name, value) in [
        ("access-control-allow-origin", "*"),
        ("access-control-allow-methods", "GET, POST, OPTIONS"),
        ("access-control-allow-headers", "Content-Type"),
        ("access-control-max-age", "86400"),
    ] {
        assert_eq!(
            response.headers().get(name).and_then(|v| v.to_str().ok()),
            Some(value),
            "header {name}"
        );
    }
    assert!(response.bytes().await.expect("body").is_empty());

    transport.stop().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn stop_ends_streams_and_cancels_receive() {
    let (transport, base) = started(test_config()).await;
    let mut client = stream(&base).await;
    let mut inbound = transport.receive();

    tokio::time::timeout(WAIT, transport.stop())
        .await
        .expect("stop completes");

    let end = tokio::time::timeout(WAIT, client.body.next())
        .await
        .expect("stream ends promptly");
    assert!(end.is_none() || end.is_some_and(|r| r.is_err()));

    let cancelled = inbound.next().await.expect("item").expect_err("cancelled");
    assert_eq!(cancelled.kind, ErrorKind::Cancelled);
    assert!(inbound.next().await.is_none());

    assert_eq!(transport.connection_count(), 0);
}

#[tokio::test]
async fn stop_does_not_wait_for_stalled_reader() {
    let (transport, base) = started(test_config().with_max_pending_events(1024)).await;
    let _stalled = stream(&base).await;

    // Enough data to fill the socket buffers without overflowing the outbox
    let payload = Payload::from(vec![b'x'; 64 * 1024]);
    for _ in 0..256 {
        transport.send(payload.clone()).await.expect("send");
    }
    assert_eq!(transport.connection_count(), 1);

    let started_at = std::time::Instant::now();
    transport.stop().await;
    assert!(
        started_at.elapsed() < transport.config().shutdown_timeout,
        "stop waited for the drain timeout"
    );
}

#[tokio::test]
async fn send_after_stop_is_not_connected_and_stop_twice_is_safe() {
    let (transport, _base) = started(test_config()).await;

    transport.stop().await;
    transport.stop().await;

    let err = transport
        .send(Payload::from_static(b"late"))
        .await
        .expect_err("stopped");
    assert_eq!(err.kind, ErrorKind::NotConnected);
}

#[tokio::test]
async fn listener_is_closed_after_stop() {
    let (transport, base) = started(test_config()).await;
    transport.stop().await;

    let result = reqwest::Client::new()
        .get(format!("{base}/"))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err(), "listener should refuse connections");
}
