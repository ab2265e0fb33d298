// ABOUTME: Per-exchange HTTP handling for event streams, message submission, preflight, and status page
// ABOUTME: Streaming responses stay open and deregister their connection when the body is dropped
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Connection handling
//!
//! hyper parses each request and keeps the socket alive between exchanges;
//! this module takes over once the request head is known. The exchange is
//! classified by [`router::classify`] and then either:
//!
//! - **streams**: the connection is registered and the response body is an
//!   [`EventStream`] that never ends while registered,
//! - **buffers**: the whole body is collected and handed to the inbound hub,
//!   then acknowledged with `{}`,
//! - answers a **preflight** or the **status page** and completes.
//!
//! Whatever ends a stream (peer disconnect, failed write, eviction, or
//! shutdown) drops the body, and the drop removes the connection from the
//! registry before the socket is released.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_stream::Stream;
use tracing::{debug, info, warn};

use crate::codec;
use crate::listener::Peer;
use crate::registry::ConnectionId;
use crate::router::{self, RequestKind};
use crate::state::SharedState;

/// Allowed methods advertised on preflight
const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
/// Allowed request headers advertised on preflight
const ALLOWED_HEADERS: &str = "Content-Type";
/// Preflight cache lifetime (one day)
const PREFLIGHT_MAX_AGE: &str = "86400";

/// Build the application router
///
/// Every method and path lands in one dispatcher because the stream path is
/// configurable and POST/OPTIONS match on any path.
pub fn build(state: SharedState) -> Router {
    Router::new().fallback(dispatch).with_state(state)
}

/// Classify and serve one exchange
async fn dispatch(State(state): State<SharedState>, request: Request) -> Response {
    let kind = router::classify(request.method(), request.uri().path(), &state.stream_path);
    let peer = request
        .extensions()
        .get::<ConnectInfo<Peer>>()
        .map(|ConnectInfo(peer)| *peer);

    debug!(
        method = %request.method(),
        uri = %request.uri(),
        kind = ?kind,
        "Request received"
    );

    match kind {
        RequestKind::OpenStream => open_stream(&state, peer),
        RequestKind::SubmitMessage => submit_message(&state, request).await,
        RequestKind::Preflight => preflight(),
        RequestKind::Informational => status_page(&state.stream_path),
    }
}

/// Register a streaming connection and answer with a never-ending event stream
fn open_stream(state: &SharedState, peer: Option<Peer>) -> Response {
    let (tx, rx) = mpsc::channel(state.max_pending_events);

    let Some(id) = state.registry.add(peer, tx) else {
        debug!(peer = ?peer.map(|p| p.addr), "Refusing event stream during shutdown");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        )
            .into_response();
    };

    info!(
        connection = %id,
        peer = ?peer.map(|p| p.addr),
        open_streams = state.registry.count(),
        "Event stream opened"
    );

    let events = EventStream::new(id, state.clone(), rx);

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Body::from_stream(events),
    )
        .into_response()
}

/// Collect a POST body, hand it to the owner, and acknowledge with `{}`
///
/// The payload is never inspected; malformed content is still acknowledged.
async fn submit_message(state: &SharedState, request: Request) -> Response {
    let body = match axum::body::to_bytes(request.into_body(), state.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            warn!(
                error = %e,
                limit = state.max_body_bytes,
                "Message body rejected"
            );
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
                Json(json!({})),
            )
                .into_response();
        }
    };

    if body.is_empty() {
        debug!("Empty message body, nothing delivered");
    } else {
        let subscribers = state.inbound.publish(&body);
        debug!(bytes = body.len(), subscribers, "Message received");
    }

    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(json!({})),
    )
        .into_response()
}

/// Answer a CORS preflight with `204 No Content`
fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
            (header::ACCESS_CONTROL_MAX_AGE, PREFLIGHT_MAX_AGE),
        ],
    )
        .into_response()
}

/// Human-readable status page naming the stream endpoint
fn status_page(stream_path: &str) -> Response {
    (
        [
            (header::CONNECTION, "close"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        Html(render_status_page(stream_path)),
    )
        .into_response()
}

fn render_status_page(stream_path: &str) -> String {
    let endpoint = escape_html(stream_path);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Document Server</title>
    <style>
        body {{ font-family: system-ui, -apple-system, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; line-height: 1.6; }}
        .info {{ background-color: #f0f0f0; padding: 15px; border-radius: 5px; margin: 20px 0; }}
        .endpoint {{ font-family: monospace; background-color: #e0e0e0; padding: 5px; border-radius: 3px; }}
    </style>
</head>
<body>
    <h1>Document Server</h1>
    <div class="info">
        <p>This server exposes local documents as resources to AI assistant clients.</p>
        <p>Event stream endpoint: <span class="endpoint">{endpoint}</span></p>
        <p>Send messages with <span class="endpoint">POST</span> to any path on this port.</p>
    </div>
</body>
</html>
"#
    )
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Response body of one streaming connection
///
/// Yields frames queued by broadcasts, interleaved with keep-alive comments
/// while idle. Ends only when the registry drops the sending half (eviction
/// or shutdown). Dropping it deregisters the connection, which happens when
/// hyper gives up on the socket.
///
/// All fields are `Unpin`, so the `Stream` impl can reach them through
/// `Pin<&mut Self>` directly.
pub(crate) struct EventStream {
    id: ConnectionId,
    state: SharedState,
    outbox: mpsc::Receiver<Bytes>,
    keep_alive: Option<Interval>,
}

impl EventStream {
    fn new(id: ConnectionId, state: SharedState, outbox: mpsc::Receiver<Bytes>) -> Self {
        let keep_alive = state.keep_alive.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        Self {
            id,
            state,
            outbox,
            keep_alive,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        match this.outbox.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                if let Some(ticker) = this.keep_alive.as_mut() {
                    ticker.reset();
                }
                return Poll::Ready(Some(Ok(frame)));
            }
            Poll::Ready(None) => return Poll::Ready(None),
            Poll::Pending => {}
        }

        if let Some(ticker) = this.keep_alive.as_mut() {
            if ticker.poll_tick(cx).is_ready() {
                return Poll::Ready(Some(Ok(codec::keep_alive_frame())));
            }
        }

        Poll::Pending
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if self.state.registry.remove(self.id) {
            info!(
                connection = %self.id,
                open_streams = self.state.registry.count(),
                "Event stream closed"
            );
        } else {
            debug!(connection = %self.id, "Event stream closed after deregistration");
        }
    }
}
