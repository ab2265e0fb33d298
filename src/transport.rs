// ABOUTME: Owner-facing SSE transport: start/stop the listener, broadcast payloads, receive POST bodies
// ABOUTME: Defines the Transport trait and its axum-backed implementation SseTransport
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::TransportConfig;
use crate::handler;
use crate::inbound::PayloadStream;
use crate::listener::{Peer, TrackedListener};
use crate::registry::Delivery;
use crate::state::{SharedState, TransportState};
use crate::types::{Payload, TransportError};

/// Message transport between a protocol owner and its HTTP clients
///
/// This is the whole contract the protocol layer relies on: payloads are
/// opaque in both directions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start accepting connections; a no-op when already running
    async fn start(&self) -> Result<(), TransportError>;

    /// Close every connection and the listener and cancel all subscriptions
    ///
    /// Safe to call before `start` and more than once.
    async fn stop(&self);

    /// Broadcast one payload to every connected event stream
    async fn send(&self, payload: Payload) -> Result<(), TransportError>;

    /// Subscribe to payloads received from clients
    ///
    /// Each subscription buffers without limit until it is polled, so a
    /// subscription that is held but never read keeps every POST body in
    /// memory. Drop subscriptions that are no longer consumed.
    fn receive(&self) -> PayloadStream;
}

enum Lifecycle {
    Idle,
    Running(RunningServer),
    Stopped,
}

struct RunningServer {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// HTTP + Server-Sent Events transport on a single listener
///
/// GET on the stream path opens an event stream that receives every
/// broadcast; a POST on any path submits one payload to all `receive`
/// subscriptions. One-shot: once stopped it cannot be started again.
pub struct SseTransport {
    config: TransportConfig,
    state: SharedState,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

impl SseTransport {
    /// Create a stopped transport for the given configuration
    pub fn new(config: TransportConfig) -> Self {
        let state = TransportState::shared(&config);
        Self {
            config,
            state,
            lifecycle: Mutex::new(Lifecycle::Idle),
            running: AtomicBool::new(false),
            local_addr: OnceLock::new(),
        }
    }

    /// Transport configuration
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Whether the listener is accepting connections
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of open event streams
    pub fn connection_count(&self) -> usize {
        self.state.registry.count()
    }

    /// Encode `payload` once and queue it on every currently registered stream
    ///
    /// Returns how many streams accepted the frame. Never waits on a client.
    /// A stream whose outbox is full is evicted and its socket shut down; one
    /// whose writer is gone is deregistered. Neither affects the others.
    pub fn broadcast(&self, payload: &[u8]) -> Result<usize, TransportError> {
        if !self.is_running() {
            return Err(TransportError::not_connected("Transport is not running"));
        }

        let frame = codec::encode_event(payload);
        let mut delivered = 0;
        let mut dropped = Vec::new();
        let mut evicted = Vec::new();

        self.state.registry.for_each(|conn| match conn.deliver(frame.clone()) {
            Delivery::Queued => delivered += 1,
            Delivery::Full => {
                warn!(
                    connection = %conn.id(),
                    peer = ?conn.peer(),
                    "Event stream not keeping up, evicting"
                );
                dropped.push(conn.id());
                evicted.extend(conn.socket());
            }
            Delivery::Closed => {
                debug!(connection = %conn.id(), "Event stream already closing");
                dropped.push(conn.id());
            }
        });

        for id in dropped {
            self.state.registry.remove(id);
        }
        for socket in evicted {
            self.state.sockets.shutdown(socket);
        }

        if delivered == 0 {
            warn!(bytes = payload.len(), "No open event streams, message not delivered");
        } else {
            debug!(bytes = payload.len(), streams = delivered, "Message broadcast");
        }

        Ok(delivered)
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Stopped => {
                return Err(TransportError::not_connected(
                    "Transport was stopped and cannot be restarted",
                ))
            }
            Lifecycle::Idle => {}
        }

        info!(
            address = %self.config.address(),
            path = %self.config.stream_path,
            "Starting SSE transport"
        );

        let listener = bind(&self.config).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::internal(format!("Listener has no address: {e}")))?;
        let listener = TrackedListener::new(
            listener,
            self.state.sockets.clone(),
            self.config.tcp_nodelay,
        );

        let app = handler::build(self.state.clone()).into_make_service_with_connect_info::<Peer>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let _ = self.local_addr.set(local_addr);
        self.running.store(true, Ordering::Release);
        *lifecycle = Lifecycle::Running(RunningServer {
            shutdown: shutdown_tx,
            task,
        });

        info!(
            address = %local_addr,
            path = %self.config.stream_path,
            "SSE transport listening"
        );
        Ok(())
    }

    async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let previous = std::mem::replace(&mut *lifecycle, Lifecycle::Stopped);
        self.running.store(false, Ordering::Release);

        let server = match previous {
            Lifecycle::Running(server) => server,
            Lifecycle::Idle => {
                self.state.registry.clear();
                self.state.inbound.close();
                debug!("SSE transport stopped before start");
                return;
            }
            Lifecycle::Stopped => return,
        };

        info!("Stopping SSE transport");

        // Streams never finish on their own; close their sockets outright
        let closed = self.state.registry.clear();
        debug!(streams = closed.len(), "Closing event streams");
        for conn in &closed {
            if let Some(socket) = conn.socket() {
                self.state.sockets.shutdown(socket);
            }
        }
        drop(closed);

        self.state.inbound.close();
        let _ = server.shutdown.send(());

        let mut task = server.task;
        match tokio::time::timeout(self.config.shutdown_timeout, &mut task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server ended with error"),
            Ok(Err(e)) => warn!(error = %e, "HTTP server task failed"),
            Err(_) => {
                warn!(
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    sockets = self.state.sockets.count(),
                    "HTTP server did not drain in time, forcing sockets closed"
                );
                self.state.sockets.shutdown_all();
                task.abort();
            }
        }

        info!("SSE transport stopped");
    }

    async fn send(&self, payload: Payload) -> Result<(), TransportError> {
        self.broadcast(&payload).map(|_| ())
    }

    fn receive(&self) -> PayloadStream {
        self.state.inbound.subscribe()
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        let previous = std::mem::replace(self.lifecycle.get_mut(), Lifecycle::Stopped);
        if let Lifecycle::Running(server) = previous {
            self.state.registry.clear();
            self.state.inbound.close();
            self.state.sockets.shutdown_all();
            let _ = server.shutdown.send(());
        }
    }
}

/// Bind the first available candidate address
async fn bind(config: &TransportConfig) -> Result<TcpListener, TransportError> {
    let candidates = config.bind_candidates();
    let mut last_error = None;

    for addr in &candidates {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                debug!(address = %addr, error = %e, "Bind attempt failed");
                last_error = Some(format!("Failed to bind {addr}: {e}"));
            }
        }
    }

    let message = last_error.unwrap_or_else(|| "No address to bind".to_owned());
    if candidates.len() > 1 {
        Err(TransportError::bind(format!(
            "No free port among {} candidates; {message}",
            candidates.len()
        )))
    } else {
        Err(TransportError::bind(message))
    }
}
