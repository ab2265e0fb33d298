// ABOUTME: State shared between the transport facade and every HTTP handler task
// ABOUTME: Holds the connection registry, inbound hub, and per-exchange limits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;
use std::time::Duration;

use crate::config::TransportConfig;
use crate::inbound::InboundHub;
use crate::listener::SocketTracker;
use crate::registry::ConnectionRegistry;

/// Shared state handle passed to handlers
pub type SharedState = Arc<TransportState>;

/// Everything a handler needs to serve one exchange
///
/// The registry is the only mutable structure shared between connections;
/// the limits are fixed when the transport is created.
pub struct TransportState {
    /// Live streaming connections
    pub registry: ConnectionRegistry,
    /// Shutdown handles of accepted sockets
    pub sockets: Arc<SocketTracker>,
    /// Fan-in of POST bodies to `receive` subscriptions
    pub inbound: Arc<InboundHub>,
    /// Path reserved for event streams
    pub stream_path: String,
    /// Keep-alive interval for idle streams
    pub keep_alive: Option<Duration>,
    /// Outbox depth per streaming connection
    pub max_pending_events: usize,
    /// Largest accepted POST body
    pub max_body_bytes: usize,
}

impl TransportState {
    /// Build fresh state from a configuration
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            sockets: Arc::new(SocketTracker::new()),
            inbound: Arc::new(InboundHub::new()),
            stream_path: config.stream_path.clone(),
            keep_alive: config.keep_alive,
            max_pending_events: config.max_pending_events,
            max_body_bytes: config.max_body_bytes,
        }
    }

    /// Create shared state ready to hand to [`handler::build`](crate::handler::build)
    pub fn shared(config: &TransportConfig) -> SharedState {
        Arc::new(Self::new(config))
    }
}
