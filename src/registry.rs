// ABOUTME: Registry of live streaming connections keyed by opaque integer ids
// ABOUTME: Mutex-guarded map with point-in-time snapshots for broadcast and sealing on shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::listener::{Peer, SocketId};

/// Opaque identifier of a streaming connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sse-{}", self.0)
    }
}

/// Outcome of queueing one frame on a connection's outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame queued for the connection's writer
    Queued,
    /// Outbox full; the reader is not keeping up
    Full,
    /// Writer side is gone; the connection is closing
    Closed,
}

/// A registered streaming connection
///
/// The socket itself belongs to the HTTP server task writing the response;
/// the registry only holds the sending half of the outbox feeding it.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    socket: Option<SocketId>,
    opened_at: Instant,
    outbox: mpsc::Sender<Bytes>,
}

impl Connection {
    /// Connection identifier
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, when the server recorded one
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Handle of the underlying socket, when accepted by the tracked listener
    pub const fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    /// When the stream was registered
    pub const fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Whether the response body is still being written
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }

    /// Queue an encoded frame without waiting
    pub fn deliver(&self, frame: Bytes) -> Delivery {
        match self.outbox.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

#[derive(Default)]
struct Members {
    connections: HashMap<ConnectionId, Connection>,
    sealed: bool,
}

/// Thread-safe set of live streaming connections
///
/// All membership changes go through this type. The lock is held only for
/// the map operation itself, never while a frame is written to a socket.
#[derive(Default)]
pub struct ConnectionRegistry {
    members: Mutex<Members>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection fed by `outbox`, returning its id
    ///
    /// Returns `None` once the registry has been sealed by [`clear`](Self::clear).
    pub fn add(&self, peer: Option<Peer>, outbox: mpsc::Sender<Bytes>) -> Option<ConnectionId> {
        let mut members = self.members.lock();
        if members.sealed {
            return None;
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        members.connections.insert(
            id,
            Connection {
                id,
                peer: peer.map(|p| p.addr),
                socket: peer.and_then(|p| p.socket),
                opened_at: Instant::now(),
                outbox,
            },
        );
        Some(id)
    }

    /// Deregister a connection; unknown ids are ignored
    ///
    /// Returns `true` if the connection was present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.members.lock().connections.remove(&id).is_some()
    }

    /// Invoke `f` on each connection registered at the moment of the call
    ///
    /// Membership is copied under the lock and `f` runs after it is released,
    /// so connections added or removed concurrently never show up mid-pass
    /// and `f` may call back into the registry.
    pub fn for_each(&self, mut f: impl FnMut(&Connection)) {
        for connection in &self.snapshot() {
            f(connection);
        }
    }

    /// Number of registered connections
    pub fn count(&self) -> usize {
        self.members.lock().connections.len()
    }

    /// Ids of registered connections, sorted by registration order
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.members.lock().connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Remove every connection and refuse further registrations
    ///
    /// Dropping the returned connections closes their outboxes, which ends
    /// each response body once its queued frames are written.
    pub fn clear(&self) -> Vec<Connection> {
        let mut members = self.members.lock();
        members.sealed = true;
        members.connections.drain().map(|(_, conn)| conn).collect()
    }

    fn snapshot(&self) -> Vec<Connection> {
        self.members.lock().connections.values().cloned().collect()
    }
}
