// ABOUTME: Multi-subscriber log of payloads received from clients via POST
// ABOUTME: Every subscription sees every payload in arrival order until the transport stops
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::types::{Payload, TransportError};

type Item = Result<Payload, TransportError>;

#[derive(Default)]
struct Subscribers {
    senders: HashMap<u64, mpsc::UnboundedSender<Item>>,
    closed: bool,
}

/// Fan-in point for inbound payloads
///
/// Publishing happens under the subscriber lock, so concurrent POST handlers
/// are serialized into one total order that every subscription observes.
#[derive(Default)]
pub struct InboundHub {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl InboundHub {
    /// Create an open hub with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new subscription
    ///
    /// Subscribing to a closed hub yields a stream that reports cancellation
    /// once and ends.
    pub fn subscribe(self: &Arc<Self>) -> PayloadStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock();
        if subscribers.closed {
            let _ = tx.send(Err(TransportError::cancelled()));
        } else {
            subscribers.senders.insert(id, tx);
        }
        drop(subscribers);

        PayloadStream {
            id,
            hub: Arc::downgrade(self),
            rx,
        }
    }

    /// Deliver a payload to every subscription, returning how many accepted it
    pub fn publish(&self, payload: &Payload) -> usize {
        let mut subscribers = self.subscribers.lock();
        if subscribers.closed {
            return 0;
        }
        subscribers
            .senders
            .retain(|_, tx| tx.send(Ok(payload.clone())).is_ok());
        subscribers.senders.len()
    }

    /// End every subscription with a cancellation error; later publishes are dropped
    pub fn close(&self) {
        let mut subscribers = self.subscribers.lock();
        subscribers.closed = true;
        for (_, tx) in subscribers.senders.drain() {
            let _ = tx.send(Err(TransportError::cancelled()));
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.subscribers.lock().closed
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().senders.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().senders.remove(&id);
    }
}

/// One subscription to inbound payloads
///
/// Yields `Ok(payload)` for each POST body in arrival order. When the
/// transport stops, yields a single `Err` with
/// [`ErrorKind::Cancelled`](crate::types::ErrorKind::Cancelled) and ends.
/// Dropping the stream unsubscribes it.
pub struct PayloadStream {
    id: u64,
    hub: Weak<InboundHub>,
    rx: mpsc::UnboundedReceiver<Item>,
}

impl Stream for PayloadStream {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for PayloadStream {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
