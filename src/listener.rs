// ABOUTME: TCP listener for axum that keeps a shutdown handle for every accepted socket
// ABOUTME: Lets the transport force-close stalled streams on eviction and on stop
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Tracked listener
//!
//! hyper owns each accepted socket once the connection is served, so a
//! response blocked on a client that stopped reading cannot be cancelled from
//! the outside. The listener keeps a duplicate handle of every socket it
//! hands out; shutting that handle down fails the blocked write and hyper
//! tears the connection down.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::connect_info::Connected;
use axum::serve::IncomingStream;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error};

/// Back-off after an accept error that is not caused by a single client
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Identifier of an accepted socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

/// Remote address of an accepted socket plus the handle to force-close it
///
/// Handlers receive this as connect info. The listener's own address is
/// reported with `socket: None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    /// Remote socket address
    pub addr: SocketAddr,
    /// Tracking handle, absent for addresses that are not accepted sockets
    pub socket: Option<SocketId>,
}

/// Duplicate handles of live sockets
#[derive(Default)]
pub struct SocketTracker {
    sockets: Mutex<HashMap<SocketId, std::net::TcpStream>>,
    next_id: AtomicU64,
}

impl SocketTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Shut down both directions of one socket; unknown ids are ignored
    pub fn shutdown(&self, id: SocketId) {
        if let Some(socket) = self.sockets.lock().get(&id) {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!(socket = id.0, error = %e, "Socket shutdown failed");
            }
        }
    }

    /// Shut down every tracked socket
    pub fn shutdown_all(&self) {
        let sockets = self.sockets.lock();
        for socket in sockets.values() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        debug!(sockets = sockets.len(), "Forced all sockets closed");
    }

    /// Number of sockets still held by the server
    pub fn count(&self) -> usize {
        self.sockets.lock().len()
    }

    /// Start tracking a freshly accepted socket
    fn track(self: &Arc<Self>, stream: TcpStream) -> io::Result<TrackedStream> {
        let std_stream = stream.into_std()?;
        let handle = std_stream.try_clone()?;
        let inner = TcpStream::from_std(std_stream)?;

        let id = SocketId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sockets.lock().insert(id, handle);

        Ok(TrackedStream {
            id,
            inner,
            tracker: Arc::clone(self),
        })
    }

    fn release(&self, id: SocketId) {
        self.sockets.lock().remove(&id);
    }
}

/// Listener handed to `axum::serve`
pub struct TrackedListener {
    inner: TcpListener,
    tracker: Arc<SocketTracker>,
    nodelay: bool,
}

impl TrackedListener {
    /// Wrap a bound listener
    pub fn new(inner: TcpListener, tracker: Arc<SocketTracker>, nodelay: bool) -> Self {
        Self {
            inner,
            tracker,
            nodelay,
        }
    }

    fn configure(&self, stream: &TcpStream) -> io::Result<()> {
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        Ok(())
    }
}

impl axum::serve::Listener for TrackedListener {
    type Io = TrackedStream;
    type Addr = Peer;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let (stream, addr) = match self.inner.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    handle_accept_error(&e).await;
                    continue;
                }
            };

            if let Err(e) = self.configure(&stream) {
                debug!(peer = %addr, error = %e, "Failed to configure socket");
            }

            match self.tracker.track(stream) {
                Ok(tracked) => {
                    let socket = Some(tracked.id);
                    debug!(peer = %addr, socket = tracked.id.0, "Connection accepted");
                    return (tracked, Peer { addr, socket });
                }
                Err(e) => debug!(peer = %addr, error = %e, "Failed to track socket"),
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr().map(|addr| Peer { addr, socket: None })
    }
}

impl Connected<IncomingStream<'_, TrackedListener>> for Peer {
    fn connect_info(stream: IncomingStream<'_, TrackedListener>) -> Self {
        *stream.remote_addr()
    }
}

async fn handle_accept_error(e: &io::Error) {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) {
        return;
    }

    error!(error = %e, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}

/// Accepted socket that stops being tracked when hyper drops it
pub struct TrackedStream {
    id: SocketId,
    inner: TcpStream,
    tracker: Arc<SocketTracker>,
}

impl Drop for TrackedStream {
    fn drop(&mut self) {
        self.tracker.release(self.id);
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
