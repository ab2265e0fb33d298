// ABOUTME: Listener and delivery configuration for the SSE transport
// ABOUTME: Builder-style settings for address, stream path, keep-alive, queue depth, and shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::num::ParseIntError;
use std::time::Duration;

/// Default listen host
pub const DEFAULT_HOST: &str = "localhost";
/// Default listen port
pub const DEFAULT_PORT: u16 = 8080;
/// Default path of the event-stream endpoint
pub const DEFAULT_STREAM_PATH: &str = "/sse";

/// Interval between keep-alive comment frames (15 seconds)
const DEFAULT_KEEP_ALIVE_SECS: u64 = 15;
/// Frames buffered per streaming connection before it is evicted as too slow
const DEFAULT_MAX_PENDING_EVENTS: usize = 1024;
/// Largest accepted POST body (4 MiB)
const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;
/// Grace period for open exchanges to finish during `stop`
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;
/// Number of consecutive ports probed when `auto_port` is enabled
pub const AUTO_PORT_ATTEMPTS: u16 = 100;

/// Configuration for an [`SseTransport`](crate::transport::SseTransport)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Hostname or IP address to bind
    pub host: String,
    /// Port to bind (0 picks an ephemeral port)
    pub port: u16,
    /// Path reserved for long-lived GET event streams
    pub stream_path: String,
    /// Probe the following ports when the configured one is taken
    pub auto_port: bool,
    /// Interval of keep-alive comment frames on idle streams (`None` disables them)
    pub keep_alive: Option<Duration>,
    /// Outbox depth per streaming connection
    pub max_pending_events: usize,
    /// Largest POST body delivered to the owner
    pub max_body_bytes: usize,
    /// How long `stop` waits for the server to drain before aborting it
    pub shutdown_timeout: Duration,
    /// Disable Nagle's algorithm on accepted sockets
    pub tcp_nodelay: bool,
}

impl TransportConfig {
    /// Create a configuration for the given host and port with default settings
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream_path: DEFAULT_STREAM_PATH.to_owned(),
            auto_port: false,
            keep_alive: Some(Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS)),
            max_pending_events: DEFAULT_MAX_PENDING_EVENTS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            tcp_nodelay: true,
        }
    }

    /// Set the event-stream path (a missing leading `/` is added)
    #[must_use]
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = normalize_path(&path.into());
        self
    }

    /// Enable or disable probing for a free port
    #[must_use]
    pub const fn with_auto_port(mut self, enabled: bool) -> Self {
        self.auto_port = enabled;
        self
    }

    /// Set the keep-alive interval, or `None` to never send keep-alive frames
    #[must_use]
    pub const fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set the per-connection outbox depth (at least 1)
    #[must_use]
    pub fn with_max_pending_events(mut self, depth: usize) -> Self {
        self.max_pending_events = depth.max(1);
        self
    }

    /// Set the largest accepted POST body
    #[must_use]
    pub const fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Set the shutdown grace period
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Enable or disable `TCP_NODELAY` on accepted sockets
    #[must_use]
    pub const fn with_tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }

    /// `host:port` string handed to the listener
    pub fn address(&self) -> String {
        address_for(&self.host, self.port)
    }

    /// Addresses to try in order when binding
    ///
    /// A single entry unless `auto_port` is set, in which case up to
    /// [`AUTO_PORT_ATTEMPTS`] consecutive ports are listed, stopping at `u16::MAX`.
    pub fn bind_candidates(&self) -> Vec<String> {
        if !self.auto_port || self.port == 0 {
            return vec![self.address()];
        }

        (0..AUTO_PORT_ATTEMPTS)
            .map_while(|offset| self.port.checked_add(offset))
            .map(|port| address_for(&self.host, port))
            .collect()
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

/// Format a bindable address, bracketing bare IPv6 literals
fn address_for(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Ensure a route path starts with exactly one `/`
fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_start_matches('/');
    format!("/{trimmed}")
}

/// Parse a duration value from a string (in seconds); `0` means disabled
///
/// # Errors
///
/// Returns an error if the string cannot be parsed as a `u64`.
pub fn parse_duration_secs(input: &str) -> Result<Option<Duration>, ParseIntError> {
    let secs = input.trim().parse::<u64>()?;
    Ok((secs > 0).then_some(Duration::from_secs(secs)))
}
