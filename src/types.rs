// ABOUTME: Core types for the SSE bridge: payload alias, transport error, and error categories
// ABOUTME: Mirrors the kind + message error shape shared by every operation on the transport
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # Core Types
//!
//! Payloads are opaque: the transport never parses them, it only frames
//! outbound bytes for the event stream and forwards inbound request bodies.

use std::fmt;

/// Opaque message payload moved between the transport and its owner
///
/// `Bytes` clones share the same immutable buffer, so a broadcast replicates
/// the payload to every recipient without copying or shared mutation.
pub type Payload = bytes::Bytes;

// ============================================================================
// Error Type
// ============================================================================

/// Error type for transport operations
#[derive(Debug, Clone)]
pub struct TransportError {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// Categories of errors produced by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The listener could not bind to the configured address
    Bind,
    /// Operation attempted before `start` or after `stop`
    NotConnected,
    /// A `receive` subscription was ended by `stop`
    Cancelled,
    /// Unexpected internal failure (server task died, address unavailable)
    Internal,
}

impl TransportError {
    /// Create a bind error
    pub fn bind(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Bind,
            message: message.into(),
        }
    }

    /// Create a not-connected error
    pub fn not_connected(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::NotConnected,
            message: message.into(),
        }
    }

    /// Create a cancellation error for subscriptions closed by shutdown
    pub fn cancelled() -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: "Transport stopped".to_owned(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
        }
    }

    /// Whether this error reports a subscription cancelled by shutdown
    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = TransportError::bind("Failed to bind 127.0.0.1:1: address in use");
        assert_eq!(
            err.to_string(),
            "Bind: Failed to bind 127.0.0.1:1: address in use"
        );
    }

    #[test]
    fn cancelled_is_flagged() {
        assert!(TransportError::cancelled().is_cancelled());
        assert!(!TransportError::not_connected("x").is_cancelled());
    }
}
