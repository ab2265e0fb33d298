// ABOUTME: HTTP + Server-Sent Events transport for AI assistant document servers
// ABOUTME: Re-exports the transport facade, its configuration, and the building blocks behind it
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # ssebridge: SSE transport
//!
//! A single HTTP listener that carries a continuous server-to-client event
//! stream to any number of clients while short-lived POST requests on the
//! same port carry client-to-server messages. Payloads are opaque bytes in
//! both directions; the protocol layer on top decides what they mean.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ssebridge::{SseTransport, Transport, TransportConfig};
//! use tokio_stream::StreamExt;
//!
//! # async fn example() -> Result<(), ssebridge::types::TransportError> {
//! let transport = SseTransport::new(TransportConfig::new("127.0.0.1", 8080));
//! transport.start().await?;
//!
//! let mut inbound = transport.receive();
//! while let Some(Ok(message)) = inbound.next().await {
//!     // Answer every client that holds an event stream open
//!     transport.send(message).await?;
//! }
//!
//! transport.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`transport`]: `Transport` trait and the `SseTransport` facade
//! - [`config`]: listener address, stream path, and delivery limits
//! - [`handler`]: per-exchange HTTP handling and the streaming response body
//! - [`router`]: request classification by method and path
//! - [`registry`]: live streaming connections
//! - [`codec`]: SSE event framing
//! - [`inbound`]: fan-in of POST bodies to subscriptions
//! - [`listener`]: accepted-socket tracking for forced close
//! - [`state`]: state shared by handlers
//! - [`types`]: payload alias and errors

/// Core types: payload alias and transport errors
pub mod types;

/// SSE event framing
pub mod codec;
/// Listener and delivery configuration
pub mod config;
/// Per-exchange HTTP handling
pub mod handler;
/// Fan-in of received payloads
pub mod inbound;
/// TCP listener with per-socket shutdown handles
pub mod listener;
/// Registry of live streaming connections
pub mod registry;
/// Request classification
pub mod router;
/// Handler-shared state
pub mod state;
/// Transport trait and facade
pub mod transport;

pub use config::TransportConfig;
pub use inbound::PayloadStream;
pub use registry::{ConnectionId, ConnectionRegistry};
pub use transport::{SseTransport, Transport};
pub use types::{ErrorKind, Payload, TransportError};
