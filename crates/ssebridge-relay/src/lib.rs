// ABOUTME: Relay loop and client configuration helpers behind the ssebridge-relay binary
// ABOUTME: Drains a receive subscription, logs each payload, and optionally echoes it to all streams
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use futures::StreamExt;
use serde_json::{json, Value};
use ssebridge::{PayloadStream, Transport};
use tracing::{debug, info, warn};

/// Server name used in the generated client configuration
pub const CLIENT_SERVER_NAME: &str = "documentServer";

/// Counters reported when the relay loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Payloads taken from the subscription
    pub received: u64,
    /// Payloads broadcast back to the event streams
    pub echoed: u64,
}

/// URL clients use to open the event stream
pub fn endpoint_url(host: &str, port: u16, path: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("http://[{host}]:{port}{path}")
    } else {
        format!("http://{host}:{port}{path}")
    }
}

/// Client configuration that bridges a stdio-only assistant to `endpoint`
pub fn client_config(endpoint: &str) -> Value {
    json!({
        "mcpServers": {
            CLIENT_SERVER_NAME: {
                "command": "npx",
                "args": ["mcp-remote", endpoint]
            }
        }
    })
}

/// Drain `inbound` until the transport stops
///
/// Each payload is logged; with `echo` it is broadcast to every open stream.
/// Returns when the subscription is cancelled or ends.
pub async fn pump<T>(transport: &T, mut inbound: PayloadStream, echo: bool) -> RelayStats
where
    T: Transport + ?Sized,
{
    let mut stats = RelayStats::default();

    while let Some(item) = inbound.next().await {
        let payload = match item {
            Ok(payload) => payload,
            Err(e) if e.is_cancelled() => {
                debug!("Receive subscription cancelled");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Receive subscription failed");
                break;
            }
        };

        stats.received += 1;
        info!(bytes = payload.len(), "Message received");

        if echo {
            match transport.send(payload).await {
                Ok(()) => stats.echoed += 1,
                Err(e) => warn!(error = %e, "Echo failed"),
            }
        }
    }

    stats
}
