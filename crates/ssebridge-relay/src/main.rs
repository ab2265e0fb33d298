// ABOUTME: CLI entry point for the ssebridge relay binary
// ABOUTME: Parses arguments, starts the SSE transport, relays payloads until SIGINT/SIGTERM
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::sync::Arc;

use clap::Parser;
use ssebridge::config::{parse_duration_secs, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_STREAM_PATH};
use ssebridge::{SseTransport, Transport, TransportConfig, TransportError};
use tokio::signal;
use tracing::{error, info, warn};

use ssebridge_relay::{client_config, endpoint_url, pump};

/// ssebridge-relay: serve an HTTP/SSE endpoint and relay POSTed messages
#[derive(Parser)]
#[command(name = "ssebridge-relay", version, about)]
struct Cli {
    /// HTTP listen host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// HTTP listen port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Path of the event-stream endpoint
    #[arg(long, default_value = DEFAULT_STREAM_PATH)]
    path: String,

    /// Probe the following ports when the configured one is taken
    #[arg(short, long)]
    auto_port: bool,

    /// Seconds between keep-alive comments on idle streams (0 disables)
    #[arg(long, default_value = "15")]
    keep_alive: String,

    /// Broadcast every received message back to all event streams
    #[arg(long)]
    echo: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the client configuration
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let keep_alive = parse_duration_secs(&cli.keep_alive).map_err(|e| {
        TransportError::internal(format!("Invalid --keep-alive {}: {e}", cli.keep_alive))
    })?;

    let config = TransportConfig::new(cli.host.clone(), cli.port)
        .with_stream_path(cli.path)
        .with_auto_port(cli.auto_port)
        .with_keep_alive(keep_alive);
    let path = config.stream_path.clone();
    let transport = Arc::new(SseTransport::new(config));

    if let Err(e) = transport.start().await {
        error!(error = %e, "Failed to start SSE relay");
        return Err(e.into());
    }

    let port = transport
        .local_addr()
        .map(|addr| addr.port())
        .ok_or_else(|| TransportError::internal("Transport started without an address"))?;
    let endpoint = endpoint_url(&cli.host, port, &path);

    info!(endpoint = %endpoint, echo = cli.echo, "SSE relay ready, press Ctrl+C to stop");
    println!("{}", serde_json::to_string_pretty(&client_config(&endpoint))?);

    let relay = tokio::spawn({
        let transport = Arc::clone(&transport);
        let inbound = transport.receive();
        let echo = cli.echo;
        async move { pump(transport.as_ref(), inbound, echo).await }
    });

    shutdown_signal().await;
    info!("Shutting down SSE relay");
    transport.stop().await;

    match relay.await {
        Ok(stats) => info!(
            received = stats.received,
            echoed = stats.echoed,
            "SSE relay stopped"
        ),
        Err(e) => warn!(error = %e, "Relay task failed"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
