// ABOUTME: Classifies inbound HTTP requests by method and path into transport exchanges
// ABOUTME: Stream path GETs open event streams; POST, OPTIONS, and everything else are short-lived
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

use axum::http::Method;

/// Kind of exchange an inbound request starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Long-lived GET on the stream path carrying broadcast events
    OpenStream,
    /// POST whose body is one payload for the owner
    SubmitMessage,
    /// CORS preflight
    Preflight,
    /// Anything else: answered with the status page
    Informational,
}

/// Classify a request
///
/// Only the path is compared against `stream_path`; query strings never
/// change the classification. POST and OPTIONS match on any path.
pub fn classify(method: &Method, path: &str, stream_path: &str) -> RequestKind {
    if *method == Method::POST {
        RequestKind::SubmitMessage
    } else if *method == Method::OPTIONS {
        RequestKind::Preflight
    } else if *method == Method::GET && path == stream_path {
        RequestKind::OpenStream
    } else {
        RequestKind::Informational
    }
}
