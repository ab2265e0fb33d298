// ABOUTME: Server-Sent Events frame encoder turning opaque payloads into one event each
// ABOUTME: Splits text on line breaks into data fields and base64-encodes non-UTF-8 payloads
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2026 dravr.ai

//! # SSE framing
//!
//! Every payload becomes exactly one event: one `data:` field per line of
//! its text, followed by a blank line. The event-stream grammar forbids raw
//! line breaks inside a field, so multi-line payloads are split rather than
//! embedded. A payload that is not valid UTF-8 cannot be split safely and is
//! sent as a single base64 line instead.
//!
//! Encoding is a pure function of the payload bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};

/// Field name prefix for event data
const DATA_FIELD: &[u8] = b"data:";

/// Comment frame sent on idle streams; parsers discard it without dispatching
const KEEP_ALIVE_FRAME: &[u8] = b": ping\n\n";

/// Encode a payload as one complete SSE event
pub fn encode_event(payload: &[u8]) -> Bytes {
    std::str::from_utf8(payload).map_or_else(|_| encode_binary(payload), encode_text)
}

/// The keep-alive comment frame
pub fn keep_alive_frame() -> Bytes {
    Bytes::from_static(KEEP_ALIVE_FRAME)
}

/// Encode UTF-8 text, one `data:` field per line
fn encode_text(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + DATA_FIELD.len() + 2);

    for line in split_lines(text) {
        put_data_field(&mut buf, line.as_bytes());
    }
    buf.put_u8(b'\n');

    buf.freeze()
}

/// Encode arbitrary bytes as a single base64 `data:` field
fn encode_binary(payload: &[u8]) -> Bytes {
    let encoded = STANDARD.encode(payload);
    let mut buf = BytesMut::with_capacity(encoded.len() + DATA_FIELD.len() + 2);

    put_data_field(&mut buf, encoded.as_bytes());
    buf.put_u8(b'\n');

    buf.freeze()
}

/// Append `data:<value>\n`
///
/// Parsers strip one space after the colon, so a value that itself starts
/// with a space gets an extra separator space to survive decoding.
fn put_data_field(buf: &mut BytesMut, value: &[u8]) {
    buf.put_slice(DATA_FIELD);
    if value.first() == Some(&b' ') {
        buf.put_u8(b' ');
    }
    buf.put_slice(value);
    buf.put_u8(b'\n');
}

/// Split on `\r\n`, `\n`, or a lone `\r`, keeping empty lines
///
/// A trailing line break yields a trailing empty line, so the client-side
/// join reproduces the original text.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\n' => {
                lines.push(&text[start..i]);
                i += 1;
                start = i;
            }
            b'\r' => {
                lines.push(&text[start..i]);
                i += if bytes.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            _ => i += 1,
        }
    }
    lines.push(&text[start..]);

    lines
}
