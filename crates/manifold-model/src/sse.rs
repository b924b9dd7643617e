// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Minimal SSE line reassembly shared by the streaming drivers.
//!
//! Provider byte streams arrive in arbitrary TCP chunks, so `data:` lines can
//! be split mid-payload.  Only complete lines (terminated by `\n`) are
//! emitted; the remainder is carried forward to the next chunk.

use futures::{Stream, StreamExt};

use crate::error::{Error, Result};

/// Split a provider byte stream into complete SSE `data:` payloads.
pub fn data_lines<B, E>(
    bytes: impl Stream<Item = std::result::Result<B, E>> + Send,
) -> impl Stream<Item = Result<String>> + Send
where
    B: AsRef<[u8]>,
    E: Into<Error>,
{
    bytes
        .scan(String::new(), |buf, chunk| {
            let mut out: Vec<Result<String>> = Vec::new();
            match chunk {
                Ok(b) => {
                    buf.push_str(&String::from_utf8_lossy(b.as_ref()));
                    while let Some(pos) = buf.find('\n') {
                        let line = buf[..pos].trim_end_matches('\r').to_string();
                        buf.drain(..=pos);
                        if let Some(data) = line.strip_prefix("data:") {
                            out.push(Ok(data.trim().to_string()));
                        }
                    }
                }
                Err(e) => out.push(Err(e.into())),
            }
            futures::future::ready(Some(out))
        })
        .flat_map(futures::stream::iter)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
