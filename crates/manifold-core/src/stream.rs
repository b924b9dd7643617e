// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming multiplexer: fans provider deltas out to a subscriber sink and
//! reconstructs the final assistant message from the same event sequence.
//!
//! Reconstruction rules, applied in arrival order:
//! 1. the role is set once, by the first delta that carries it;
//! 2. text chunks concatenate into the current text block, and any
//!    non-text delta flushes that block;
//! 3. tool-call fragments accumulate by index — the id and name come from
//!    the first fragment that carries them, argument chunks concatenate,
//!    and the final JSON must parse;
//! 4. a finish delta closes assembly and provides usage totals when known.
//!
//! The assembled text is byte-equivalent to the concatenation of the text
//! chunks regardless of delta granularity.

use std::collections::BTreeMap;

use futures::StreamExt;
use tracing::warn;

use manifold_model::{
    ContentBlock, Ctx, Delta, DeltaSink, DeltaStream, Error, FinishReason, Message, Result, Role,
    Usage,
};

/// The fully-reconstructed outcome of one provider stream.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub message: Message,
    pub usage: Usage,
    pub finish: FinishReason,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Consume a provider stream to completion.
///
/// Every delta is forwarded to `sink` (when supplied) in arrival order; a
/// dropped receiver does not interrupt the turn.  Cancellation aborts the
/// provider stream and discards the partial message.
pub async fn collect(
    ctx: &Ctx,
    mut stream: DeltaStream,
    sink: Option<&DeltaSink>,
) -> Result<Assembled> {
    let mut role: Option<Role> = None;
    let mut blocks: Vec<ContentBlock> = Vec::new();
    let mut text_buf = String::new();
    let mut think_buf = String::new();
    let mut pending: BTreeMap<u32, PendingCall> = BTreeMap::new();
    let mut usage = Usage::default();
    let mut finish: Option<FinishReason> = None;

    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.done() => return Err(Error::Cancelled),
            next = stream.next() => next,
        };
        let Some(delta) = next else { break };
        let delta = delta?;

        if let Some(sink) = sink {
            let _ = sink.send(delta.clone()).await;
        }

        match delta {
            Delta::Role { role: r } => {
                role.get_or_insert(r);
            }
            Delta::Text { text } => {
                if !think_buf.is_empty() {
                    blocks.push(ContentBlock::thinking(std::mem::take(&mut think_buf)));
                }
                text_buf.push_str(&text);
            }
            Delta::Thinking { text } => {
                if !text_buf.is_empty() {
                    blocks.push(ContentBlock::text(std::mem::take(&mut text_buf)));
                }
                think_buf.push_str(&text);
            }
            Delta::ToolCall { index, id, name, arguments } => {
                if !text_buf.is_empty() {
                    blocks.push(ContentBlock::text(std::mem::take(&mut text_buf)));
                }
                if !think_buf.is_empty() {
                    blocks.push(ContentBlock::thinking(std::mem::take(&mut think_buf)));
                }
                let call = pending.entry(index).or_default();
                if !id.is_empty() {
                    call.id = id;
                }
                if !name.is_empty() {
                    call.name = name;
                }
                call.arguments.push_str(&arguments);
            }
            Delta::Usage { usage: u } => usage.merge_max(u),
            Delta::Finish { reason, usage: u } => {
                if let Some(u) = u {
                    usage.merge_max(u);
                }
                finish = Some(reason);
                break;
            }
        }
    }

    if !think_buf.is_empty() {
        blocks.push(ContentBlock::thinking(think_buf));
    }
    if !text_buf.is_empty() {
        blocks.push(ContentBlock::text(text_buf));
    }

    // Flush accumulated tool calls in index order.  A call without a name
    // cannot be dispatched and is dropped; a missing id gets a synthetic one
    // so the result can still be matched.
    let mut malformed: Option<String> = None;
    for (index, call) in pending {
        if call.name.is_empty() {
            warn!(index, "dropping tool call without a name");
            continue;
        }
        let arguments = if call.arguments.trim().is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(&call.arguments) {
                Ok(v) => v,
                Err(e) => {
                    malformed.get_or_insert(format!(
                        "tool '{}' arguments do not parse as JSON: {e}",
                        call.name
                    ));
                    continue;
                }
            }
        };
        let id = if call.id.is_empty() {
            warn!(tool = %call.name, index, "tool call without id; synthesizing one");
            format!("call_{index}")
        } else {
            call.id
        };
        blocks.push(ContentBlock::ToolCall { id, name: call.name, arguments });
    }

    let message = Message::new(role.unwrap_or(Role::Assistant), blocks);
    if let Some(detail) = malformed {
        return Err(Error::MalformedToolArguments { detail, message: Box::new(message) });
    }

    Ok(Assembled {
        message,
        usage,
        finish: finish.unwrap_or(FinishReason::Stop),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
