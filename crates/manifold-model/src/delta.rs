// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

use crate::types::{Role, Usage};

/// Why a provider stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of turn (including turns that end in tool calls).
    Stop,
    /// Output-token budget exhausted; the message is truncated.
    MaxTokens,
    /// The model declined to answer (safety / policy stop).
    Refusal,
    /// Long-running turn paused by the provider; resubmit to continue.
    PauseTurn,
}

/// One incremental event in a streaming provider response, in canonical form.
///
/// Every driver translates its vendor stream into this shape; the multiplexer
/// consumes it to fan deltas out to subscribers and to reconstruct the final
/// assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    /// Message role; carried at most once, by the first delta that knows it.
    Role { role: Role },
    /// A chunk of visible text.
    Text { text: String },
    /// A chunk of hidden reasoning.
    Thinking { text: String },
    /// A tool-call fragment.  Providers that stream arguments send the id and
    /// name on the first fragment for an index and argument chunks on the
    /// rest; fragments for the same call share an index.
    ToolCall {
        index: u32,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        id: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        name: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        arguments: String,
    },
    /// A (possibly cumulative) usage report.
    Usage { usage: Usage },
    /// Terminal event: closes assembly and carries final usage when known.
    Finish {
        reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

impl Delta {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    pub fn finish(reason: FinishReason) -> Self {
        Self::Finish { reason, usage: None }
    }
}

/// Subscriber end of a streaming turn: deltas are forwarded in arrival order.
/// A dropped receiver is not an error; the turn keeps running.
pub type DeltaSink = tokio::sync::mpsc::Sender<Delta>;

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_serializes_with_type_tag() {
        let json = serde_json::to_value(Delta::text("hi")).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hi");
    }

    #[test]
    fn tool_call_delta_omits_empty_fields() {
        let d = Delta::ToolCall {
            index: 0,
            id: String::new(),
            name: String::new(),
            arguments: "{\"city\":".into(),
        };
        let json = serde_json::to_value(&d).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("name").is_none());
        assert_eq!(json["arguments"], "{\"city\":");
    }

    #[test]
    fn finish_round_trips_with_usage() {
        let d = Delta::Finish {
            reason: FinishReason::Stop,
            usage: Some(Usage::new(12, 34)),
        };
        let json = serde_json::to_string(&d).unwrap();
        let back: Delta = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn finish_reason_uses_snake_case() {
        let json = serde_json::to_value(FinishReason::MaxTokens).unwrap();
        assert_eq!(json, "max_tokens");
    }
}
