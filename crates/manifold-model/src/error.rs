// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use thiserror::Error;

use crate::types::{Message, ToolCall};

/// The gateway-wide error taxonomy.
///
/// Every kind either surfaces to the caller or is consumed by a documented
/// recovery path (retry for [`Error::is_retryable`] kinds, error-valued tool
/// results for per-call tool failures).
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied value is invalid.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Unknown session, model, tool, or agent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate-name registration or an invariant violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Session lock acquisition timed out; the caller may retry.
    #[error("session busy: {0}")]
    SessionBusy(String),

    /// Upstream 5xx or connection reset; retried with backoff before surfacing.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Auth failure or a request the provider will never accept.
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// Upstream 429.  Retryable.
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    /// The model ran out of output budget; the partial message is attached.
    #[error("response truncated at max tokens")]
    MaxTokens { message: Box<Message> },

    /// The model declined to answer; any partial message is attached.
    #[error("model refused the request")]
    Refusal { message: Box<Message> },

    /// The provider paused a long-running turn; resubmitting continues it.
    #[error("provider paused the turn")]
    PauseTurn { message: Box<Message> },

    /// The model emitted tool-call arguments that are not valid JSON.
    /// The assistant message assembled so far is attached and preserved.
    #[error("malformed tool arguments: {detail}")]
    MalformedToolArguments { detail: String, message: Box<Message> },

    /// The turn exceeded its tool-iteration budget (or emitted tool calls
    /// with no toolkit attached).  The full call trace is attached.
    #[error("tool loop limit reached after {iterations} iteration(s)")]
    ToolLoopLimit { iterations: u32, trace: Vec<ToolCall> },

    /// The target model cannot consume an attachment of this type.
    #[error("unsupported attachment: {0}")]
    UnsupportedAttachment(String),

    /// A typed option referenced a capability the provider does not have.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Agent input failed its schema.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Agent output failed its schema or did not parse as JSON.
    #[error("invalid output: {0}")]
    InvalidOutput(String),

    /// Caller cancellation or deadline expiry.  No state was persisted.
    #[error("operation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the orchestrator's backoff loop should retry this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transient(_) | Error::RateLimited { .. } => true,
            Error::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Classify an upstream HTTP status + body into the taxonomy.
    pub fn from_status(provider: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("{provider} error {status}: {body}");
        if status.as_u16() == 429 {
            Error::RateLimited { retry_after: None }
        } else if status.is_server_error() {
            Error::Transient(detail)
        } else {
            Error::Permanent(detail)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
