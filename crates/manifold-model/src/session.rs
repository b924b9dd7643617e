// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{ContentBlock, Message, Role, Usage};

/// A named, ordered conversation history plus metadata, persisted between
/// turns.  The session owns its messages; cross-references between tool
/// calls and results are by opaque id, checked by [`Session::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub cumulative_usage: Usage,
}

impl Session {
    pub fn new(label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            created_at: now,
            updated_at: now,
            default_model: None,
            system_prompt: None,
            history: Vec::new(),
            cumulative_usage: Usage::default(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn push(&mut self, msg: Message) {
        self.history.push(msg);
    }

    /// Bump `updated_at`, keeping it monotonically non-decreasing even if the
    /// wall clock stepped backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Record a settled turn: extend history, add usage, bump `updated_at`.
    pub fn settle(&mut self, messages: Vec<Message>, usage: Usage) {
        self.history.extend(messages);
        self.cumulative_usage.add(usage);
        self.touch();
    }

    /// Validate the structural invariants of the history:
    ///
    /// - user and assistant messages alternate, with tool-role messages only
    ///   between an assistant that emitted tool calls and the next assistant;
    /// - every tool-call id is answered by exactly one tool result with the
    ///   same id in the immediately following tool message, before any
    ///   further user message;
    /// - role/content discipline holds for every message.
    pub fn validate(&self) -> Result<()> {
        let mut pending: HashSet<String> = HashSet::new();
        let mut last_role: Option<Role> = None;

        for (i, msg) in self.history.iter().enumerate() {
            if !msg.role_content_valid() {
                return Err(Error::Conflict(format!(
                    "inconsistent session: message {i} violates role/content discipline"
                )));
            }
            match msg.role {
                Role::System => {
                    if i != 0 {
                        return Err(Error::Conflict(format!(
                            "inconsistent session: system message at position {i}"
                        )));
                    }
                }
                Role::User => {
                    if !pending.is_empty() {
                        return Err(Error::Conflict(format!(
                            "inconsistent session: user message at {i} while tool calls are unanswered"
                        )));
                    }
                    if last_role == Some(Role::User) {
                        return Err(Error::Conflict(format!(
                            "inconsistent session: consecutive user messages at {i}"
                        )));
                    }
                }
                Role::Assistant => {
                    if !pending.is_empty() {
                        return Err(Error::Conflict(format!(
                            "inconsistent session: assistant message at {i} while tool calls are unanswered"
                        )));
                    }
                    if last_role == Some(Role::Assistant) {
                        return Err(Error::Conflict(format!(
                            "inconsistent session: consecutive assistant messages at {i}"
                        )));
                    }
                    for call in msg.tool_calls() {
                        if !pending.insert(call.id.clone()) {
                            return Err(Error::Conflict(format!(
                                "inconsistent session: duplicate tool call id '{}'",
                                call.id
                            )));
                        }
                    }
                }
                Role::Tool => {
                    if pending.is_empty() {
                        return Err(Error::Conflict(format!(
                            "inconsistent session: tool message at {i} answers no pending call"
                        )));
                    }
                    for block in &msg.content {
                        if let ContentBlock::ToolResult { call_id, .. } = block {
                            if !pending.remove(call_id) {
                                return Err(Error::Conflict(format!(
                                    "inconsistent session: tool result for unknown call id '{call_id}'"
                                )));
                            }
                        }
                    }
                    if !pending.is_empty() {
                        return Err(Error::Conflict(format!(
                            "inconsistent session: tool message at {i} leaves calls unanswered"
                        )));
                    }
                }
            }
            last_role = Some(msg.role);
        }

        if !pending.is_empty() {
            return Err(Error::Conflict(
                "inconsistent session: history ends with unanswered tool calls".into(),
            ));
        }
        Ok(())
    }
}

/// Lightweight listing row for a session, without its history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub label: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    pub message_count: usize,
}

impl From<&Session> for SessionSummary {
    fn from(s: &Session) -> Self {
        Self {
            id: s.id.clone(),
            label: s.label.clone(),
            updated_at: s.updated_at,
            default_model: s.default_model.clone(),
            message_count: s.history.len(),
        }
    }
}

/// Filter for store listings.  Empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        if let Some(prefix) = &self.label_prefix {
            if !session.label.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if session.default_model.as_deref() != Some(model.as_str()) {
                return false;
            }
        }
        true
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCall, ToolResult};
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall { id: id.into(), name: "t".into(), arguments: json!({}) }
    }

    fn assistant_with_call(id: &str) -> Message {
        Message::new(
            Role::Assistant,
            vec![ContentBlock::from_tool_call(&call(id))],
        )
    }

    #[test]
    fn new_sessions_have_unique_ids() {
        assert_ne!(Session::new("a").id, Session::new("b").id);
    }

    #[test]
    fn empty_history_is_valid() {
        assert!(Session::new("s").validate().is_ok());
    }

    #[test]
    fn plain_user_assistant_alternation_is_valid() {
        let mut s = Session::new("s");
        s.push(Message::user("hi"));
        s.push(Message::assistant("hello"));
        s.push(Message::user("more"));
        s.push(Message::assistant("sure"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn tool_loop_shape_is_valid() {
        let mut s = Session::new("s");
        s.push(Message::user("weather?"));
        s.push(assistant_with_call("c1"));
        s.push(Message::tool_results(&[ToolResult::ok(call("c1"), json!("sunny"))]));
        s.push(Message::assistant("It is sunny"));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn unanswered_tool_call_before_user_is_invalid() {
        let mut s = Session::new("s");
        s.push(Message::user("go"));
        s.push(assistant_with_call("c1"));
        s.push(Message::user("nevermind"));
        assert!(matches!(s.validate(), Err(Error::Conflict(_))));
    }

    #[test]
    fn tool_result_with_unknown_id_is_invalid() {
        let mut s = Session::new("s");
        s.push(Message::user("go"));
        s.push(assistant_with_call("c1"));
        s.push(Message::tool_results(&[ToolResult::ok(call("c2"), json!(null))]));
        assert!(s.validate().is_err());
    }

    #[test]
    fn partial_tool_answers_are_invalid() {
        let mut s = Session::new("s");
        s.push(Message::user("go"));
        s.push(Message::new(
            Role::Assistant,
            vec![
                ContentBlock::from_tool_call(&call("c1")),
                ContentBlock::from_tool_call(&call("c2")),
            ],
        ));
        s.push(Message::tool_results(&[ToolResult::ok(call("c1"), json!(1))]));
        assert!(s.validate().is_err());
    }

    #[test]
    fn consecutive_user_messages_are_invalid() {
        let mut s = Session::new("s");
        s.push(Message::user("one"));
        s.push(Message::user("two"));
        assert!(s.validate().is_err());
    }

    #[test]
    fn trailing_unanswered_call_is_invalid() {
        let mut s = Session::new("s");
        s.push(Message::user("go"));
        s.push(assistant_with_call("c1"));
        assert!(s.validate().is_err());
    }

    #[test]
    fn touch_is_monotonic() {
        let mut s = Session::new("s");
        let before = s.updated_at;
        s.touch();
        assert!(s.updated_at >= before);
    }

    #[test]
    fn settle_extends_history_and_usage() {
        let mut s = Session::new("s");
        s.settle(
            vec![Message::user("q"), Message::assistant("a")],
            Usage::new(10, 5),
        );
        assert_eq!(s.history.len(), 2);
        assert_eq!(s.cumulative_usage, Usage::new(10, 5));
        s.settle(vec![], Usage::new(1, 1));
        assert_eq!(s.cumulative_usage, Usage::new(11, 6));
    }

    #[test]
    fn session_round_trips_through_json() {
        let mut s = Session::new("trip").with_model("mock/eliza-en");
        s.push(Message::user("hi"));
        s.push(assistant_with_call("c1"));
        s.push(Message::tool_results(&[ToolResult::ok(call("c1"), json!({"k": [1, 2]}))]));
        s.push(Message::assistant("done"));
        let json = serde_json::to_string_pretty(&s).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn filter_matches_label_prefix_and_model() {
        let s = Session::new("nightly-run").with_model("mock/eliza-en");
        assert!(SessionFilter::default().matches(&s));
        assert!(SessionFilter { label_prefix: Some("nightly".into()), model: None }.matches(&s));
        assert!(!SessionFilter { label_prefix: Some("adhoc".into()), model: None }.matches(&s));
        assert!(SessionFilter { label_prefix: None, model: Some("mock/eliza-en".into()) }.matches(&s));
        assert!(!SessionFilter { label_prefix: None, model: Some("other".into()) }.matches(&s));
    }
}
