use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Attachments ──────────────────────────────────────────────────────────────

/// A binary blob attached to a message: raw bytes plus the MIME type the
/// normalizer detected for them.
///
/// Attachments are owned by the message that carries them and serialized
/// inline as base64 so a persisted session is a single self-contained JSON
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Original filename, when the caller supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Detected MIME type (`image/png`, `audio/wav`, `application/octet-stream`, …).
    pub mime_type: String,
    /// Raw bytes, base64-encoded on the wire and on disk.
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn new(filename: Option<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self { filename, mime_type: mime_type.into(), data }
    }

    /// Size of the raw payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Render as a data URL: `data:<mime>;base64,<b64>`.
    pub fn to_data_url(&self) -> String {
        use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
        format!("data:{};base64,{}", self.mime_type, B64.encode(&self.data))
    }

    /// `true` when the MIME type is `image/*`.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// `true` when the MIME type is `audio/*`.
    pub fn is_audio(&self) -> bool {
        self.mime_type.starts_with("audio/")
    }
}

/// Serde adapter that stores `Vec<u8>` as a base64 string.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        B64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Parse a data URL of the form `data:<mime>;base64,<b64>` back into an
/// [`Attachment`].  Returns `Err` for non-data-URLs so callers can fall back
/// to treating the string as a plain remote reference.
pub fn parse_data_url(url: &str) -> Result<Attachment, &'static str> {
    use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
    let rest = url.strip_prefix("data:").ok_or("not a data URL")?;
    let (meta, b64) = rest.split_once(',').ok_or("malformed data URL")?;
    let mime = meta.strip_suffix(";base64").ok_or("data URL is not base64")?;
    let data = B64.decode(b64.as_bytes()).map_err(|_| "invalid base64 payload")?;
    Ok(Attachment::new(None, mime, data))
}

// ─── Tool calls and results ───────────────────────────────────────────────────

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier assigned by the provider, unique within one
    /// assistant turn.  Forwarded verbatim in the matching result.
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: Value,
}

/// Why a tool call produced an error-valued result instead of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolErrorKind {
    /// The arguments did not decode against the registered parameter schema.
    InvalidArguments,
    /// No tool with this name is registered in the toolkit.
    UnknownTool,
    /// The handler's return value could not be JSON-encoded.
    ResultEncoding,
    /// The per-call deadline expired before the handler finished.
    Timeout,
    /// The handler panicked; the panic was captured and isolated.
    Panicked,
    /// The handler returned an error.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub detail: String,
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.detail)
    }
}

/// The outcome of executing one [`ToolCall`].
///
/// Tool failures are values, not errors: an error-valued result is fed back
/// to the model inside the tool message so it can recover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call: ToolCall,
    /// JSON value produced by the handler.  For error results this is an
    /// object of the form `{"error": "<detail>"}`.
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResult {
    pub fn ok(call: ToolCall, value: Value) -> Self {
        Self { call, value, error: None }
    }

    pub fn err(call: ToolCall, kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            call,
            value: serde_json::json!({ "error": detail }),
            error: Some(ToolError { kind, detail }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A tool schema offered to the model: what the provider sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

// ─── Content blocks ───────────────────────────────────────────────────────────

/// A single block in a message's ordered content sequence.
///
/// Serialization carries an explicit `type` discriminator so new block kinds
/// are additive; equality is structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        attachment: Attachment,
    },
    Audio {
        attachment: Attachment,
        /// Container format hint (`"wav"`, `"mp3"`, …).
        format: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        value: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// A provider-emitted hidden reasoning trace.  Preserved in history but
    /// excluded from the user-visible text of an assistant message.
    Thinking {
        text: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn thinking(text: impl Into<String>) -> Self {
        Self::Thinking { text: text.into() }
    }

    /// Wrap an attachment in the block kind its MIME type calls for.
    /// Audio gets its container format from the MIME subtype.
    pub fn from_attachment(attachment: Attachment) -> Self {
        if attachment.is_audio() {
            let format = attachment
                .mime_type
                .split('/')
                .nth(1)
                .unwrap_or("wav")
                .to_string();
            Self::Audio { attachment, format }
        } else {
            Self::Image { attachment }
        }
    }

    pub fn from_tool_call(call: &ToolCall) -> Self {
        Self::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        }
    }

    pub fn from_tool_result(result: &ToolResult) -> Self {
        Self::ToolResult {
            call_id: result.call.id.clone(),
            value: result.value.clone(),
            is_error: result.is_error(),
        }
    }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Token usage from one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens }
    }

    pub fn add(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }

    /// Merge a cumulative usage report: providers re-send running totals as
    /// the stream progresses, so keep the maximum observed per field.
    pub fn merge_max(&mut self, other: Usage) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
    }

    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// Message metadata: when it was created and which provider/model produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Default for MessageMeta {
    fn default() -> Self {
        Self { created_at: Utc::now(), provider: None, model: None, usage: None }
    }
}

/// A single message in a conversation: a role plus an ordered sequence of
/// content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub meta: MessageMeta,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content, meta: MessageMeta::default() }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![ContentBlock::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }

    /// A user message carrying text plus attachments, in that order.
    /// An empty `text` contributes no text block.
    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        let text = text.into();
        let mut content = Vec::with_capacity(attachments.len() + 1);
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
        content.extend(attachments.into_iter().map(ContentBlock::from_attachment));
        Self::new(Role::User, content)
    }

    /// A tool-role message wrapping a batch of results, preserving call order.
    pub fn tool_results(results: &[ToolResult]) -> Self {
        Self::new(
            Role::Tool,
            results.iter().map(ContentBlock::from_tool_result).collect(),
        )
    }

    /// The user-visible text of this message: all `Text` blocks concatenated.
    /// Thinking blocks are excluded.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        out
    }

    /// All tool calls carried by this message, in block order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolCall { id, name, arguments } => Some(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCall { .. }))
    }

    /// All attachments (image and audio blocks) carried by this message.
    pub fn attachments(&self) -> Vec<&Attachment> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Image { attachment } => Some(attachment),
                ContentBlock::Audio { attachment, .. } => Some(attachment),
                _ => None,
            })
            .collect()
    }

    /// Check the role/content discipline: `system` carries only text, `tool`
    /// carries only tool results.  `user` and `assistant` are unrestricted.
    pub fn role_content_valid(&self) -> bool {
        match self.role {
            Role::System => self
                .content
                .iter()
                .all(|b| matches!(b, ContentBlock::Text { .. })),
            Role::Tool => self
                .content
                .iter()
                .all(|b| matches!(b, ContentBlock::ToolResult { .. })),
            Role::User | Role::Assistant => true,
        }
    }
}

// ─── Model descriptors ────────────────────────────────────────────────────────

/// Feature flags a model advertises.  Providers refuse typed options that
/// reference a capability the model does not carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub chat: bool,
    #[serde(default)]
    pub embedding: bool,
    #[serde(default)]
    pub vision: bool,
    #[serde(default)]
    pub function_calling: bool,
    #[serde(default)]
    pub thinking: bool,
}

impl Capabilities {
    pub fn chat() -> Self {
        Self { chat: true, ..Default::default() }
    }

    pub fn embedding() -> Self {
        Self { embedding: true, ..Default::default() }
    }
}

/// Metadata for a single model, immutable during a process lifetime except
/// through an explicit catalogue refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Provider-scoped identifier (e.g. `"gemini-2.0-flash"`).
    pub id: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Owning provider id (`"google"`, `"anthropic"`, `"mistral"`, `"mock"`).
    pub provider: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl Model {
    /// `true` when `name` matches the id or any alias.
    pub fn matches(&self, name: &str) -> bool {
        self.id == name || self.aliases.iter().any(|a| a == name)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Message construction ──────────────────────────────────────────────────

    #[test]
    fn message_user_sets_role_and_text() {
        let m = Message::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.text(), "hello");
    }

    #[test]
    fn message_text_concatenates_text_blocks_only() {
        let m = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::thinking("pondering"),
                ContentBlock::text("Hello, "),
                ContentBlock::text("world"),
            ],
        );
        assert_eq!(m.text(), "Hello, world");
    }

    #[test]
    fn tool_results_message_preserves_order() {
        let r1 = ToolResult::ok(
            ToolCall { id: "a".into(), name: "t".into(), arguments: json!({}) },
            json!("first"),
        );
        let r2 = ToolResult::err(
            ToolCall { id: "b".into(), name: "t".into(), arguments: json!({}) },
            ToolErrorKind::Failed,
            "boom",
        );
        let m = Message::tool_results(&[r1, r2]);
        assert_eq!(m.role, Role::Tool);
        match &m.content[0] {
            ContentBlock::ToolResult { call_id, is_error, .. } => {
                assert_eq!(call_id, "a");
                assert!(!is_error);
            }
            other => panic!("wrong block: {other:?}"),
        }
        match &m.content[1] {
            ContentBlock::ToolResult { call_id, is_error, value } => {
                assert_eq!(call_id, "b");
                assert!(is_error);
                assert_eq!(value["error"], "boom");
            }
            other => panic!("wrong block: {other:?}"),
        }
    }

    #[test]
    fn tool_calls_extracted_in_block_order() {
        let m = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::text("let me check"),
                ContentBlock::ToolCall { id: "c1".into(), name: "a".into(), arguments: json!({}) },
                ContentBlock::ToolCall { id: "c2".into(), name: "b".into(), arguments: json!({}) },
            ],
        );
        let calls = m.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[1].id, "c2");
        assert!(m.has_tool_calls());
    }

    // ── Role/content discipline ───────────────────────────────────────────────

    #[test]
    fn system_message_with_text_only_is_valid() {
        assert!(Message::system("prompt").role_content_valid());
    }

    #[test]
    fn system_message_with_image_is_invalid() {
        let m = Message::new(
            Role::System,
            vec![ContentBlock::Image {
                attachment: Attachment::new(None, "image/png", vec![1]),
            }],
        );
        assert!(!m.role_content_valid());
    }

    #[test]
    fn tool_message_with_text_block_is_invalid() {
        let m = Message::new(Role::Tool, vec![ContentBlock::text("nope")]);
        assert!(!m.role_content_valid());
    }

    // ── Attachments ───────────────────────────────────────────────────────────

    #[test]
    fn attachment_data_url_round_trip() {
        let a = Attachment::new(Some("pic.png".into()), "image/png", vec![1, 2, 3, 255]);
        let url = a.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        let back = parse_data_url(&url).unwrap();
        assert_eq!(back.mime_type, "image/png");
        assert_eq!(back.data, a.data);
    }

    #[test]
    fn parse_data_url_rejects_plain_urls() {
        assert!(parse_data_url("https://example.com/a.png").is_err());
    }

    #[test]
    fn user_with_attachments_orders_text_first() {
        let m = Message::user_with_attachments(
            "look",
            vec![Attachment::new(None, "image/jpeg", vec![0xff, 0xd8])],
        );
        assert!(matches!(m.content[0], ContentBlock::Text { .. }));
        assert!(matches!(m.content[1], ContentBlock::Image { .. }));
        assert_eq!(m.attachments().len(), 1);
    }

    #[test]
    fn audio_attachment_becomes_audio_block_with_format() {
        let block = ContentBlock::from_attachment(Attachment::new(None, "audio/mp3", vec![0]));
        match block {
            ContentBlock::Audio { format, .. } => assert_eq!(format, "mp3"),
            other => panic!("wrong block: {other:?}"),
        }
    }

    // ── Serialization ─────────────────────────────────────────────────────────

    #[test]
    fn content_block_carries_type_discriminator() {
        let json = serde_json::to_value(ContentBlock::text("hi")).unwrap();
        assert_eq!(json["type"], "text");
        let json = serde_json::to_value(ContentBlock::ToolCall {
            id: "c1".into(),
            name: "f".into(),
            arguments: json!({"x": 1}),
        })
        .unwrap();
        assert_eq!(json["type"], "tool_call");
    }

    #[test]
    fn message_round_trips_through_json() {
        let m = Message::new(
            Role::Assistant,
            vec![
                ContentBlock::text("see chart"),
                ContentBlock::Image {
                    attachment: Attachment::new(Some("c.png".into()), "image/png", vec![9, 8, 7]),
                },
                ContentBlock::ToolResult { call_id: "c9".into(), value: json!(42), is_error: false },
            ],
        );
        let json = serde_json::to_string(&m).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn attachment_bytes_survive_serde() {
        let a = Attachment::new(None, "application/octet-stream", (0u8..=255).collect());
        let json = serde_json::to_string(&a).unwrap();
        let back: Attachment = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, a.data);
    }

    // ── Usage ─────────────────────────────────────────────────────────────────

    #[test]
    fn usage_add_accumulates() {
        let mut u = Usage::new(10, 5);
        u.add(Usage::new(3, 2));
        assert_eq!(u, Usage::new(13, 7));
    }

    #[test]
    fn usage_merge_max_handles_cumulative_reports() {
        let mut u = Usage::new(100, 0);
        u.merge_max(Usage::new(100, 7));
        u.merge_max(Usage::new(100, 19));
        assert_eq!(u, Usage::new(100, 19));
    }

    // ── Model descriptors ─────────────────────────────────────────────────────

    #[test]
    fn model_matches_id_and_aliases() {
        let m = Model {
            id: "gemini-2.0-flash".into(),
            display_name: "Gemini 2.0 Flash".into(),
            provider: "google".into(),
            aliases: vec!["flash".into()],
            capabilities: Capabilities::chat(),
        };
        assert!(m.matches("gemini-2.0-flash"));
        assert!(m.matches("flash"));
        assert!(!m.matches("pro"));
    }
}
