//! Core value types: messages, tool calls and results, token usage, responses.
//!
//! Every type here is an immutable value once built. Messages are created by
//! application code or by the orchestration loop and are never mutated in place;
//! builder-style methods such as [`Message::with_name`] return a new value.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message role in the conversation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content block types that can appear in a multi-part message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
    Audio(AudioBlock),
}

/// Text content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Image content block, referenced by URL or data URI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ImageBlock {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Audio content block carrying base64 data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBlock {
    pub data: String,
    pub format: String,
}

impl AudioBlock {
    pub fn new(data: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            format: format.into(),
        }
    }
}

/// Message content: plain text or an ordered list of blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Text of the content. Text blocks are joined with newlines; media blocks are skipped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::Text(t) => Some(t.text.as_str()),
                    ContentBlock::Image(_) | ContentBlock::Audio(_) => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// True when there is no text and no media.
    pub fn is_blank(&self) -> bool {
        match self {
            MessageContent::Text(text) => text.trim().is_empty(),
            MessageContent::Blocks(blocks) => blocks.iter().all(|block| match block {
                ContentBlock::Text(t) => t.text.trim().is_empty(),
                ContentBlock::Image(_) | ContentBlock::Audio(_) => false,
            }),
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        MessageContent::Blocks(blocks)
    }
}

/// A tool invocation requested by the model.
///
/// `id` is the provider's opaque correlation token; the matching tool-role
/// message must carry it back as `tool_call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Build a call from the JSON argument text a provider sent.
    ///
    /// Malformed JSON, or JSON that is not an object, decodes to an empty
    /// argument map instead of failing. Validation in the tool registry then
    /// reports any missing parameters back to the model.
    pub fn from_json(id: impl Into<String>, name: impl Into<String>, arguments: &str) -> Self {
        let name = name.into();
        let arguments = if arguments.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(arguments) {
                Ok(Value::Object(map)) => map,
                Ok(other) => {
                    log::warn!(
                        "Tool call '{}' arguments are not a JSON object ({}), using empty arguments",
                        name,
                        other
                    );
                    Map::new()
                }
                Err(e) => {
                    log::warn!(
                        "Tool call '{}' has malformed JSON arguments ({}), using empty arguments",
                        name,
                        e
                    );
                    Map::new()
                }
            }
        };

        Self {
            id: id.into(),
            name,
            arguments,
        }
    }

    /// Arguments serialized back to JSON text, the shape providers expect.
    pub fn arguments_json(&self) -> String {
        Value::Object(self.arguments.clone()).to_string()
    }
}

/// Outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// A message in the conversation.
///
/// Fields are private so the role/`tool_call_id` invariant cannot be broken
/// after construction: a tool-role message always carries `tool_call_id`, and no
/// other role ever does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct Message {
    role: Role,
    content: MessageContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ToolCall>,
}

#[derive(Deserialize)]
struct RawMessage {
    role: Role,
    content: MessageContent,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tool_call_id: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
}

impl TryFrom<RawMessage> for Message {
    type Error = Error;

    fn try_from(raw: RawMessage) -> Result<Self> {
        let message = Message::try_new(raw.role, raw.content, raw.name, raw.tool_call_id)?;
        if raw.tool_calls.is_empty() {
            Ok(message)
        } else if raw.role == Role::Assistant {
            Ok(Message {
                tool_calls: raw.tool_calls,
                ..message
            })
        } else {
            Err(Error::invalid_input(format!(
                "only assistant messages may carry tool calls, got role '{}'",
                raw.role
            )))
        }
    }
}

impl Message {
    /// Build a message, checking that `tool_call_id` is present exactly when
    /// the role is [`Role::Tool`].
    pub fn try_new(
        role: Role,
        content: impl Into<MessageContent>,
        name: Option<String>,
        tool_call_id: Option<String>,
    ) -> Result<Self> {
        match (role, &tool_call_id) {
            (Role::Tool, None) => {
                return Err(Error::invalid_input("tool messages require a tool_call_id"));
            }
            (Role::Tool, Some(id)) if id.is_empty() => {
                return Err(Error::invalid_input("tool_call_id must not be empty"));
            }
            (Role::System | Role::User | Role::Assistant, Some(_)) => {
                return Err(Error::invalid_input(format!(
                    "tool_call_id is only allowed on tool messages, got role '{}'",
                    role
                )));
            }
            _ => {}
        }

        Ok(Self {
            role,
            content: content.into(),
            name,
            tool_call_id,
            tool_calls: Vec::new(),
        })
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, MessageContent::Text(text.into()))
    }

    /// Create a user message with custom content blocks
    pub fn user_with_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::plain(Role::User, MessageContent::Blocks(blocks))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, MessageContent::Text(text.into()))
    }

    pub fn assistant_with_tool_calls(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, MessageContent::Text(text.into()))
        }
    }

    /// Tool-role message answering `tool_call_id`.
    ///
    /// An empty id is replaced with a generated `call_<uuid>` so the message
    /// still satisfies [`Message::try_new`] and survives a serde round trip.
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut tool_call_id = tool_call_id.into();
        if tool_call_id.is_empty() {
            tool_call_id = format!("call_{}", uuid::Uuid::new_v4().simple());
            log::warn!(
                "Tool message without a tool_call_id; using generated id '{}'",
                tool_call_id
            );
        }

        Self {
            role: Role::Tool,
            content: MessageContent::Text(content.into()),
            name: None,
            tool_call_id: Some(tool_call_id),
            tool_calls: Vec::new(),
        }
    }

    /// The tool-role message that feeds a [`ToolResult`] back to the model.
    pub fn from_tool_result(result: &ToolResult) -> Self {
        Self::tool(result.tool_call_id.clone(), result.content.clone())
    }

    /// Copy of this message with a participant name attached.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self.clone()
        }
    }

    fn plain(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content,
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    /// Textual content of the message
    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        self.tool_call_id.as_deref()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawUsage")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Deserialize)]
struct RawUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

impl From<RawUsage> for TokenUsage {
    fn from(raw: RawUsage) -> Self {
        match raw.total_tokens {
            Some(total) => TokenUsage::with_total(raw.prompt_tokens, raw.completion_tokens, total),
            None => TokenUsage::new(raw.prompt_tokens, raw.completion_tokens),
        }
    }
}

impl TokenUsage {
    /// Usage whose total is the sum of prompt and completion tokens.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Usage with a provider-reported total that may differ from the sum.
    pub fn with_total(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Provider-side details about a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub model: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    /// Opaque provider payload, kept for callers that need vendor fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl ResponseMetadata {
    pub fn new(model: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
            finish_reason: None,
            raw: None,
        }
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// A normalized provider response: one assistant message plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    message: Message,
    metadata: ResponseMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    usage: Option<TokenUsage>,
}

impl ChatResponse {
    pub fn new(message: Message, metadata: ResponseMetadata, usage: Option<TokenUsage>) -> Self {
        Self {
            message,
            metadata,
            usage,
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_message(self) -> Message {
        self.message
    }

    pub fn metadata(&self) -> &ResponseMetadata {
        &self.metadata
    }

    pub fn usage(&self) -> Option<&TokenUsage> {
        self.usage.as_ref()
    }

    /// Text content of the assistant message
    pub fn content(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        self.message.tool_calls()
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.message.tool_calls().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_user() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role(), Role::User);
        assert_eq!(msg.text(), "Hello");
        assert!(msg.tool_call_id().is_none());
    }

    #[test]
    fn test_message_tool_requires_call_id() {
        let err = Message::try_new(Role::Tool, "result", None, None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));

        let msg = Message::try_new(Role::Tool, "result", None, Some("call_1".into())).unwrap();
        assert_eq!(msg.tool_call_id(), Some("call_1"));
    }

    #[test]
    fn test_message_call_id_only_on_tool_role() {
        let err = Message::try_new(Role::User, "hi", None, Some("call_1".into())).unwrap_err();
        assert!(err.to_string().contains("only allowed on tool messages"));
    }

    #[test]
    fn test_message_deserialize_enforces_invariant() {
        let bad = json!({"role": "tool", "content": "42"});
        assert!(serde_json::from_value::<Message>(bad).is_err());

        let good = json!({"role": "tool", "content": "42", "tool_call_id": "call_9"});
        let msg: Message = serde_json::from_value(good).unwrap();
        assert_eq!(msg.tool_call_id(), Some("call_9"));
    }

    #[test]
    fn test_tool_message_with_empty_id_round_trips() {
        let msg = Message::from_tool_result(&ToolResult::success("", "42"));
        let id = msg.tool_call_id().unwrap();
        assert!(id.starts_with("call_"));
        assert!(id.len() > "call_".len());

        let back: Message = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_message_with_name_returns_copy() {
        let original = Message::user("hi");
        let named = original.with_name("alice");
        assert_eq!(named.name(), Some("alice"));
        assert!(original.name().is_none());
    }

    #[test]
    fn test_blocks_text_joins_text_only() {
        let msg = Message::user_with_blocks(vec![
            ContentBlock::Text(TextBlock::new("What is")),
            ContentBlock::Image(ImageBlock::new("https://example.com/cat.png")),
            ContentBlock::Text(TextBlock::new("in this picture?")),
        ]);
        assert_eq!(msg.text(), "What is\nin this picture?");
        assert!(!msg.content().is_blank());
    }

    #[test]
    fn test_token_usage_total_defaults_to_sum() {
        let usage = TokenUsage::new(12, 30);
        assert_eq!(usage.total_tokens, 42);

        let overridden = TokenUsage::with_total(12, 30, 50);
        assert_eq!(overridden.total_tokens, 50);
    }

    #[test]
    fn test_token_usage_deserialize_recomputes_missing_total() {
        let usage: TokenUsage =
            serde_json::from_value(json!({"prompt_tokens": 7, "completion_tokens": 5})).unwrap();
        assert_eq!(usage.total_tokens, 12);
    }

    #[test]
    fn test_tool_call_from_malformed_json_is_empty() {
        let call = ToolCall::from_json("call_1", "get_weather", "{\"location\": ");
        assert!(call.arguments.is_empty());

        let call = ToolCall::from_json("call_2", "get_weather", "[1, 2]");
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn test_tool_call_from_json_parses_object() {
        let call = ToolCall::from_json("call_1", "add", r#"{"a": 3, "b": 4}"#);
        assert_eq!(call.arguments["a"], json!(3));
        assert_eq!(call.arguments["b"], json!(4));
        assert_eq!(
            serde_json::from_str::<Value>(&call.arguments_json()).unwrap(),
            json!({"a": 3, "b": 4})
        );
    }

    #[test]
    fn test_chat_response_accessors() {
        let call = ToolCall::from_json("call_1", "lookup", "{}");
        let response = ChatResponse::new(
            Message::assistant_with_tool_calls("", vec![call]),
            ResponseMetadata::new("test-model", "mock").with_finish_reason("tool_calls"),
            Some(TokenUsage::new(10, 2)),
        );
        assert!(response.has_tool_calls());
        assert_eq!(response.tool_calls()[0].name, "lookup");
        assert_eq!(response.usage().map(|u| u.total_tokens), Some(12));
        assert_eq!(response.metadata().finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }
}
