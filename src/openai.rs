//! Adapter for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Works with OpenAI, Ollama's `/v1` endpoint, LM Studio, llama.cpp servers and
//! OpenAI-compatible routers. The adapter owns transport concerns: request
//! timeouts, retries of transient failures, HTTP status mapping and SSE
//! decoding. The rest of the crate only sees normalized values.
//!
//! Status mapping:
//!
//! ```text
//! 401, 403 -> Error::Authentication
//! 408      -> Error::Timeout
//! 429      -> Error::RateLimit
//! other    -> Error::Api { status, message }
//! ```
//!
//! Streaming chunks identify tool calls by position (`index`), with the call id
//! only present in the first fragment. [`ChunkTranslator`] maps positions to ids
//! and closes every open call when the choice reports a `finish_reason`. Some
//! servers omit or repeat `index` and send each call whole under its own id; a
//! fresh id at a mapped position closes the previous call and starts a new one.

use crate::config::{ProviderConfig, get_model};
use crate::provider::{EventStream, Provider, RequestOptions, StreamEvent};
use crate::retry::{retry_transient, with_timeout};
use crate::types::{
    ChatResponse, ContentBlock, Message, MessageContent, ResponseMetadata, TokenUsage, ToolCall,
};
use crate::{Error, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Provider for any server speaking the OpenAI chat-completions shape.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    name: String,
    config: ProviderConfig,
    default_model: Option<String>,
    http: reqwest::Client,
}

impl OpenAiCompatible {
    /// Build an adapter named `"openai"`.
    ///
    /// The default model comes from `UNICHAT_MODEL` when set; requests with an
    /// empty model fail unless one is configured.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;

        // Only the connect phase is bounded here; whole-request limits are
        // applied per call so long streams are not cut off.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            name: "openai".to_string(),
            config,
            default_model: get_model(None, true),
            http,
        })
    }

    /// Register under a different name, e.g. `"ollama"` or `"router"`.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn resolve_model(&self, options: &RequestOptions) -> Result<String> {
        if !options.model.is_empty() {
            return Ok(options.model.clone());
        }
        self.default_model.clone().ok_or_else(|| {
            Error::config(format!(
                "provider '{}' has no model: set one in the request options or UNICHAT_MODEL",
                self.name
            ))
        })
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        stream: bool,
    ) -> Result<WireRequest> {
        let tools = if options.tools.is_empty() {
            None
        } else {
            Some(options.tools.iter().map(|t| t.to_openai_format()).collect())
        };

        Ok(WireRequest {
            model: self.resolve_model(options)?,
            messages: messages.iter().map(WireMessage::from_message).collect(),
            stream,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tools,
        })
    }

    /// POST the request and return the response once its status is a success.
    async fn post(&self, body: &WireRequest) -> Result<reqwest::Response> {
        let mut request = self.http.post(self.endpoint()).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("failed to read error body: {}", e));
        Err(status_error(status.as_u16(), body))
    }

    fn limit(&self) -> Duration {
        Duration::from_secs(self.config.timeout)
    }
}

#[async_trait]
impl Provider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn validate(&self) -> Result<()> {
        self.config.validate()
    }

    async fn send(&self, messages: &[Message], options: &RequestOptions) -> Result<ChatResponse> {
        let body = self.build_request(messages, options, false)?;
        log::debug!(
            "POST {} model={} messages={} tools={}",
            self.endpoint(),
            body.model,
            body.messages.len(),
            options.tools.len()
        );

        let raw: Value = retry_transient(&self.config.retry, || async {
            with_timeout(self.limit(), async {
                let response = self.post(&body).await?;
                response.json::<Value>().await.map_err(transport_error)
            })
            .await
        })
        .await?;

        normalize_completion(raw, &body.model, &self.name)
    }

    async fn stream(&self, messages: &[Message], options: &RequestOptions) -> Result<EventStream> {
        let body = self.build_request(messages, options, true)?;
        log::debug!("POST {} (stream) model={}", self.endpoint(), body.model);

        let response = retry_transient(&self.config.retry, || {
            with_timeout(self.limit(), self.post(&body))
        })
        .await?;

        let mut translator = ChunkTranslator::default();
        let events = response.bytes_stream().eventsource().flat_map(move |item| {
            let out = match item {
                Ok(event) => translator.translate(&event.data),
                Err(e) => vec![Err(Error::stream(format!("SSE decoding failed: {}", e)))],
            };
            futures::stream::iter(out)
        });

        Ok(Box::pin(events))
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Http(e)
    }
}

fn status_error(status: u16, body: String) -> Error {
    match status {
        401 | 403 => Error::Authentication(body),
        408 => Error::Timeout,
        429 => Error::RateLimit(body),
        _ => Error::api(status, body),
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn from_message(message: &Message) -> Self {
        let tool_calls: Vec<Value> = message
            .tool_calls()
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments_json()
                    }
                })
            })
            .collect();

        // Assistant turns that only call tools carry `null` content
        let content = match message.content() {
            MessageContent::Text(text) if text.is_empty() && !tool_calls.is_empty() => None,
            MessageContent::Text(text) => Some(Value::String(text.clone())),
            MessageContent::Blocks(blocks) => Some(Value::Array(
                blocks.iter().map(content_part).collect(),
            )),
        };

        Self {
            role: message.role().as_str(),
            content,
            name: message.name().map(str::to_string),
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            tool_call_id: message.tool_call_id().map(str::to_string),
        }
    }
}

fn content_part(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text(text) => json!({ "type": "text", "text": text.text }),
        ContentBlock::Image(image) => {
            let mut image_url = json!({ "url": image.url });
            if let Some(detail) = &image.detail {
                image_url["detail"] = json!(detail);
            }
            json!({ "type": "image_url", "image_url": image_url })
        }
        ContentBlock::Audio(audio) => json!({
            "type": "input_audio",
            "input_audio": { "data": audio.data, "format": audio.format }
        }),
    }
}

#[derive(Debug, Deserialize)]
struct WireCompletion {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON text per the OpenAI shape; some servers send an object instead
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

fn tool_call_from_wire(position: usize, call: WireToolCall) -> ToolCall {
    let id = call
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("call_{}", position));

    match call.function.arguments {
        Value::Object(map) => ToolCall::new(id, call.function.name, map),
        Value::String(text) => ToolCall::from_json(id, call.function.name, &text),
        Value::Null => ToolCall::from_json(id, call.function.name, ""),
        other => ToolCall::from_json(id, call.function.name, &other.to_string()),
    }
}

/// Turn a completion body into a [`ChatResponse`], keeping the raw body.
fn normalize_completion(raw: Value, requested_model: &str, provider: &str) -> Result<ChatResponse> {
    let completion: WireCompletion = serde_json::from_value(raw.clone())?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::other("completion contained no choices"))?;

    let text = choice.message.content.unwrap_or_default();
    let calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .map(|(i, call)| tool_call_from_wire(i, call))
        .collect();

    let message = if calls.is_empty() {
        Message::assistant(text)
    } else {
        Message::assistant_with_tool_calls(text, calls)
    };

    let mut metadata = ResponseMetadata::new(
        completion.model.unwrap_or_else(|| requested_model.to_string()),
        provider,
    )
    .with_raw(raw);
    metadata.finish_reason = choice.finish_reason;

    Ok(ChatResponse::new(message, metadata, completion.usage))
}

/// Converts SSE `data` payloads into id-keyed [`StreamEvent`]s.
#[derive(Debug, Default)]
struct ChunkTranslator {
    /// Chunk position -> id of the call currently at that position
    ids: HashMap<u32, String>,
    /// Every call id started so far
    started: HashSet<String>,
    /// Calls started but not yet closed, in start order
    open: Vec<String>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
    model: Option<String>,
    finished: bool,
}

impl ChunkTranslator {
    fn translate(&mut self, data: &str) -> Vec<Result<StreamEvent>> {
        if self.finished {
            return Vec::new();
        }
        if data.trim() == "[DONE]" {
            return self.flush();
        }

        let chunk: WireChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => return vec![Err(Error::stream(format!("Failed to parse chunk: {}", e)))],
        };

        if chunk.model.is_some() {
            self.model = chunk.model;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }

        let mut out = Vec::new();
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                out.push(Ok(StreamEvent::ContentDelta { text }));
            }

            for fragment in choice.delta.tool_calls.unwrap_or_default() {
                let incoming = fragment.id.clone().filter(|id| !id.is_empty());
                let name = fragment
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();

                // A new id at a known position is a new call, not more of the old one
                let id = match (self.ids.get(&fragment.index).cloned(), incoming) {
                    (Some(current), Some(new)) if new != current => {
                        out.extend(self.close_call(&current));
                        self.start_call(fragment.index, new, name, &mut out)
                    }
                    (Some(current), _) => current,
                    (None, incoming) => {
                        let id = incoming.unwrap_or_else(|| format!("call_{}", fragment.index));
                        self.start_call(fragment.index, id, name, &mut out)
                    }
                };

                if let Some(arguments) = fragment
                    .function
                    .and_then(|f| f.arguments)
                    .filter(|a| !a.is_empty())
                {
                    out.push(Ok(StreamEvent::ToolCallDelta { id, arguments }));
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(reason);
                out.extend(self.close_open_calls());
            }
        }

        out
    }

    /// Map `index` to `id`, announcing the call unless it was already started.
    fn start_call(
        &mut self,
        index: u32,
        id: String,
        name: String,
        out: &mut Vec<Result<StreamEvent>>,
    ) -> String {
        self.ids.insert(index, id.clone());
        if self.started.insert(id.clone()) {
            self.open.push(id.clone());
            out.push(Ok(StreamEvent::ToolCallStart {
                id: id.clone(),
                name,
            }));
        }
        id
    }

    fn close_call(&mut self, id: &str) -> Option<Result<StreamEvent>> {
        let position = self.open.iter().position(|open| open == id)?;
        let id = self.open.remove(position);
        Some(Ok(StreamEvent::ToolCallDone { id }))
    }

    fn close_open_calls(&mut self) -> Vec<Result<StreamEvent>> {
        self.open
            .drain(..)
            .map(|id| Ok(StreamEvent::ToolCallDone { id }))
            .collect()
    }

    fn flush(&mut self) -> Vec<Result<StreamEvent>> {
        let mut out = self.close_open_calls();
        out.push(Ok(StreamEvent::Done {
            finish_reason: self.finish_reason.take(),
            usage: self.usage.take(),
            model: self.model.take(),
        }));
        self.finished = true;
        out
    }
}
