//! Chunk-event aggregation.
//!
//! Providers stream a response as [`StreamEvent`]s. Text arrives in pieces, and
//! tool-call arguments arrive as JSON fragments split at arbitrary boundaries:
//!
//! ```text
//! ToolCallStart { id: "call_1", name: "get_weather" }
//! ToolCallDelta { id: "call_1", arguments: "{\"loc" }
//! ToolCallDelta { id: "call_1", arguments: "ation\":\"Paris\"}" }
//! ToolCallDone  { id: "call_1" }            <- call becomes dispatchable here
//! Done { finish_reason: "tool_calls", .. }
//! ```
//!
//! [`StreamAggregator`] buffers fragments per call id and hands back each
//! [`ToolCall`] only when its `ToolCallDone` arrives. Once the stream ends,
//! [`StreamAggregator::finish`] assembles the same [`ChatResponse`] a
//! non-streaming `send` would have returned.

use crate::provider::StreamEvent;
use crate::types::{ChatResponse, Message, ResponseMetadata, TokenUsage, ToolCall};
use crate::{Error, Result};
use std::collections::HashMap;

/// A tool call whose arguments are still arriving.
#[derive(Debug, Default)]
struct PartialToolCall {
    name: String,
    /// Raw JSON text, parsed only on completion
    arguments: String,
}

/// Stateful accumulator for one streamed response.
#[derive(Debug)]
pub struct StreamAggregator {
    provider: String,
    model: String,
    text: String,
    pending: HashMap<String, PartialToolCall>,
    /// Call ids in the order their start events arrived
    order: Vec<String>,
    completed: HashMap<String, ToolCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl StreamAggregator {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            text: String::new(),
            pending: HashMap::new(),
            order: Vec::new(),
            completed: HashMap::new(),
            finish_reason: None,
            usage: None,
        }
    }

    /// Feed one event. Returns the tool call it completed, if any.
    ///
    /// Deltas or completions for a call id that was never started are an
    /// [`Error::Stream`]: the provider broke the event protocol.
    pub fn push(&mut self, event: StreamEvent) -> Result<Option<ToolCall>> {
        match event {
            StreamEvent::ContentDelta { text } => {
                self.text.push_str(&text);
                Ok(None)
            }
            StreamEvent::ToolCallStart { id, name } => {
                if self.pending.contains_key(&id) || self.completed.contains_key(&id) {
                    return Err(Error::stream(format!("tool call '{}' started twice", id)));
                }
                self.order.push(id.clone());
                self.pending.insert(
                    id,
                    PartialToolCall {
                        name,
                        arguments: String::new(),
                    },
                );
                Ok(None)
            }
            StreamEvent::ToolCallDelta { id, arguments } => {
                let partial = self.pending.get_mut(&id).ok_or_else(|| {
                    Error::stream(format!("argument delta for unknown tool call '{}'", id))
                })?;
                partial.arguments.push_str(&arguments);
                Ok(None)
            }
            StreamEvent::ToolCallDone { id } => {
                let partial = self.pending.remove(&id).ok_or_else(|| {
                    Error::stream(format!("completion for unknown tool call '{}'", id))
                })?;
                let call = ToolCall::from_json(id.clone(), partial.name, &partial.arguments);
                self.completed.insert(id, call.clone());
                Ok(Some(call))
            }
            StreamEvent::Done {
                finish_reason,
                usage,
                model,
            } => {
                self.finish_reason = finish_reason.or(self.finish_reason.take());
                self.usage = usage.or(self.usage);
                if let Some(model) = model {
                    self.model = model;
                }
                Ok(None)
            }
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Build the final response. Calls that never completed are dropped.
    pub fn finish(mut self) -> ChatResponse {
        if !self.pending.is_empty() {
            log::warn!(
                "Stream ended with {} incomplete tool call(s); dropping them",
                self.pending.len()
            );
        }

        let calls: Vec<ToolCall> = self
            .order
            .iter()
            .filter_map(|id| self.completed.remove(id))
            .collect();

        let message = if calls.is_empty() {
            Message::assistant(self.text)
        } else {
            Message::assistant_with_tool_calls(self.text, calls)
        };

        let mut metadata = ResponseMetadata::new(self.model, self.provider);
        metadata.finish_reason = self.finish_reason;

        ChatResponse::new(message, metadata, self.usage)
    }
}
