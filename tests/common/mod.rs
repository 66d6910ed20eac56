//! Scripted provider shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use unichat::{
    ChatResponse, EventStream, Message, Provider, ProviderConfig, RequestOptions,
    ResponseMetadata, Result, StreamEvent, TokenUsage, ToolCall,
};

/// Replays queued responses in order and records every request.
pub struct ScriptedProvider {
    config: ProviderConfig,
    replies: Mutex<VecDeque<Result<ChatResponse>>>,
    streams: Mutex<VecDeque<Vec<StreamEvent>>>,
    /// Returned once the queue is empty
    fallback: Option<ChatResponse>,
    requests: Mutex<Vec<Vec<Message>>>,
    options: Mutex<Vec<RequestOptions>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<ChatResponse>>) -> Arc<Self> {
        Arc::new(Self::build(replies, Vec::new(), None))
    }

    /// Answers every request with the same response.
    pub fn always(response: ChatResponse) -> Arc<Self> {
        Arc::new(Self::build(Vec::new(), Vec::new(), Some(response)))
    }

    pub fn streaming(streams: Vec<Vec<StreamEvent>>) -> Arc<Self> {
        Arc::new(Self::build(Vec::new(), streams, None))
    }

    fn build(
        replies: Vec<Result<ChatResponse>>,
        streams: Vec<Vec<StreamEvent>>,
        fallback: Option<ChatResponse>,
    ) -> Self {
        Self {
            config: ProviderConfig::new("http://localhost:1234/v1"),
            replies: Mutex::new(replies.into()),
            streams: Mutex::new(streams.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_options(&self) -> Vec<RequestOptions> {
        self.options.lock().unwrap().clone()
    }

    fn record(&self, messages: &[Message], options: &RequestOptions) {
        self.requests.lock().unwrap().push(messages.to_vec());
        self.options.lock().unwrap().push(options.clone());
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, messages: &[Message], options: &RequestOptions) -> Result<ChatResponse> {
        self.record(messages, options);
        let next = self.replies.lock().unwrap().pop_front();
        match (next, &self.fallback) {
            (Some(reply), _) => reply,
            (None, Some(fallback)) => Ok(fallback.clone()),
            (None, None) => panic!("scripted provider ran out of replies"),
        }
    }

    async fn stream(&self, messages: &[Message], options: &RequestOptions) -> Result<EventStream> {
        self.record(messages, options);
        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .expect("scripted provider ran out of streams");
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

pub fn text_response(text: &str) -> ChatResponse {
    ChatResponse::new(
        Message::assistant(text),
        ResponseMetadata::new("scripted-model", "scripted").with_finish_reason("stop"),
        Some(TokenUsage::new(10, 5)),
    )
}

pub fn tool_response(calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse::new(
        Message::assistant_with_tool_calls("", calls),
        ResponseMetadata::new("scripted-model", "scripted").with_finish_reason("tool_calls"),
        None,
    )
}

pub fn call(id: &str, name: &str, arguments: &str) -> ToolCall {
    ToolCall::from_json(id, name, arguments)
}
