//! The abstract provider capability and the caller-owned provider registry.
//!
//! Everything above this module (sessions, compaction, the orchestration loop)
//! talks to a model only through [`Provider`]. Vendor adapters implement it;
//! [`OpenAiCompatible`](crate::OpenAiCompatible) is the adapter shipped with the
//! crate. Tests drive the core with scripted implementations.

use crate::config::ProviderConfig;
use crate::tools::ToolDefinition;
use crate::types::{ChatResponse, Message, TokenUsage};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

/// Per-request options forwarded to a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Model identifier. Empty means the provider's default.
    pub model: String,
    pub temperature: Option<f32>,
    /// Completion token limit for this request (not the session budget).
    pub max_tokens: Option<u32>,
    /// Tool definitions the model may call.
    pub tools: Vec<ToolDefinition>,
}

impl RequestOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// One chunk event of a streamed response.
///
/// Tool-call arguments arrive as `ToolCallDelta` fragments keyed by call id; a
/// call is complete only once its `ToolCallDone` event has been seen.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ContentDelta {
        text: String,
    },
    ToolCallStart {
        id: String,
        name: String,
    },
    ToolCallDelta {
        id: String,
        arguments: String,
    },
    ToolCallDone {
        id: String,
    },
    Done {
        finish_reason: Option<String>,
        usage: Option<TokenUsage>,
        model: Option<String>,
    },
}

/// A pinned, boxed stream of chunk events from a provider.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// A chat-completion backend.
///
/// Implementations translate normalized [`Message`]s to their vendor's wire
/// format and normalize the reply back into a [`ChatResponse`]. Transport
/// retries and timeouts are the implementation's responsibility; failures
/// reaching the caller should already be mapped onto the typed [`Error`]
/// variants (`Authentication`, `RateLimit`, `Timeout`, `Api`).
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry key and the `provider` field of response metadata.
    fn name(&self) -> &str;

    fn config(&self) -> &ProviderConfig;

    /// Check the configuration without making a request.
    fn validate(&self) -> Result<()>;

    async fn send(&self, messages: &[Message], options: &RequestOptions) -> Result<ChatResponse>;

    async fn stream(&self, messages: &[Message], options: &RequestOptions) -> Result<EventStream>;
}

/// Caller-owned map from provider name to provider.
///
/// There is no process-wide registry: construct one, register what you need,
/// and pass it (or the providers it hands out) to the code that needs it.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its [`Provider::name`], replacing any previous one.
    pub fn register(&mut self, provider: Arc<dyn Provider>) -> &mut Self {
        let name = provider.name().to_string();
        if self.providers.insert(name.clone(), provider).is_some() {
            log::debug!("Replaced provider '{}'", name);
        }
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
