//! # unichat
//!
//! A provider-agnostic Rust SDK for chat-style LLM APIs.
//!
//! ## Overview
//!
//! Application code talks to any backend through one [`Provider`] trait and gets
//! back normalized values: [`Message`]s, [`ChatResponse`]s with [`TokenUsage`],
//! and [`ToolCall`]s. On top of that the crate manages:
//!
//! - **Token-budgeted sessions**: [`ChatSession`] estimates history size and
//!   either compacts it ([`TruncateOldest`], [`SummarizingCompactor`]) or fails
//!   loudly with [`Error::ContextOverflow`]
//! - **Validated tool calling**: [`ToolRegistry`] checks arguments against each
//!   tool's declared parameters and folds every failure into a [`ToolResult`]
//! - **The tool loop**: [`Client`] sends, executes requested tools, feeds the
//!   results back, and repeats until the model answers (bounded by
//!   `max_tool_rounds`)
//!
//! One adapter ships with the crate: [`OpenAiCompatible`], for OpenAI, Ollama,
//! LM Studio and OpenAI-compatible routers.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unichat::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let provider = OpenAiCompatible::new(
//!         ProviderConfig::for_kind(ProviderKind::Ollama),
//!     )?
//!     .with_default_model("qwen2.5:7b");
//!
//!     let options = ChatOptions::builder()
//!         .system_prompt("You are a helpful assistant")
//!         .build()?;
//!     let client = Client::new(Arc::new(provider)).with_options(options);
//!
//!     let mut session = ChatSession::builder()
//!         .max_tokens(8192)
//!         .compactor(Arc::new(TruncateOldest))
//!         .build()?;
//!
//!     let reply = client.chat_in_session(&mut session, "What's 2+2?").await?;
//!     println!("{}", reply.content());
//!
//!     let reply = client.chat_in_session(&mut session, "Times 3?").await?;
//!     println!("{}", reply.content());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **types**: messages, tool calls and results, usage, responses
//! - **context**: character-based token estimation
//! - **compaction**: the [`Compactor`] trait and its two strategies
//! - **session**: [`ChatSession`] and its budget rules
//! - **tools**: tool definitions, builders, validation and the registry
//! - **client**: the orchestration loop, blocking and streaming
//! - **provider**: the [`Provider`] trait and [`ProviderRegistry`]
//! - **stream**: assembling chunk events into complete calls and responses
//! - **openai**: the OpenAI-compatible adapter
//! - **storage**: the [`SessionStore`] contract and [`InMemoryStore`]
//! - **config**: options builders, provider presets, environment lookup
//! - **retry**: exponential backoff with jitter for adapters
//! - **error**: the crate-wide [`Error`] and [`Result`]

mod client;
mod compaction;
mod config;
mod context;
mod error;
mod openai;
mod provider;
mod session;
mod storage;
mod stream;
mod tools;
mod types;

/// Retry helpers, public so custom adapters can reuse them.
pub mod retry;

// --- Orchestration ---

pub use client::{ChatEvent, ChatInput, ChatStream, Client};

// --- Sessions and compaction ---

pub use compaction::{
    Compactor, DEFAULT_KEEP_RECENT, DEFAULT_SUMMARY_MAX_TOKENS, SUMMARY_PREFIX,
    SummarizingCompactor, TruncateOldest, is_summary_message,
};
pub use session::{
    ChatSession, ChatSessionBuilder, DEFAULT_COMPACTION_TARGET, DEFAULT_SAFETY_MARGIN,
    MIN_COMPACTION_TARGET,
};
pub use storage::{InMemoryStore, SessionSnapshot, SessionStore};

// --- Token estimation ---

pub use context::{
    CHARS_PER_TOKEN, MEDIA_BLOCK_TOKENS, MESSAGE_OVERHEAD_TOKENS, TOOL_CALL_OVERHEAD_TOKENS,
    estimate_message, estimate_tokens, is_approaching_limit,
};

// --- Providers ---

pub use openai::OpenAiCompatible;
pub use provider::{EventStream, Provider, ProviderRegistry, RequestOptions, StreamEvent};
pub use stream::StreamAggregator;

// --- Configuration ---

pub use config::{
    ChatOptions, ChatOptionsBuilder, DEFAULT_MAX_TOOL_ROUNDS, ProviderConfig, ProviderKind,
    get_base_url, get_model,
};

// --- Errors ---

pub use error::{Error, Result};

// --- Tools ---

pub use tools::{
    ParamKind, ParamSpec, Tool, ToolBuilder, ToolDefinition, ToolHandler, ToolRegistry, tool,
};

// --- Core types ---

pub use types::{
    AudioBlock, ChatResponse, ContentBlock, ImageBlock, Message, MessageContent,
    ResponseMetadata, Role, TextBlock, TokenUsage, ToolCall, ToolResult,
};

/// The types most applications need. `use unichat::prelude::*;`
pub mod prelude {
    pub use crate::{
        ChatEvent, ChatOptions, ChatResponse, ChatSession, Client, Compactor, Error, Message,
        OpenAiCompatible, Provider, ProviderConfig, ProviderKind, ProviderRegistry, Result,
        SummarizingCompactor, Tool, ToolCall, ToolRegistry, ToolResult, TruncateOldest, tool,
    };
}
