//! Chat orchestration: the request → tool call → execute → re-request loop.
//!
//! A [`Client`] binds one [`Provider`], an optional [`ToolRegistry`] and
//! [`ChatOptions`]. Each call runs the loop until the model answers without
//! requesting tools:
//!
//! ```text
//! send ──► response has tool calls? ──no──► return response
//!   ▲                │ yes (auto_execute_tools)
//!   │                ▼
//!   │   append assistant message, execute calls,
//!   └── append one tool message per result (call order)
//! ```
//!
//! Input is validated before the provider is touched: empty or whitespace-only
//! text and empty message lists fail with [`Error::InvalidMessage`]. The loop is
//! bounded by [`ChatOptions::max_tool_rounds`]; running out is
//! [`Error::MaxToolRounds`], never a silently truncated answer.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use unichat::{tool, Client, OpenAiCompatible, ProviderConfig, ProviderKind, ToolRegistry};
//! use serde_json::json;
//!
//! # async fn example() -> unichat::Result<()> {
//! let provider = OpenAiCompatible::new(ProviderConfig::for_kind(ProviderKind::Ollama))?;
//!
//! let mut tools = ToolRegistry::new();
//! tools.register(
//!     tool("get_weather", "Get the weather for a city")
//!         .param("location", "string")
//!         .build(|args| async move { Ok(json!(format!("Sunny in {}", args["location"]))) })?,
//! );
//!
//! let client = Client::new(Arc::new(provider)).with_tools(tools);
//! let response = client.chat("What's the weather in Paris?").await?;
//! println!("{}", response.content());
//! # Ok(())
//! # }
//! ```
//!
//! # Streaming
//!
//! [`Client::stream_chat`] runs the same loop on a spawned task and yields
//! [`ChatEvent`]s: text deltas as they arrive, each tool call once its
//! arguments are complete, each tool result, and finally the response of the
//! last round.

use crate::config::ChatOptions;
use crate::provider::{Provider, RequestOptions, StreamEvent};
use crate::session::ChatSession;
use crate::stream::StreamAggregator;
use crate::tools::ToolRegistry;
use crate::types::{ChatResponse, Message, ToolCall, ToolResult};
use crate::{Error, Result};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Events yielded by [`Client::stream_chat`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A piece of assistant text
    Delta(String),
    /// A tool call whose arguments are complete
    ToolCall(ToolCall),
    /// The outcome of an executed tool call
    ToolResult(ToolResult),
    /// The final response; always the last event of a successful stream
    Response(ChatResponse),
}

/// A pinned, boxed stream of chat events.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// What a caller can hand to [`Client::chat`].
#[derive(Debug, Clone)]
pub enum ChatInput {
    Text(String),
    Messages(Vec<Message>),
}

impl ChatInput {
    /// Reject empty input and turn it into a message list.
    pub fn into_messages(self) -> Result<Vec<Message>> {
        match self {
            ChatInput::Text(text) => {
                if text.trim().is_empty() {
                    return Err(Error::invalid_message(
                        "message text must not be empty or whitespace",
                    ));
                }
                Ok(vec![Message::user(text)])
            }
            ChatInput::Messages(messages) => {
                if messages.is_empty() {
                    return Err(Error::invalid_message("message list must not be empty"));
                }
                Ok(messages)
            }
        }
    }
}

impl From<&str> for ChatInput {
    fn from(text: &str) -> Self {
        ChatInput::Text(text.to_string())
    }
}

impl From<String> for ChatInput {
    fn from(text: String) -> Self {
        ChatInput::Text(text)
    }
}

impl From<Vec<Message>> for ChatInput {
    fn from(messages: Vec<Message>) -> Self {
        ChatInput::Messages(messages)
    }
}

impl From<&[Message]> for ChatInput {
    fn from(messages: &[Message]) -> Self {
        ChatInput::Messages(messages.to_vec())
    }
}

/// Provider + tools + options. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    provider: Arc<dyn Provider>,
    tools: Option<Arc<ToolRegistry>>,
    options: ChatOptions,
}

impl Client {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            tools: None,
            options: ChatOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a tool registry; its definitions are sent with every request.
    pub fn with_tools(self, tools: ToolRegistry) -> Self {
        self.with_shared_tools(Arc::new(tools))
    }

    pub fn with_shared_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn without_tools(mut self) -> Self {
        self.tools = None;
        self
    }

    pub fn with_auto_execute_tools(mut self, auto: bool) -> Self {
        self.options.auto_execute_tools = auto;
        self
    }

    /// Cap the completion length of every request.
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.options.max_tokens = Some(tokens.max(1));
        self
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn tools(&self) -> Option<&ToolRegistry> {
        self.tools.as_deref()
    }

    pub fn options(&self) -> &ChatOptions {
        &self.options
    }

    /// Run the loop on `input` and return the final response.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidMessage`] for empty input (provider not called)
    /// - [`Error::MaxToolRounds`] when the model keeps requesting tools
    /// - any error the provider returns
    pub async fn chat(&self, input: impl Into<ChatInput>) -> Result<ChatResponse> {
        let messages = self.prepare(input.into())?;
        self.run(messages).await
    }

    /// Chat against a session's history.
    ///
    /// The user message and the final response are added to the session (both
    /// subject to its budget). Intermediate tool-call and tool-result messages
    /// are sent to the provider but not stored. On any error the session is
    /// left exactly as it was before the call.
    pub async fn chat_in_session(
        &self,
        session: &mut ChatSession,
        text: &str,
    ) -> Result<ChatResponse> {
        let user = ChatInput::from(text).into_messages()?;
        let checkpoint = session.messages();

        let outcome = self.session_turn(session, user).await;
        if outcome.is_err() {
            log::debug!("Session {} turn failed; restoring history", session.id());
            session.replace_messages(checkpoint);
        }
        outcome
    }

    async fn session_turn(
        &self,
        session: &mut ChatSession,
        user: Vec<Message>,
    ) -> Result<ChatResponse> {
        for message in user {
            session.add_message(message).await?;
        }

        let messages = self.with_system_prompt(session.messages());
        let response = self.run(messages).await?;
        session.add_response(&response).await?;
        Ok(response)
    }

    /// Stream the loop as [`ChatEvent`]s.
    ///
    /// Input is validated here, before anything is spawned. Errors after that
    /// arrive as the stream's last item. Dropping the stream stops the loop at
    /// its next event.
    pub fn stream_chat(&self, input: impl Into<ChatInput>) -> Result<ChatStream> {
        let messages = self.prepare(input.into())?;
        let (tx, rx) = mpsc::channel(64);
        let client = self.clone();

        tokio::spawn(async move {
            if let Err(e) = client.drive_stream(messages, &tx).await {
                let _ = tx.send(Err(e)).await;
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn prepare(&self, input: ChatInput) -> Result<Vec<Message>> {
        Ok(self.with_system_prompt(input.into_messages()?))
    }

    fn with_system_prompt(&self, mut messages: Vec<Message>) -> Vec<Message> {
        if let Some(prompt) = &self.options.system_prompt {
            if !messages.iter().any(Message::is_system) {
                messages.insert(0, Message::system(prompt.clone()));
            }
        }
        messages
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            model: self.options.model.clone(),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            tools: self
                .tools
                .as_ref()
                .map(|t| t.get_definitions())
                .unwrap_or_default(),
        }
    }

    /// Registry to execute `response`'s calls with, if this round should.
    fn executor_for(&self, response: &ChatResponse) -> Option<&ToolRegistry> {
        if !self.options.auto_execute_tools || !response.has_tool_calls() {
            return None;
        }
        let tools = self.tools.as_deref();
        if tools.is_none() {
            log::debug!("Model requested tools but no registry is attached; returning calls");
        }
        tools
    }

    fn check_round_limit(&self, rounds: u32) -> Result<()> {
        if rounds >= self.options.max_tool_rounds {
            log::warn!(
                "Tool calling did not converge after {} rounds",
                self.options.max_tool_rounds
            );
            return Err(Error::MaxToolRounds {
                rounds: self.options.max_tool_rounds,
            });
        }
        Ok(())
    }

    async fn run(&self, mut messages: Vec<Message>) -> Result<ChatResponse> {
        let request = self.request_options();
        let mut rounds = 0;

        loop {
            let response = self.provider.send(&messages, &request).await?;

            let Some(tools) = self.executor_for(&response) else {
                return Ok(response);
            };
            self.check_round_limit(rounds)?;
            rounds += 1;

            let calls = response.tool_calls().to_vec();
            log::debug!(
                "Round {}: executing {} tool call(s) via {}",
                rounds,
                calls.len(),
                self.provider.name()
            );

            // Assistant message first, then one tool message per call, in call order
            messages.push(response.into_message());
            let results = tools.execute_all(&calls).await;
            messages.extend(results.iter().map(Message::from_tool_result));
        }
    }

    async fn drive_stream(
        &self,
        mut messages: Vec<Message>,
        tx: &mpsc::Sender<Result<ChatEvent>>,
    ) -> Result<()> {
        let request = self.request_options();
        let mut rounds = 0;

        loop {
            let mut events = self.provider.stream(&messages, &request).await?;
            let mut aggregator = StreamAggregator::new(self.provider.name(), &request.model);

            while let Some(event) = events.next().await {
                let event = event?;
                let delta = match &event {
                    StreamEvent::ContentDelta { text } => Some(text.clone()),
                    _ => None,
                };

                let emitted = match (delta, aggregator.push(event)?) {
                    (Some(text), _) => Some(ChatEvent::Delta(text)),
                    (None, Some(call)) => Some(ChatEvent::ToolCall(call)),
                    (None, None) => None,
                };
                if let Some(chat_event) = emitted {
                    if tx.send(Ok(chat_event)).await.is_err() {
                        log::debug!("Chat stream receiver dropped; stopping");
                        return Ok(());
                    }
                }
            }

            let response = aggregator.finish();

            let Some(tools) = self.executor_for(&response) else {
                let _ = tx.send(Ok(ChatEvent::Response(response))).await;
                return Ok(());
            };
            self.check_round_limit(rounds)?;
            rounds += 1;

            let calls = response.tool_calls().to_vec();
            messages.push(response.into_message());
            let results = tools.execute_all(&calls).await;

            for result in &results {
                if tx.send(Ok(ChatEvent::ToolResult(result.clone()))).await.is_err() {
                    return Ok(());
                }
            }
            messages.extend(results.iter().map(Message::from_tool_result));
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("provider", &self.provider.name())
            .field("tools", &self.tools.as_ref().map(|t| t.list_tools()))
            .field("options", &self.options)
            .finish()
    }
}
