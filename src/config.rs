//! Configuration: chat options, provider connection settings and presets.

use crate::retry::RetryConfig;
use std::env;
use std::str::FromStr;

/// Default safety cap on tool-calling rounds per orchestration call.
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 25;

/// Supported provider presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAI,
    Ollama,
    LMStudio,
    OpenRouter,
}

impl ProviderKind {
    /// Get the default base URL for this provider
    pub fn default_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "https://api.openai.com/v1",
            ProviderKind::Ollama => "http://localhost:11434/v1",
            ProviderKind::LMStudio => "http://localhost:1234/v1",
            ProviderKind::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Registry name used when no explicit name is given
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::LMStudio => "lmstudio",
            ProviderKind::OpenRouter => "openrouter",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAI),
            "ollama" => Ok(ProviderKind::Ollama),
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(ProviderKind::LMStudio),
            "openrouter" | "router" => Ok(ProviderKind::OpenRouter),
            other => Err(crate::Error::config(format!("unknown provider '{}'", other))),
        }
    }
}

/// Get the base URL from environment variable or provider default
///
/// Priority:
/// 1. UNICHAT_BASE_URL environment variable
/// 2. Provider default URL (if provider is Some)
/// 3. fallback parameter
/// 4. OpenAI's public endpoint
///
/// # Examples
///
/// ```rust,no_run
/// use unichat::{get_base_url, ProviderKind};
///
/// // Read from environment
/// let url = get_base_url(None, None);
///
/// // Use provider default
/// let url = get_base_url(Some(ProviderKind::Ollama), None);
/// ```
pub fn get_base_url(provider: Option<ProviderKind>, fallback: Option<&str>) -> String {
    if let Ok(url) = env::var("UNICHAT_BASE_URL") {
        return url;
    }

    if let Some(p) = provider {
        return p.default_url().to_string();
    }

    fallback
        .unwrap_or(ProviderKind::OpenAI.default_url())
        .to_string()
}

/// Get the model name from environment variable or fallback
///
/// Priority:
/// 1. UNICHAT_MODEL environment variable (if prefer_env is true)
/// 2. fallback parameter
pub fn get_model(fallback: Option<&str>, prefer_env: bool) -> Option<String> {
    if prefer_env {
        if let Ok(model) = env::var("UNICHAT_MODEL") {
            return Some(model);
        }
    }

    fallback.map(|s| s.to_string())
}

/// Connection settings for a provider adapter
#[derive(Clone)]
pub struct ProviderConfig {
    /// Endpoint root, e.g. `http://localhost:11434/v1`
    pub base_url: String,

    /// API key, passed in by the caller (never read from the environment)
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Transport retry policy
    pub retry: RetryConfig,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: 60,
            retry: RetryConfig::default(),
        }
    }

    /// Preset for a known provider, honouring `UNICHAT_BASE_URL`
    pub fn for_kind(kind: ProviderKind) -> Self {
        Self::new(get_base_url(Some(kind), None))
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reject configurations no request could succeed with
    pub fn validate(&self) -> crate::Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(crate::Error::config("base_url is required"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(crate::Error::config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.timeout == 0 {
            return Err(crate::Error::config("timeout must be greater than zero"));
        }
        Ok(())
    }
}

/// Options for the chat orchestration loop
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    /// Model name (empty means the provider's default)
    pub model: String,

    /// System prompt prepended when the message list has no system message
    pub system_prompt: Option<String>,

    /// Sampling temperature (0.0 to 2.0)
    pub temperature: Option<f32>,

    /// Maximum tokens to generate per request
    pub max_tokens: Option<u32>,

    /// Execute tool calls automatically and re-request
    pub auto_execute_tools: bool,

    /// Maximum tool-calling rounds before the loop fails
    pub max_tool_rounds: u32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            auto_execute_tools: true,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

impl ChatOptions {
    /// Create a new builder for ChatOptions
    pub fn builder() -> ChatOptionsBuilder {
        ChatOptionsBuilder::default()
    }
}

/// Builder for ChatOptions
#[derive(Debug, Default)]
pub struct ChatOptionsBuilder {
    model: Option<String>,
    system_prompt: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    auto_execute_tools: Option<bool>,
    max_tool_rounds: Option<u32>,
}

impl ChatOptionsBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn auto_execute_tools(mut self, auto: bool) -> Self {
        self.auto_execute_tools = Some(auto);
        self
    }

    pub fn max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = Some(rounds);
        self
    }

    pub fn build(self) -> crate::Result<ChatOptions> {
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(crate::Error::config(format!(
                    "temperature must be between 0.0 and 2.0, got {}",
                    temp
                )));
            }
        }

        if self.max_tokens == Some(0) {
            return Err(crate::Error::config("max_tokens must be greater than zero"));
        }

        let max_tool_rounds = self.max_tool_rounds.unwrap_or(DEFAULT_MAX_TOOL_ROUNDS);
        if max_tool_rounds == 0 {
            return Err(crate::Error::config(
                "max_tool_rounds must be greater than zero",
            ));
        }

        Ok(ChatOptions {
            model: self.model.unwrap_or_default(),
            system_prompt: self.system_prompt.filter(|p| !p.trim().is_empty()),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            auto_execute_tools: self.auto_execute_tools.unwrap_or(true),
            max_tool_rounds,
        })
    }
}
