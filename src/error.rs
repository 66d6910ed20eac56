//! Error types for the unichat SDK
//!
//! Every fallible operation in the crate returns [`Result<T>`]. Tool failures are
//! the exception: they never become an [`Error`], they become an error-flagged
//! [`ToolResult`](crate::ToolResult) that is fed back into the conversation.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the SDK
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Empty or otherwise unusable message input, rejected before any provider call
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Invalid input to a constructor or builder
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Token budget exceeded and no compactor is configured
    #[error("Context overflow: {attempted} tokens exceeds limit of {limit}")]
    ContextOverflow { attempted: usize, limit: usize },

    /// The tool-calling loop did not converge within the configured round limit
    #[error("Tool calling did not finish within {rounds} rounds")]
    MaxToolRounds { rounds: u32 },

    /// No provider registered under the requested name
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Provider rejected the credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Provider rate limit hit
    #[error("Rate limited: {0}")]
    RateLimit(String),

    /// API error from the model server
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution error, returned by tool handlers
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Timeout error
    #[error("Request timeout")]
    Timeout,

    /// Other errors
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new invalid message error
    pub fn invalid_message(msg: impl Into<String>) -> Self {
        Error::InvalidMessage(msg.into())
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new API error
    pub fn api(status: u16, msg: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: msg.into(),
        }
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new other error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Whether a transport-level retry could succeed.
    ///
    /// Rate limits, timeouts, connection failures and 5xx responses are
    /// retryable. Authentication, validation and orchestration errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimit(_) | Error::Timeout => true,
            Error::Api { status, .. } => *status >= 500,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("Invalid model");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "Invalid configuration: Invalid model");
    }

    #[test]
    fn test_error_invalid_message() {
        let err = Error::invalid_message("message is empty");
        assert!(matches!(err, Error::InvalidMessage(_)));
        assert_eq!(err.to_string(), "Invalid message: message is empty");
    }

    #[test]
    fn test_error_api() {
        let err = Error::api(500, "Internal Server Error");
        assert!(matches!(err, Error::Api { status: 500, .. }));
        assert_eq!(err.to_string(), "API error 500: Internal Server Error");
    }

    #[test]
    fn test_error_context_overflow() {
        let err = Error::ContextOverflow {
            attempted: 120,
            limit: 80,
        };
        assert_eq!(
            err.to_string(),
            "Context overflow: 120 tokens exceeds limit of 80"
        );
    }

    #[test]
    fn test_error_max_tool_rounds() {
        let err = Error::MaxToolRounds { rounds: 25 };
        assert_eq!(err.to_string(), "Tool calling did not finish within 25 rounds");
    }

    #[test]
    fn test_error_tool() {
        let err = Error::tool("Division by zero");
        assert!(matches!(err, Error::Tool(_)));
        assert_eq!(err.to_string(), "Tool execution error: Division by zero");
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::RateLimit("slow down".into()).is_retryable());
        assert!(Error::timeout().is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(!Error::api(400, "bad request").is_retryable());
        assert!(!Error::Authentication("bad key".into()).is_retryable());
        assert!(!Error::MaxToolRounds { rounds: 3 }.is_retryable());
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
