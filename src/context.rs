//! Token estimation for budget checks.
//!
//! The estimate is a cheap character-based approximation, not a model
//! tokenizer. It only has to be deterministic and monotonic in content length
//! so that session budgets and compaction targets behave predictably.
//!
//! # Examples
//!
//! ```rust
//! use unichat::{estimate_tokens, Message};
//!
//! let messages = vec![
//!     Message::system("You are a helpful assistant"),
//!     Message::user("Hello!"),
//! ];
//!
//! let tokens = estimate_tokens(&messages);
//! println!("Estimated tokens: {}", tokens);
//! ```

use crate::types::{ContentBlock, Message, MessageContent};

/// Characters per token. Conservative for English text across model families.
pub const CHARS_PER_TOKEN: usize = 4;

/// Fixed framing cost of every message (role markers, separators).
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Fixed cost of each tool call attached to a message (serialized call JSON).
pub const TOOL_CALL_OVERHEAD_TOKENS: usize = 20;

/// Flat cost charged for an image or audio block.
pub const MEDIA_BLOCK_TOKENS: usize = 85;

/// Estimate the token cost of a single message.
///
/// `MESSAGE_OVERHEAD_TOKENS + chars / CHARS_PER_TOKEN`, plus
/// `TOOL_CALL_OVERHEAD_TOKENS` for each attached tool call and
/// `MEDIA_BLOCK_TOKENS` for each image or audio block.
///
/// ```rust
/// use unichat::{estimate_message, Message};
///
/// // 4 overhead + 40 chars / 4
/// assert_eq!(estimate_message(&Message::user("x".repeat(40))), 14);
/// ```
pub fn estimate_message(message: &Message) -> usize {
    let (chars, media_blocks) = match message.content() {
        MessageContent::Text(text) => (text.chars().count(), 0),
        MessageContent::Blocks(blocks) => {
            blocks
                .iter()
                .fold((0, 0), |(chars, media), block| match block {
                    ContentBlock::Text(t) => (chars + t.text.chars().count(), media),
                    ContentBlock::Image(_) | ContentBlock::Audio(_) => (chars, media + 1),
                })
        }
    };

    MESSAGE_OVERHEAD_TOKENS
        + chars / CHARS_PER_TOKEN
        + media_blocks * MEDIA_BLOCK_TOKENS
        + message.tool_calls().len() * TOOL_CALL_OVERHEAD_TOKENS
}

/// Estimate token count for a message list (sum of [`estimate_message`]).
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message).sum()
}

/// Check if history is approaching a token limit
///
/// # Arguments
///
/// * `messages` - Messages to check
/// * `limit` - Token limit (e.g., 32000 for a 32k context window)
/// * `margin` - Fraction of the limit to treat as the threshold (e.g. 0.9)
///
/// # Returns
///
/// `true` if estimated tokens exceed `floor(limit * margin)`
///
/// # Examples
///
/// ```rust
/// use unichat::{is_approaching_limit, Message};
///
/// # fn example(messages: Vec<Message>) {
/// if is_approaching_limit(&messages, 32000, 0.9) {
///     println!("Time to compact!");
/// }
/// # }
/// ```
pub fn is_approaching_limit(messages: &[Message], limit: usize, margin: f64) -> bool {
    let estimated = estimate_tokens(messages);
    let threshold = (limit as f64 * margin).floor() as usize;
    estimated > threshold
}
