//! Compaction strategies: shrink a message history toward a token target.
//!
//! Every strategy keeps all system messages. Two are provided:
//!
//! - [`TruncateOldest`] drops the oldest non-system messages. Cheap and local.
//! - [`SummarizingCompactor`] asks a model to summarize the older part of the
//!   conversation and replaces it with a single summary system message.
//!
//! Reaching the target is a goal, not a guarantee. [`TruncateOldest`] always
//! keeps the newest non-system message even when that message alone is over
//! budget.

use crate::client::Client;
use crate::context::{estimate_message, estimate_tokens};
use crate::types::{Message, Role};
use crate::Result;
use async_trait::async_trait;

/// Text every summary message starts with.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]";

/// Recent non-system messages the summarizer leaves untouched by default.
pub const DEFAULT_KEEP_RECENT: usize = 4;

/// Default length bound requested for a summary.
pub const DEFAULT_SUMMARY_MAX_TOKENS: u32 = 500;

const SUMMARIZER_INSTRUCTIONS: &str = "You summarize conversations. Preserve facts, names, \
decisions, tool results and open questions. Write plain prose with no preamble.";

/// A history-shrinking strategy.
#[async_trait]
pub trait Compactor: Send + Sync {
    /// Reduce `messages` toward `target_tokens`, keeping every system message.
    async fn compact(&self, messages: &[Message], target_tokens: usize) -> Result<Vec<Message>>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Whether `message` is a summary produced by [`SummarizingCompactor`].
pub fn is_summary_message(message: &Message) -> bool {
    message.is_system() && message.text().starts_with(SUMMARY_PREFIX)
}

/// Drop the oldest non-system messages until the rest fit.
///
/// System messages come first in their original order, followed by the newest
/// non-system messages that fit in chronological order. The walk from newest
/// to oldest stops at the first message that does not fit, so no gaps appear
/// in the kept tail.
#[derive(Debug, Clone, Copy, Default)]
pub struct TruncateOldest;

impl TruncateOldest {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of the strategy.
    pub fn truncate(messages: &[Message], target_tokens: usize) -> Vec<Message> {
        let (system, others): (Vec<&Message>, Vec<&Message>) =
            messages.iter().partition(|m| m.is_system());

        let mut total: usize = system.iter().map(|m| estimate_message(m)).sum();
        let mut kept = Vec::new();

        for message in others.iter().rev() {
            let cost = estimate_message(message);
            if total + cost > target_tokens {
                break;
            }
            total += cost;
            kept.push(*message);
        }

        if kept.is_empty() {
            if let Some(newest) = others.last() {
                kept.push(*newest);
            }
        }

        kept.reverse();
        system.into_iter().chain(kept).cloned().collect()
    }
}

#[async_trait]
impl Compactor for TruncateOldest {
    async fn compact(&self, messages: &[Message], target_tokens: usize) -> Result<Vec<Message>> {
        Ok(Self::truncate(messages, target_tokens))
    }

    fn name(&self) -> &str {
        "truncate_oldest"
    }
}

/// Replace older turns with a model-written summary.
///
/// The last `keep_recent` non-system messages are kept verbatim; everything
/// older is rendered as a transcript and summarized through the wrapped
/// [`Client`]. Earlier summaries are folded into the new one rather than
/// stacking up. A failed summarization request is returned as an error.
#[derive(Clone)]
pub struct SummarizingCompactor {
    client: Client,
    keep_recent: usize,
    summary_max_tokens: u32,
}

impl SummarizingCompactor {
    /// Wrap a client for summarization. Its tools are detached and automatic
    /// tool execution is switched off so summarizing can never recurse.
    /// Summary requests carry `summary_max_tokens` as their completion limit.
    pub fn new(client: Client) -> Self {
        Self {
            client: client
                .without_tools()
                .with_auto_execute_tools(false)
                .with_max_tokens(DEFAULT_SUMMARY_MAX_TOKENS),
            keep_recent: DEFAULT_KEEP_RECENT,
            summary_max_tokens: DEFAULT_SUMMARY_MAX_TOKENS,
        }
    }

    pub fn with_keep_recent(mut self, keep_recent: usize) -> Self {
        self.keep_recent = keep_recent;
        self
    }

    pub fn with_summary_max_tokens(mut self, tokens: u32) -> Self {
        self.summary_max_tokens = tokens.max(1);
        self.client = self.client.with_max_tokens(self.summary_max_tokens);
        self
    }

    pub fn keep_recent(&self) -> usize {
        self.keep_recent
    }

    async fn summarize(&self, older: &[&Message]) -> Result<String> {
        let transcript = older
            .iter()
            .map(|m| render_line(m))
            .collect::<Vec<_>>()
            .join("\n");

        let request = format!(
            "Summarize the conversation below in at most {} tokens.\n\n{}",
            self.summary_max_tokens, transcript
        );

        let response = self
            .client
            .chat(vec![
                Message::system(SUMMARIZER_INSTRUCTIONS),
                Message::user(request),
            ])
            .await?;

        Ok(response.content().trim().to_string())
    }
}

fn render_line(message: &Message) -> String {
    if is_summary_message(message) {
        return message.text();
    }

    let mut line = format!("{}: {}", message.role(), message.text());
    for call in message.tool_calls() {
        line.push_str(&format!(" [called {}({})]", call.name, call.arguments_json()));
    }
    line
}

#[async_trait]
impl Compactor for SummarizingCompactor {
    async fn compact(&self, messages: &[Message], target_tokens: usize) -> Result<Vec<Message>> {
        let non_system = messages.iter().filter(|m| !m.is_system()).count();
        if non_system <= self.keep_recent || estimate_tokens(messages) <= target_tokens {
            return Ok(messages.to_vec());
        }

        let split = non_system - self.keep_recent;
        let mut system = Vec::new();
        let mut older = Vec::new();
        let mut recent = Vec::new();
        let mut seen = 0;

        for message in messages {
            if is_summary_message(message) {
                older.push(message);
            } else if message.is_system() {
                system.push(message.clone());
            } else {
                if seen < split {
                    older.push(message);
                } else {
                    recent.push(message.clone());
                }
                seen += 1;
            }
        }

        log::debug!(
            "Summarizing {} message(s), keeping {} recent",
            older.len(),
            recent.len()
        );
        let summary = self.summarize(&older).await?;

        let mut result = system;
        result.push(Message::system(format!("{}\n{}", SUMMARY_PREFIX, summary)));
        result.extend(recent);

        while estimate_tokens(&result) > target_tokens {
            let droppable: Vec<usize> = result
                .iter()
                .enumerate()
                .filter(|(_, m)| m.role() != Role::System)
                .map(|(i, _)| i)
                .collect();
            if droppable.len() <= 1 {
                break;
            }
            result.remove(droppable[0]);
        }

        Ok(result)
    }

    fn name(&self) -> &str {
        "summarize"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(pairs: usize) -> Vec<Message> {
        let mut messages = vec![Message::system("You are helpful.")];
        for i in 0..pairs {
            messages.push(Message::user(format!("Question number {}", i)));
            messages.push(Message::assistant(format!("Answer number {}", i)));
        }
        messages
    }

    #[test]
    fn test_truncate_keeps_system_first() {
        let mut messages = conversation(5);
        messages.insert(3, Message::system("Late instruction"));

        let result = TruncateOldest::truncate(&messages, 30);
        assert!(result[0].is_system());
        assert_eq!(result[0].text(), "You are helpful.");
        assert_eq!(result[1].text(), "Late instruction");
        assert!(!result[2].is_system());
        assert!(estimate_tokens(&result) <= 30);
    }

    #[test]
    fn test_truncate_keeps_newest_in_order() {
        let messages = conversation(5);
        let result = TruncateOldest::truncate(&messages, 30);

        let tail: Vec<String> = result.iter().skip(1).map(|m| m.text()).collect();
        let expected: Vec<String> = messages
            .iter()
            .skip(messages.len() - tail.len())
            .map(|m| m.text())
            .collect();
        assert_eq!(tail, expected);
        assert_eq!(result.last().unwrap().text(), "Answer number 4");
    }

    #[test]
    fn test_truncate_force_keeps_newest() {
        let messages = vec![
            Message::system("sys"),
            Message::user("old"),
            Message::user("x".repeat(400)),
        ];
        let result = TruncateOldest::truncate(&messages, 10);
        assert_eq!(result.len(), 2);
        assert_eq!(result[1].text().len(), 400);
    }

    #[test]
    fn test_truncate_only_system() {
        let messages = vec![Message::system("a"), Message::system("b")];
        assert_eq!(TruncateOldest::truncate(&messages, 0), messages);
    }

    #[test]
    fn test_truncate_is_idempotent() {
        let messages = conversation(8);
        for target in [10, 25, 40, 80, 1000] {
            let once = TruncateOldest::truncate(&messages, target);
            let twice = TruncateOldest::truncate(&once, target);
            assert_eq!(once, twice, "target {}", target);
        }
    }

    #[test]
    fn test_truncate_under_target_is_unchanged() {
        let messages = conversation(2);
        assert_eq!(TruncateOldest::truncate(&messages, 10_000), messages);
    }

    #[test]
    fn test_summary_detection() {
        assert!(is_summary_message(&Message::system(format!(
            "{}\nThey discussed Paris.",
            SUMMARY_PREFIX
        ))));
        assert!(!is_summary_message(&Message::system("You are helpful.")));
        assert!(!is_summary_message(&Message::user(SUMMARY_PREFIX)));
    }
}
