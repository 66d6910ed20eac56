//! Conversation state under a token budget.
//!
//! A [`ChatSession`] owns an ordered message list. When a budget is set, every
//! [`add_message`](ChatSession::add_message) checks the estimated total against
//! `floor(max_tokens * safety_margin)`. Over budget, the configured
//! [`Compactor`] shrinks the history first; with no compactor the add fails
//! with [`Error::ContextOverflow`] and nothing is dropped.
//!
//! ```rust
//! use std::sync::Arc;
//! use unichat::{ChatSession, Message, TruncateOldest};
//!
//! # async fn example() -> unichat::Result<()> {
//! let mut session = ChatSession::builder()
//!     .system_prompt("You are helpful.")
//!     .max_tokens(4096)
//!     .compactor(Arc::new(TruncateOldest))
//!     .build()?;
//!
//! session.add_message(Message::user("Hello!")).await?;
//! assert_eq!(session.len(), 2);
//! # Ok(())
//! # }
//! ```

use crate::compaction::Compactor;
use crate::context::{estimate_message, estimate_tokens};
use crate::storage::SessionSnapshot;
use crate::types::{ChatResponse, Message};
use crate::{Error, Result};
use std::sync::Arc;

/// Default fraction of `max_tokens` usable for history.
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.8;

/// Floor for a compaction target that would otherwise be zero or negative.
pub const MIN_COMPACTION_TARGET: usize = 1000;

/// Target for manual compaction when the session has no budget.
pub const DEFAULT_COMPACTION_TARGET: usize = 4000;

/// A budgeted, optionally self-compacting conversation history.
#[derive(Clone)]
pub struct ChatSession {
    id: String,
    messages: Vec<Message>,
    system_prompt: Option<String>,
    max_tokens: Option<usize>,
    safety_margin: f64,
    compactor: Option<Arc<dyn Compactor>>,
}

impl ChatSession {
    /// Unbudgeted session with a fresh id and no system prompt.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
            system_prompt: None,
            max_tokens: None,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            compactor: None,
        }
    }

    pub fn builder() -> ChatSessionBuilder {
        ChatSessionBuilder::default()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn max_tokens(&self) -> Option<usize> {
        self.max_tokens
    }

    pub fn safety_margin(&self) -> f64 {
        self.safety_margin
    }

    /// `floor(max_tokens * safety_margin)`, or `None` when unbudgeted
    pub fn effective_max_tokens(&self) -> Option<usize> {
        self.max_tokens
            .map(|max| (max as f64 * self.safety_margin).floor() as usize)
    }

    /// Copy of the history. Changing it does not affect the session.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.messages)
    }

    pub fn has_compactor(&self) -> bool {
        self.compactor.is_some()
    }

    /// Append a message, compacting first if it would not fit.
    ///
    /// # Errors
    ///
    /// [`Error::ContextOverflow`] when over budget with no compactor; the
    /// history is left unchanged. Compactor errors are propagated.
    pub async fn add_message(&mut self, message: Message) -> Result<()> {
        let Some(limit) = self.effective_max_tokens() else {
            self.messages.push(message);
            return Ok(());
        };

        let current = estimate_tokens(&self.messages);
        let incoming = estimate_message(&message);

        if current + incoming > limit {
            let Some(compactor) = self.compactor.clone() else {
                log::warn!(
                    "Session {} over budget: {} + {} > {}",
                    self.id,
                    current,
                    incoming,
                    limit
                );
                return Err(Error::ContextOverflow {
                    attempted: current + incoming,
                    limit,
                });
            };

            let target = compaction_target(limit, incoming);
            self.run_compactor(compactor.as_ref(), target).await?;
        }

        self.messages.push(message);

        // The new message alone may have pushed the history over budget.
        if let Some(compactor) = self.compactor.clone() {
            if estimate_tokens(&self.messages) > limit {
                self.run_compactor(compactor.as_ref(), compaction_target(limit, 0))
                    .await?;
            }
        }

        Ok(())
    }

    /// Append the assistant message of a provider response.
    pub async fn add_response(&mut self, response: &ChatResponse) -> Result<()> {
        self.add_message(response.message().clone()).await
    }

    /// Compact to `target`, or to the effective budget, `max_tokens`, or
    /// [`DEFAULT_COMPACTION_TARGET`] in that order. A no-op without a compactor.
    pub async fn compact(&mut self, target: Option<usize>) -> Result<()> {
        let Some(compactor) = self.compactor.clone() else {
            return Ok(());
        };

        let target = target
            .or(self.effective_max_tokens())
            .or(self.max_tokens)
            .unwrap_or(DEFAULT_COMPACTION_TARGET);

        self.run_compactor(compactor.as_ref(), target).await
    }

    /// Swap the history wholesale, without budget checks.
    pub(crate) fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Empty the history, optionally keeping the configured system prompt.
    pub fn clear(&mut self, preserve_system: bool) {
        self.messages.clear();
        if preserve_system {
            if let Some(prompt) = &self.system_prompt {
                self.messages.push(Message::system(prompt.clone()));
            }
        }
    }

    /// Serializable copy of this session's state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            system_prompt: self.system_prompt.clone(),
            max_tokens: self.max_tokens,
            safety_margin: self.safety_margin,
            messages: self.messages.clone(),
        }
    }

    /// Rebuild a session from a snapshot. The history is restored as saved,
    /// without budget checks.
    pub fn restore(
        snapshot: SessionSnapshot,
        compactor: Option<Arc<dyn Compactor>>,
    ) -> Result<Self> {
        validate_budget(snapshot.max_tokens, snapshot.safety_margin)?;
        Ok(Self {
            id: snapshot.id,
            messages: snapshot.messages,
            system_prompt: snapshot.system_prompt,
            max_tokens: snapshot.max_tokens,
            safety_margin: snapshot.safety_margin,
            compactor,
        })
    }

    async fn run_compactor(&mut self, compactor: &dyn Compactor, target: usize) -> Result<()> {
        let before = estimate_tokens(&self.messages);
        let compacted = compactor.compact(&self.messages, target).await?;
        log::debug!(
            "Session {} compacted by {}: {} -> {} tokens ({} -> {} messages, target {})",
            self.id,
            compactor.name(),
            before,
            estimate_tokens(&compacted),
            self.messages.len(),
            compacted.len(),
            target
        );
        self.messages = compacted;
        Ok(())
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("messages", &self.messages.len())
            .field("max_tokens", &self.max_tokens)
            .field("safety_margin", &self.safety_margin)
            .field("compactor", &self.compactor.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

/// Budget left for history once `reserved` tokens are set aside, floored.
fn compaction_target(limit: usize, reserved: usize) -> usize {
    match limit.checked_sub(reserved) {
        Some(target) if target > 0 => target,
        _ => MIN_COMPACTION_TARGET.min(limit),
    }
}

fn validate_budget(max_tokens: Option<usize>, safety_margin: f64) -> Result<()> {
    if max_tokens == Some(0) {
        return Err(Error::config("max_tokens must be greater than zero"));
    }
    if !(safety_margin > 0.0 && safety_margin <= 1.0) {
        return Err(Error::config(format!(
            "safety_margin must be in (0.0, 1.0], got {}",
            safety_margin
        )));
    }
    Ok(())
}

/// Builder for [`ChatSession`]
#[derive(Default)]
pub struct ChatSessionBuilder {
    id: Option<String>,
    system_prompt: Option<String>,
    max_tokens: Option<usize>,
    safety_margin: Option<f64>,
    compactor: Option<Arc<dyn Compactor>>,
}

impl ChatSessionBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// System prompt, placed at index 0 of the history.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = Some(margin);
        self
    }

    pub fn compactor(mut self, compactor: Arc<dyn Compactor>) -> Self {
        self.compactor = Some(compactor);
        self
    }

    pub fn build(self) -> Result<ChatSession> {
        let safety_margin = self.safety_margin.unwrap_or(DEFAULT_SAFETY_MARGIN);
        validate_budget(self.max_tokens, safety_margin)?;

        let id = match self.id {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::config("session id must not be empty"));
            }
            Some(id) => id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let system_prompt = self.system_prompt.filter(|p| !p.trim().is_empty());
        let messages = system_prompt
            .iter()
            .map(|p| Message::system(p.clone()))
            .collect();

        Ok(ChatSession {
            id,
            messages,
            system_prompt,
            max_tokens: self.max_tokens,
            safety_margin,
            compactor: self.compactor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::TruncateOldest;

    fn budgeted(max_tokens: usize) -> ChatSession {
        ChatSession::builder()
            .max_tokens(max_tokens)
            .safety_margin(0.8)
            .build()
            .unwrap()
    }

    #[test]
    fn test_effective_max_tokens() {
        assert_eq!(budgeted(100).effective_max_tokens(), Some(80));
        assert_eq!(budgeted(101).effective_max_tokens(), Some(80));
        assert_eq!(ChatSession::new().effective_max_tokens(), None);
    }

    #[test]
    fn test_builder_places_system_prompt_first() {
        let session = ChatSession::builder()
            .system_prompt("You are helpful.")
            .build()
            .unwrap();
        assert_eq!(session.len(), 1);
        assert!(session.messages()[0].is_system());
        assert_eq!(session.system_prompt(), Some("You are helpful."));
    }

    #[test]
    fn test_builder_rejects_bad_budget() {
        assert!(ChatSession::builder().max_tokens(0).build().is_err());
        assert!(ChatSession::builder().safety_margin(0.0).build().is_err());
        assert!(ChatSession::builder().safety_margin(1.5).build().is_err());
        assert!(ChatSession::builder().id("  ").build().is_err());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(ChatSession::new().id(), ChatSession::new().id());
    }

    #[tokio::test]
    async fn test_unbudgeted_never_drops() {
        let mut session = ChatSession::new();
        for i in 0..200 {
            session
                .add_message(Message::user(format!("message {} {}", i, "x".repeat(500))))
                .await
                .unwrap();
        }
        assert_eq!(session.len(), 200);
    }

    #[tokio::test]
    async fn test_overflow_boundary_without_compactor() {
        // 80 effective. An empty user message costs 4, "x" * 4n costs 4 + n.
        let mut session = budgeted(100);
        session.add_message(Message::user("x".repeat(4 * 36))).await.unwrap();
        assert_eq!(session.estimated_tokens(), 40);

        // 40 + 40 == 80: allowed
        session.add_message(Message::user("x".repeat(4 * 36))).await.unwrap();
        assert_eq!(session.estimated_tokens(), 80);

        // 80 + 4 > 80: rejected, history untouched
        let err = session.add_message(Message::user("")).await.unwrap_err();
        match err {
            Error::ContextOverflow { attempted, limit } => {
                assert_eq!(attempted, 84);
                assert_eq!(limit, 80);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.len(), 2);
    }

    #[tokio::test]
    async fn test_messages_is_a_copy() {
        let mut session = ChatSession::new();
        session.add_message(Message::user("hi")).await.unwrap();

        let mut copy = session.messages();
        copy.push(Message::user("sneaky"));
        copy.clear();
        assert_eq!(session.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_preserves_system_prompt() {
        let mut session = ChatSession::builder()
            .system_prompt("Rules")
            .build()
            .unwrap();
        session.add_message(Message::user("hi")).await.unwrap();

        session.clear(true);
        assert_eq!(session.len(), 1);
        assert_eq!(session.messages()[0].text(), "Rules");

        session.clear(false);
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_compact_without_compactor_is_noop() {
        let mut session = budgeted(100);
        session.add_message(Message::user("hello")).await.unwrap();
        session.compact(Some(1)).await.unwrap();
        assert_eq!(session.len(), 1);
    }

    #[tokio::test]
    async fn test_manual_compact_to_target() {
        let mut session = ChatSession::builder()
            .system_prompt("sys")
            .compactor(Arc::new(TruncateOldest))
            .build()
            .unwrap();
        for i in 0..20 {
            session
                .add_message(Message::user(format!("message number {}", i)))
                .await
                .unwrap();
        }

        session.compact(Some(30)).await.unwrap();
        assert!(session.estimated_tokens() <= 30);
        assert!(session.messages()[0].is_system());
        assert_eq!(session.messages().last().unwrap().text(), "message number 19");
    }

    #[test]
    fn test_compaction_target_floor() {
        assert_eq!(compaction_target(80, 54), 26);
        assert_eq!(compaction_target(80, 80), 80);
        assert_eq!(compaction_target(80, 500), 80);
        assert_eq!(compaction_target(5000, 6000), MIN_COMPACTION_TARGET);
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let mut session = ChatSession::builder()
            .id("abc")
            .system_prompt("sys")
            .max_tokens(1000)
            .build()
            .unwrap();
        session.add_message(Message::user("hi")).await.unwrap();

        let restored = ChatSession::restore(session.snapshot(), None).unwrap();
        assert_eq!(restored.id(), "abc");
        assert_eq!(restored.messages(), session.messages());
        assert_eq!(restored.effective_max_tokens(), Some(800));
    }
}
