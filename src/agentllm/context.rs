//! Token counting and sliding-window context management.
//!
//! There is no tokenizer in the runtime; counting uses a character heuristic
//! ([`CharBasedTokenCounter`], four characters per token by default).  The
//! [`SlidingWindowStrategy`] keeps conversations under a token budget by
//! dropping the oldest non-system messages while always retaining every
//! system message, in the original interleaving order.

use crate::agentllm::model::{Message, Role};
use std::sync::Arc;

/// Pluggable message token counter.
pub trait TokenCounter: Send + Sync {
    fn count_text(&self, text: &str) -> usize;

    /// Tokens attributed to one message.
    fn count_message(&self, message: &Message) -> usize;

    fn count_total(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Heuristic counter: `ceil(chars / chars_per_token)`.
///
/// Assistant messages include the serialized tool calls in their length;
/// absent text contributes nothing.
#[derive(Debug, Clone)]
pub struct CharBasedTokenCounter {
    chars_per_token: usize,
}

impl Default for CharBasedTokenCounter {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl CharBasedTokenCounter {
    pub fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: chars_per_token.max(1),
        }
    }
}

impl TokenCounter for CharBasedTokenCounter {
    fn count_text(&self, text: &str) -> usize {
        let chars = text.chars().count();
        (chars + self.chars_per_token - 1) / self.chars_per_token
    }

    fn count_message(&self, message: &Message) -> usize {
        let mut length = message
            .content
            .as_ref()
            .map(|c| c.chars().count())
            .unwrap_or(0);
        if message.role == Role::Assistant && !message.tool_calls.is_empty() {
            length += serde_json::to_string(&message.tool_calls)
                .map(|s| s.chars().count())
                .unwrap_or(0);
        }
        (length + self.chars_per_token - 1) / self.chars_per_token
    }
}

/// Drop-oldest windowing that never discards system messages.
pub struct SlidingWindowStrategy {
    max_tokens: usize,
    counter: Arc<dyn TokenCounter>,
}

impl SlidingWindowStrategy {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            counter: Arc::new(CharBasedTokenCounter::default()),
        }
    }

    pub fn with_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.counter = counter;
        self
    }

    /// Total token count of a message list under this strategy's counter.
    pub fn count_total(&self, messages: &[Message]) -> usize {
        self.counter.count_total(messages)
    }

    /// Produce a trimmed copy of `messages`.
    ///
    /// System messages are always kept.  While the total exceeds the budget
    /// and non-system messages remain, the oldest non-system message is
    /// dropped.  The original order of the survivors is preserved and the
    /// input is never mutated.
    pub fn apply(&self, messages: &[Message]) -> Vec<Message> {
        let counts: Vec<usize> = messages
            .iter()
            .map(|m| self.counter.count_message(m))
            .collect();
        let mut total: usize = counts.iter().sum();
        let mut kept = vec![true; messages.len()];

        for (index, message) in messages.iter().enumerate() {
            if total <= self.max_tokens {
                break;
            }
            if message.role == Role::System {
                continue;
            }
            kept[index] = false;
            total -= counts[index];
        }

        messages
            .iter()
            .zip(kept)
            .filter(|(_, keep)| *keep)
            .map(|(message, _)| message.clone())
            .collect()
    }
}
