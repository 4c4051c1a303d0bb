//! Token counting
//!
//! The context manager and usage accounting take an injected counter; the
//! engine does not hardcode a tokenizer. [`CharacterTokenizer`] is the
//! default heuristic; real deployments can plug in a model-exact counter.

use crate::types::{ContentBlock, Message};

/// Per-message overhead (role label, formatting tokens)
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Trait for estimating token counts
pub trait TokenCounter: Send + Sync {
    /// Estimate the token count of a text fragment
    fn count_text(&self, text: &str) -> usize;

    /// Estimate the token count of a single message
    fn count_message(&self, message: &Message) -> usize {
        let mut total = MESSAGE_OVERHEAD_TOKENS;
        for block in &message.content {
            total += match block {
                ContentBlock::Text(t) => self.count_text(t),
                ContentBlock::ToolUse(u) => {
                    self.count_text(&u.name) + self.count_text(&u.input.to_string())
                }
                ContentBlock::ToolResult(r) => self.count_text(&r.content.as_text()),
                ContentBlock::Thinking { thinking, .. } => self.count_text(thinking),
            };
        }
        total
    }

    /// Estimate the token count of a conversation
    fn count_messages(&self, messages: &[Message]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Character-ratio token counter (~4 characters per token)
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacterTokenizer;

impl TokenCounter for CharacterTokenizer {
    fn count_text(&self, text: &str) -> usize {
        text.len().div_ceil(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_text() {
        let t = CharacterTokenizer;
        assert_eq!(t.count_text(""), 0);
        assert_eq!(t.count_text("abcd"), 1);
        assert_eq!(t.count_text("abcde"), 2);
    }

    #[test]
    fn test_count_message_includes_overhead() {
        let t = CharacterTokenizer;
        let msg = Message::user("abcd"); // 1 content token
        assert_eq!(t.count_message(&msg), MESSAGE_OVERHEAD_TOKENS + 1);
    }

    #[test]
    fn test_count_messages_sums() {
        let t = CharacterTokenizer;
        let msgs = vec![Message::user("abcd"), Message::assistant("abcd")];
        assert_eq!(t.count_messages(&msgs), 2 * (MESSAGE_OVERHEAD_TOKENS + 1));
    }
}
