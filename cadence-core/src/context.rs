//! Conversation history and context window management
//!
//! The [`ContextManager`] owns the message history for one run and
//! guarantees that the list handed to the backend fits the model's context
//! window. When the live history crosses the compaction threshold, the
//! oldest prefix is summarized by the backend into a single system message;
//! a protected tail of recent messages is never touched.

use std::sync::Arc;

use crate::backend::{Backend, BackendError, ModelRequest};
use crate::tokenizer::TokenCounter;
use crate::types::{ContentBlock, Message, Role};

/// Prompt used to summarize a history prefix during compaction.
///
/// The summary replaces the original messages, so it must preserve the goal
/// and the identifiers of recent tool calls for the model to stay oriented.
const SUMMARY_PROMPT: &str = "You are a context compaction assistant. Summarize the following \
     conversation history in a concise, information-dense way. Always restate the overall goal \
     first. Preserve technical details, decisions, file names, and the names and ids of recent \
     tool calls that may be relevant to future work. The summary will replace the original \
     history to free up context space.";

/// Configuration for the context manager
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Fraction of the window at which compaction triggers (default 0.92)
    pub compaction_threshold: f64,
    /// Fraction of the window compaction reduces to (default 0.50)
    pub compaction_target: f64,
    /// Token budget of the suffix compaction never touches (default 8192)
    pub protected_tail_tokens: usize,
    /// A goal reminder is injected every this many turns (default 10)
    pub reminder_interval: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 0.92,
            compaction_target: 0.50,
            protected_tail_tokens: 8192,
            reminder_interval: 10,
        }
    }
}

/// Errors from context preparation
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    /// The protected tail alone exceeds the context window; fatal to the run
    #[error("context too large: the protected tail alone exceeds the context window")]
    ContextTooLarge,

    /// The backend failed to produce a summary
    #[error("compaction summarization failed: {0}")]
    Summarization(#[from] BackendError),
}

/// Owns the conversation history for one agent run
pub struct ContextManager {
    messages: Vec<Message>,
    goal: String,
    turn: u32,
    last_compaction_index: usize,
    counter: Arc<dyn TokenCounter>,
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(goal: impl Into<String>, counter: Arc<dyn TokenCounter>, config: ContextConfig) -> Self {
        Self {
            messages: Vec::new(),
            goal: goal.into(),
            turn: 0,
            last_compaction_index: 0,
            counter,
            config,
        }
    }

    /// Append a message to the history.
    ///
    /// This is the only mutation path; history is append-only between
    /// compactions.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages currently in the history
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The goal this run is pursuing
    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Number of prepare calls so far
    pub fn turn(&self) -> u32 {
        self.turn
    }

    /// Index of the first message not covered by a compaction summary
    pub fn last_compaction_index(&self) -> usize {
        self.last_compaction_index
    }

    /// Prepare the message list for the next generation.
    ///
    /// Advances the turn counter, injects a goal reminder on schedule, runs
    /// compaction when the live history crosses the threshold, and marks
    /// cache breakpoints on the returned copy.
    pub async fn prepare(&mut self, backend: &dyn Backend) -> Result<Vec<Message>, ContextError> {
        self.turn += 1;

        if self.config.reminder_interval > 0 && self.turn % self.config.reminder_interval == 0 {
            self.messages
                .push(Message::system(format!("Reminder — current goal: {}", self.goal)));
        }

        self.maybe_compact(backend).await?;

        let mut prepared = self.messages.clone();
        mark_cache_breakpoints(&mut prepared);
        Ok(prepared)
    }

    async fn maybe_compact(&mut self, backend: &dyn Backend) -> Result<(), ContextError> {
        let window = backend.max_context_tokens();
        let live = &self.messages[self.last_compaction_index..];
        let total = self.counter.count_messages(live);

        let threshold = (window as f64 * self.config.compaction_threshold) as usize;
        if total < threshold {
            return Ok(());
        }

        let tail_start = self.protected_tail_start();
        let tail_tokens = self.counter.count_messages(&self.messages[tail_start..]);
        if tail_tokens >= window {
            return Err(ContextError::ContextTooLarge);
        }

        // Grow the removable prefix until the remainder drops below the
        // target, stopping at the protected tail.
        let target = (window as f64 * self.config.compaction_target) as usize;
        let mut end = self.last_compaction_index;
        let mut remaining = total;
        while end < tail_start && remaining >= target {
            remaining -= self.counter.count_message(&self.messages[end]);
            end += 1;
        }

        if end == self.last_compaction_index {
            // Everything live is inside the protected tail; nothing to do
            // unless it no longer fits at all.
            if total >= window {
                return Err(ContextError::ContextTooLarge);
            }
            return Ok(());
        }

        let prefix = &self.messages[self.last_compaction_index..end];
        tracing::debug!(
            messages = prefix.len(),
            live_tokens = total,
            window,
            "compacting history prefix"
        );

        let summary = self.summarize(backend, prefix).await?;
        let summary_msg = Message::system(format!("Earlier context (summarized): {summary}"));

        self.messages
            .splice(self.last_compaction_index..end, std::iter::once(summary_msg));
        self.last_compaction_index += 1;
        Ok(())
    }

    /// Start index of the largest suffix within the protected token budget.
    ///
    /// Always leaves at least the final message in the tail.
    fn protected_tail_start(&self) -> usize {
        if self.messages.is_empty() {
            return 0;
        }
        let mut start = self.messages.len();
        let mut tokens = 0;
        while start > self.last_compaction_index {
            let candidate = self.counter.count_message(&self.messages[start - 1]);
            if tokens + candidate > self.config.protected_tail_tokens && start < self.messages.len()
            {
                break;
            }
            tokens += candidate;
            start -= 1;
        }
        start
    }

    async fn summarize(
        &self,
        backend: &dyn Backend,
        prefix: &[Message],
    ) -> Result<String, ContextError> {
        let history = serialize_history(self.goal(), prefix);
        let request = ModelRequest::new(vec![Message::user(format!(
            "{SUMMARY_PROMPT}\n\n---\n\n{history}"
        ))]);
        let response = backend.generate(request).await?;
        Ok(response.message.text())
    }
}

/// Mark the last system message and the last tool-result message as cache
/// breakpoints; a hint to the backend that the preceding prefix is stable.
fn mark_cache_breakpoints(messages: &mut [Message]) {
    if let Some(m) = messages.iter_mut().rev().find(|m| m.role == Role::System) {
        m.cache_breakpoint = true;
    }
    if let Some(m) = messages.iter_mut().rev().find(|m| m.has_tool_results()) {
        m.cache_breakpoint = true;
    }
}

/// Serialize a message slice into plain text for the compaction prompt
fn serialize_history(goal: &str, messages: &[Message]) -> String {
    let mut out = format!("Goal: {goal}\n\n");
    for message in messages {
        let mut parts: Vec<String> = Vec::new();
        for block in &message.content {
            match block {
                ContentBlock::Text(t) => parts.push(t.clone()),
                ContentBlock::ToolUse(u) => {
                    parts.push(format!("[tool_call {} ({}): {}]", u.name, u.id, u.input))
                }
                ContentBlock::ToolResult(r) => parts.push(format!(
                    "[tool_result {}: {}]",
                    r.tool_use_id,
                    r.content.as_text()
                )),
                ContentBlock::Thinking { .. } => {}
            }
        }
        out.push_str(&format!("{}: {}\n\n", message.role, parts.join(" ")));
    }
    out
}
