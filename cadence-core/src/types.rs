//! Backend-agnostic types for messages and tools
//!
//! These types abstract over concrete text-completion backends, allowing the
//! agent loop and the context manager to work with any implementation of the
//! [`crate::backend::Backend`] trait.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::ToolOutput;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation
///
/// Messages are append-only within a run; compaction replaces an oldest
/// prefix with a single summary message. The `cache_breakpoint` flag is a
/// hint to the backend that the prompt prefix ending at this message may be
/// cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache_breakpoint: bool,
}

impl Message {
    /// Create a new user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text(text.into())],
            cache_breakpoint: false,
        }
    }

    /// Create a new assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text(text.into())],
            cache_breakpoint: false,
        }
    }

    /// Create a new system message with text content
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentBlock::Text(text.into())],
            cache_breakpoint: false,
        }
    }

    /// Create a tool-role message carrying tool results
    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Self {
            role: Role::Tool,
            content: results.into_iter().map(ContentBlock::ToolResult).collect(),
            cache_breakpoint: false,
        }
    }

    /// Create an assistant message with arbitrary content blocks
    ///
    /// This provides full control over the message content, useful for
    /// constructing multi-turn conversations with tool calls or thinking
    /// blocks.
    pub fn assistant_with_content(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            cache_breakpoint: false,
        }
    }

    /// Get all text content concatenated
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Get all tool call blocks
    pub fn tool_calls(&self) -> Vec<&ToolUseBlock> {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::ToolUse(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    /// Whether any content block is a tool result
    pub fn has_tool_results(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, ContentBlock::ToolResult(_)))
    }

    /// Return a copy of this message with thinking blocks removed
    ///
    /// Backends that do not require thinking content on subsequent turns
    /// get the stripped form; see [`crate::backend::Backend::resend_thinking`].
    pub fn without_thinking(&self) -> Self {
        Self {
            role: self.role,
            content: self
                .content
                .iter()
                .filter(|c| !matches!(c, ContentBlock::Thinking { .. }))
                .cloned()
                .collect(),
            cache_breakpoint: self.cache_breakpoint,
        }
    }
}

/// Content block within a message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text(String),
    /// Tool call request from the assistant
    ToolUse(ToolUseBlock),
    /// Tool result
    ToolResult(ToolResultBlock),
    /// Thinking block from extended reasoning
    Thinking {
        /// The model's thinking content
        thinking: String,
        /// Signature for multi-turn thinking verification
        signature: String,
    },
}

/// A tool call request from the model
///
/// The `id` is stable for the lifetime of the call and unique within a
/// single turn; results reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseBlock {
    /// Unique ID for this tool call (used to match with the result)
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool input parameters as JSON
    pub input: Value,
}

/// Result of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// ID of the tool call this is a result for
    pub tool_use_id: String,
    /// Result content (text or structured)
    pub content: ToolOutput,
    /// Whether the tool execution succeeded
    pub status: ToolResultStatus,
    /// True when the failure was a permission denial rather than a tool
    /// error, so the model can distinguish "I wasn't allowed" from "it broke"
    #[serde(default)]
    pub is_permission_error: bool,
}

impl ToolResultBlock {
    /// A successful result
    pub fn success(tool_use_id: impl Into<String>, content: ToolOutput) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content,
            status: ToolResultStatus::Success,
            is_permission_error: false,
        }
    }

    /// A failed result carrying an error description
    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: ToolOutput::Text(message.into()),
            status: ToolResultStatus::Error,
            is_permission_error: false,
        }
    }

    /// A synthesized result describing a permission denial
    pub fn permission_denied(tool_use_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: ToolOutput::Text(format!("Permission denied: {}", reason.into())),
            status: ToolResultStatus::Error,
            is_permission_error: true,
        }
    }
}

/// Status of a tool result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultStatus {
    Success,
    Error,
}

/// Category of a tool, used by the mode filter and the permission gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Read-only access (file reads, searches, globs)
    Read,
    /// Mutating file access
    Edit,
    /// Shell command execution
    Bash,
    /// Access outside the working directory
    ExternalDirectory,
    /// Tools discovered from MCP plugins
    McpTools,
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolCategory::Read => "read",
            ToolCategory::Edit => "edit",
            ToolCategory::Bash => "bash",
            ToolCategory::ExternalDirectory => "external_directory",
            ToolCategory::McpTools => "mcp_tools",
        };
        write!(f, "{s}")
    }
}

/// Definition of a tool available to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the tool's `name()` method)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: Value,
    /// Category used for mode filtering and permission defaults
    pub category: ToolCategory,
    /// Whether concurrent invocations are safe; idempotent calls within one
    /// turn may execute in parallel
    #[serde(default)]
    pub idempotent: bool,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    EndTurn,
    /// Model wants to use a tool
    ToolUse,
    /// Hit the output token limit
    MaxTokens,
    /// Unknown/other reason
    #[default]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(format!("{}", Role::System), "system");
        assert_eq!(format!("{}", Role::User), "user");
        assert_eq!(format!("{}", Role::Assistant), "assistant");
        assert_eq!(format!("{}", Role::Tool), "tool");
    }

    #[test]
    fn test_message_constructors() {
        let cases = [
            (Message::user("hi"), Role::User),
            (Message::assistant("hi"), Role::Assistant),
            (Message::system("hi"), Role::System),
        ];
        for (msg, role) in cases {
            assert_eq!(msg.role, role);
            assert_eq!(msg.text(), "hi");
            assert!(!msg.cache_breakpoint);
        }
    }

    #[test]
    fn test_message_text_concatenation() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Text("Hello ".to_string()),
                ContentBlock::ToolUse(ToolUseBlock {
                    id: "1".to_string(),
                    name: "tool".to_string(),
                    input: serde_json::json!({}),
                }),
                ContentBlock::Text("world".to_string()),
            ],
            cache_breakpoint: false,
        };
        assert_eq!(msg.text(), "Hello world");
    }

    #[test]
    fn test_message_tool_calls_preserve_order() {
        let msg = Message::assistant_with_content(vec![
            ContentBlock::ToolUse(ToolUseBlock {
                id: "first".to_string(),
                name: "read".to_string(),
                input: serde_json::json!({}),
            }),
            ContentBlock::Text("working...".to_string()),
            ContentBlock::ToolUse(ToolUseBlock {
                id: "second".to_string(),
                name: "write".to_string(),
                input: serde_json::json!({}),
            }),
        ]);

        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "first");
        assert_eq!(calls[1].id, "second");
    }

    #[test]
    fn test_tool_results_message() {
        let msg = Message::tool_results(vec![
            ToolResultBlock::success("1", ToolOutput::Text("ok".to_string())),
            ToolResultBlock::error("2", "boom"),
        ]);
        assert_eq!(msg.role, Role::Tool);
        assert!(msg.has_tool_results());
        assert!(matches!(
            &msg.content[0],
            ContentBlock::ToolResult(r) if r.status == ToolResultStatus::Success
        ));
        assert!(matches!(
            &msg.content[1],
            ContentBlock::ToolResult(r) if r.status == ToolResultStatus::Error
        ));
    }

    #[test]
    fn test_permission_denied_result() {
        let r = ToolResultBlock::permission_denied("id1", "no grant for bash");
        assert!(r.is_permission_error);
        assert_eq!(r.status, ToolResultStatus::Error);
        assert!(matches!(
            &r.content,
            ToolOutput::Text(t) if t.contains("no grant for bash")
        ));
    }

    #[test]
    fn test_without_thinking_strips_blocks() {
        let msg = Message::assistant_with_content(vec![
            ContentBlock::Thinking {
                thinking: "hmm".to_string(),
                signature: "sig".to_string(),
            },
            ContentBlock::Text("answer".to_string()),
        ]);
        let stripped = msg.without_thinking();
        assert_eq!(stripped.content.len(), 1);
        assert_eq!(stripped.text(), "answer");
        // Original untouched
        assert_eq!(msg.content.len(), 2);
    }

    #[test]
    fn test_tool_category_serde() {
        let json = serde_json::to_string(&ToolCategory::ExternalDirectory).unwrap();
        assert_eq!(json, "\"external_directory\"");
        let parsed: ToolCategory = serde_json::from_str("\"bash\"").unwrap();
        assert_eq!(parsed, ToolCategory::Bash);
    }
}
