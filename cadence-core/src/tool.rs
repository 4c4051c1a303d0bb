use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ToolCategory;

/// Result content that tools can return.
///
/// All backends support both variants; structured results are serialized to
/// JSON when the backend only accepts text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolOutput {
    /// Plain text response
    Text(String),

    /// Structured JSON data - use for complex responses
    Json(Value),
}

impl ToolOutput {
    /// Create a JSON result from any serializable type
    pub fn json<T: Serialize>(value: T) -> Result<Self, serde_json::Error> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Create a text result from a string
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Get the text content, converting structured data to its JSON string
    pub fn as_text(&self) -> String {
        match self {
            ToolOutput::Text(s) => s.clone(),
            ToolOutput::Json(v) => v.to_string(),
        }
    }

    /// Get a reference to the text content if this is a Text variant
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ToolOutput::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for ToolOutput {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for ToolOutput {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Errors that can occur during tool execution
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("tool call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("tool call was cancelled")]
    Cancelled,

    #[error("plugin unavailable: {0}")]
    PluginUnavailable(String),

    #[error("{0}")]
    Custom(String),
}

impl From<String> for ToolError {
    fn from(s: String) -> Self {
        Self::Custom(s)
    }
}

impl From<&str> for ToolError {
    fn from(s: &str) -> Self {
        Self::Custom(s.to_string())
    }
}

/// Trait for implementing tools callable by the agent loop.
///
/// Tools define an input type with `#[derive(Deserialize, JsonSchema)]` so
/// the JSON schema shown to the model is generated from the Rust type.
///
/// # Example
///
/// ```rust
/// use cadence_core::{Tool, ToolCategory, ToolError, ToolOutput};
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct GreetInput {
///     /// Who to greet
///     name: String,
/// }
///
/// struct GreetTool;
///
/// impl Tool for GreetTool {
///     type Input = GreetInput;
///
///     fn name(&self) -> &str { "greet" }
///     fn description(&self) -> &str { "Greet someone by name" }
///     fn category(&self) -> ToolCategory { ToolCategory::Read }
///
///     async fn execute(&self, input: Self::Input) -> Result<ToolOutput, ToolError> {
///         Ok(format!("Hello, {}!", input.name).into())
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The input type for this tool. Must implement `Deserialize` and `JsonSchema`.
    type Input: DeserializeOwned + JsonSchema;

    /// The name of the tool (e.g., "read_file", "run_command")
    fn name(&self) -> &str;

    /// A description of what the tool does
    fn description(&self) -> &str;

    /// Category used for mode filtering and permission defaults
    fn category(&self) -> ToolCategory;

    /// Whether concurrent invocations of this tool are safe.
    ///
    /// When every call in a turn targets an idempotent tool, the loop may
    /// execute them in parallel. Results still join in model-issued order.
    fn idempotent(&self) -> bool {
        false
    }

    /// Execute the tool with typed input
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl std::future::Future<Output = Result<ToolOutput, ToolError>> + Send;

    /// Get the JSON schema for this tool's input.
    ///
    /// Automatically implemented using the `JsonSchema` derive on `Input`.
    fn input_schema(&self) -> Value {
        let schema = schemars::schema_for!(Self::Input);
        serde_json::to_value(schema).expect("Failed to serialize schema")
    }
}

/// Object-safe trait for dynamic tool dispatch (used internally by the agent).
///
/// Users should implement `Tool` instead and use `box_tool()` to convert.
pub trait DynTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn category(&self) -> ToolCategory;
    fn idempotent(&self) -> bool;
    fn input_schema(&self) -> Value;
    fn execute_raw(
        &self,
        input: Value,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<ToolOutput, ToolError>> + Send + '_>,
    >;

    /// The tool's descriptor as shown to the model
    fn definition(&self) -> crate::types::ToolDefinition {
        crate::types::ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
            category: self.category(),
            idempotent: self.idempotent(),
        }
    }
}

/// Convert a `Tool` into a type-erased `Arc<dyn DynTool>` for storage in the
/// registry.
pub fn box_tool<T: Tool + 'static>(tool: T) -> std::sync::Arc<dyn DynTool> {
    std::sync::Arc::new(ToolWrapper(tool))
}

/// Internal wrapper that implements DynTool for any Tool
struct ToolWrapper<T>(T);

impl<T: Tool + 'static> DynTool for ToolWrapper<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn category(&self) -> ToolCategory {
        self.0.category()
    }

    fn idempotent(&self) -> bool {
        self.0.idempotent()
    }

    fn input_schema(&self) -> Value {
        self.0.input_schema()
    }

    fn execute_raw(
        &self,
        input: Value,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<ToolOutput, ToolError>> + Send + '_>,
    > {
        Box::pin(async move {
            let typed_input: T::Input = serde_json::from_value(input)
                .map_err(|e| ToolError::Custom(format!("Invalid tool input: {e}")))?;
            self.0.execute(typed_input).await
        })
    }
}
