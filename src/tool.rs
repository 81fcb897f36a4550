use crate::errors::{Result, ToolError};
use crate::model::{Capability, ToolMetadata};
use async_trait::async_trait;
use serde_json::Value;
use std::pin::Pin;
use tokio_stream::Stream;

/// A narrow capability set any callable operation can implement — no
/// inheritance hierarchy (§9). `validated` and `streaming` variants compose
/// around a base `Tool` rather than subclassing it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn namespace(&self) -> Option<&str> {
        None
    }

    /// JSON Schema describing `execute`'s accepted arguments.
    fn parameters(&self) -> Value {
        serde_json::json!({"type": "object"})
    }

    /// Version folded into the cache key alongside the call's idempotency
    /// key, when present, so a version bump invalidates stale entries.
    fn version(&self) -> Option<&str> {
        None
    }

    async fn execute(&self, arguments: Value) -> Result<Value>;

    /// Whether a successful result may be cached. Only read-only,
    /// idempotent tools should return true; tools that mutate state must
    /// return false.
    fn cacheable(&self) -> bool {
        false
    }

    /// Tags describing the tool's effect. Capability is metadata, not
    /// subclass identity.
    fn capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn supports_streaming(&self) -> bool {
        self.capabilities().contains(&Capability::Streaming)
    }

    /// Yield incremental values instead of one final result. Only called
    /// when `supports_streaming()` is true.
    async fn stream_execute(
        &self,
        arguments: Value,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Value>> + Send>>> {
        let _ = arguments;
        Err(ToolError::Execution(format!(
            "tool '{}' does not support streaming",
            self.name()
        )))
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// Composes a JSON Schema validator in front of a `Tool` (§9: "`validated`
/// composes a schema validator in front of a tool").
pub struct ValidatedTool {
    inner: std::sync::Arc<dyn Tool>,
    schema: Option<jsonschema::Validator>,
}

impl ValidatedTool {
    pub fn new(inner: std::sync::Arc<dyn Tool>) -> Self {
        let schema = jsonschema::validator_for(&inner.parameters()).ok();
        Self { inner, schema }
    }
}

#[async_trait]
impl Tool for ValidatedTool {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn namespace(&self) -> Option<&str> {
        self.inner.namespace()
    }

    fn parameters(&self) -> Value {
        self.inner.parameters()
    }

    fn version(&self) -> Option<&str> {
        self.inner.version()
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        if let Some(schema) = &self.schema {
            if let Err(err) = schema.validate(&arguments) {
                return Err(ToolError::Validation(err.to_string()));
            }
        }
        self.inner.execute(arguments).await
    }

    fn cacheable(&self) -> bool {
        self.inner.cacheable()
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.inner.capabilities()
    }

    async fn stream_execute(
        &self,
        arguments: Value,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<Value>> + Send>>> {
        if let Some(schema) = &self.schema {
            if let Err(err) = schema.validate(&arguments) {
                return Err(ToolError::Validation(err.to_string()));
            }
        }
        self.inner.stream_execute(arguments).await
    }
}

/// Render a `ToolMetadata` for a registered tool, used by deferred-tool
/// search without instantiating the tool itself.
pub fn describe(tool: &dyn Tool, description: impl Into<String>) -> ToolMetadata {
    let mut meta = ToolMetadata::new(tool.name(), description, tool.parameters());
    meta.namespace = tool.namespace().map(str::to_string);
    meta.capabilities = tool.capabilities();
    meta.version = tool.version().map(str::to_string);
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        async fn execute(&self, arguments: Value) -> Result<Value> {
            Ok(arguments)
        }

        fn cacheable(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn validated_tool_rejects_missing_required_field() {
        let validated = ValidatedTool::new(std::sync::Arc::new(EchoTool));
        let result = validated.execute(json!({})).await;
        assert!(matches!(result, Err(ToolError::Validation(_))));
    }

    #[tokio::test]
    async fn validated_tool_passes_through_valid_arguments() {
        let validated = ValidatedTool::new(std::sync::Arc::new(EchoTool));
        let result = validated.execute(json!({"text": "hi"})).await.unwrap();
        assert_eq!(result, json!({"text": "hi"}));
    }
}
