use crate::errors::ErrorInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Recursively sort object keys so two structurally-equal JSON values
/// serialize identically regardless of key insertion order.
pub fn canonicalize_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize_json(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize_json).collect()),
        other => other.clone(),
    }
}

/// Deterministic hash over a tool name and its canonicalised arguments.
/// Identical (tool, arguments) pairs always produce the same key.
pub fn idempotency_key(tool: &str, arguments: &Value) -> String {
    let canonical = canonicalize_json(arguments);
    let canonical_str = serde_json::to_string(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_str.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split a dotted tool name (`namespace.name`) into its parts. Returns
/// `(None, name)` if there is no dot.
pub fn split_dotted_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((ns, rest)) => (Some(ns), rest),
        None => (None, name),
    }
}

/// Scheduling and execution hints that travel with a `ToolCall`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallMetadata {
    #[serde(default)]
    pub pool: Option<String>,
    /// Estimated wall-clock duration in milliseconds, used by the scheduler.
    #[serde(default)]
    pub est_ms: Option<u64>,
    /// Abstract cost units, used by the scheduler's cost budget.
    #[serde(default)]
    pub cost: Option<u64>,
    /// Higher is more important. `0` marks the call eligible for planned
    /// skipping under deadline/cost pressure.
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    1
}

/// An intended invocation of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub metadata: CallMetadata,
}

impl ToolCall {
    pub fn new(call_id: impl Into<String>, tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            arguments,
            depends_on: Vec::new(),
            metadata: CallMetadata::default(),
        }
    }

    pub fn with_depends_on(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    pub fn with_metadata(mut self, metadata: CallMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Derived deterministically from `tool` + canonicalised `arguments`.
    pub fn idempotency_key(&self) -> String {
        idempotency_key(&self.tool, &self.arguments)
    }

    /// `(namespace, bare_name)` resolved from a dotted tool name, if present.
    pub fn namespace_and_name(&self) -> (Option<&str>, &str) {
        split_dotted_name(&self.tool)
    }
}

/// The outcome of executing (or skipping) a `ToolCall`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_info: Option<ErrorInfo>,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub end_time: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
    pub attempts: u32,
    pub cached: bool,
}

impl ToolResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn success(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        result: Value,
        start_time: chrono::DateTime<chrono::Utc>,
        end_time: chrono::DateTime<chrono::Utc>,
        attempts: u32,
        cached: bool,
    ) -> Self {
        let duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            result: Some(result),
            error: None,
            error_info: None,
            start_time,
            end_time,
            duration_ms,
            attempts: if cached { 0 } else { attempts },
            cached,
        }
    }

    pub fn failure(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        error: crate::errors::ToolError,
        start_time: chrono::DateTime<chrono::Utc>,
        end_time: chrono::DateTime<chrono::Utc>,
        attempts: u32,
    ) -> Self {
        let duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;
        let message = error.to_string();
        Self {
            call_id: call_id.into(),
            tool: tool.into(),
            result: None,
            error: Some(message),
            error_info: Some(error.into_error_info()),
            start_time,
            end_time,
            duration_ms,
            attempts,
            cached: false,
        }
    }
}

/// Capabilities a tool advertises. Tags, not subclass identity (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    ReadOnly,
    Write,
    Destructive,
    Idempotent,
    Streaming,
}

/// Metadata registered alongside a tool instance (or in place of one, for
/// deferred tools).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    pub description: String,
    pub parameters: Value,
    /// Folded into the cache key alongside `idempotency_key` when present,
    /// so a version bump invalidates cached results without clearing the
    /// whole cache.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub examples: Vec<Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub defer_loading: bool,
    #[serde(default)]
    pub search_keywords: Vec<String>,
    #[serde(default)]
    pub import_path: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            description: description.into(),
            parameters,
            version: None,
            examples: Vec::new(),
            tags: Vec::new(),
            defer_loading: false,
            search_keywords: Vec::new(),
            import_path: None,
            capabilities: Vec::new(),
        }
    }
}
