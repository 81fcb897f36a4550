use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse-grained retry/propagation policy bucket for an [`ErrorCode`].
///
/// Mirrors the taxonomy a planner needs to make retry decisions without
/// parsing error strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Execution,
    Timeout,
    Connection,
    RateLimit,
    CircuitOpen,
    BulkheadFull,
    Cancelled,
    Configuration,
}

impl ErrorCategory {
    /// Default retryability for the category, absent any code-specific override.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::Execution
                | ErrorCategory::Timeout
                | ErrorCategory::Connection
                | ErrorCategory::RateLimit
                | ErrorCategory::CircuitOpen
                | ErrorCategory::BulkheadFull
        )
    }
}

/// Machine-readable error code. Every failure surfaced to a caller carries one
/// of these, never a bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ToolValidationError,
    ToolArgumentError,
    ToolNotFound,
    ToolExecutionFailed,
    ToolTimeout,
    ToolCancelled,
    ToolRateLimited,
    ToolCircuitOpen,
    ToolRegistrationFailed,
    BulkheadFull,
    SkippedDependencyFailed,
    ConfigurationError,
    ResourceExhausted,
    McpConnectionFailed,
    McpTransportError,
    McpTimeout,
    McpServerError,
}

impl ErrorCode {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorCode::ToolValidationError | ErrorCode::ToolArgumentError => {
                ErrorCategory::Validation
            }
            ErrorCode::ToolNotFound => ErrorCategory::NotFound,
            ErrorCode::ToolExecutionFailed | ErrorCode::ToolRegistrationFailed => {
                ErrorCategory::Execution
            }
            ErrorCode::ToolTimeout | ErrorCode::McpTimeout => ErrorCategory::Timeout,
            ErrorCode::McpConnectionFailed | ErrorCode::McpTransportError => {
                ErrorCategory::Connection
            }
            ErrorCode::ToolRateLimited => ErrorCategory::RateLimit,
            ErrorCode::ToolCircuitOpen => ErrorCategory::CircuitOpen,
            ErrorCode::BulkheadFull => ErrorCategory::BulkheadFull,
            ErrorCode::ToolCancelled => ErrorCategory::Cancelled,
            ErrorCode::SkippedDependencyFailed | ErrorCode::ConfigurationError => {
                ErrorCategory::Configuration
            }
            ErrorCode::ResourceExhausted => ErrorCategory::Execution,
            ErrorCode::McpServerError => ErrorCategory::Execution,
        }
    }
}

/// Structured error payload embedded in a `ToolResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub category: ErrorCategory,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// The engine's typed error hierarchy.
///
/// Module boundaries (registry, strategy, middleware, scheduler, remote
/// adapter) return `ToolError`; leaf/internal helpers may keep using
/// `anyhow::Result` and convert with `?` via the `Internal` variant.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("tool registration failed: {0}")]
    RegistrationFailed(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("circuit open, resets in {reset_timeout_ms}ms")]
    CircuitOpen { reset_timeout_ms: u64 },

    #[error("bulkhead full ({limit_type})")]
    BulkheadFull { limit_type: String },

    #[error("dependency failed: {0}")]
    SkippedDependencyFailed(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("mcp connection failed: {0}")]
    McpConnectionFailed(String),

    #[error("mcp transport error: {0}")]
    McpTransportError(String),

    #[error("mcp call timed out")]
    McpTimeout,

    #[error("mcp server error: {0}")]
    McpServerError(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ToolError>;

impl ToolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ToolError::NotFound(_) => ErrorCode::ToolNotFound,
            ToolError::RegistrationFailed(_) => ErrorCode::ToolRegistrationFailed,
            ToolError::Validation(_) => ErrorCode::ToolValidationError,
            ToolError::Execution(_) => ErrorCode::ToolExecutionFailed,
            ToolError::Timeout { .. } => ErrorCode::ToolTimeout,
            ToolError::Cancelled(_) => ErrorCode::ToolCancelled,
            ToolError::RateLimited { .. } => ErrorCode::ToolRateLimited,
            ToolError::CircuitOpen { .. } => ErrorCode::ToolCircuitOpen,
            ToolError::BulkheadFull { .. } => ErrorCode::BulkheadFull,
            ToolError::SkippedDependencyFailed(_) => ErrorCode::SkippedDependencyFailed,
            ToolError::Configuration(_) => ErrorCode::ConfigurationError,
            ToolError::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            ToolError::McpConnectionFailed(_) => ErrorCode::McpConnectionFailed,
            ToolError::McpTransportError(_) => ErrorCode::McpTransportError,
            ToolError::McpTimeout => ErrorCode::McpTimeout,
            ToolError::McpServerError(_) => ErrorCode::McpServerError,
            ToolError::Internal(_) => ErrorCode::ToolExecutionFailed,
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            ToolError::RateLimited { .. }
            | ToolError::CircuitOpen { .. }
            | ToolError::BulkheadFull { .. }
            | ToolError::Timeout { .. }
            | ToolError::McpTimeout
            | ToolError::McpConnectionFailed(_)
            | ToolError::McpTransportError(_) => true,
            ToolError::Execution(_) | ToolError::Internal(_) => true,
            _ => false,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ToolError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            ToolError::CircuitOpen { reset_timeout_ms } => Some(*reset_timeout_ms),
            _ => None,
        }
    }

    /// Produce the structured `ErrorInfo` embedded in a `ToolResult`.
    pub fn into_error_info(self) -> ErrorInfo {
        let code = self.code();
        let retryable = self.retryable();
        let retry_after_ms = self.retry_after_ms();
        let mut details = serde_json::Map::new();
        if let ToolError::BulkheadFull { limit_type } = &self {
            details.insert("limit_type".into(), serde_json::Value::String(limit_type.clone()));
        }
        if let ToolError::CircuitOpen { reset_timeout_ms } = &self {
            details.insert("reset_timeout_ms".into(), serde_json::Value::from(*reset_timeout_ms));
        }
        ErrorInfo {
            code,
            category: code.category(),
            retryable,
            retry_after_ms,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_is_retryable_with_hint() {
        let err = ToolError::RateLimited { retry_after_ms: 250 };
        assert!(err.retryable());
        assert_eq!(err.retry_after_ms(), Some(250));
        assert_eq!(err.code(), ErrorCode::ToolRateLimited);
    }

    #[test]
    fn validation_is_not_retryable() {
        let err = ToolError::Validation("bad arg".into());
        assert!(!err.retryable());
        assert_eq!(err.code().category(), ErrorCategory::Validation);
    }

    #[test]
    fn internal_from_anyhow() {
        let anyhow_err = anyhow::anyhow!("boom");
        let err: ToolError = anyhow_err.into();
        assert!(matches!(err, ToolError::Internal(_)));
        assert!(err.retryable());
    }

    #[test]
    fn bulkhead_full_carries_limit_type_in_details() {
        let err = ToolError::BulkheadFull { limit_type: "QUEUE_DEPTH".into() };
        let info = err.into_error_info();
        assert_eq!(info.details.get("limit_type").unwrap(), "QUEUE_DEPTH");
        assert!(info.retryable);
    }

    #[test]
    fn circuit_open_carries_reset_timeout_in_details() {
        let err = ToolError::CircuitOpen { reset_timeout_ms: 5_000 };
        let info = err.into_error_info();
        assert_eq!(info.details.get("reset_timeout_ms").unwrap(), 5_000);
        assert_eq!(info.retry_after_ms, Some(5_000));
    }
}
