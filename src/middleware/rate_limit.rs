use super::CallExecutor;
use crate::config::RateLimitConfig;
use crate::context::ExecutionContext;
use crate::errors::ToolError;
use crate::model::ToolResult;
use crate::strategy::{CancelToken, ResolvedCall};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::warn;

/// Sliding-window limiter: per-tool limits override the global limit,
/// tracked the way the teacher's `MessageBus` tracks sender timestamps
/// (a pruned `Vec<Instant>` per key).
pub struct RateLimitMiddleware {
    inner: Arc<dyn CallExecutor>,
    config: RateLimitConfig,
    global_window: Mutex<Vec<Instant>>,
    per_tool_windows: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimitMiddleware {
    pub fn new(inner: Arc<dyn CallExecutor>, config: RateLimitConfig) -> Self {
        Self {
            inner,
            config,
            global_window: Mutex::new(Vec::new()),
            per_tool_windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `Some(retry_after_ms)` if `tool` is currently over its limit;
    /// otherwise records this request and returns `None`.
    async fn check_and_record(&self, tool: &str) -> Option<u64> {
        if let Some(rule) = self.config.per_tool_limits.get(tool) {
            let mut windows = self.per_tool_windows.lock().await;
            let timestamps = windows.entry(tool.to_string()).or_default();
            return check_window(timestamps, rule.limit as usize, Duration::from_secs(rule.window_seconds));
        }

        let mut timestamps = self.global_window.lock().await;
        check_window(
            &mut timestamps,
            self.config.global_limit as usize,
            Duration::from_secs(self.config.global_window_seconds),
        )
    }
}

/// Prune timestamps outside `window`, then admit (push `now`) if under
/// `limit`. Returns `Some(retry_after_ms)` — the time until the oldest
/// in-window entry ages out — when the window is already full.
fn check_window(timestamps: &mut Vec<Instant>, limit: usize, window: Duration) -> Option<u64> {
    let now = Instant::now();
    let cutoff = now.checked_sub(window).unwrap_or(now);
    timestamps.retain(|&t| t > cutoff);

    if timestamps.len() >= limit {
        let oldest = timestamps.first().copied().unwrap_or(now);
        let retry_after = window.saturating_sub(now.duration_since(oldest));
        return Some(retry_after.as_millis() as u64);
    }

    timestamps.push(now);
    None
}

#[async_trait]
impl CallExecutor for RateLimitMiddleware {
    async fn execute(
        &self,
        resolved: ResolvedCall,
        ctx: ExecutionContext,
        cancel: CancelToken,
        timeout_ms: u64,
    ) -> ToolResult {
        if !self.config.enabled {
            return self.inner.execute(resolved, ctx, cancel, timeout_ms).await;
        }

        let now = chrono::Utc::now();
        match self.check_and_record(&resolved.call.tool).await {
            Some(retry_after_ms) => {
                warn!(tool = %resolved.call.tool, retry_after_ms, "rate limit exceeded");
                ToolResult::failure(
                    resolved.call.call_id,
                    resolved.call.tool,
                    ToolError::RateLimited { retry_after_ms },
                    now,
                    now,
                    0,
                )
            }
            None => self.inner.execute(resolved, ctx, cancel, timeout_ms).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::model::ToolCall;
    use crate::strategy::CancelHandle;
    use crate::tool::Tool;
    use serde_json::{json, Value};

    struct NoopTool;

    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }

        async fn execute(&self, _arguments: Value) -> crate::errors::Result<Value> {
            Ok(json!("ok"))
        }
    }

    struct PassThrough;

    #[async_trait]
    impl CallExecutor for PassThrough {
        async fn execute(
            &self,
            resolved: ResolvedCall,
            _ctx: ExecutionContext,
            _cancel: CancelToken,
            _timeout_ms: u64,
        ) -> ToolResult {
            let now = chrono::Utc::now();
            ToolResult::success(resolved.call.call_id, resolved.call.tool, json!("ok"), now, now, 1, false)
        }
    }

    fn config(limit: u64) -> RateLimitConfig {
        RateLimitConfig { enabled: true, global_limit: limit, global_window_seconds: 60, per_tool_limits: HashMap::new() }
    }

    fn resolved(call_id: &str) -> ResolvedCall {
        ResolvedCall { call: ToolCall::new(call_id, "noop", json!({})), tool: Arc::new(NoopTool) }
    }

    #[tokio::test]
    async fn third_call_within_window_is_rate_limited() {
        let mw = RateLimitMiddleware::new(Arc::new(PassThrough), config(2));
        let (_h, cancel) = CancelHandle::new();

        let r1 = mw.execute(resolved("c1"), ExecutionContext::new(), cancel.clone(), 100).await;
        let r2 = mw.execute(resolved("c2"), ExecutionContext::new(), cancel.clone(), 100).await;
        let r3 = mw.execute(resolved("c3"), ExecutionContext::new(), cancel, 100).await;

        assert!(!r1.is_error());
        assert!(!r2.is_error());
        assert_eq!(r3.error_info.as_ref().unwrap().code, ErrorCode::ToolRateLimited);
        assert!(r3.error_info.as_ref().unwrap().retry_after_ms.is_some());
    }

    #[tokio::test]
    async fn per_tool_limit_overrides_global() {
        let mut cfg = config(100);
        cfg.per_tool_limits.insert("noop".into(), crate::config::RateLimitRule { limit: 1, window_seconds: 60 });
        let mw = RateLimitMiddleware::new(Arc::new(PassThrough), cfg);
        let (_h, cancel) = CancelHandle::new();

        let r1 = mw.execute(resolved("c1"), ExecutionContext::new(), cancel.clone(), 100).await;
        let r2 = mw.execute(resolved("c2"), ExecutionContext::new(), cancel, 100).await;

        assert!(!r1.is_error());
        assert_eq!(r2.error_info.as_ref().unwrap().code, ErrorCode::ToolRateLimited);
    }
}
