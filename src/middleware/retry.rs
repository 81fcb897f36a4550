use super::CallExecutor;
use crate::config::RetryConfig;
use crate::context::ExecutionContext;
use crate::model::ToolResult;
use crate::observability::ObserverHandle;
use crate::strategy::{CancelToken, ResolvedCall};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Exponential backoff with jitter, grounded in the teacher's
/// `LLMProvider::chat_with_retry`. Only retries `ToolError::retryable()`
/// failures, and only while the remaining deadline can absorb the next
/// backoff.
pub struct RetryMiddleware {
    inner: Arc<dyn CallExecutor>,
    config: RetryConfig,
    observer: ObserverHandle,
}

impl RetryMiddleware {
    pub fn new(inner: Arc<dyn CallExecutor>, config: RetryConfig, observer: ObserverHandle) -> Self {
        Self { inner, config, observer }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = (self.config.base_delay_seconds * 1000.0).max(0.0);
        let delay_ms = base_ms * self.config.multiplier.powi(attempt as i32 - 1);
        let delay_ms = if self.config.jitter {
            rand::thread_rng().gen_range(0.0..delay_ms.max(1.0))
        } else {
            delay_ms
        };
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

#[async_trait]
impl CallExecutor for RetryMiddleware {
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

        let mut attempt = 1;
        loop {
            let result = self
                .inner
                .execute(resolved.clone(), ctx.clone(), cancel.clone(), timeout_ms)
                .await;

            let retryable = result.error_info.as_ref().is_some_and(|i| i.retryable);
            if !retryable || attempt > self.config.max_retries {
                return stamp_attempts(result, attempt);
            }

            let delay = self.backoff(attempt);
            if let Some(remaining) = ctx.remaining_time() {
                if delay >= remaining {
                    return stamp_attempts(result, attempt);
                }
            }

            self.observer
                .on_retry(&resolved.call.call_id, &resolved.call.tool, attempt, delay.as_millis() as u64);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn stamp_attempts(mut result: ToolResult, attempts: u32) -> ToolResult {
    if !result.cached {
        result.attempts = attempts;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorCode, Result, ToolError};
    use crate::model::ToolCall;
    use crate::observability::default_observer;
    use crate::strategy::CancelHandle;
    use crate::tool::Tool;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyTool {
        calls: Arc<AtomicUsize>,
        succeed_after: usize,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(&self, _arguments: Value) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.succeed_after {
                Err(ToolError::Execution("down".into()))
            } else {
                Ok(json!("up"))
            }
        }
    }

    struct DirectStrategy;

    #[async_trait]
    impl CallExecutor for DirectStrategy {
        async fn execute(
            &self,
            resolved: ResolvedCall,
            _ctx: ExecutionContext,
            _cancel: CancelToken,
            _timeout_ms: u64,
        ) -> ToolResult {
            let now = chrono::Utc::now();
            match resolved.tool.execute(resolved.call.arguments.clone()).await {
                Ok(v) => ToolResult::success(resolved.call.call_id, resolved.call.tool, v, now, now, 1, false),
                Err(e) => ToolResult::failure(resolved.call.call_id, resolved.call.tool, e, now, now, 1),
            }
        }
    }

    fn config() -> RetryConfig {
        RetryConfig { enabled: true, max_retries: 3, base_delay_seconds: 0.001, multiplier: 2.0, jitter: false }
    }

    fn resolved(tool: Arc<dyn Tool>) -> ResolvedCall {
        ResolvedCall { call: ToolCall::new("c1", tool.name(), json!({})), tool }
    }

    #[tokio::test]
    async fn retries_until_success_and_reports_total_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tool: Arc<dyn Tool> = Arc::new(FlakyTool { calls: calls.clone(), succeed_after: 2 });
        let mw = RetryMiddleware::new(Arc::new(DirectStrategy), config(), default_observer());
        let (_h, cancel) = CancelHandle::new();

        let r = mw.execute(resolved(tool), ExecutionContext::new(), cancel, 1000).await;
        assert!(!r.is_error());
        assert_eq!(r.attempts, 3);
    }

    #[tokio::test]
    async fn exhausts_retries_and_surfaces_final_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tool: Arc<dyn Tool> = Arc::new(FlakyTool { calls: calls.clone(), succeed_after: 100 });
        let mw = RetryMiddleware::new(Arc::new(DirectStrategy), config(), default_observer());
        let (_h, cancel) = CancelHandle::new();

        let r = mw.execute(resolved(tool), ExecutionContext::new(), cancel, 1000).await;
        assert!(r.is_error());
        assert_eq!(r.error_info.as_ref().unwrap().code, ErrorCode::ToolExecutionFailed);
        assert_eq!(r.attempts, 4);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_on_first_attempt() {
        struct AlwaysValidationFails;
        #[async_trait]
        impl Tool for AlwaysValidationFails {
            fn name(&self) -> &str {
                "bad"
            }
            async fn execute(&self, _arguments: Value) -> Result<Value> {
                Err(ToolError::Validation("missing field".into()))
            }
        }

        let tool: Arc<dyn Tool> = Arc::new(AlwaysValidationFails);
        let mw = RetryMiddleware::new(Arc::new(DirectStrategy), config(), default_observer());
        let (_h, cancel) = CancelHandle::new();

        let r = mw.execute(resolved(tool), ExecutionContext::new(), cancel, 1000).await;
        assert_eq!(r.attempts, 1);
    }
}
