use super::{CancelToken, OnStart, ResolvedCall, Strategy};
use crate::context::ExecutionContext;
use crate::errors::ToolError;
use crate::model::ToolResult;
#[cfg(test)]
use crate::tool::Tool;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{error, warn};

/// Runs each call in its own supervised task so one call's crash cannot
/// take down another's — the Rust-native analogue of "child process or WASM
/// sandbox" (§4.3) since, inside this crate, a `Tool` is a Rust trait
/// object rather than an out-of-process executable; the wire/process
/// boundary itself is explicitly out of scope (§1 Non-goals).
///
/// Cancellation escalates in two stages: a `grace_period` during which the
/// call may still complete on its own (cooperative — the analogue of
/// SIGTERM), then a hard `JoinHandle::abort()` (the analogue of SIGKILL).
pub struct IsolatedStrategy {
    max_concurrency: usize,
    default_timeout_ms: u64,
    grace_period_ms: u64,
}

impl IsolatedStrategy {
    pub fn new(max_concurrency: usize, default_timeout_ms: u64, grace_period_ms: u64) -> Self {
        Self { max_concurrency, default_timeout_ms, grace_period_ms }
    }
}

async fn execute_one(
    resolved: ResolvedCall,
    ctx: ExecutionContext,
    timeout_ms: u64,
    grace_period_ms: u64,
    mut cancel: CancelToken,
    on_start: Option<OnStart>,
) -> ToolResult {
    let call = resolved.call;
    let tool = resolved.tool;
    let start_time = chrono::Utc::now();

    if cancel.is_cancelled() || ctx.is_expired() {
        let end_time = chrono::Utc::now();
        return ToolResult::failure(
            call.call_id,
            call.tool,
            ToolError::Cancelled("call skipped: deadline or cancellation before start".into()),
            start_time,
            end_time,
            0,
        );
    }

    if let Some(cb) = &on_start {
        cb(&call.call_id);
    }

    let remaining = ctx.remaining_time().map(|d| d.as_millis() as u64).unwrap_or(u64::MAX);
    let effective_timeout_ms = timeout_ms.min(remaining);
    let arguments = call.arguments.clone();
    let mut spawned = tokio::task::spawn(async move { tool.execute(arguments).await });
    let abort_handle = spawned.abort_handle();

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            // Cooperative grace period: give the task a chance to finish on
            // its own before escalating to a hard abort.
            match tokio::time::timeout(std::time::Duration::from_millis(grace_period_ms), &mut spawned).await {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(tool_err))) => Err(tool_err),
                _ => {
                    abort_handle.abort();
                    Err(ToolError::Cancelled(format!("tool '{}' cancelled (escalated to abort)", call.tool)))
                }
            }
        }
        result = tokio::time::timeout(std::time::Duration::from_millis(effective_timeout_ms), &mut spawned) => {
            match result {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(tool_err))) => Err(tool_err),
                Ok(Err(join_err)) => {
                    if join_err.is_panic() {
                        let payload = join_err.into_panic();
                        let msg = payload
                            .downcast_ref::<String>()
                            .map(String::as_str)
                            .or_else(|| payload.downcast_ref::<&str>().copied())
                            .unwrap_or("unknown panic");
                        error!(tool = %call.tool, call_id = %call.call_id, panic = msg, "isolated tool crashed");
                        Err(ToolError::Execution(format!("tool '{}' crashed: {msg}", call.tool)))
                    } else {
                        Err(ToolError::Cancelled(format!("tool '{}' task was aborted", call.tool)))
                    }
                }
                Err(_) => {
                    warn!(tool = %call.tool, call_id = %call.call_id, timeout_ms = effective_timeout_ms, "isolated tool timed out, escalating");
                    abort_handle.abort();
                    Err(ToolError::Timeout { elapsed_ms: effective_timeout_ms })
                }
            }
        }
    };

    let end_time = chrono::Utc::now();
    match outcome {
        Ok(value) => ToolResult::success(call.call_id, call.tool, value, start_time, end_time, 1, false),
        Err(err) => ToolResult::failure(call.call_id, call.tool, err, start_time, end_time, 1),
    }
}

#[async_trait]
impl Strategy for IsolatedStrategy {
    async fn run(
        &self,
        calls: Vec<ResolvedCall>,
        ctx: ExecutionContext,
        per_call_timeout_ms: Option<u64>,
        cancel: CancelToken,
    ) -> Vec<ToolResult> {
        let mut stream = self.stream_run(calls, ctx, per_call_timeout_ms, cancel, None).await;
        let mut results = Vec::new();
        use tokio_stream::StreamExt;
        while let Some(result) = stream.next().await {
            results.push(result);
        }
        results
    }

    async fn stream_run(
        &self,
        calls: Vec<ResolvedCall>,
        ctx: ExecutionContext,
        per_call_timeout_ms: Option<u64>,
        cancel: CancelToken,
        on_start: Option<OnStart>,
    ) -> Pin<Box<dyn Stream<Item = ToolResult> + Send>> {
        let timeout_ms = per_call_timeout_ms.unwrap_or(self.default_timeout_ms);
        let grace_period_ms = self.grace_period_ms;
        let (tx, rx) = mpsc::channel(calls.len().max(1));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));

        for resolved in calls {
            let tx = tx.clone();
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let on_start = on_start.clone();
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = execute_one(resolved, ctx, timeout_ms, grace_period_ms, cancel, on_start).await;
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        Box::pin(ReceiverStream::new(rx))
    }
}
