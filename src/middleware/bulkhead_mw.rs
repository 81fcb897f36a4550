use super::CallExecutor;
use crate::bulkhead::Bulkhead;
use crate::context::ExecutionContext;
use crate::model::ToolResult;
use crate::strategy::{CancelToken, ResolvedCall};
use async_trait::async_trait;
use std::sync::Arc;

/// Delegates admission to the shared `Bulkhead` (§4.2) for the call's
/// tool+namespace before letting it proceed; releases on drop regardless of
/// how the inner call finishes.
pub struct BulkheadMiddleware {
    inner: Arc<dyn CallExecutor>,
    bulkhead: Arc<Bulkhead>,
}

impl BulkheadMiddleware {
    pub fn new(inner: Arc<dyn CallExecutor>, bulkhead: Arc<Bulkhead>) -> Self {
        Self { inner, bulkhead }
    }
}

#[async_trait]
impl CallExecutor for BulkheadMiddleware {
    async fn execute(
        &self,
        resolved: ResolvedCall,
        ctx: ExecutionContext,
        cancel: CancelToken,
        timeout_ms: u64,
    ) -> ToolResult {
        let namespace = resolved.call.namespace_and_name().0.map(str::to_string);
        let timeout = ctx.remaining_time();
        match self.bulkhead.acquire(&resolved.call.tool, namespace.as_deref(), timeout).await {
            Ok(guard) => {
                let result = self.inner.execute(resolved, ctx, cancel, timeout_ms).await;
                drop(guard);
                result
            }
            Err(err) => {
                let now = chrono::Utc::now();
                ToolResult::failure(resolved.call.call_id, resolved.call.tool, err, now, now, 0)
            }
        }
    }
}
