use super::CallExecutor;
use crate::config::CacheConfig;
use crate::context::ExecutionContext;
use crate::model::ToolResult;
use crate::strategy::{CancelToken, ResolvedCall};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use std::sync::Arc;
use std::time::Duration;

/// Coalesces concurrent identical calls and serves cached successes.
/// Keyed by `idempotency_key` (tool name + canonicalised arguments, §3) plus
/// the tool's version when it advertises one, so a version bump invalidates
/// stale entries instead of serving them for the rest of their TTL; never
/// caches a failure, so a transient error doesn't poison the entry either.
pub struct CacheMiddleware {
    inner: Arc<dyn CallExecutor>,
    cache: MokaCache<String, ToolResult>,
    enabled: bool,
}

impl CacheMiddleware {
    pub fn new(inner: Arc<dyn CallExecutor>, config: CacheConfig) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_seconds))
            .build();
        Self { inner, cache, enabled: config.enabled }
    }
}

#[async_trait]
impl CallExecutor for CacheMiddleware {
    async fn execute(
        &self,
        resolved: ResolvedCall,
        ctx: ExecutionContext,
        cancel: CancelToken,
        timeout_ms: u64,
    ) -> ToolResult {
        if !self.enabled || !resolved.tool.cacheable() {
            return self.inner.execute(resolved, ctx, cancel, timeout_ms).await;
        }

        let key = match resolved.tool.version() {
            Some(version) => format!("{}\0{version}", resolved.call.idempotency_key()),
            None => resolved.call.idempotency_key(),
        };
        let call_id = resolved.call.call_id.clone();
        let inner = self.inner.clone();

        // `try_get_with` coalesces concurrent callers onto one init future
        // and, because the init returns `Err` on failure, never caches it.
        let outcome = self
            .cache
            .try_get_with(key, async move {
                let result = inner.execute(resolved, ctx, cancel, timeout_ms).await;
                if result.is_error() {
                    Err(result)
                } else {
                    Ok(result)
                }
            })
            .await;

        match outcome {
            Ok(mut result) => {
                // This call's own id differs from the cached entry's id only
                // when it was served from a prior entry (hit) or rode in on
                // another caller's in-flight init (coalesced).
                if result.call_id != call_id {
                    result.call_id = call_id;
                    result.cached = true;
                    result.attempts = 0;
                }
                result
            }
            Err(failed) => (*failed).clone(),
        }
    }

    async fn flush(&self) {
        self.cache.invalidate_all();
    }
}
