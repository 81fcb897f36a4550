//! The reliability stack wrapped around a `Strategy` (§4.4). Each middleware
//! decorates an inner `CallExecutor`, mirroring the teacher's
//! `CircuitBreakerProvider::wrap(inner, config) -> Arc<dyn LLMProvider>`
//! decorator idiom rather than a generic tower-style `Service`.
//!
//! Recommended composition order, outermost first: Cache → Rate Limit →
//! Circuit Breaker → Bulkhead → Retry → Strategy.

mod bulkhead_mw;
mod cache;
mod circuit_breaker;
mod rate_limit;
mod retry;

pub use bulkhead_mw::BulkheadMiddleware;
pub use cache::CacheMiddleware;
pub use circuit_breaker::CircuitBreakerMiddleware;
pub use rate_limit::RateLimitMiddleware;
pub use retry::RetryMiddleware;

use crate::bulkhead::Bulkhead;
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::model::ToolResult;
use crate::observability::ObserverHandle;
use crate::strategy::{CancelToken, ResolvedCall, Strategy};
use async_trait::async_trait;
use std::sync::Arc;

/// One call, resolved and ready to run, carried through the middleware
/// chain down to a `Strategy`. `timeout_ms` is whatever the caller (the
/// Scheduler's `ExecutionPlan`, or the Processor's default) decided for
/// this specific call — precedence is resolved above this layer (§4.5).
#[async_trait]
pub trait CallExecutor: Send + Sync {
    async fn execute(
        &self,
        resolved: ResolvedCall,
        ctx: ExecutionContext,
        cancel: CancelToken,
        timeout_ms: u64,
    ) -> ToolResult;

    /// Drop cached state. Only `CacheMiddleware` does anything with this;
    /// everything else inherits the no-op default.
    async fn flush(&self) {}
}

/// Terminates the chain by handing a single call to a `Strategy`.
pub struct StrategyExecutor {
    strategy: Arc<dyn Strategy>,
}

impl StrategyExecutor {
    pub fn new(strategy: Arc<dyn Strategy>) -> Self {
        Self { strategy }
    }
}

#[async_trait]
impl CallExecutor for StrategyExecutor {
    async fn execute(
        &self,
        resolved: ResolvedCall,
        ctx: ExecutionContext,
        cancel: CancelToken,
        timeout_ms: u64,
    ) -> ToolResult {
        let mut results = self
            .strategy
            .run(vec![resolved], ctx, Some(timeout_ms), cancel)
            .await;
        results
            .pop()
            .expect("strategy must return exactly one result for one call")
    }
}

/// Build the full reliability stack around `strategy`, in the order
/// recommended by §4.4.
pub fn build_chain(
    strategy: Arc<dyn Strategy>,
    config: &Config,
    bulkhead: Arc<Bulkhead>,
    observer: ObserverHandle,
) -> Arc<dyn CallExecutor> {
    let base: Arc<dyn CallExecutor> = Arc::new(StrategyExecutor::new(strategy));
    let retried: Arc<dyn CallExecutor> =
        Arc::new(RetryMiddleware::new(base, config.retry.clone(), observer.clone()));
    let bulkheaded: Arc<dyn CallExecutor> = Arc::new(BulkheadMiddleware::new(retried, bulkhead));
    let breaker: Arc<dyn CallExecutor> = Arc::new(CircuitBreakerMiddleware::new(
        bulkheaded,
        config.circuit_breaker.clone(),
        observer.clone(),
    ));
    let limited: Arc<dyn CallExecutor> =
        Arc::new(RateLimitMiddleware::new(breaker, config.rate_limit.clone()));
    Arc::new(CacheMiddleware::new(limited, config.cache.clone()))
}
