use crate::config::BulkheadConfig;
use crate::errors::{Result, ToolError};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

const PATTERN_CACHE_SIZE: usize = 256;

/// Which level saturated when admission failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Tool,
    Namespace,
    Global,
    QueueDepth,
}

impl std::fmt::Display for LimitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LimitType::Tool => "TOOL",
            LimitType::Namespace => "NAMESPACE",
            LimitType::Global => "GLOBAL",
            LimitType::QueueDepth => "QUEUE_DEPTH",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScopeMetrics {
    pub active: usize,
    pub peak: usize,
    pub total_wait_ms: u64,
    pub queue_depth: usize,
}

#[derive(Debug)]
struct Scope {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    total_wait_ms: AtomicUsize,
    queue_depth: AtomicUsize,
}

impl Scope {
    fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            total_wait_ms: AtomicUsize::new(0),
            queue_depth: AtomicUsize::new(0),
        }
    }

    fn metrics(&self) -> ScopeMetrics {
        ScopeMetrics {
            active: self.active.load(Ordering::SeqCst),
            peak: self.peak.load(Ordering::SeqCst),
            total_wait_ms: self.total_wait_ms.load(Ordering::SeqCst) as u64,
            queue_depth: self.queue_depth.load(Ordering::SeqCst),
        }
    }
}

/// Holds one permit at each admitted scope. Releasing (on drop) returns
/// permits in reverse acquisition order.
#[derive(Debug)]
pub struct BulkheadGuard {
    permits: Vec<(tokio::sync::OwnedSemaphorePermit, Arc<Scope>)>,
}

impl Drop for BulkheadGuard {
    fn drop(&mut self) {
        for (permit, scope) in self.permits.drain(..).rev() {
            scope.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        }
    }
}

/// Multi-level concurrency admission control: global → namespace →
/// tool-specific, in that order to avoid deadlock. Release happens in
/// reverse order via `BulkheadGuard::drop`.
pub struct Bulkhead {
    global: Arc<Scope>,
    namespaces: Mutex<HashMap<String, Arc<Scope>>>,
    tools: Mutex<HashMap<String, Arc<Scope>>>,
    patterns: Vec<(String, usize)>,
    pattern_cache: Mutex<LruCache<String, Option<usize>>>,
    default_limit: usize,
    acquisition_timeout: Duration,
    max_queue_depth: usize,
    waiters: AtomicUsize,
}

impl Bulkhead {
    pub fn new(config: &BulkheadConfig) -> Self {
        Self {
            global: Arc::new(Scope::new(config.global_limit)),
            namespaces: Mutex::new(
                config
                    .namespace_limits
                    .iter()
                    .map(|(k, v)| (k.clone(), Arc::new(Scope::new(*v))))
                    .collect(),
            ),
            tools: Mutex::new(
                config
                    .tool_limits
                    .iter()
                    .map(|(k, v)| (k.clone(), Arc::new(Scope::new(*v))))
                    .collect(),
            ),
            patterns: config.pattern_limits.clone(),
            pattern_cache: Mutex::new(LruCache::new(NonZeroUsize::new(PATTERN_CACHE_SIZE).unwrap())),
            default_limit: config.default_limit,
            acquisition_timeout: Duration::from_millis(config.acquisition_timeout_ms),
            max_queue_depth: config.max_queue_depth,
            waiters: AtomicUsize::new(0),
        }
    }

    pub async fn configure_tool(&self, tool: impl Into<String>, limit: usize) {
        self.tools.lock().await.insert(tool.into(), Arc::new(Scope::new(limit)));
    }

    pub async fn configure_namespace(&self, namespace: impl Into<String>, limit: usize) {
        self.namespaces
            .lock()
            .await
            .insert(namespace.into(), Arc::new(Scope::new(limit)));
    }

    /// Resolve the effective per-tool limit scope: exact tool match > first
    /// matching glob pattern (iteration order) > default. Pattern matches
    /// are cached in a bounded LRU.
    async fn tool_scope(&self, tool: &str) -> Arc<Scope> {
        {
            let tools = self.tools.lock().await;
            if let Some(scope) = tools.get(tool) {
                return scope.clone();
            }
        }

        let matched_limit = {
            let mut cache = self.pattern_cache.lock().await;
            if let Some(cached) = cache.get(tool) {
                *cached
            } else {
                let found = self
                    .patterns
                    .iter()
                    .find(|(pattern, _)| glob_match(pattern, tool))
                    .map(|(_, limit)| *limit);
                cache.put(tool.to_string(), found);
                found
            }
        };

        let limit = matched_limit.unwrap_or(self.default_limit);
        let mut tools = self.tools.lock().await;
        tools
            .entry(format!("__pattern__:{tool}"))
            .or_insert_with(|| Arc::new(Scope::new(limit)))
            .clone()
    }

    async fn namespace_scope(&self, namespace: &str) -> Option<Arc<Scope>> {
        self.namespaces.lock().await.get(namespace).cloned()
    }

    /// Admit a call. Must succeed simultaneously at all applicable levels
    /// (global → namespace → tool) or fail fast with `BULKHEAD_FULL`. A
    /// per-call `timeout` overrides the configured `acquisition_timeout`
    /// when present.
    pub async fn acquire(
        &self,
        tool: &str,
        namespace: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<BulkheadGuard> {
        if self.waiters.load(Ordering::SeqCst) >= self.max_queue_depth {
            return Err(ToolError::BulkheadFull { limit_type: LimitType::QueueDepth.to_string() });
        }
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let result = self.acquire_inner(tool, namespace, timeout.unwrap_or(self.acquisition_timeout)).await;
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn acquire_inner(&self, tool: &str, namespace: Option<&str>, timeout: Duration) -> Result<BulkheadGuard> {
        let mut order: Vec<(Arc<Scope>, LimitType)> = vec![(self.global.clone(), LimitType::Global)];
        if let Some(ns) = namespace {
            if let Some(scope) = self.namespace_scope(ns).await {
                order.push((scope, LimitType::Namespace));
            }
        }
        order.push((self.tool_scope(tool).await, LimitType::Tool));

        let mut permits = Vec::with_capacity(order.len());
        for (scope, limit_type) in order {
            scope.queue_depth.fetch_add(1, Ordering::SeqCst);
            let started = Instant::now();
            let acquired = tokio::time::timeout(timeout, scope.semaphore.clone().acquire_owned()).await;
            scope.queue_depth.fetch_sub(1, Ordering::SeqCst);
            scope
                .total_wait_ms
                .fetch_add(started.elapsed().as_millis() as usize, Ordering::SeqCst);

            match acquired {
                Ok(Ok(permit)) => {
                    let active = scope.active.fetch_add(1, Ordering::SeqCst) + 1;
                    scope.peak.fetch_max(active, Ordering::SeqCst);
                    permits.push((permit, scope));
                }
                _ => {
                    // Release everything acquired so far (reverse order) before failing.
                    drop(BulkheadGuard { permits });
                    return Err(ToolError::BulkheadFull { limit_type: limit_type.to_string() });
                }
            }
        }

        Ok(BulkheadGuard { permits })
    }

    pub async fn snapshot(&self, tool: &str, namespace: Option<&str>) -> HashMap<String, ScopeMetrics> {
        let mut out = HashMap::new();
        out.insert("global".to_string(), self.global.metrics());
        if let Some(ns) = namespace {
            if let Some(scope) = self.namespace_scope(ns).await {
                out.insert(format!("namespace:{ns}"), scope.metrics());
            }
        }
        if let Some(scope) = self.tools.lock().await.get(tool) {
            out.insert(format!("tool:{tool}"), scope.metrics());
        }
        out
    }
}

/// Minimal glob matcher supporting a single trailing `*` (e.g. `db.*`,
/// `mcp.notion.*`), the shape used by bulkhead pattern limits.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        candidate.starts_with(prefix)
    } else {
        pattern == candidate
    }
}

#[cfg(test)]
mod tests;
