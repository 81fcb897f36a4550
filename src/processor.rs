//! Top-level façade (§4.7) composing the Registry, Bulkhead, Middleware
//! Stack, and Scheduler into `process`/`execute`/`stream`.

use crate::bulkhead::Bulkhead;
use crate::config::{Config, ReturnOrder};
use crate::context::ExecutionContext;
use crate::errors::{Result, ToolError};
use crate::middleware::{build_chain, CallExecutor};
use crate::model::{ToolCall, ToolResult};
use crate::observability::{CallOutcome, ObserverHandle};
use crate::registry::Registry;
use crate::scheduler::{self, SchedulingConstraints};
use crate::strategy::{CancelHandle, ResolvedCall, Strategy};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;

/// Extracts `ToolCall`s from whatever a caller hands `Processor::process` —
/// already-parsed calls, or raw LLM output forwarded to an external
/// `Parser` collaborator (input-format extraction is explicitly out of
/// scope for this crate, §1).
#[async_trait]
pub trait Parser: Send + Sync {
    async fn parse(&self, text: &str) -> Result<Vec<ToolCall>>;
}

pub enum ProcessInput {
    Calls(Vec<ToolCall>),
    Raw(String),
}

impl From<Vec<ToolCall>> for ProcessInput {
    fn from(calls: Vec<ToolCall>) -> Self {
        ProcessInput::Calls(calls)
    }
}

/// Composes C1 (Registry), C3 (Bulkhead), C5 (Middleware Stack over a C4
/// Strategy), and C6 (Scheduler) into the operations an embedder calls.
/// Cheap to clone: every field is an `Arc` or `Copy`, so a clone can be
/// moved into a spawned streaming task.
#[derive(Clone)]
pub struct Processor {
    registry: Arc<Registry>,
    chain: Arc<dyn CallExecutor>,
    config: Arc<Config>,
    observer: ObserverHandle,
    parser: Option<Arc<dyn Parser>>,
    open: Arc<AtomicBool>,
}

impl Processor {
    pub fn new(
        registry: Arc<Registry>,
        strategy: Arc<dyn Strategy>,
        config: Config,
        observer: ObserverHandle,
    ) -> Result<Self> {
        config.validate()?;
        let bulkhead = Arc::new(Bulkhead::new(&config.bulkhead));
        let chain = build_chain(strategy, &config, bulkhead, observer.clone());
        Ok(Self {
            registry,
            chain,
            config: Arc::new(config),
            observer,
            parser: None,
            open: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_parser(mut self, parser: Arc<dyn Parser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Initialises every namespace's `RemoteAdapter`. Idempotent: calling
    /// twice just re-runs initialisation (`RemoteAdapter::initialise` is
    /// itself safe to repeat).
    pub async fn open(&self) -> Result<()> {
        for adapter in self.registry.remote_adapters().await {
            adapter.initialise().await?;
        }
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Flushes the cache and closes every `RemoteAdapter`. Bulkhead slots
    /// held by in-flight calls are released by their own `BulkheadGuard`
    /// drops, not by this call.
    pub async fn close(&self) -> Result<()> {
        self.chain.flush().await;
        for adapter in self.registry.remote_adapters().await {
            adapter.close().await?;
        }
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub async fn list_tools(&self) -> Vec<crate::model::ToolMetadata> {
        self.registry.list_tools(None).await
    }

    pub async fn get_tool_count(&self) -> usize {
        self.registry.get_tool_count().await
    }

    /// Accepts pre-parsed calls or raw text (forwarded to the configured
    /// `Parser`); returns results ordered per `config.processor.return_order`.
    pub async fn process(&self, input: impl Into<ProcessInput>, ctx: Option<ExecutionContext>) -> Result<Vec<ToolResult>> {
        let calls = self.resolve_input(input.into()).await?;
        Ok(self.execute(calls, ctx).await)
    }

    /// Same dispatch as `process`, for already-parsed calls. Never fails:
    /// per-call errors surface as failed `ToolResult`s, not a `Result::Err`.
    pub async fn execute(&self, calls: Vec<ToolCall>, ctx: Option<ExecutionContext>) -> Vec<ToolResult> {
        self.run(calls, ctx.unwrap_or_default(), None).await
    }

    /// Yields results as they complete rather than batching until every
    /// call in the request finishes.
    pub async fn stream(
        &self,
        input: impl Into<ProcessInput>,
        ctx: Option<ExecutionContext>,
    ) -> Result<Pin<Box<dyn Stream<Item = ToolResult> + Send>>> {
        let calls = self.resolve_input(input.into()).await?;
        let ctx = ctx.unwrap_or_default();
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();
        tokio::spawn(async move {
            this.run(calls, ctx, Some(tx)).await;
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn resolve_input(&self, input: ProcessInput) -> Result<Vec<ToolCall>> {
        match input {
            ProcessInput::Calls(calls) => Ok(calls),
            ProcessInput::Raw(text) => {
                let parser = self.parser.as_ref().ok_or_else(|| {
                    ToolError::Configuration("no Parser configured for raw text input".into())
                })?;
                parser.parse(&text).await
            }
        }
    }

    /// The engine: plan the batch into stages, then within each stage run
    /// every admissible call through the middleware chain concurrently
    /// (bounded by `processor.maxConcurrency`), cascading
    /// `SKIPPED_DEPENDENCY_FAILED` to dependents of a call that failed at
    /// runtime unless `scheduler.continueOnError` is set. `sink`, when
    /// present, receives each result as soon as it is produced.
    async fn run(&self, calls: Vec<ToolCall>, ctx: ExecutionContext, sink: Option<mpsc::Sender<ToolResult>>) -> Vec<ToolResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        let order_index: HashMap<String, usize> =
            calls.iter().enumerate().map(|(i, c)| (c.call_id.clone(), i)).collect();

        let constraints = SchedulingConstraints {
            deadline_ms: ctx
                .remaining_time()
                .map(|d| d.as_millis() as u64)
                .or(self.config.scheduler.deadline_ms),
            max_cost: self.config.scheduler.max_cost,
            pool_limits: self.config.scheduler.pool_limits.clone(),
        };

        let plan = match scheduler::plan(
            &calls,
            &constraints,
            self.config.timeouts.default_ms,
            self.config.retry.max_retries,
        ) {
            Ok(plan) => plan,
            Err(err) => {
                let now = chrono::Utc::now();
                let message = err.to_string();
                let mut results: Vec<ToolResult> = Vec::new();
                for call in &calls {
                    let result = ToolResult::failure(
                        call.call_id.clone(),
                        call.tool.clone(),
                        ToolError::Configuration(message.clone()),
                        now,
                        now,
                        0,
                    );
                    if let Some(tx) = &sink {
                        let _ = tx.send(result.clone()).await;
                    }
                    results.push(result);
                }
                return results;
            }
        };

        let by_id: HashMap<String, ToolCall> = calls.into_iter().map(|c| (c.call_id.clone(), c)).collect();
        let mut results: Vec<ToolResult> = Vec::new();
        let mut failed: HashSet<String> = HashSet::new();

        for (call_id, reason) in &plan.skip {
            let call = &by_id[call_id];
            let now = chrono::Utc::now();
            let result = ToolResult::failure(
                call.call_id.clone(),
                call.tool.clone(),
                ToolError::ResourceExhausted(reason.to_string()),
                now,
                now,
                0,
            );
            if let Some(tx) = &sink {
                let _ = tx.send(result.clone()).await;
            }
            results.push(result);
            failed.insert(call_id.clone());
        }

        let (cancel_handle, cancel_token) = CancelHandle::new();
        if let Some(remaining) = ctx.remaining_time() {
            spawn_deadline_canceller(cancel_handle, remaining);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.processor.max_concurrency));

        for stage in &plan.stages {
            let mut join_set: JoinSet<ToolResult> = JoinSet::new();

            for call_id in stage {
                if failed.contains(call_id) {
                    continue;
                }
                let call = by_id[call_id].clone();

                let failed_deps: Vec<&str> =
                    call.depends_on.iter().filter(|d| failed.contains(*d)).map(String::as_str).collect();
                if !failed_deps.is_empty() && !self.config.scheduler.continue_on_error {
                    let now = chrono::Utc::now();
                    let result = ToolResult::failure(
                        call.call_id.clone(),
                        call.tool.clone(),
                        ToolError::SkippedDependencyFailed(failed_deps.join(",")),
                        now,
                        now,
                        0,
                    );
                    if let Some(tx) = &sink {
                        let _ = tx.send(result.clone()).await;
                    }
                    results.push(result);
                    failed.insert(call_id.clone());
                    continue;
                }

                let tool = match self.registry.get_tool(&call.tool, None).await {
                    Ok(tool) => tool,
                    Err(err) => {
                        let now = chrono::Utc::now();
                        let result = ToolResult::failure(call.call_id.clone(), call.tool.clone(), err, now, now, 0);
                        if let Some(tx) = &sink {
                            let _ = tx.send(result.clone()).await;
                        }
                        results.push(result);
                        failed.insert(call_id.clone());
                        continue;
                    }
                };

                let timeout_ms = plan
                    .per_call_timeout_ms
                    .get(call_id)
                    .copied()
                    .unwrap_or(self.config.timeouts.default_ms);
                let chain = self.chain.clone();
                let ctx = ctx.clone();
                let cancel = cancel_token.clone();
                let observer = self.observer.clone();
                let permits = semaphore.clone();

                join_set.spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    observer.on_call_start(&call.call_id, &call.tool);
                    let resolved = ResolvedCall { call, tool };
                    let result = chain.execute(resolved, ctx, cancel, timeout_ms).await;
                    observer.on_call_end(&CallOutcome::from_result(&result));
                    result
                });
            }

            while let Some(outcome) = join_set.join_next().await {
                let Ok(result) = outcome else { continue };
                if result.is_error() {
                    failed.insert(result.call_id.clone());
                }
                if let Some(tx) = &sink {
                    let _ = tx.send(result.clone()).await;
                }
                results.push(result);
            }
        }

        if self.config.processor.return_order == ReturnOrder::Submission {
            results.sort_by_key(|r| order_index.get(&r.call_id).copied().unwrap_or(usize::MAX));
        }

        results
    }
}

/// Fires `cancel_handle.cancel()` once `remaining` elapses, signalling every
/// in-flight call's `CancelToken`.
fn spawn_deadline_canceller(cancel_handle: CancelHandle, remaining: std::time::Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(remaining).await;
        cancel_handle.cancel();
    });
}
