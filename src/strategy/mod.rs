mod in_process;
mod isolated;

pub use in_process::InProcessStrategy;
pub use isolated::IsolatedStrategy;

use crate::context::ExecutionContext;
use crate::model::{ToolCall, ToolResult};
use crate::tool::Tool;
use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::Stream;

/// A `ToolCall` paired with the already-resolved tool instance that will
/// execute it (resolution is the Registry's job; Strategy only dispatches).
#[derive(Clone)]
pub struct ResolvedCall {
    pub call: ToolCall,
    pub tool: Arc<dyn Tool>,
}

/// Signals cancellation to in-flight and not-yet-started calls. Cloning a
/// `CancelToken` shares the same underlying signal.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&mut self) {
        let _ = self.rx.wait_for(|v| *v).await;
    }
}

/// Owns the sending half; dropping or calling `cancel()` signals every
/// clone of the paired `CancelToken`.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Fired when a call begins execution (before `Tool::execute`/`stream_execute`).
pub type OnStart = Arc<dyn Fn(&str) + Send + Sync>;

/// The concrete executor for a batch of resolved tool calls. Two variants
/// share this contract: `InProcessStrategy` (trusted code, runs in the
/// current task) and `IsolatedStrategy` (isolates each call's failure blast
/// radius behind its own supervised task).
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Execute `calls` in parallel up to the strategy's configured
    /// concurrency, returning results in **completion order**.
    async fn run(
        &self,
        calls: Vec<ResolvedCall>,
        ctx: ExecutionContext,
        per_call_timeout_ms: Option<u64>,
        cancel: CancelToken,
    ) -> Vec<ToolResult>;

    /// Same dispatch, yielding each result as it completes.
    async fn stream_run(
        &self,
        calls: Vec<ResolvedCall>,
        ctx: ExecutionContext,
        per_call_timeout_ms: Option<u64>,
        cancel: CancelToken,
        on_start: Option<OnStart>,
    ) -> Pin<Box<dyn Stream<Item = ToolResult> + Send>>;
}
