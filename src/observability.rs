use crate::model::ToolResult;
use std::sync::Arc;

/// Outcome data passed to `Observer::on_call_end`, enough for a caller to
/// wire up `metrics` crate counters/histograms without this crate depending
/// on a concrete exporter.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub call_id: String,
    pub tool: String,
    pub duration_ms: u64,
    pub cached: bool,
    pub attempts: u32,
    pub success: bool,
}

impl CallOutcome {
    pub fn from_result(result: &ToolResult) -> Self {
        Self {
            call_id: result.call_id.clone(),
            tool: result.tool.clone(),
            duration_ms: result.duration_ms,
            cached: result.cached,
            attempts: result.attempts,
            success: !result.is_error(),
        }
    }
}

/// Hook points an exporter can attach without the core threading a
/// concrete tracing/metrics dependency through every component.
///
/// All methods default to no-ops; implementors override only what they need.
pub trait Observer: Send + Sync {
    fn on_call_start(&self, call_id: &str, tool: &str) {
        let _ = (call_id, tool);
    }

    fn on_call_end(&self, outcome: &CallOutcome) {
        let _ = outcome;
    }

    fn on_retry(&self, call_id: &str, tool: &str, attempt: u32, delay_ms: u64) {
        let _ = (call_id, tool, attempt, delay_ms);
    }

    fn on_circuit_transition(&self, tool: &str, from: &str, to: &str) {
        let _ = (tool, from, to);
    }
}

/// An observer that does nothing. Used when no hooks are attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Forwards every hook to `tracing` at an appropriate level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_call_start(&self, call_id: &str, tool: &str) {
        tracing::debug!(call_id, tool, "call started");
    }

    fn on_call_end(&self, outcome: &CallOutcome) {
        if outcome.success {
            tracing::info!(
                call_id = %outcome.call_id,
                tool = %outcome.tool,
                duration_ms = outcome.duration_ms,
                cached = outcome.cached,
                attempts = outcome.attempts,
                "call completed"
            );
        } else {
            tracing::warn!(
                call_id = %outcome.call_id,
                tool = %outcome.tool,
                duration_ms = outcome.duration_ms,
                attempts = outcome.attempts,
                "call failed"
            );
        }
    }

    fn on_retry(&self, call_id: &str, tool: &str, attempt: u32, delay_ms: u64) {
        tracing::warn!(call_id, tool, attempt, delay_ms, "retrying call");
    }

    fn on_circuit_transition(&self, tool: &str, from: &str, to: &str) {
        tracing::warn!(tool, from, to, "circuit breaker transition");
    }
}

pub type ObserverHandle = Arc<dyn Observer>;

pub fn default_observer() -> ObserverHandle {
    Arc::new(NullObserver)
}
