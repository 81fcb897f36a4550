use super::CallExecutor;
use crate::config::CircuitBreakerConfig;
use crate::context::ExecutionContext;
use crate::errors::ToolError;
use crate::model::ToolResult;
use crate::observability::ObserverHandle;
use crate::strategy::{CancelToken, ResolvedCall};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
enum CircuitState {
    /// Timestamps of failures still inside the sliding `failure_window`.
    Closed { failures: Vec<Instant> },
    Open { since: Instant },
    HalfOpen { successes: u32, active_probes: u32 },
}

impl CircuitState {
    fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed { .. } => "CLOSED",
            CircuitState::Open { .. } => "OPEN",
            CircuitState::HalfOpen { .. } => "HALF_OPEN",
        }
    }
}

/// Per-tool three-state breaker (§4.4 Circuit Breaker), grounded in the
/// teacher's `CircuitBreakerProvider`. Only `ToolError::retryable()`
/// failures (the transient execution/transport/timeout classes) count
/// against the threshold — cancellations and validation errors never trip
/// the breaker.
pub struct CircuitBreakerMiddleware {
    inner: Arc<dyn CallExecutor>,
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, CircuitState>>,
    observer: ObserverHandle,
}

impl CircuitBreakerMiddleware {
    pub fn new(inner: Arc<dyn CallExecutor>, config: CircuitBreakerConfig, observer: ObserverHandle) -> Self {
        Self { inner, config, breakers: Mutex::new(HashMap::new()), observer }
    }

    async fn should_allow(&self, tool: &str) -> Result<(), ToolError> {
        let mut breakers = self.breakers.lock().await;
        let state = breakers
            .entry(tool.to_string())
            .or_insert(CircuitState::Closed { failures: Vec::new() });

        match state {
            CircuitState::Closed { .. } => Ok(()),
            CircuitState::HalfOpen { active_probes, .. } => {
                if *active_probes >= self.config.half_open_max_calls {
                    Err(ToolError::CircuitOpen { reset_timeout_ms: self.config.reset_timeout_seconds * 1000 })
                } else {
                    *active_probes += 1;
                    Ok(())
                }
            }
            CircuitState::Open { since } => {
                let elapsed = since.elapsed();
                let reset = std::time::Duration::from_secs(self.config.reset_timeout_seconds);
                if elapsed >= reset {
                    info!(tool, "circuit breaker OPEN -> HALF_OPEN");
                    self.observer.on_circuit_transition(tool, "OPEN", "HALF_OPEN");
                    *state = CircuitState::HalfOpen { successes: 0, active_probes: 1 };
                    Ok(())
                } else {
                    let remaining_ms = (reset - elapsed).as_millis() as u64;
                    Err(ToolError::CircuitOpen { reset_timeout_ms: remaining_ms })
                }
            }
        }
    }

    async fn record_success(&self, tool: &str) {
        let mut breakers = self.breakers.lock().await;
        let Some(state) = breakers.get_mut(tool) else { return };
        if let CircuitState::HalfOpen { successes, active_probes } = state {
            *active_probes = active_probes.saturating_sub(1);
            let new_successes = *successes + 1;
            if new_successes >= self.config.success_threshold {
                info!(tool, "circuit breaker HALF_OPEN -> CLOSED");
                self.observer.on_circuit_transition(tool, "HALF_OPEN", "CLOSED");
                *state = CircuitState::Closed { failures: Vec::new() };
            } else {
                *successes = new_successes;
            }
        } else {
            *state = CircuitState::Closed { failures: Vec::new() };
        }
    }

    async fn record_failure(&self, tool: &str, retryable: bool) {
        if !retryable {
            return;
        }
        let mut breakers = self.breakers.lock().await;
        let state = breakers
            .entry(tool.to_string())
            .or_insert(CircuitState::Closed { failures: Vec::new() });

        match state {
            CircuitState::Closed { failures } => {
                let window = std::time::Duration::from_secs(self.config.failure_window_seconds);
                let now = Instant::now();
                let cutoff = now.checked_sub(window).unwrap_or(now);
                failures.retain(|&t| t > cutoff);
                failures.push(now);
                if failures.len() as u32 >= self.config.failure_threshold {
                    warn!(tool, failures = failures.len(), "circuit breaker CLOSED -> OPEN");
                    self.observer.on_circuit_transition(tool, "CLOSED", "OPEN");
                    *state = CircuitState::Open { since: Instant::now() };
                }
            }
            CircuitState::HalfOpen { .. } => {
                warn!(tool, "circuit breaker probe failed: HALF_OPEN -> OPEN");
                self.observer.on_circuit_transition(tool, state.label(), "OPEN");
                *state = CircuitState::Open { since: Instant::now() };
            }
            CircuitState::Open { .. } => {}
        }
    }
}

#[async_trait]
impl CallExecutor for CircuitBreakerMiddleware {
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

        let tool = resolved.call.tool.clone();
        if let Err(err) = self.should_allow(&tool).await {
            let now = chrono::Utc::now();
            return ToolResult::failure(resolved.call.call_id, resolved.call.tool, err, now, now, 0);
        }

        let result = self.inner.execute(resolved, ctx, cancel, timeout_ms).await;
        match &result.error_info {
            Some(info) => self.record_failure(&tool, info.retryable).await,
            None => self.record_success(&tool).await,
        }
        result
    }
}
