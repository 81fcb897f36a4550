mod loader;

pub use loader::load;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{Result, ToolError};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connect_timeout_ms", rename = "connectMs")]
    pub connect_ms: u64,
    #[serde(default = "default_operation_timeout_ms", rename = "operationMs")]
    pub operation_ms: u64,
    #[serde(default = "default_quick_timeout_ms", rename = "quickMs")]
    pub quick_ms: u64,
    #[serde(default = "default_shutdown_timeout_ms", rename = "shutdownMs")]
    pub shutdown_ms: u64,
    #[serde(default = "default_default_timeout_ms", rename = "defaultMs")]
    pub default_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_operation_timeout_ms() -> u64 {
    30_000
}
fn default_quick_timeout_ms() -> u64 {
    5_000
}
fn default_shutdown_timeout_ms() -> u64 {
    2_000
}
fn default_default_timeout_ms() -> u64 {
    30_000
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_timeout_ms(),
            operation_ms: default_operation_timeout_ms(),
            quick_ms: default_quick_timeout_ms(),
            shutdown_ms: default_shutdown_timeout_ms(),
            default_ms: default_default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs", rename = "ttlSeconds")]
    pub ttl_seconds: u64,
    #[serde(default = "default_cache_max_entries", rename = "maxEntries")]
    pub max_entries: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_cache_max_entries() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub limit: u64,
    #[serde(rename = "windowSeconds")]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_global_limit", rename = "globalLimit")]
    pub global_limit: u64,
    #[serde(default = "default_window_secs", rename = "globalWindowSeconds")]
    pub global_window_seconds: u64,
    #[serde(default, rename = "perToolLimits")]
    pub per_tool_limits: HashMap<String, RateLimitRule>,
}

fn default_global_limit() -> u64 {
    1000
}
fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_limit: default_global_limit(),
            global_window_seconds: default_window_secs(),
            per_tool_limits: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_retries", rename = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_secs", rename = "baseDelaySeconds")]
    pub base_delay_seconds: f64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_secs() -> f64 {
    0.1
}
fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            base_delay_seconds: default_base_delay_secs(),
            multiplier: default_multiplier(),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold", rename = "failureThreshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold", rename = "successThreshold")]
    pub success_threshold: u32,
    #[serde(default = "default_reset_timeout_secs", rename = "resetTimeoutSeconds")]
    pub reset_timeout_seconds: u64,
    #[serde(default = "default_failure_window_secs", rename = "failureWindowSeconds")]
    pub failure_window_seconds: u64,
    #[serde(default = "default_half_open_max_calls", rename = "halfOpenMaxCalls")]
    pub half_open_max_calls: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    1
}
fn default_reset_timeout_secs() -> u64 {
    30
}
fn default_failure_window_secs() -> u64 {
    60
}
fn default_half_open_max_calls() -> u32 {
    1
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            reset_timeout_seconds: default_reset_timeout_secs(),
            failure_window_seconds: default_failure_window_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadConfig {
    #[serde(default = "default_bulkhead_limit", rename = "defaultLimit")]
    pub default_limit: usize,
    #[serde(default, rename = "toolLimits")]
    pub tool_limits: HashMap<String, usize>,
    #[serde(default, rename = "namespaceLimits")]
    pub namespace_limits: HashMap<String, usize>,
    #[serde(default, rename = "patternLimits")]
    pub pattern_limits: Vec<(String, usize)>,
    #[serde(default = "default_global_bulkhead_limit", rename = "globalLimit")]
    pub global_limit: usize,
    #[serde(default = "default_acquisition_timeout_ms", rename = "acquisitionTimeoutMs")]
    pub acquisition_timeout_ms: u64,
    #[serde(default = "default_max_queue_depth", rename = "maxQueueDepth")]
    pub max_queue_depth: usize,
}

fn default_bulkhead_limit() -> usize {
    10
}
fn default_global_bulkhead_limit() -> usize {
    100
}
fn default_acquisition_timeout_ms() -> u64 {
    5_000
}
fn default_max_queue_depth() -> usize {
    50
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            default_limit: default_bulkhead_limit(),
            tool_limits: HashMap::new(),
            namespace_limits: HashMap::new(),
            pattern_limits: Vec::new(),
            global_limit: default_global_bulkhead_limit(),
            acquisition_timeout_ms: default_acquisition_timeout_ms(),
            max_queue_depth: default_max_queue_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default, rename = "deadlineMs")]
    pub deadline_ms: Option<u64>,
    #[serde(default, rename = "maxCost")]
    pub max_cost: Option<u64>,
    #[serde(default, rename = "poolLimits")]
    pub pool_limits: HashMap<String, usize>,
    #[serde(default, rename = "continueOnError")]
    pub continue_on_error: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            deadline_ms: None,
            max_cost: None,
            pool_limits: HashMap::new(),
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnOrder {
    Completion,
    Submission,
}

impl Default for ReturnOrder {
    fn default() -> Self {
        ReturnOrder::Completion
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_max_concurrency", rename = "maxConcurrency")]
    pub max_concurrency: usize,
    #[serde(default, rename = "returnOrder")]
    pub return_order: ReturnOrder,
}

fn default_max_concurrency() -> usize {
    32
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            return_order: ReturnOrder::default(),
        }
    }
}

/// Top-level configuration surface (§6). Mirrors the teacher's
/// `serde`-derived, camelCase-on-the-wire config schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default, rename = "rateLimit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default, rename = "circuitBreaker")]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub bulkhead: BulkheadConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
}

impl Config {
    /// Reject configurations that can never behave sensibly: zero timeouts,
    /// inverted threshold/success counts, etc.
    pub fn validate(&self) -> Result<()> {
        if self.timeouts.operation_ms == 0 {
            return Err(ToolError::Configuration(
                "timeouts.operation_ms must be > 0".into(),
            ));
        }
        if self.timeouts.connect_ms == 0 {
            return Err(ToolError::Configuration(
                "timeouts.connect_ms must be > 0".into(),
            ));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ToolError::Configuration(
                "circuitBreaker.failureThreshold must be > 0".into(),
            ));
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err(ToolError::Configuration(
                "circuitBreaker.successThreshold must be > 0".into(),
            ));
        }
        if self.bulkhead.default_limit == 0 || self.bulkhead.global_limit == 0 {
            return Err(ToolError::Configuration(
                "bulkhead limits must be > 0".into(),
            ));
        }
        if self.bulkhead.default_limit > self.bulkhead.global_limit {
            return Err(ToolError::Configuration(
                "bulkhead.defaultLimit cannot exceed bulkhead.globalLimit".into(),
            ));
        }
        if self.rate_limit.global_limit == 0 {
            return Err(ToolError::Configuration(
                "rateLimit.globalLimit must be > 0".into(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ToolError::Configuration(
                "retry.multiplier must be >= 1.0".into(),
            ));
        }
        if self.processor.max_concurrency == 0 {
            return Err(ToolError::Configuration(
                "processor.maxConcurrency must be > 0".into(),
            ));
        }
        Ok(())
    }
}
