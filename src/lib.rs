//! Reliability-engineered execution engine for LLM-emitted tool calls:
//! registry, middleware stack (cache, rate limit, retry, circuit breaker,
//! bulkhead), DAG scheduler, and remote-tool transport adapter.

pub mod bulkhead;
pub mod config;
pub mod context;
pub mod errors;
pub mod middleware;
pub mod model;
pub mod observability;
pub mod processor;
pub mod registry;
pub mod remote;
pub mod scheduler;
pub mod strategy;
pub mod tool;

pub use context::ExecutionContext;
pub use errors::{ErrorCategory, ErrorCode, ErrorInfo, Result, ToolError};
pub use model::{CallMetadata, Capability, ToolCall, ToolMetadata, ToolResult};
pub use processor::{Parser, ProcessInput, Processor};
pub use registry::Registry;
pub use tool::Tool;
