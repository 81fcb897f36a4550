//! End-to-end: a cacheable tool is invoked once for two identical calls.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use toolexec::config::Config;
use toolexec::errors::Result;
use toolexec::observability::default_observer;
use toolexec::strategy::InProcessStrategy;
use toolexec::{Processor, Registry, Tool, ToolCall};

struct LookupTool {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for LookupTool {
    fn name(&self) -> &str {
        "lookup"
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(arguments)
    }

    fn cacheable(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn second_identical_call_is_served_from_cache() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(Registry::new());
    registry
        .register(Arc::new(LookupTool { calls: calls.clone() }), None, None)
        .await
        .unwrap();
    let strategy: Arc<dyn toolexec::strategy::Strategy> = Arc::new(InProcessStrategy::new(8, 5_000));
    let processor = Processor::new(registry, strategy, Config::default(), default_observer()).unwrap();

    let batch = vec![
        ToolCall::new("c1", "lookup", json!({"id": 42})),
        ToolCall::new("c2", "lookup", json!({"id": 42})),
    ];
    let results = processor.execute(batch, None).await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| !r.is_error()));
    let cached = results.iter().filter(|r| r.cached).count();
    assert_eq!(cached, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
