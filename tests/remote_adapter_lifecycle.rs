//! End-to-end: a registry can resolve a deferred remote tool through a
//! `RemoteAdapter`/`Transport` pair, and `Processor::open`/`close` drive the
//! adapter's lifecycle.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use toolexec::config::{Config, TimeoutsConfig};
use toolexec::errors::Result;
use toolexec::model::ToolMetadata;
use toolexec::observability::default_observer;
use toolexec::remote::{RemoteAdapter, Transport};
use toolexec::strategy::InProcessStrategy;
use toolexec::{Processor, Registry};

struct FakeServer {
    sends: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for FakeServer {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn send(&self, request: Value) -> Result<Value> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        match request.get("method").and_then(|m| m.as_str()) {
            Some("initialize") => Ok(json!({})),
            Some("list_tools") => Ok(json!({
                "tools": [{"name": "ping", "description": "replies pong", "parameters": {"type": "object"}}]
            })),
            Some("call_tool") => Ok(json!({"result": "pong"})),
            _ => Ok(json!({})),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn deferred_remote_tool_resolves_and_executes_through_the_adapter() {
    let sends = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));
    let transport: Arc<dyn Transport> = Arc::new(FakeServer { sends: sends.clone(), closes: closes.clone() });
    let adapter = Arc::new(RemoteAdapter::new("svc", transport, TimeoutsConfig::default()));

    let registry = Arc::new(Registry::new());
    registry.register_remote_adapter("svc", adapter.clone()).await;
    registry
        .register_deferred(ToolMetadata::new("ping", "remote ping", json!({"type": "object"})), Some("svc"), None)
        .await
        .unwrap();

    let strategy: Arc<dyn toolexec::strategy::Strategy> = Arc::new(InProcessStrategy::new(8, 5_000));
    let processor = Processor::new(registry.clone(), strategy, Config::default(), default_observer()).unwrap();

    processor.open().await.unwrap();
    assert_eq!(adapter.state().await, toolexec::remote::AdapterState::Ready);

    let tool = registry.get_tool("ping", Some("svc")).await.unwrap();
    let result = tool.execute(json!({})).await.unwrap();
    assert_eq!(result, json!({"result": "pong"}));

    processor.close().await.unwrap();
    assert_eq!(adapter.state().await, toolexec::remote::AdapterState::Closed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert!(sends.load(Ordering::SeqCst) >= 3);
}
