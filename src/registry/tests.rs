use super::*;
use async_trait::async_trait;
use serde_json::{json, Value};

struct EchoTool {
    name: &'static str,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(&self, arguments: Value) -> Result<Value> {
        Ok(arguments)
    }
}

struct ErrorTool;

#[async_trait]
impl Tool for ErrorTool {
    fn name(&self) -> &str {
        "raises"
    }

    async fn execute(&self, _arguments: Value) -> Result<Value> {
        Err(ToolError::Execution("always fails".into()))
    }
}

#[tokio::test]
async fn register_then_get_returns_same_instance() {
    let registry = Registry::new();
    registry
        .register(Arc::new(EchoTool { name: "adder" }), None, None)
        .await
        .unwrap();
    let tool = registry.get_tool("adder", None).await.unwrap();
    assert_eq!(tool.name(), "adder");
}

#[tokio::test]
async fn dotted_name_resolves_namespace_and_bare_name() {
    let registry = Registry::new();
    registry
        .register(Arc::new(EchoTool { name: "search" }), Some("notion.search"), None)
        .await
        .unwrap();
    let tool = registry.get_tool("search", Some("notion")).await.unwrap();
    assert_eq!(tool.name(), "search");
    assert!(registry.get_tool("search", None).await.is_err());
}

#[tokio::test]
async fn explicit_namespace_wins_over_dotted_name() {
    let registry = Registry::new();
    registry
        .register(Arc::new(EchoTool { name: "tool" }), Some("a.tool"), Some("b"))
        .await
        .unwrap();
    assert!(registry.get_tool("a.tool", Some("b")).await.is_ok());
}

#[tokio::test]
async fn unknown_tool_is_not_found() {
    let registry = Registry::new();
    let err = registry.get_tool("missing", None).await.unwrap_err();
    assert!(matches!(err, ToolError::NotFound(_)));
}

#[tokio::test]
async fn reregistering_replaces_prior_entry() {
    let registry = Registry::new();
    registry.register(Arc::new(ErrorTool), None, None).await.unwrap();
    registry
        .register(Arc::new(EchoTool { name: "raises" }), None, None)
        .await
        .unwrap();
    let tool = registry.get_tool("raises", None).await.unwrap();
    let out = tool.execute(json!({"x": 1})).await.unwrap();
    assert_eq!(out, json!({"x": 1}));
}

#[tokio::test]
async fn deferred_tool_loads_lazily_on_first_use() {
    let registry = Registry::new();
    let meta = ToolMetadata::new("lazy", "a deferred tool", json!({"type": "object"}));
    let factory: ToolFactory = Arc::new(|| Ok(Arc::new(EchoTool { name: "lazy" }) as Arc<dyn Tool>));
    registry.register_deferred(meta, None, Some(factory)).await.unwrap();

    // Discoverable before loading.
    let listed = registry.list_tools(None).await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "lazy");

    let tool = registry.get_tool("lazy", None).await.unwrap();
    assert_eq!(tool.name(), "lazy");
}

#[tokio::test]
async fn deferred_tool_without_factory_or_namespace_is_configuration_error() {
    let registry = Registry::new();
    let meta = ToolMetadata::new("remote-ish", "no factory, no namespace", json!({}));
    let err = registry.register_deferred(meta, None, None).await.unwrap_err();
    assert!(matches!(err, ToolError::Configuration(_)));
}

#[tokio::test]
async fn search_deferred_tools_ranks_by_name_then_keywords_then_description() {
    let registry = Registry::new();
    let mut weather = ToolMetadata::new("get_weather", "fetch current weather", json!({}));
    weather.search_keywords = vec!["forecast".into(), "climate".into()];
    registry
        .register_deferred(
            weather,
            None,
            Some(Arc::new(|| Ok(Arc::new(EchoTool { name: "get_weather" }) as Arc<dyn Tool>))),
        )
        .await
        .unwrap();

    let mut unrelated = ToolMetadata::new("list_files", "enumerate files in a directory", json!({}));
    unrelated.search_keywords = vec!["weather".into()];
    registry
        .register_deferred(
            unrelated,
            None,
            Some(Arc::new(|| Ok(Arc::new(EchoTool { name: "list_files" }) as Arc<dyn Tool>))),
        )
        .await
        .unwrap();

    let results = registry.search_deferred_tools("weather", None, 10).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].name, "get_weather");
}

#[tokio::test]
async fn tool_count_reflects_registered_and_deferred_tools() {
    let registry = Registry::new();
    registry.register(Arc::new(EchoTool { name: "a" }), None, None).await.unwrap();
    registry
        .register_deferred(
            ToolMetadata::new("b", "deferred", json!({})),
            None,
            Some(Arc::new(|| Ok(Arc::new(EchoTool { name: "b" }) as Arc<dyn Tool>))),
        )
        .await
        .unwrap();
    assert_eq!(registry.get_tool_count().await, 2);
}
