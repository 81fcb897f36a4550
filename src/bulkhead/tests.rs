use super::*;

fn config() -> BulkheadConfig {
    BulkheadConfig {
        default_limit: 5,
        tool_limits: HashMap::new(),
        namespace_limits: HashMap::new(),
        pattern_limits: Vec::new(),
        global_limit: 100,
        acquisition_timeout_ms: 200,
        max_queue_depth: 50,
    }
}

#[tokio::test]
async fn acquire_and_release_returns_active_count_to_zero() {
    let bulkhead = Bulkhead::new(&config());
    {
        let _guard = bulkhead.acquire("adder", None, None).await.unwrap();
        let snap = bulkhead.snapshot("adder", None).await;
        assert_eq!(snap["global"].active, 1);
    }
    let snap = bulkhead.snapshot("adder", None).await;
    assert_eq!(snap["global"].active, 0);
}

#[tokio::test]
async fn tool_limit_saturates_independently_of_other_tools() {
    let mut cfg = config();
    cfg.tool_limits.insert("slow".into(), 1);
    let bulkhead = Bulkhead::new(&cfg);

    let _g1 = bulkhead.acquire("slow", None, None).await.unwrap();
    let err = bulkhead.acquire("slow", None, None).await.unwrap_err();
    assert!(matches!(err, ToolError::BulkheadFull { ref limit_type } if limit_type == "TOOL"));

    // A different tool is unaffected.
    assert!(bulkhead.acquire("fast", None, None).await.is_ok());
}

#[tokio::test]
async fn queue_depth_limit_fails_fourth_waiter() {
    let mut cfg = config();
    cfg.tool_limits.insert("slow".into(), 2);
    cfg.max_queue_depth = 1;
    cfg.acquisition_timeout_ms = 1000;
    let bulkhead = Arc::new(Bulkhead::new(&cfg));

    let g1 = bulkhead.acquire("slow", None, None).await.unwrap();
    let g2 = bulkhead.acquire("slow", None, None).await.unwrap();

    let b2 = bulkhead.clone();
    let waiter = tokio::spawn(async move { b2.acquire("slow", None, None).await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let err = bulkhead.acquire("slow", None, None).await.unwrap_err();
    assert!(matches!(err, ToolError::BulkheadFull { ref limit_type } if limit_type == "QUEUE_DEPTH"));

    drop(g1);
    let third = waiter.await.unwrap();
    assert!(third.is_ok());
    drop(g2);
    drop(third);
}

#[tokio::test]
async fn namespace_limit_applies_before_tool_limit() {
    let mut cfg = config();
    cfg.namespace_limits.insert("mcp".into(), 1);
    let bulkhead = Bulkhead::new(&cfg);

    let _g1 = bulkhead.acquire("mcp.notion.search", Some("mcp"), None).await.unwrap();
    let err = bulkhead.acquire("mcp.notion.other", Some("mcp"), None).await.unwrap_err();
    assert!(matches!(err, ToolError::BulkheadFull { ref limit_type } if limit_type == "NAMESPACE"));
}

#[tokio::test]
async fn pattern_limit_matches_glob_over_default() {
    let mut cfg = config();
    cfg.default_limit = 10;
    cfg.pattern_limits.push(("db.*".to_string(), 1));
    let bulkhead = Bulkhead::new(&cfg);

    let _g1 = bulkhead.acquire("db.query", None, None).await.unwrap();
    let err = bulkhead.acquire("db.query", None, None).await.unwrap_err();
    assert!(matches!(err, ToolError::BulkheadFull { ref limit_type } if limit_type == "TOOL"));

    // A non-matching tool still gets the default limit.
    assert!(bulkhead.acquire("other.tool", None, None).await.is_ok());
}

#[tokio::test]
async fn global_limit_caps_sum_across_tools() {
    let mut cfg = config();
    cfg.global_limit = 1;
    let bulkhead = Bulkhead::new(&cfg);

    let _g1 = bulkhead.acquire("a", None, None).await.unwrap();
    let err = bulkhead.acquire("b", None, None).await.unwrap_err();
    assert!(matches!(err, ToolError::BulkheadFull { ref limit_type } if limit_type == "GLOBAL"));
}

#[tokio::test]
async fn per_call_timeout_overrides_configured_acquisition_timeout() {
    let mut cfg = config();
    cfg.tool_limits.insert("slow".into(), 1);
    cfg.acquisition_timeout_ms = 5_000;
    let bulkhead = Bulkhead::new(&cfg);

    let _g1 = bulkhead.acquire("slow", None, None).await.unwrap();
    let started = std::time::Instant::now();
    let err = bulkhead
        .acquire("slow", None, Some(std::time::Duration::from_millis(20)))
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::BulkheadFull { ref limit_type } if limit_type == "TOOL"));
    assert!(started.elapsed() < std::time::Duration::from_millis(5_000));
}

#[tokio::test]
async fn configure_tool_updates_future_acquisitions_only() {
    let bulkhead = Bulkhead::new(&config());
    let held = bulkhead.acquire("adder", None, None).await.unwrap();
    bulkhead.configure_tool("adder", 0).await;
    // In-flight holder is unaffected; it can still be released normally.
    drop(held);
}
