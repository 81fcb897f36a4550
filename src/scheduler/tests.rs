use super::*;
use crate::model::{CallMetadata, ToolCall};
use std::collections::HashMap;

fn call(id: &str, deps: &[&str]) -> ToolCall {
    ToolCall::new(id, "noop", serde_json::json!({})).with_depends_on(deps.iter().map(|s| s.to_string()).collect())
}

fn call_with(id: &str, deps: &[&str], metadata: CallMetadata) -> ToolCall {
    call(id, deps).with_metadata(metadata)
}

fn find_stage(plan: &ExecutionPlan, id: &str) -> usize {
    plan.stages.iter().position(|stage| stage.iter().any(|s| s == id)).expect("call present in a stage")
}

#[test]
fn independent_calls_land_in_a_single_stage() {
    let calls = vec![call("a", &[]), call("b", &[]), call("c", &[])];
    let plan = plan(&calls, &SchedulingConstraints::default(), 5_000, 0).unwrap();
    assert_eq!(plan.stages.len(), 1);
    assert_eq!(plan.stages[0].len(), 3);
}

#[test]
fn dependent_calls_land_in_successive_stages() {
    let calls = vec![call("a", &[]), call("b", &["a"]), call("c", &["b"])];
    let plan = plan(&calls, &SchedulingConstraints::default(), 5_000, 0).unwrap();
    assert_eq!(plan.stages.len(), 3);
    assert!(find_stage(&plan, "a") < find_stage(&plan, "b"));
    assert!(find_stage(&plan, "b") < find_stage(&plan, "c"));
}

#[test]
fn cyclic_dependencies_are_a_configuration_error() {
    let calls = vec![call("a", &["b"]), call("b", &["a"])];
    let err = plan(&calls, &SchedulingConstraints::default(), 5_000, 0).unwrap_err();
    assert!(matches!(err, ToolError::Configuration(_)));
}

#[test]
fn unknown_dependency_is_a_configuration_error() {
    let calls = vec![call("a", &["ghost"])];
    let err = plan(&calls, &SchedulingConstraints::default(), 5_000, 0).unwrap_err();
    assert!(matches!(err, ToolError::Configuration(_)));
}

#[test]
fn pool_limit_splits_a_layer_into_multiple_stages() {
    let meta = |pool: &str| CallMetadata { pool: Some(pool.to_string()), ..Default::default() };
    let calls = vec![
        call_with("a", &[], meta("db")),
        call_with("b", &[], meta("db")),
        call_with("c", &[], meta("db")),
    ];
    let mut constraints = SchedulingConstraints::default();
    constraints.pool_limits.insert("db".to_string(), 2);

    let plan = plan(&calls, &constraints, 5_000, 0).unwrap();
    assert_eq!(plan.stages.len(), 2);
    assert_eq!(plan.stages[0].len(), 2);
    assert_eq!(plan.stages[1].len(), 1);
}

#[test]
fn unreachable_deadline_skips_lowest_priority_call() {
    let meta = |priority: i64| CallMetadata { est_ms: Some(1_000), priority, ..Default::default() };
    let calls = vec![call_with("important", &[], meta(10)), call_with("optional", &[], meta(0))];
    let constraints = SchedulingConstraints { deadline_ms: Some(1_000), max_cost: None, pool_limits: HashMap::new() };

    let plan = plan(&calls, &constraints, 5_000, 0).unwrap();
    assert_eq!(plan.skip.get("optional"), Some(&SkipReason::PlannedDeadline));
    assert!(!plan.skip.contains_key("important"));
}

#[test]
fn deadline_skip_cascades_to_dependents() {
    let meta = |priority: i64| CallMetadata { est_ms: Some(1_000), priority, ..Default::default() };
    let calls = vec![
        call_with("root", &[], meta(0)),
        call("child", &["root"]),
        call_with("other", &[], meta(10)),
    ];
    let constraints = SchedulingConstraints { deadline_ms: Some(1_000), max_cost: None, pool_limits: HashMap::new() };

    let plan = plan(&calls, &constraints, 5_000, 0).unwrap();
    assert_eq!(plan.skip.get("root"), Some(&SkipReason::PlannedDeadline));
    assert_eq!(plan.skip.get("child"), Some(&SkipReason::PlannedDeadline));
    assert!(!plan.skip.contains_key("other"));
}

#[test]
fn cost_budget_skips_until_it_fits() {
    let meta = |cost: u64, priority: i64| CallMetadata { cost: Some(cost), priority, ..Default::default() };
    let calls = vec![call_with("cheap", &[], meta(1, 5)), call_with("pricey", &[], meta(10, 0))];
    let constraints = SchedulingConstraints { deadline_ms: None, max_cost: Some(5), pool_limits: HashMap::new() };

    let plan = plan(&calls, &constraints, 5_000, 0).unwrap();
    assert_eq!(plan.skip.get("pricey"), Some(&SkipReason::PlannedCost));
    assert!(!plan.skip.contains_key("cheap"));
}

#[test]
fn per_call_timeout_is_clamped_to_remaining_deadline() {
    let meta = CallMetadata { est_ms: Some(600), ..Default::default() };
    let calls = vec![call_with("a", &[], meta.clone()), call_with("b", &["a"], meta)];
    let constraints = SchedulingConstraints { deadline_ms: Some(1_000), max_cost: None, pool_limits: HashMap::new() };

    let plan = plan(&calls, &constraints, 5_000, 0).unwrap();
    assert_eq!(plan.per_call_timeout_ms["a"], 1_000);
    assert!(plan.per_call_timeout_ms["b"] <= 400);
}

#[test]
fn empty_batch_produces_empty_plan() {
    let plan = plan(&[], &SchedulingConstraints::default(), 5_000, 0).unwrap();
    assert!(plan.stages.is_empty());
}
