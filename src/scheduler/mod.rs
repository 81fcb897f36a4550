//! Plans a batch of `ToolCall`s into parallel stages honouring
//! dependencies, pool concurrency limits, and an optional deadline/cost
//! budget (§4.5).

use crate::errors::{Result, ToolError};
use crate::model::ToolCall;
use std::collections::HashMap;

/// Why a call was pre-emptively removed from the plan, distinct from a
/// runtime failure cascade (§4.5 "Skip semantics").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    PlannedDeadline,
    PlannedCost,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::PlannedDeadline => write!(f, "deadline budget exceeded"),
            SkipReason::PlannedCost => write!(f, "cost budget exceeded"),
        }
    }
}

/// Caller-supplied scheduling budget, mirrored 1:1 from `SchedulerConfig`
/// plus whatever the caller overrides per request.
#[derive(Debug, Clone, Default)]
pub struct SchedulingConstraints {
    pub deadline_ms: Option<u64>,
    pub max_cost: Option<u64>,
    pub pool_limits: HashMap<String, usize>,
}

/// The Scheduler's output: which calls run in which parallel stage, with
/// what per-call timeout, and which calls are pre-emptively skipped.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub stages: Vec<Vec<String>>,
    pub per_call_timeout_ms: HashMap<String, u64>,
    pub per_call_max_retries: HashMap<String, u32>,
    pub skip: HashMap<String, SkipReason>,
}

/// Topologically sort `calls` by `depends_on`, then pack into stages such
/// that no stage puts more calls sharing a `pool` than `pool_limits`
/// allows; if a deadline or cost budget is set and unreachable, skip
/// ascending-priority calls (and their dependents) until it fits.
pub fn plan(
    calls: &[ToolCall],
    constraints: &SchedulingConstraints,
    default_timeout_ms: u64,
    default_max_retries: u32,
) -> Result<ExecutionPlan> {
    if calls.is_empty() {
        return Ok(ExecutionPlan::default());
    }

    let by_id: HashMap<&str, &ToolCall> = calls.iter().map(|c| (c.call_id.as_str(), c)).collect();
    for call in calls {
        for dep in &call.depends_on {
            if !by_id.contains_key(dep.as_str()) {
                return Err(ToolError::Configuration(format!(
                    "call '{}' depends on unknown call '{}'",
                    call.call_id, dep
                )));
            }
        }
    }

    let dependents = build_dependents(calls);
    let mut skip: HashMap<String, SkipReason> = HashMap::new();

    if let Some(deadline_ms) = constraints.deadline_ms {
        fit_budget(calls, &by_id, &dependents, constraints, &mut skip, deadline_ms, SkipReason::PlannedDeadline, |c| {
            c.metadata.est_ms.unwrap_or(0)
        })?;
    }
    if let Some(max_cost) = constraints.max_cost {
        fit_budget(calls, &by_id, &dependents, constraints, &mut skip, max_cost, SkipReason::PlannedCost, |c| {
            c.metadata.cost.unwrap_or(0)
        })?;
    }

    let active: Vec<&ToolCall> = calls.iter().filter(|c| !skip.contains_key(&c.call_id)).collect();
    let layers = topo_layers(&active)?;
    let stages = pack_stages(&layers, &by_id, &constraints.pool_limits);

    let mut per_call_timeout_ms = HashMap::new();
    let mut per_call_max_retries = HashMap::new();
    let mut elapsed_before_stage = 0u64;
    for stage in &stages {
        let stage_duration = stage
            .iter()
            .map(|id| by_id[id.as_str()].metadata.est_ms.unwrap_or(0))
            .max()
            .unwrap_or(0);
        for id in stage {
            let timeout = match constraints.deadline_ms {
                Some(deadline_ms) => {
                    let remaining = deadline_ms.saturating_sub(elapsed_before_stage);
                    default_timeout_ms.min(remaining.max(1))
                }
                None => default_timeout_ms,
            };
            per_call_timeout_ms.insert(id.clone(), timeout);
            per_call_max_retries.insert(id.clone(), default_max_retries);
        }
        elapsed_before_stage += stage_duration;
    }

    Ok(ExecutionPlan { stages, per_call_timeout_ms, per_call_max_retries, skip })
}

fn build_dependents(calls: &[ToolCall]) -> HashMap<String, Vec<String>> {
    let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
    for call in calls {
        for dep in &call.depends_on {
            dependents.entry(dep.clone()).or_default().push(call.call_id.clone());
        }
    }
    dependents
}

/// Remove `victim` and cascade to every transitive dependent, recording
/// `reason` for each.
fn cascade_skip(
    victim: &str,
    dependents: &HashMap<String, Vec<String>>,
    skip: &mut HashMap<String, SkipReason>,
    reason: SkipReason,
) {
    let mut stack = vec![victim.to_string()];
    while let Some(id) = stack.pop() {
        if skip.insert(id.clone(), reason).is_none() {
            if let Some(children) = dependents.get(&id) {
                stack.extend(children.iter().cloned());
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn fit_budget(
    calls: &[ToolCall],
    by_id: &HashMap<&str, &ToolCall>,
    dependents: &HashMap<String, Vec<String>>,
    constraints: &SchedulingConstraints,
    skip: &mut HashMap<String, SkipReason>,
    budget: u64,
    reason: SkipReason,
    weight_of: impl Fn(&ToolCall) -> u64,
) -> Result<()> {
    loop {
        let active: Vec<&ToolCall> = calls.iter().filter(|c| !skip.contains_key(&c.call_id)).collect();
        if active.is_empty() {
            return Ok(());
        }
        let layers = topo_layers(&active)?;
        let stages = pack_stages(&layers, by_id, &constraints.pool_limits);
        let total: u64 = stages
            .iter()
            .map(|stage| stage.iter().map(|id| weight_of(by_id[id.as_str()])).max().unwrap_or(0))
            .sum();
        if total <= budget {
            return Ok(());
        }
        let victim = active
            .iter()
            .min_by_key(|c| c.metadata.priority)
            .expect("active is non-empty")
            .call_id
            .clone();
        cascade_skip(&victim, dependents, skip, reason);
    }
}

/// Kahn's algorithm, grouping nodes into dependency "layers": all calls
/// whose dependencies are satisfied by the end of the previous layer.
/// Returns `CONFIGURATION_ERROR` if the subgraph over `calls` is cyclic.
fn topo_layers(calls: &[&ToolCall]) -> Result<Vec<Vec<String>>> {
    let ids: std::collections::HashSet<&str> = calls.iter().map(|c| c.call_id.as_str()).collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for call in calls {
        let relevant_deps = call.depends_on.iter().filter(|d| ids.contains(d.as_str())).count();
        in_degree.insert(&call.call_id, relevant_deps);
        for dep in &call.depends_on {
            if ids.contains(dep.as_str()) {
                dependents.entry(dep.as_str()).or_default().push(&call.call_id);
            }
        }
    }

    let mut frontier: Vec<&str> = in_degree.iter().filter(|&(_, &d)| d == 0).map(|(id, _)| *id).collect();
    frontier.sort();
    let mut visited = 0usize;
    let mut layers = Vec::new();

    while !frontier.is_empty() {
        visited += frontier.len();
        let mut next: Vec<&str> = Vec::new();
        for &id in &frontier {
            if let Some(children) = dependents.get(id) {
                for &child in children {
                    let degree = in_degree.get_mut(child).unwrap();
                    *degree -= 1;
                    if *degree == 0 {
                        next.push(child);
                    }
                }
            }
        }
        layers.push(frontier.iter().map(|s| s.to_string()).collect());
        next.sort();
        next.dedup();
        frontier = next;
    }

    if visited != calls.len() {
        return Err(ToolError::Configuration("dependency graph is cyclic".into()));
    }

    Ok(layers)
}

/// Split each dependency layer into one or more stages so that no stage
/// exceeds `pool_limits` for any pool its calls share. Splitting within a
/// layer is always safe: later real layers only depend on earlier ones,
/// never on siblings, so deferring excess siblings to an extra stage
/// cannot violate a dependency edge.
fn pack_stages(
    layers: &[Vec<String>],
    by_id: &HashMap<&str, &ToolCall>,
    pool_limits: &HashMap<String, usize>,
) -> Vec<Vec<String>> {
    let mut stages = Vec::new();
    for layer in layers {
        let mut current: Vec<String> = Vec::new();
        let mut pool_counts: HashMap<&str, usize> = HashMap::new();
        for id in layer {
            let call = by_id[id.as_str()];
            let pool = call.metadata.pool.as_deref();
            let limit = pool.and_then(|p| pool_limits.get(p)).copied();
            if let (Some(pool), Some(limit)) = (pool, limit) {
                let count = pool_counts.entry(pool).or_insert(0);
                if *count >= limit {
                    stages.push(std::mem::take(&mut current));
                    pool_counts.clear();
                    pool_counts.insert(pool, 0);
                }
                *pool_counts.entry(pool).or_insert(0) += 1;
            }
            current.push(id.clone());
        }
        if !current.is_empty() {
            stages.push(current);
        }
    }
    stages
}

#[cfg(test)]
mod tests;
