//! Topological leveling of graph nodes into execution batches.
//!
//! Kahn's algorithm, one level per round: every node whose dependencies have
//! all been placed joins the next batch. Cycles are either broken by forcing
//! an arbitrary node through (default) or rejected outright, depending on
//! the configured [`CyclePolicy`].

use crate::engine::config::EngineConfig;
use crate::engine::task::{ExecutionBatch, ExecutionTask};
use crate::graph::{AgentType, GraphNode};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::warn;

/// What to do when leveling finds a dependency cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Force one remaining node through per stuck round. Terminates and
    /// covers every node, but ordering inside the cycle is best-effort.
    #[default]
    BreakArbitrary,
    /// Refuse to resolve a graph containing a cycle.
    Strict,
}

/// Errors from dependency resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("dependency cycle among nodes: {}", remaining.join(", "))]
    CycleDetected { remaining: Vec<String> },
}

/// Levels `nodes` and wraps each level into an [`ExecutionBatch`].
///
/// Batch index order is execution order: every task lands in a strictly
/// later batch than all of its dependencies (cycle-free case).
pub fn resolve_dependencies(
    nodes: &[GraphNode],
    assignments: Option<&HashMap<String, AgentType>>,
    config: &EngineConfig,
) -> Result<Vec<ExecutionBatch>, ResolveError> {
    let levels = level_nodes(nodes, config.cycle_policy)?;
    let by_id: HashMap<&str, &GraphNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();

    let batches = levels
        .into_iter()
        .enumerate()
        .map(|(index, level)| {
            let tasks = level
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .map(|node| ExecutionTask::for_node(node, assignments, config.max_retries))
                .collect();
            ExecutionBatch::new(index, tasks)
        })
        .collect();

    Ok(batches)
}

/// Pure grouping variant: node ids per dependency level, no batch wrapping.
///
/// Always uses the cycle-breaking policy, so it is total over any input.
pub fn calculate_levels(nodes: &[GraphNode]) -> Vec<Vec<String>> {
    match level_nodes(nodes, CyclePolicy::BreakArbitrary) {
        Ok(levels) => levels,
        // BreakArbitrary never reports a cycle; cover the error arm anyway.
        Err(_) => vec![nodes.iter().map(|n| n.id.clone()).collect()],
    }
}

/// Builds a single batch straight from a node set, skipping resolution.
///
/// Used as the degraded fallback when resolution fails and by callers that
/// already know the nodes form one dependency-free level.
pub fn batch_from_nodes(
    index: usize,
    nodes: &[GraphNode],
    assignments: Option<&HashMap<String, AgentType>>,
    max_retries: u32,
) -> ExecutionBatch {
    let tasks = nodes
        .iter()
        .map(|node| ExecutionTask::for_node(node, assignments, max_retries))
        .collect();
    ExecutionBatch::new(index, tasks)
}

fn level_nodes(nodes: &[GraphNode], policy: CyclePolicy) -> Result<Vec<Vec<String>>, ResolveError> {
    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    // Dependency map restricted to ids that actually exist; anything else
    // was already warned about during payload normalization.
    let mut deps: HashMap<&str, HashSet<&str>> = HashMap::with_capacity(nodes.len());
    let mut order: Vec<&str> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if deps.contains_key(node.id.as_str()) {
            warn!(node_id = %node.id, "duplicate node id, keeping first occurrence");
            continue;
        }
        order.push(node.id.as_str());
        deps.insert(
            node.id.as_str(),
            node.depends_on
                .iter()
                .map(String::as_str)
                .filter(|dep| known.contains(dep))
                .collect(),
        );
    }

    let mut placed: HashSet<&str> = HashSet::with_capacity(order.len());
    let mut remaining = order;
    let mut levels = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| deps[id].iter().all(|dep| placed.contains(dep)))
            .collect();

        if ready.is_empty() {
            match policy {
                CyclePolicy::Strict => {
                    return Err(ResolveError::CycleDetected {
                        remaining: remaining.iter().map(|id| id.to_string()).collect(),
                    });
                }
                CyclePolicy::BreakArbitrary => {
                    // Force one node through to guarantee progress. Ordering
                    // inside the cycle is not preserved.
                    let forced = remaining[0];
                    warn!(node_id = %forced, "breaking dependency cycle by forcing node");
                    ready.push(forced);
                }
            }
        }

        let ready_set: HashSet<&str> = ready.iter().copied().collect();
        remaining.retain(|id| !ready_set.contains(id));
        placed.extend(ready.iter().copied());
        levels.push(ready.iter().map(|id| id.to_string()).collect());
    }

    Ok(levels)
}
