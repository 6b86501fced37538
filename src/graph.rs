//! Graph model for dependency-driven execution.
//!
//! Nodes are the units of work handed to the engine and edges declare
//! ordering between them. The payload shape mirrors what an upstream graph
//! builder produces; the engine treats it as read-only input and never
//! interprets what a node semantically does.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;

/// The fixed set of node primitives the engine understands.
///
/// Unknown type strings deserialize to [`NodeKind::Generic`] so that a newer
/// graph builder cannot make a payload unparseable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Service,
    Database,
    Cache,
    Queue,
    Storage,
    Network,
    Policy,
    Secret,
    #[serde(other)]
    Generic,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Service => "service",
            NodeKind::Database => "database",
            NodeKind::Cache => "cache",
            NodeKind::Queue => "queue",
            NodeKind::Storage => "storage",
            NodeKind::Network => "network",
            NodeKind::Policy => "policy",
            NodeKind::Secret => "secret",
            NodeKind::Generic => "generic",
        };
        write!(f, "{}", name)
    }
}

/// Executor category a task is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    Provisioner,
    DataSteward,
    NetworkOperator,
    PolicyAuditor,
    SecretManager,
    GeneralPurpose,
}

impl AgentType {
    /// Maps a node primitive to the agent category that executes it.
    ///
    /// The match is exhaustive over [`NodeKind`], so adding a primitive
    /// fails compilation until it has been given an executor.
    pub fn for_node_kind(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Service | NodeKind::Queue => AgentType::Provisioner,
            NodeKind::Database | NodeKind::Cache | NodeKind::Storage => AgentType::DataSteward,
            NodeKind::Network => AgentType::NetworkOperator,
            NodeKind::Policy => AgentType::PolicyAuditor,
            NodeKind::Secret => AgentType::SecretManager,
            NodeKind::Generic => AgentType::GeneralPurpose,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentType::Provisioner => "provisioner",
            AgentType::DataSteward => "data-steward",
            AgentType::NetworkOperator => "network-operator",
            AgentType::PolicyAuditor => "policy-auditor",
            AgentType::SecretManager => "secret-manager",
            AgentType::GeneralPurpose => "general-purpose",
        };
        write!(f, "{}", name)
    }
}

/// A single unit of work in the dependency graph.
///
/// Immutable for the duration of a run; execution bookkeeping lives on the
/// derived [`crate::engine::ExecutionTask`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub config: HashMap<String, JsonValue>,
    #[serde(default)]
    pub archetype: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl GraphNode {
    /// Creates a bare node with no configuration or dependencies.
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            config: HashMap::new(),
            archetype: None,
            labels: HashMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Adds a dependency on another node id.
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }
}

/// An ordering edge: `from_id` depends on `to_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// The graph payload consumed from the graph builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPayload {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl GraphPayload {
    pub fn new(nodes: Vec<GraphNode>) -> Self {
        Self {
            nodes,
            edges: Vec::new(),
        }
    }

    /// Folds edge-declared dependencies into the node list and returns the
    /// normalized nodes.
    ///
    /// Dependency references to ids that do not exist among the supplied
    /// nodes are dropped with a warning; a malformed edge never fails the
    /// run. Dependency lists are de-duplicated while preserving order.
    pub fn into_nodes(self) -> Vec<GraphNode> {
        let known: HashSet<String> = self.nodes.iter().map(|n| n.id.clone()).collect();
        let mut nodes = self.nodes;

        for edge in &self.edges {
            if !known.contains(&edge.to_id) {
                warn!(
                    from_id = %edge.from_id,
                    to_id = %edge.to_id,
                    "dropping edge to unknown node"
                );
                continue;
            }
            match nodes.iter_mut().find(|n| n.id == edge.from_id) {
                Some(node) => node.depends_on.push(edge.to_id.clone()),
                None => {
                    warn!(
                        from_id = %edge.from_id,
                        to_id = %edge.to_id,
                        "dropping edge from unknown node"
                    );
                }
            }
        }

        for node in &mut nodes {
            let mut seen = HashSet::new();
            node.depends_on.retain(|dep| {
                if !known.contains(dep) {
                    warn!(node_id = %node.id, dep = %dep, "dropping unresolved dependency");
                    return false;
                }
                seen.insert(dep.clone())
            });
        }

        nodes
    }
}
