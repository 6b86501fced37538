//! Task and batch records with their status machines.
//!
//! Tasks move `Pending -> Running -> {Completed, Failed}`; a retriable
//! failure re-enters `Pending` via [`ExecutionTask::reset_for_retry`] until
//! the retry budget is spent. Batches mirror the same shape and derive
//! their terminal status from their tasks.

use crate::graph::{AgentType, GraphNode};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One schedulable unit of work, derived from a [`GraphNode`].
///
/// Owned exclusively by the engine for the duration of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub id: String,
    pub node_id: String,
    pub agent_type: AgentType,
    pub description: String,
    pub depends_on: Vec<String>,
    pub status: TaskStatus,
    pub remote_session: Option<String>,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl ExecutionTask {
    /// Derives a task from a node.
    ///
    /// The agent type comes from the node kind unless the assignment hint
    /// map overrides it for this node id.
    pub fn for_node(
        node: &GraphNode,
        assignments: Option<&HashMap<String, AgentType>>,
        max_retries: u32,
    ) -> Self {
        let agent_type = assignments
            .and_then(|hints| hints.get(&node.id).copied())
            .unwrap_or_else(|| AgentType::for_node_kind(node.kind));

        Self {
            id: format!("task-{}", node.id),
            node_id: node.id.clone(),
            agent_type,
            description: format!("Execute {} node '{}'", node.kind, node.name),
            depends_on: node.depends_on.clone(),
            status: TaskStatus::Pending,
            remote_session: None,
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
        }
    }

    /// Whether another retry fits in the budget.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at.get_or_insert_with(SystemTime::now);
    }

    pub fn mark_completed(&mut self, result: JsonValue) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(SystemTime::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(SystemTime::now());
    }

    /// Re-arms the task for another attempt.
    ///
    /// Spends one retry from the budget; callers check
    /// [`Self::can_retry`] first so `retry_count` never exceeds
    /// `max_retries`.
    pub fn reset_for_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1).min(self.max_retries);
        self.status = TaskStatus::Pending;
        self.remote_session = None;
        self.result = None;
        self.finished_at = None;
    }
}

/// One dependency level of tasks, executed concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionBatch {
    pub id: String,
    pub tasks: Vec<ExecutionTask>,
    pub status: BatchStatus,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

impl ExecutionBatch {
    pub fn new(index: usize, tasks: Vec<ExecutionTask>) -> Self {
        Self {
            id: format!("batch-{}", index),
            tasks,
            status: BatchStatus::Pending,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = BatchStatus::Running;
        self.started_at = Some(SystemTime::now());
    }

    /// Settles the batch status from its tasks: `Failed` if any task failed,
    /// `Completed` otherwise.
    pub fn mark_finished(&mut self) {
        self.status = if self
            .tasks
            .iter()
            .any(|t| t.status == TaskStatus::Failed)
        {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        self.finished_at = Some(SystemTime::now());
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.id.clone()).collect()
    }
}
