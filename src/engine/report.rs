//! Aggregated run results returned to the caller.
//!
//! The engine's entry points never return an error; every failure mode is
//! folded into an [`ExecutionReport`] with enough detail (failed task ids,
//! error text, retry counts) for the caller to decide what to do next.

use crate::context::ExecutionContext;
use crate::engine::task::{ExecutionBatch, ExecutionTask, TaskStatus};
use crate::graph::AgentType;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;

/// Terminal record of one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub node_id: String,
    pub agent_type: AgentType,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
}

impl From<&ExecutionTask> for TaskResult {
    fn from(task: &ExecutionTask) -> Self {
        Self {
            task_id: task.id.clone(),
            node_id: task.node_id.clone(),
            agent_type: task.agent_type,
            status: task.status,
            result: task.result.clone(),
            error: task.error.clone(),
            retry_count: task.retry_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Successful share of all tasks, in percent.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionArtifacts {
    pub summary: ExecutionSummary,
    pub task_results: Vec<TaskResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_tasks: Vec<TaskResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub session_id: String,
    pub run_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub execution_time: Duration,
}

/// Final result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub success: bool,
    pub message: String,
    pub artifacts: ExecutionArtifacts,
    pub metadata: ReportMetadata,
}

impl ExecutionReport {
    /// Aggregates batches into the final report.
    ///
    /// Success means zero permanently failed tasks and no cancellation;
    /// tasks left pending behind a failed batch count as unexecuted, not
    /// failed.
    pub(crate) fn from_batches(
        batches: &[ExecutionBatch],
        context: &ExecutionContext,
        phase: Option<String>,
        execution_time: Duration,
        cancelled: bool,
    ) -> Self {
        let task_results: Vec<TaskResult> = batches
            .iter()
            .flat_map(|batch| batch.tasks.iter().map(TaskResult::from))
            .collect();

        let total = task_results.len();
        let successful = task_results
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let failed_tasks: Vec<TaskResult> = task_results
            .iter()
            .filter(|t| t.status == TaskStatus::Failed)
            .cloned()
            .collect();
        let failed = failed_tasks.len();

        let success = failed == 0 && !cancelled;
        let message = if cancelled {
            format!(
                "Execution cancelled; {} of {} tasks completed before the stop",
                successful, total
            )
        } else if failed > 0 {
            format!("{} of {} tasks failed", failed, total)
        } else {
            format!("All {} tasks completed successfully", total)
        };

        let success_rate = if total == 0 {
            100.0
        } else {
            successful as f64 / total as f64 * 100.0
        };

        Self {
            success,
            message,
            artifacts: ExecutionArtifacts {
                summary: ExecutionSummary {
                    total,
                    successful,
                    failed,
                    success_rate,
                },
                task_results,
                failed_tasks,
            },
            metadata: ReportMetadata {
                session_id: context.session_id.clone(),
                run_name: context.run_name.clone(),
                phase,
                total_tasks: total,
                successful_tasks: successful,
                failed_tasks: failed,
                execution_time,
            },
        }
    }

    /// Report for a run that never started because resolution refused the
    /// graph.
    pub(crate) fn resolution_failure(
        context: &ExecutionContext,
        phase: Option<String>,
        error: impl std::fmt::Display,
        execution_time: Duration,
    ) -> Self {
        Self {
            success: false,
            message: format!("Dependency resolution failed: {}", error),
            artifacts: ExecutionArtifacts {
                summary: ExecutionSummary {
                    total: 0,
                    successful: 0,
                    failed: 0,
                    success_rate: 0.0,
                },
                task_results: Vec::new(),
                failed_tasks: Vec::new(),
            },
            metadata: ReportMetadata {
                session_id: context.session_id.clone(),
                run_name: context.run_name.clone(),
                phase,
                total_tasks: 0,
                successful_tasks: 0,
                failed_tasks: 0,
                execution_time,
            },
        }
    }
}
