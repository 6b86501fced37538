//! Parallel execution engine.
//!
//! Drives a dependency graph of work through a remote execution provider:
//! nodes are leveled into batches, batches run strictly sequentially, and
//! the tasks inside a batch run concurrently under a semaphore bound. All
//! failure handling resolves into the returned [`ExecutionReport`]; the
//! entry points never return an error.

pub mod config;
pub mod error;
pub mod progress;
pub mod recovery;
pub mod report;
pub mod resolver;
pub mod task;

pub use config::EngineConfig;
pub use error::EngineError;
pub use progress::{ExecutionProgress, ProgressReport, ProgressTracker, Trend};
pub use recovery::{RecoveryManager, RollbackAction, rollback_action};
pub use report::{ExecutionArtifacts, ExecutionReport, ExecutionSummary, ReportMetadata, TaskResult};
pub use resolver::{CyclePolicy, ResolveError, calculate_levels, resolve_dependencies};
pub use task::{BatchStatus, ExecutionBatch, ExecutionTask, TaskStatus};

use crate::context::ExecutionContext;
use crate::graph::{AgentType, GraphNode, GraphPayload};
use crate::remote::{LaunchSpec, RemoteExecutionClient, SessionState};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

/// Snapshot of engine-wide resource consumption.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub active_executions: usize,
    pub active_agent_sessions: usize,
    pub max_concurrent_agents: usize,
    /// Live agent sessions as a share of the concurrency bound.
    pub utilization: f64,
}

/// Per-run coordination state shared with in-flight tasks.
#[derive(Clone)]
struct RunHandle {
    cancel: CancellationToken,
    progress: Arc<Mutex<ProgressTracker>>,
    sessions: Arc<Mutex<HashSet<String>>>,
    semaphore: Arc<Semaphore>,
}

impl RunHandle {
    fn new(max_concurrent: usize) -> Self {
        Self {
            cancel: CancellationToken::new(),
            progress: Arc::new(Mutex::new(ProgressTracker::new())),
            sessions: Arc::new(Mutex::new(HashSet::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }
}

/// Coordinates parallel agent execution over a dependency graph.
///
/// The remote client is injected at construction and shared by every run;
/// per-run state (batches, progress, live sessions) is isolated in the
/// active-run table keyed by the run's session id.
///
/// # Examples
///
/// ```ignore
/// use agent_conductor::engine::ExecutionEngine;
/// use agent_conductor::remote::ScriptedClient;
/// use std::sync::Arc;
///
/// let engine = ExecutionEngine::new(Arc::new(ScriptedClient::new()));
/// let report = engine
///     .execute_parallel_agents(graph, None, ExecutionContext::new("deploy"))
///     .await;
/// assert!(report.success);
/// ```
pub struct ExecutionEngine {
    client: Arc<dyn RemoteExecutionClient>,
    config: EngineConfig,
    recovery: Arc<RecoveryManager>,
    active: Arc<Mutex<HashMap<String, RunHandle>>>,
}

impl ExecutionEngine {
    pub fn new(client: Arc<dyn RemoteExecutionClient>) -> Self {
        Self::with_config(client, EngineConfig::default())
    }

    pub fn with_config(client: Arc<dyn RemoteExecutionClient>, config: EngineConfig) -> Self {
        Self {
            client,
            config,
            recovery: Arc::new(RecoveryManager::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for registering rollback actions and triggering replays.
    pub fn recovery(&self) -> Arc<RecoveryManager> {
        Arc::clone(&self.recovery)
    }

    /// Executes a full graph run: parse, resolve, then drive every batch.
    pub async fn execute_parallel_agents(
        &self,
        graph: GraphPayload,
        assignments: Option<HashMap<String, AgentType>>,
        context: ExecutionContext,
    ) -> ExecutionReport {
        self.execute_graph(graph, assignments, context, None).await
    }

    /// Full pipeline for a named phase; the report metadata carries the
    /// phase tag and opt-in rollback uses phase matching.
    pub async fn execute_phase(
        &self,
        phase: &str,
        graph: GraphPayload,
        context: ExecutionContext,
    ) -> ExecutionReport {
        self.execute_graph(graph, None, context, Some(phase.to_string()))
            .await
    }

    /// Executes one already-leveled node set directly, skipping resolution.
    ///
    /// For callers that know the nodes have no dependencies among
    /// themselves, e.g. a phase-by-phase workflow driving its own levels.
    pub async fn execute_level_parallel(
        &self,
        nodes: Vec<GraphNode>,
        phase: &str,
        context: ExecutionContext,
    ) -> ExecutionReport {
        let started = Instant::now();
        let batch = resolver::batch_from_nodes(0, &nodes, None, self.config.max_retries);
        self.run_batches(
            vec![batch],
            Arc::new(context),
            Some(phase.to_string()),
            started,
        )
        .await
    }

    /// Cancels a run: stops scheduling, terminates its live remote
    /// sessions and removes it from the active set.
    ///
    /// Returns `false` when no run with that session id is active.
    /// Cancellation is a clean stop, not an error; partial results stay in
    /// the run's report.
    pub async fn cancel_execution(&self, session_id: &str) -> bool {
        let run = self.active.lock().await.remove(session_id);
        let run = match run {
            Some(run) => run,
            None => return false,
        };

        info!(session_id = %session_id, "cancelling execution");
        run.cancel.cancel();

        let sessions: Vec<String> = run.sessions.lock().await.iter().cloned().collect();
        for remote_id in sessions {
            Self::terminate_session(&self.client, &remote_id).await;
        }
        true
    }

    /// Latest progress snapshot of an active run.
    pub async fn get_execution_status(&self, session_id: &str) -> Option<ExecutionProgress> {
        let active = self.active.lock().await;
        let run = active.get(session_id)?;
        let progress = run.progress.lock().await;
        progress.latest().cloned()
    }

    /// Engine-wide view of active runs and live agent sessions.
    pub async fn get_resource_usage(&self) -> ResourceUsage {
        let active = self.active.lock().await;
        let mut live_sessions = 0;
        for run in active.values() {
            live_sessions += run.sessions.lock().await.len();
        }

        let max = self.config.max_concurrent_agents;
        ResourceUsage {
            active_executions: active.len(),
            active_agent_sessions: live_sessions,
            max_concurrent_agents: max,
            utilization: if max == 0 {
                0.0
            } else {
                live_sessions as f64 / max as f64
            },
        }
    }

    async fn execute_graph(
        &self,
        graph: GraphPayload,
        assignments: Option<HashMap<String, AgentType>>,
        context: ExecutionContext,
        phase: Option<String>,
    ) -> ExecutionReport {
        let started = Instant::now();
        let context = Arc::new(context);
        let nodes = graph.into_nodes();

        let batches =
            match resolver::resolve_dependencies(&nodes, assignments.as_ref(), &self.config) {
                Ok(batches) => batches,
                Err(err) => match self.config.cycle_policy {
                    CyclePolicy::BreakArbitrary => {
                        warn!(error = %err, "resolution failed, degrading to a single batch");
                        vec![resolver::batch_from_nodes(
                            0,
                            &nodes,
                            assignments.as_ref(),
                            self.config.max_retries,
                        )]
                    }
                    CyclePolicy::Strict => {
                        return ExecutionReport::resolution_failure(
                            &context,
                            phase,
                            err,
                            started.elapsed(),
                        );
                    }
                },
            };

        self.run_batches(batches, context, phase, started).await
    }

    /// Drives batches in index order; stops at the first failed batch or on
    /// cancellation.
    async fn run_batches(
        &self,
        mut batches: Vec<ExecutionBatch>,
        context: Arc<ExecutionContext>,
        phase: Option<String>,
        started: Instant,
    ) -> ExecutionReport {
        let total_tasks: usize = batches.iter().map(|b| b.tasks.len()).sum();
        let run = RunHandle::new(self.config.max_concurrent_agents);

        run.progress
            .lock()
            .await
            .start_tracking(total_tasks, batches.len());
        self.active
            .lock()
            .await
            .insert(context.session_id.clone(), run.clone());

        let run_span = info_span!(
            "agent_run",
            session_id = %context.session_id,
            total_tasks,
            total_batches = batches.len(),
        );

        async {
            info!("starting run");

            for index in 0..batches.len() {
                if run.cancel.is_cancelled() {
                    info!("run cancelled, not scheduling further batches");
                    break;
                }

                run.progress.lock().await.advance_batch(index);
                let batch = &mut batches[index];
                self.execute_batch(batch, &context, &run).await;
                let batch_failed = batch.status == BatchStatus::Failed;

                run.progress.lock().await.update_progress(&batches);

                if batch_failed {
                    warn!(batch_index = index, "batch failed, halting run");
                    break;
                }
            }
        }
        .instrument(run_span)
        .await;

        self.active.lock().await.remove(&context.session_id);
        let cancelled = run.cancel.is_cancelled();

        if self.config.rollback_on_failure {
            self.rollback_failures(&batches, phase.as_deref()).await;
        }

        let report =
            ExecutionReport::from_batches(&batches, &context, phase, started.elapsed(), cancelled);
        info!(
            session_id = %context.session_id,
            success = report.success,
            failed_tasks = report.metadata.failed_tasks,
            "run finished"
        );
        report
    }

    /// Executes one batch: all tasks concurrently, bounded by the run
    /// semaphore, then settles the batch status from the joined tasks.
    async fn execute_batch(
        &self,
        batch: &mut ExecutionBatch,
        context: &Arc<ExecutionContext>,
        run: &RunHandle,
    ) {
        batch.mark_running();
        info!(batch_id = %batch.id, tasks = batch.tasks.len(), "executing batch");

        let mut handles = Vec::with_capacity(batch.tasks.len());
        for task in batch.tasks.drain(..) {
            let fallback = task.clone();
            let span = info_span!(
                "agent_task",
                task_id = %task.id,
                agent_type = %task.agent_type,
            );
            let handle = tokio::spawn(
                Self::run_task(
                    task,
                    Arc::clone(&self.client),
                    self.config.clone(),
                    Arc::clone(&self.recovery),
                    Arc::clone(context),
                    run.clone(),
                )
                .instrument(span),
            );
            handles.push((fallback, handle));
        }

        let mut finished = Vec::with_capacity(handles.len());
        for (mut fallback, handle) in handles {
            match handle.await {
                Ok(task) => finished.push(task),
                Err(join_err) => {
                    warn!(task_id = %fallback.id, error = %join_err, "task dispatch failed");
                    fallback.mark_failed(format!("task dispatch failed: {}", join_err));
                    finished.push(fallback);
                }
            }
        }

        batch.tasks = finished;
        batch.mark_finished();
    }

    /// Runs one task to a terminal state under an explicit bounded retry
    /// loop.
    async fn run_task(
        mut task: ExecutionTask,
        client: Arc<dyn RemoteExecutionClient>,
        config: EngineConfig,
        recovery: Arc<RecoveryManager>,
        context: Arc<ExecutionContext>,
        run: RunHandle,
    ) -> ExecutionTask {
        let _permit = match Arc::clone(&run.semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                task.mark_failed("concurrency gate closed");
                return task;
            }
        };

        let max_attempts = task.max_retries.saturating_add(1);
        for _attempt in 0..max_attempts {
            if run.cancel.is_cancelled() {
                task.mark_failed("execution cancelled before completion");
                break;
            }

            task.mark_running();
            match Self::attempt_task(&mut task, &client, &config, &context, &run).await {
                Ok(result) => {
                    debug!(task_id = %task.id, "task completed");
                    task.mark_completed(result);
                    break;
                }
                Err(err) => {
                    warn!(task_id = %task.id, error = %err, "task attempt failed");
                    if recovery.handle_task_error(&mut task, &err) {
                        task.reset_for_retry();
                        continue;
                    }
                    break;
                }
            }
        }

        run.progress
            .lock()
            .await
            .record_task_terminal(task.status == TaskStatus::Completed);
        task
    }

    /// One launch-and-poll attempt against the provider.
    async fn attempt_task(
        task: &mut ExecutionTask,
        client: &Arc<dyn RemoteExecutionClient>,
        config: &EngineConfig,
        context: &ExecutionContext,
        run: &RunHandle,
    ) -> Result<JsonValue, EngineError> {
        let spec = LaunchSpec {
            task_id: task.id.clone(),
            description: task.description.clone(),
            agent_type: task.agent_type,
        };
        let session_id = client.launch(&spec, context).await?;
        debug!(task_id = %task.id, session_id = %session_id, "remote session launched");
        task.remote_session = Some(session_id.clone());
        run.sessions.lock().await.insert(session_id.clone());

        let deadline = Instant::now() + config.task_timeout;
        let outcome = loop {
            match client.poll(&session_id).await {
                Ok(status) => match status.state {
                    SessionState::Completed => {
                        break Ok(status.result.unwrap_or(JsonValue::Null));
                    }
                    SessionState::Failed => {
                        break Err(EngineError::SessionFailed {
                            task_id: task.id.clone(),
                            message: status
                                .error
                                .unwrap_or_else(|| "remote session failed".to_string()),
                        });
                    }
                    SessionState::NotFound => {
                        break Err(EngineError::SessionVanished {
                            session_id: session_id.clone(),
                        });
                    }
                    SessionState::Running => {}
                },
                Err(err) => break Err(EngineError::Remote(err)),
            }

            if Instant::now() >= deadline {
                Self::terminate_session(client, &session_id).await;
                break Err(EngineError::TaskTimeout {
                    task_id: task.id.clone(),
                    timeout: config.task_timeout,
                });
            }

            tokio::select! {
                _ = run.cancel.cancelled() => {
                    Self::terminate_session(client, &session_id).await;
                    break Err(EngineError::Cancelled {
                        task_id: task.id.clone(),
                    });
                }
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        };

        run.sessions.lock().await.remove(&session_id);
        outcome
    }

    async fn terminate_session(client: &Arc<dyn RemoteExecutionClient>, session_id: &str) {
        if let Err(err) = client.terminate(session_id).await {
            warn!(session_id = %session_id, error = %err, "failed to terminate remote session");
        }
    }

    async fn rollback_failures(&self, batches: &[ExecutionBatch], phase: Option<&str>) {
        let failed: Vec<&ExecutionTask> = batches
            .iter()
            .flat_map(|b| b.tasks.iter())
            .filter(|t| t.status == TaskStatus::Failed)
            .collect();
        if failed.is_empty() {
            return;
        }

        match phase {
            Some(phase) => {
                let node_ids: Vec<String> = failed.iter().map(|t| t.node_id.clone()).collect();
                self.recovery.rollback_phase(phase, &node_ids).await;
            }
            None => {
                let task_ids: Vec<String> = failed.iter().map(|t| t.id.clone()).collect();
                self.recovery.rollback_failed_tasks(&task_ids).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ScriptedClient;

    #[tokio::test]
    async fn test_engine_starts_idle() {
        let engine = ExecutionEngine::new(Arc::new(ScriptedClient::new()));
        let usage = engine.get_resource_usage().await;

        assert_eq!(usage.active_executions, 0);
        assert_eq!(usage.active_agent_sessions, 0);
        assert_eq!(usage.max_concurrent_agents, 10);
        assert_eq!(usage.utilization, 0.0);
    }

    #[tokio::test]
    async fn test_cancel_unknown_session_returns_false() {
        let engine = ExecutionEngine::new(Arc::new(ScriptedClient::new()));
        assert!(!engine.cancel_execution("no-such-run").await);
    }

    #[tokio::test]
    async fn test_status_of_unknown_session_is_none() {
        let engine = ExecutionEngine::new(Arc::new(ScriptedClient::new()));
        assert!(engine.get_execution_status("no-such-run").await.is_none());
    }
}
