//! Retry classification and rollback bookkeeping.
//!
//! Rollback actions are compensations for side effects a task already
//! applied. They are registered append-only from concurrently running
//! tasks and replayed in reverse registration order when a failure set is
//! rolled back. Replay is opt-in; individual task retries never trigger it.

use crate::engine::error::EngineError;
use crate::engine::task::ExecutionTask;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Failure-message markers treated as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "rate limit",
    "too many requests",
    "temporar",
    "unavailable",
    "429",
    "500",
    "502",
    "503",
    "504",
];

/// Keyword classification of a failure message.
pub fn is_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// A compensating action registered by a task.
pub type RollbackAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

/// Wraps an async closure into a [`RollbackAction`].
pub fn rollback_action<F, Fut>(f: F) -> RollbackAction
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Box::new(move || f().boxed())
}

struct RollbackEntry {
    task_id: String,
    action: RollbackAction,
}

/// Retry decisions and the rollback stack for one engine.
#[derive(Default)]
pub struct RecoveryManager {
    rollback: Mutex<Vec<RollbackEntry>>,
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether a failed task should be re-attempted.
    ///
    /// Returns `true` only when the error is transient and the task still
    /// has retry budget. Otherwise the task is marked terminally failed in
    /// place.
    pub fn handle_task_error(&self, task: &mut ExecutionTask, error: &EngineError) -> bool {
        if error.is_retryable() && task.can_retry() {
            debug!(
                task_id = %task.id,
                retry_count = task.retry_count,
                max_retries = task.max_retries,
                "transient failure, task will be retried"
            );
            return true;
        }

        task.mark_failed(error.to_string());
        false
    }

    /// Registers a compensation for a task's applied side effect.
    ///
    /// Safe to call from concurrently running tasks; entries keep their
    /// registration order.
    pub async fn register_rollback_action(
        &self,
        task_id: impl Into<String>,
        action: RollbackAction,
    ) {
        let task_id = task_id.into();
        debug!(task_id = %task_id, "rollback action registered");
        self.rollback
            .lock()
            .await
            .push(RollbackEntry { task_id, action });
    }

    /// Number of rollback actions currently registered.
    pub async fn pending_rollbacks(&self) -> usize {
        self.rollback.lock().await.len()
    }

    /// Replays actions belonging to the failed tasks, newest first.
    ///
    /// Actions of tasks outside the failed set stay registered. Returns the
    /// number of actions replayed.
    pub async fn rollback_failed_tasks(&self, failed_task_ids: &[String]) -> usize {
        self.replay(|entry| failed_task_ids.iter().any(|id| id == &entry.task_id))
            .await
    }

    /// Coarser phase-level replay: an entry matches when its task id
    /// contains one of the failed node ids.
    pub async fn rollback_phase(&self, phase: &str, failed_node_ids: &[String]) -> usize {
        info!(phase = %phase, failed = failed_node_ids.len(), "rolling back phase");
        self.replay(|entry| {
            failed_node_ids
                .iter()
                .any(|node_id| entry.task_id.contains(node_id.as_str()))
        })
        .await
    }

    async fn replay<F>(&self, matches: F) -> usize
    where
        F: Fn(&RollbackEntry) -> bool,
    {
        // Select under the lock; replay only after releasing it.
        let mut selected = Vec::new();
        {
            let mut entries = self.rollback.lock().await;
            let mut index = entries.len();
            while index > 0 {
                index -= 1;
                if matches(&entries[index]) {
                    selected.push(entries.remove(index));
                }
            }
        }

        let mut replayed = 0;
        for entry in selected {
            replayed += 1;
            match (entry.action)().await {
                Ok(()) => debug!(task_id = %entry.task_id, "rollback action succeeded"),
                Err(err) => {
                    warn!(task_id = %entry.task_id, error = %err, "rollback action failed");
                }
            }
        }
        replayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, NodeKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn task(id: &str, max_retries: u32) -> ExecutionTask {
        ExecutionTask::for_node(&GraphNode::new(id, id, NodeKind::Service), None, max_retries)
    }

    fn counting_action(counter: &Arc<AtomicUsize>) -> RollbackAction {
        let counter = Arc::clone(counter);
        rollback_action(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_transient_markers() {
        assert!(is_transient("connection reset by peer"));
        assert!(is_transient("Request timed out"));
        assert!(is_transient("HTTP 503 Service Unavailable"));
        assert!(is_transient("rate limit exceeded"));
        assert!(is_transient("temporarily out of capacity"));
        assert!(!is_transient("invalid configuration"));
        assert!(!is_transient("permission denied"));
    }

    #[test]
    fn test_retriable_error_with_budget_left() {
        let manager = RecoveryManager::new();
        let mut t = task("a", 3);
        let err = EngineError::SessionFailed {
            task_id: t.id.clone(),
            message: "connection refused".to_string(),
        };

        assert!(manager.handle_task_error(&mut t, &err));
        // The decision itself does not touch the counter; the retry loop
        // spends the budget when it re-arms the task.
        assert_eq!(t.retry_count, 0);
    }

    #[test]
    fn test_exhausted_budget_marks_failed() {
        let manager = RecoveryManager::new();
        let mut t = task("a", 1);
        t.reset_for_retry();
        let err = EngineError::SessionFailed {
            task_id: t.id.clone(),
            message: "connection refused".to_string(),
        };

        assert!(!manager.handle_task_error(&mut t, &err));
        assert_eq!(t.status, crate::engine::task::TaskStatus::Failed);
        assert_eq!(t.retry_count, 1);
    }

    #[test]
    fn test_non_transient_error_marks_failed() {
        let manager = RecoveryManager::new();
        let mut t = task("a", 3);
        let err = EngineError::SessionFailed {
            task_id: t.id.clone(),
            message: "invalid configuration".to_string(),
        };

        assert!(!manager.handle_task_error(&mut t, &err));
        assert_eq!(t.status, crate::engine::task::TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_rollback_only_replays_failed_tasks() {
        let manager = RecoveryManager::new();
        let r1 = Arc::new(AtomicUsize::new(0));
        let r2 = Arc::new(AtomicUsize::new(0));

        manager
            .register_rollback_action("task-t1", counting_action(&r1))
            .await;
        manager
            .register_rollback_action("task-t2", counting_action(&r2))
            .await;

        let replayed = manager
            .rollback_failed_tasks(&["task-t2".to_string()])
            .await;

        assert_eq!(replayed, 1);
        assert_eq!(r1.load(Ordering::SeqCst), 0);
        assert_eq!(r2.load(Ordering::SeqCst), 1);
        // The unmatched entry is still registered.
        assert_eq!(manager.pending_rollbacks().await, 1);
    }

    #[tokio::test]
    async fn test_rollback_replays_in_reverse_registration_order() {
        let manager = RecoveryManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            manager
                .register_rollback_action(
                    format!("task-{}", name),
                    rollback_action(move || async move {
                        order.lock().await.push(name);
                        Ok(())
                    }),
                )
                .await;
        }

        let failed: Vec<String> = ["task-first", "task-second", "task-third"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        manager.rollback_failed_tasks(&failed).await;

        assert_eq!(*order.lock().await, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_rollback_phase_matches_on_node_id() {
        let manager = RecoveryManager::new();
        let hit = Arc::new(AtomicUsize::new(0));
        let miss = Arc::new(AtomicUsize::new(0));

        manager
            .register_rollback_action("task-db-primary", counting_action(&hit))
            .await;
        manager
            .register_rollback_action("task-cache", counting_action(&miss))
            .await;

        let replayed = manager
            .rollback_phase("provision", &["db-primary".to_string()])
            .await;

        assert_eq!(replayed, 1);
        assert_eq!(hit.load(Ordering::SeqCst), 1);
        assert_eq!(miss.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_rollback_action_does_not_stop_replay() {
        let manager = RecoveryManager::new();
        let after = Arc::new(AtomicUsize::new(0));

        manager
            .register_rollback_action(
                "task-a",
                rollback_action(|| async { Err("compensation failed".to_string()) }),
            )
            .await;
        manager
            .register_rollback_action("task-a", counting_action(&after))
            .await;

        let replayed = manager.rollback_failed_tasks(&["task-a".to_string()]).await;

        assert_eq!(replayed, 2);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
