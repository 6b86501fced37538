//! Error types for engine execution.

use crate::engine::recovery;
use crate::engine::resolver::ResolveError;
use crate::remote::RemoteError;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving a run.
///
/// None of these escape [`crate::engine::ExecutionEngine::execute_parallel_agents`];
/// they are folded into the returned report.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The remote client failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A task attempt exceeded its overall budget.
    #[error("Task {task_id} timed out after {timeout:?}")]
    TaskTimeout { task_id: String, timeout: Duration },

    /// The provider reported a session the engine launched as unknown.
    #[error("Remote session {session_id} vanished")]
    SessionVanished { session_id: String },

    /// The remote session finished with a failure.
    #[error("Task {task_id} failed remotely: {message}")]
    SessionFailed { task_id: String, message: String },

    /// The run was cancelled while this task was in flight.
    #[error("Task {task_id} cancelled")]
    Cancelled { task_id: String },

    /// Dependency resolution refused the graph.
    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// A rollback action reported a failure.
    #[error("Rollback failed: {0}")]
    Rollback(String),

    /// Anything else.
    #[error("Engine error: {0}")]
    Other(String),
}

impl EngineError {
    /// Whether re-attempting the task can reasonably succeed.
    ///
    /// Timeouts and vanished sessions are treated as transient provider
    /// conditions. Remote failures get a keyword-based second opinion on
    /// their message text. Cancellation is never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Remote(err) => {
                err.is_retryable() || recovery::is_transient(&err.to_string())
            }
            EngineError::TaskTimeout { .. } | EngineError::SessionVanished { .. } => true,
            EngineError::SessionFailed { message, .. } => recovery::is_transient(message),
            EngineError::Cancelled { .. }
            | EngineError::Resolution(_)
            | EngineError::Rollback(_)
            | EngineError::Other(_) => false,
        }
    }
}
