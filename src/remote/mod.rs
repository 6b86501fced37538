//! The remote execution client seam.
//!
//! The engine never talks to a provider directly; it drives anything that
//! implements [`RemoteExecutionClient`]. A conforming implementation is
//! injected at engine construction, which keeps the engine testable against
//! the deterministic [`ScriptedClient`] double and keeps provider selection
//! in the composition root rather than inside the engine.

pub mod error;
pub mod scripted;

pub use error::RemoteError;
pub use scripted::ScriptedClient;

use crate::context::ExecutionContext;
use crate::graph::AgentType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Provider-reported state of a remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Completed,
    Failed,
    NotFound,
}

impl SessionState {
    /// Terminal states end the polling loop.
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Running)
    }
}

/// One poll observation of a remote session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(default)]
    pub result: Option<JsonValue>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SessionStatus {
    pub fn running() -> Self {
        Self {
            state: SessionState::Running,
            result: None,
            error: None,
        }
    }

    pub fn completed(result: JsonValue) -> Self {
        Self {
            state: SessionState::Completed,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            state: SessionState::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn not_found() -> Self {
        Self {
            state: SessionState::NotFound,
            result: None,
            error: None,
        }
    }
}

/// What the engine hands to the provider when starting a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub task_id: String,
    pub description: String,
    pub agent_type: AgentType,
}

/// Launch/poll/terminate contract for a remote execution provider.
///
/// The engine re-invokes [`launch`](Self::launch) for the same task after a
/// transient failure; implementations own whatever idempotency the
/// underlying work needs to make that safe.
#[async_trait]
pub trait RemoteExecutionClient: Send + Sync {
    /// Starts a remote session for the given task and returns its id.
    async fn launch(
        &self,
        spec: &LaunchSpec,
        context: &ExecutionContext,
    ) -> Result<String, RemoteError>;

    /// Observes the current state of a session.
    async fn poll(&self, session_id: &str) -> Result<SessionStatus, RemoteError>;

    /// Stops a session. Returns `false` if the session was already gone.
    async fn terminate(&self, session_id: &str) -> Result<bool, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Running.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::NotFound.is_terminal());
    }

    #[test]
    fn test_status_constructors() {
        let ok = SessionStatus::completed(serde_json::json!({"rows": 3}));
        assert_eq!(ok.state, SessionState::Completed);
        assert!(ok.error.is_none());

        let failed = SessionStatus::failed("boom");
        assert_eq!(failed.state, SessionState::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }
}
