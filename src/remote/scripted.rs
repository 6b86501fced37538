//! Deterministic in-memory client for exercising the engine.
//!
//! [`ScriptedClient`] replays a scripted sequence of poll statuses per task
//! and instruments what the engine actually did: how many sessions were
//! launched, how many ran at once, and which ones were terminated. Tests
//! select it at the composition root exactly like a real provider.

use super::{LaunchSpec, RemoteError, RemoteExecutionClient, SessionStatus};
use crate::context::ExecutionContext;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct ScriptedSession {
    task_id: String,
    finished: bool,
}

/// A scriptable, instrumented [`RemoteExecutionClient`] double.
///
/// Each poll of a task consumes the next status from its script; the last
/// entry repeats once the script is exhausted. Tasks without a script
/// complete immediately with a `null` result.
///
/// # Examples
///
/// ```ignore
/// let client = ScriptedClient::new()
///     .with_script("task-db", vec![
///         SessionStatus::running(),
///         SessionStatus::completed(json!({"rows": 3})),
///     ]);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedClient {
    scripts: Mutex<HashMap<String, VecDeque<SessionStatus>>>,
    sessions: Mutex<HashMap<String, ScriptedSession>>,
    launched: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
    live: AtomicUsize,
    peak: AtomicUsize,
    counter: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the poll statuses for one task id.
    pub fn with_script(self, task_id: impl Into<String>, statuses: Vec<SessionStatus>) -> Self {
        self.lock(&self.scripts)
            .insert(task_id.into(), statuses.into());
        self
    }

    /// Task ids in the order their sessions were launched.
    pub fn launch_order(&self) -> Vec<String> {
        self.lock(&self.launched).clone()
    }

    /// Total number of sessions launched.
    pub fn launch_count(&self) -> usize {
        self.lock(&self.launched).len()
    }

    /// Number of sessions launched for one task (> 1 means it was retried).
    pub fn launches_for(&self, task_id: &str) -> usize {
        self.lock(&self.launched)
            .iter()
            .filter(|id| id.as_str() == task_id)
            .count()
    }

    /// Session ids that were still live when they received `terminate`.
    pub fn terminated_sessions(&self) -> Vec<String> {
        self.lock(&self.terminated).clone()
    }

    /// Highest number of sessions that were live at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn finish_session(&self, session: &mut ScriptedSession) {
        if !session.finished {
            session.finished = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RemoteExecutionClient for ScriptedClient {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        _context: &ExecutionContext,
    ) -> Result<String, RemoteError> {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        let session_id = format!("scripted-{}-{}", spec.task_id, seq);

        self.lock(&self.launched).push(spec.task_id.clone());
        self.lock(&self.sessions).insert(
            session_id.clone(),
            ScriptedSession {
                task_id: spec.task_id.clone(),
                finished: false,
            },
        );

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);

        Ok(session_id)
    }

    async fn poll(&self, session_id: &str) -> Result<SessionStatus, RemoteError> {
        let task_id = {
            let sessions = self.lock(&self.sessions);
            match sessions.get(session_id) {
                Some(session) => session.task_id.clone(),
                None => return Ok(SessionStatus::not_found()),
            }
        };

        let status = {
            let mut scripts = self.lock(&self.scripts);
            match scripts.get_mut(&task_id) {
                Some(queue) if queue.len() > 1 => match queue.pop_front() {
                    Some(status) => status,
                    None => SessionStatus::completed(serde_json::Value::Null),
                },
                Some(queue) => queue
                    .front()
                    .cloned()
                    .unwrap_or_else(|| SessionStatus::completed(serde_json::Value::Null)),
                None => SessionStatus::completed(serde_json::Value::Null),
            }
        };

        if status.state.is_terminal() {
            let mut sessions = self.lock(&self.sessions);
            if let Some(session) = sessions.get_mut(session_id) {
                self.finish_session(session);
            }
        }

        Ok(status)
    }

    async fn terminate(&self, session_id: &str) -> Result<bool, RemoteError> {
        let mut sessions = self.lock(&self.sessions);
        match sessions.get_mut(session_id) {
            Some(session) => {
                // Only a live session counts as actually stopped; repeat
                // terminations stay idempotent.
                if !session.finished {
                    session.finished = true;
                    self.live.fetch_sub(1, Ordering::SeqCst);
                    self.lock(&self.terminated).push(session_id.to_string());
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::SessionState;
    use serde_json::json;

    fn spec(task_id: &str) -> LaunchSpec {
        LaunchSpec {
            task_id: task_id.to_string(),
            description: format!("run {}", task_id),
            agent_type: crate::graph::AgentType::GeneralPurpose,
        }
    }

    #[tokio::test]
    async fn test_unscripted_task_completes_immediately() {
        let client = ScriptedClient::new();
        let ctx = ExecutionContext::new("test");

        let session = client.launch(&spec("t1"), &ctx).await.unwrap();
        let status = client.poll(&session).await.unwrap();

        assert_eq!(status.state, SessionState::Completed);
    }

    #[tokio::test]
    async fn test_script_is_consumed_in_order_and_last_sticks() {
        let client = ScriptedClient::new().with_script(
            "t1",
            vec![
                SessionStatus::running(),
                SessionStatus::completed(json!("done")),
            ],
        );
        let ctx = ExecutionContext::new("test");
        let session = client.launch(&spec("t1"), &ctx).await.unwrap();

        assert_eq!(
            client.poll(&session).await.unwrap().state,
            SessionState::Running
        );
        assert_eq!(
            client.poll(&session).await.unwrap().state,
            SessionState::Completed
        );
        // Exhausted script keeps replaying the final status.
        assert_eq!(
            client.poll(&session).await.unwrap().state,
            SessionState::Completed
        );
    }

    #[tokio::test]
    async fn test_unknown_session_polls_not_found() {
        let client = ScriptedClient::new();
        let status = client.poll("nope").await.unwrap();
        assert_eq!(status.state, SessionState::NotFound);
    }

    #[tokio::test]
    async fn test_concurrency_accounting() {
        let client = ScriptedClient::new();
        let ctx = ExecutionContext::new("test");

        let s1 = client.launch(&spec("t1"), &ctx).await.unwrap();
        let s2 = client.launch(&spec("t2"), &ctx).await.unwrap();
        assert_eq!(client.peak_concurrency(), 2);

        client.poll(&s1).await.unwrap();
        client.poll(&s2).await.unwrap();
        // Completions drain the live count but the peak is retained.
        assert_eq!(client.peak_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_terminate_records_session() {
        let client = ScriptedClient::new().with_script("t1", vec![SessionStatus::running()]);
        let ctx = ExecutionContext::new("test");
        let session = client.launch(&spec("t1"), &ctx).await.unwrap();

        assert!(client.terminate(&session).await.unwrap());
        // A repeat termination reports the session existed but is not
        // recorded again.
        assert!(client.terminate(&session).await.unwrap());
        assert_eq!(client.terminated_sessions(), vec![session.clone()]);
    }

    #[tokio::test]
    async fn test_launches_for_counts_retries() {
        let client = ScriptedClient::new();
        let ctx = ExecutionContext::new("test");

        client.launch(&spec("t1"), &ctx).await.unwrap();
        client.launch(&spec("t1"), &ctx).await.unwrap();
        client.launch(&spec("t2"), &ctx).await.unwrap();

        assert_eq!(client.launches_for("t1"), 2);
        assert_eq!(client.launches_for("t2"), 1);
        assert_eq!(client.launch_count(), 3);
    }
}
