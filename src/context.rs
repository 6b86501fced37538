//! Run-scoped execution context.
//!
//! One [`ExecutionContext`] is created per run and shared read-only across
//! every task of that run.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;
use uuid::Uuid;

/// Metadata describing one execution run.
///
/// The `session_id` identifies the run itself (not a remote agent session)
/// and is the handle used by [`crate::engine::ExecutionEngine::cancel_execution`]
/// and the status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub session_id: String,
    pub run_name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub config: HashMap<String, JsonValue>,
    pub created_at: SystemTime,
}

impl ExecutionContext {
    /// Creates a context for a new run with a fresh session id.
    pub fn new(run_name: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            run_name: run_name.into(),
            source: None,
            working_dir: None,
            config: HashMap::new(),
            created_at: SystemTime::now(),
        }
    }

    /// Sets the reference to whatever produced the graph (a file, a URL, ...).
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Attaches an opaque configuration value forwarded to the provider.
    pub fn with_config_value(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_context_has_unique_session_id() {
        let a = ExecutionContext::new("run");
        let b = ExecutionContext::new("run");
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_builder_methods() {
        let ctx = ExecutionContext::new("deploy")
            .with_source("graph.json")
            .with_working_dir("/tmp/run")
            .with_config_value("region", json!("eu-west-1"));

        assert_eq!(ctx.run_name, "deploy");
        assert_eq!(ctx.source.as_deref(), Some("graph.json"));
        assert_eq!(ctx.working_dir, Some(PathBuf::from("/tmp/run")));
        assert_eq!(ctx.config.get("region"), Some(&json!("eu-west-1")));
    }
}
