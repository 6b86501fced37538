//! Engine configuration.

use crate::engine::resolver::CyclePolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for one [`crate::engine::ExecutionEngine`].
///
/// # Examples
///
/// ```ignore
/// use agent_conductor::engine::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::new()
///     .with_max_concurrent_agents(4)
///     .with_task_timeout(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on tasks running at once within a batch.
    pub max_concurrent_agents: usize,
    /// Delay between status polls of a remote session.
    pub poll_interval: Duration,
    /// Overall budget for a single task attempt, launch to terminal status.
    pub task_timeout: Duration,
    /// Retry budget per task for transient failures.
    pub max_retries: u32,
    /// Cycle handling during dependency resolution.
    pub cycle_policy: CyclePolicy,
    /// Replay registered rollback actions when a run or phase fails.
    pub rollback_on_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineConfig {
    /// Default values: 10 concurrent agents, 5s poll interval, 1800s task
    /// timeout, 3 retries, best-effort cycle breaking, rollback off.
    pub fn new() -> Self {
        Self {
            max_concurrent_agents: 10,
            poll_interval: Duration::from_secs(5),
            task_timeout: Duration::from_secs(1800),
            max_retries: 3,
            cycle_policy: CyclePolicy::default(),
            rollback_on_failure: false,
        }
    }

    pub fn with_max_concurrent_agents(mut self, max: usize) -> Self {
        self.max_concurrent_agents = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    pub fn with_rollback_on_failure(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.max_concurrent_agents, 10);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.task_timeout, Duration::from_secs(1800));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.cycle_policy, CyclePolicy::BreakArbitrary);
        assert!(!config.rollback_on_failure);
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::new()
            .with_max_concurrent_agents(2)
            .with_poll_interval(Duration::from_millis(50))
            .with_task_timeout(Duration::from_secs(30))
            .with_max_retries(1)
            .with_cycle_policy(CyclePolicy::Strict)
            .with_rollback_on_failure(true);

        assert_eq!(config.max_concurrent_agents, 2);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.task_timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.cycle_policy, CyclePolicy::Strict);
        assert!(config.rollback_on_failure);
    }
}
