//! Live progress accounting for a run.
//!
//! The tracker is rebuilt from the batch collection on every update tick
//! rather than incrementally, so a missed event can never skew the counts.
//! Throughput samples feed a short rolling window used to classify the
//! trend of the run.

use crate::engine::task::{ExecutionBatch, TaskStatus};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant, SystemTime};

/// Number of throughput samples kept for trend classification.
const TREND_WINDOW: usize = 3;

/// Relative change below which throughput counts as stable.
const TREND_EPSILON: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
}

/// A point-in-time snapshot of run progress.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionProgress {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub running_tasks: usize,
    pub pending_tasks: usize,
    pub current_batch: usize,
    pub total_batches: usize,
    /// Completed tasks per minute since tracking started.
    pub throughput_per_minute: f64,
    /// Projected completion time; `None` until there is throughput.
    pub estimated_completion: Option<SystemTime>,
    pub trend: Trend,
}

impl ExecutionProgress {
    fn idle(total_tasks: usize, total_batches: usize) -> Self {
        Self {
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            running_tasks: 0,
            pending_tasks: total_tasks,
            current_batch: 0,
            total_batches,
            throughput_per_minute: 0.0,
            estimated_completion: None,
            trend: Trend::Stable,
        }
    }

    /// Share of tasks in a terminal state, in percent.
    pub fn percent_complete(&self) -> f64 {
        if self.total_tasks == 0 {
            return 100.0;
        }
        (self.completed_tasks + self.failed_tasks) as f64 / self.total_tasks as f64 * 100.0
    }
}

/// Formatted progress summary for callers and logs.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub running_tasks: usize,
    pub pending_tasks: usize,
    pub total_tasks: usize,
    pub percent_complete: f64,
    pub current_batch: usize,
    pub total_batches: usize,
    pub throughput_per_minute: f64,
    pub estimated_completion: Option<SystemTime>,
    pub trend: Trend,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} tasks done ({:.1}%), {} failed, batch {}/{}, {:.2} tasks/min, trend {:?}",
            self.completed_tasks,
            self.total_tasks,
            self.percent_complete,
            self.failed_tasks,
            self.current_batch + 1,
            self.total_batches.max(1),
            self.throughput_per_minute,
            self.trend,
        )
    }
}

/// Tracks progress and throughput for one run.
#[derive(Debug)]
pub struct ProgressTracker {
    started_at: Option<Instant>,
    total_tasks: usize,
    total_batches: usize,
    current_batch: usize,
    throughput_history: VecDeque<f64>,
    latest: Option<ExecutionProgress>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started_at: None,
            total_tasks: 0,
            total_batches: 0,
            current_batch: 0,
            throughput_history: VecDeque::with_capacity(TREND_WINDOW),
            latest: None,
        }
    }

    /// Starts the clock and seeds an all-pending snapshot.
    pub fn start_tracking(&mut self, total_tasks: usize, total_batches: usize) {
        self.started_at = Some(Instant::now());
        self.total_tasks = total_tasks;
        self.total_batches = total_batches;
        self.current_batch = 0;
        self.throughput_history.clear();
        self.latest = Some(ExecutionProgress::idle(total_tasks, total_batches));
    }

    /// Records that the engine moved on to the given batch index.
    pub fn advance_batch(&mut self, index: usize) {
        self.current_batch = index;
        if let Some(latest) = &mut self.latest {
            latest.current_batch = index;
        }
    }

    /// Nudges the cached snapshot when a task reaches a terminal state.
    ///
    /// Keeps mid-batch status queries fresh; the authoritative numbers come
    /// from the next [`update_progress`](Self::update_progress) rescan.
    pub fn record_task_terminal(&mut self, success: bool) {
        if let Some(latest) = &mut self.latest {
            if success {
                latest.completed_tasks += 1;
            } else {
                latest.failed_tasks += 1;
            }
            if latest.running_tasks > 0 {
                latest.running_tasks -= 1;
            } else if latest.pending_tasks > 0 {
                latest.pending_tasks -= 1;
            }
        }
    }

    /// Recomputes the snapshot by scanning every task's current status.
    pub fn update_progress(&mut self, batches: &[ExecutionBatch]) -> ExecutionProgress {
        let mut completed = 0;
        let mut failed = 0;
        let mut running = 0;
        let mut pending = 0;
        let mut total = 0;

        for batch in batches {
            for task in &batch.tasks {
                total += 1;
                match task.status {
                    TaskStatus::Completed => completed += 1,
                    TaskStatus::Failed => failed += 1,
                    TaskStatus::Running => running += 1,
                    TaskStatus::Pending => pending += 1,
                }
            }
        }

        let elapsed_minutes = self
            .started_at
            .map(|start| start.elapsed().as_secs_f64() / 60.0)
            .unwrap_or(0.0);
        let throughput = if elapsed_minutes > f64::EPSILON {
            completed as f64 / elapsed_minutes
        } else {
            0.0
        };

        self.throughput_history.push_back(throughput);
        while self.throughput_history.len() > TREND_WINDOW {
            self.throughput_history.pop_front();
        }

        let remaining = running + pending;
        let estimated_completion = if throughput > 0.0 && remaining > 0 {
            let minutes_left = remaining as f64 / throughput;
            Some(SystemTime::now() + Duration::from_secs_f64(minutes_left * 60.0))
        } else {
            None
        };

        let progress = ExecutionProgress {
            total_tasks: total.max(self.total_tasks),
            completed_tasks: completed,
            failed_tasks: failed,
            running_tasks: running,
            pending_tasks: pending,
            current_batch: self.current_batch,
            total_batches: self.total_batches.max(batches.len()),
            throughput_per_minute: throughput,
            estimated_completion,
            trend: self.classify_trend(),
        };

        self.latest = Some(progress.clone());
        progress
    }

    /// Trend over the rolling throughput window.
    pub fn trend(&self) -> Trend {
        self.classify_trend()
    }

    /// The most recent snapshot, if tracking has started.
    pub fn latest(&self) -> Option<&ExecutionProgress> {
        self.latest.as_ref()
    }

    /// Formats the latest snapshot into a report.
    pub fn progress_report(&self) -> ProgressReport {
        let snapshot = self
            .latest
            .clone()
            .unwrap_or_else(|| ExecutionProgress::idle(self.total_tasks, self.total_batches));
        ProgressReport {
            completed_tasks: snapshot.completed_tasks,
            failed_tasks: snapshot.failed_tasks,
            running_tasks: snapshot.running_tasks,
            pending_tasks: snapshot.pending_tasks,
            total_tasks: snapshot.total_tasks,
            percent_complete: snapshot.percent_complete(),
            current_batch: snapshot.current_batch,
            total_batches: snapshot.total_batches,
            throughput_per_minute: snapshot.throughput_per_minute,
            estimated_completion: snapshot.estimated_completion,
            trend: snapshot.trend,
        }
    }

    fn classify_trend(&self) -> Trend {
        if self.throughput_history.len() < 2 {
            return Trend::Stable;
        }
        let first = self.throughput_history.front().copied().unwrap_or(0.0);
        let last = self.throughput_history.back().copied().unwrap_or(0.0);
        let reference = first.abs().max(f64::EPSILON);

        if last > first + reference * TREND_EPSILON {
            Trend::Improving
        } else if last < first - reference * TREND_EPSILON {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::ExecutionTask;
    use crate::graph::{GraphNode, NodeKind};
    use serde_json::Value as JsonValue;

    fn batch_with_statuses(statuses: &[TaskStatus]) -> ExecutionBatch {
        let tasks = statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut task = ExecutionTask::for_node(
                    &GraphNode::new(format!("n{}", i), "n", NodeKind::Service),
                    None,
                    0,
                );
                match status {
                    TaskStatus::Completed => task.mark_completed(JsonValue::Null),
                    TaskStatus::Failed => task.mark_failed("x"),
                    TaskStatus::Running => task.mark_running(),
                    TaskStatus::Pending => {}
                }
                task
            })
            .collect();
        ExecutionBatch::new(0, tasks)
    }

    #[test]
    fn test_counts_by_status() {
        let mut tracker = ProgressTracker::new();
        tracker.start_tracking(4, 1);

        let batches = vec![batch_with_statuses(&[
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Running,
            TaskStatus::Pending,
        ])];
        let progress = tracker.update_progress(&batches);

        assert_eq!(progress.total_tasks, 4);
        assert_eq!(progress.completed_tasks, 1);
        assert_eq!(progress.failed_tasks, 1);
        assert_eq!(progress.running_tasks, 1);
        assert_eq!(progress.pending_tasks, 1);
        assert_eq!(progress.percent_complete(), 50.0);
    }

    #[test]
    fn test_no_throughput_before_completions() {
        let mut tracker = ProgressTracker::new();
        tracker.start_tracking(2, 1);

        let batches = vec![batch_with_statuses(&[
            TaskStatus::Pending,
            TaskStatus::Pending,
        ])];
        let progress = tracker.update_progress(&batches);

        assert_eq!(progress.throughput_per_minute, 0.0);
        assert!(progress.estimated_completion.is_none());
    }

    #[test]
    fn test_eta_present_with_throughput_and_remaining_work() {
        let mut tracker = ProgressTracker::new();
        tracker.start_tracking(2, 1);
        // Let a little wall clock pass so elapsed minutes are non-zero.
        std::thread::sleep(std::time::Duration::from_millis(5));

        let batches = vec![batch_with_statuses(&[
            TaskStatus::Completed,
            TaskStatus::Pending,
        ])];
        let progress = tracker.update_progress(&batches);

        assert!(progress.throughput_per_minute > 0.0);
        assert!(progress.estimated_completion.is_some());
    }

    #[test]
    fn test_no_eta_when_nothing_remains() {
        let mut tracker = ProgressTracker::new();
        tracker.start_tracking(1, 1);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let batches = vec![batch_with_statuses(&[TaskStatus::Completed])];
        let progress = tracker.update_progress(&batches);

        assert!(progress.estimated_completion.is_none());
    }

    #[test]
    fn test_trend_stable_with_single_sample() {
        let mut tracker = ProgressTracker::new();
        tracker.start_tracking(1, 1);
        tracker.update_progress(&[batch_with_statuses(&[TaskStatus::Pending])]);

        assert_eq!(tracker.trend(), Trend::Stable);
    }

    #[test]
    fn test_trend_improving_when_throughput_rises() {
        let mut tracker = ProgressTracker::new();
        tracker.throughput_history.push_back(1.0);
        tracker.throughput_history.push_back(2.0);

        assert_eq!(tracker.trend(), Trend::Improving);
    }

    #[test]
    fn test_trend_declining_when_throughput_drops() {
        let mut tracker = ProgressTracker::new();
        tracker.throughput_history.push_back(2.0);
        tracker.throughput_history.push_back(1.0);

        assert_eq!(tracker.trend(), Trend::Declining);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let mut tracker = ProgressTracker::new();
        for i in 0..10 {
            tracker.throughput_history.push_back(i as f64);
            while tracker.throughput_history.len() > TREND_WINDOW {
                tracker.throughput_history.pop_front();
            }
        }
        assert_eq!(tracker.throughput_history.len(), TREND_WINDOW);
    }

    #[test]
    fn test_record_task_terminal_updates_snapshot() {
        let mut tracker = ProgressTracker::new();
        tracker.start_tracking(3, 1);

        tracker.record_task_terminal(true);
        tracker.record_task_terminal(false);

        let latest = tracker.latest().unwrap();
        assert_eq!(latest.completed_tasks, 1);
        assert_eq!(latest.failed_tasks, 1);
        assert_eq!(latest.pending_tasks, 1);
    }

    #[test]
    fn test_progress_report_formats() {
        let mut tracker = ProgressTracker::new();
        tracker.start_tracking(2, 2);
        tracker.update_progress(&[batch_with_statuses(&[
            TaskStatus::Completed,
            TaskStatus::Pending,
        ])]);

        let report = tracker.progress_report();
        let text = report.to_string();
        assert!(text.contains("1/2 tasks done"));
        assert!(text.contains("50.0%"));
    }

    #[test]
    fn test_empty_run_is_fully_complete() {
        let progress = ExecutionProgress::idle(0, 0);
        assert_eq!(progress.percent_complete(), 100.0);
    }
}
