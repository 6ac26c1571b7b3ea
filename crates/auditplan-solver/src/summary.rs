//! Duration-weighted roll-up of a scheduling result.
//!
//! Answers "how is this project doing" from a computed schedule: task counts
//! by status, critical count, and an overall completion percentage weighted
//! by duration (milestones weigh one day so they still count).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use auditplan_core::{SchedulingResult, TaskStatus};

/// Aggregated schedule metrics for dashboards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSummary {
    pub total_tasks: usize,
    pub done_tasks: usize,
    pub in_progress_tasks: usize,
    pub pending_tasks: usize,
    /// Tasks on the critical path
    pub critical_tasks: usize,
    pub project_end_date: Option<NaiveDate>,
    /// Completion percentage weighted by task duration, 0-100
    pub overall_percent_complete: u8,
}

impl ScheduleSummary {
    pub fn from_result(result: &SchedulingResult) -> Self {
        let mut done = 0;
        let mut in_progress = 0;
        let mut pending = 0;
        let mut weighted: i64 = 0;
        let mut weight: i64 = 0;

        for scheduled in &result.tasks {
            match scheduled.task.status {
                TaskStatus::Done => done += 1,
                TaskStatus::InProgress => in_progress += 1,
                TaskStatus::Pending => pending += 1,
            }
            let w = scheduled.task.duration.max(1);
            weighted += i64::from(scheduled.task.percent_complete) * w;
            weight += w;
        }

        let overall = if weight == 0 {
            0
        } else {
            ((weighted as f64) / (weight as f64)).round() as u8
        };

        Self {
            total_tasks: result.tasks.len(),
            done_tasks: done,
            in_progress_tasks: in_progress,
            pending_tasks: pending,
            critical_tasks: result.tasks.iter().filter(|t| t.is_critical).count(),
            project_end_date: result.project_end_date,
            overall_percent_complete: overall,
        }
    }
}
