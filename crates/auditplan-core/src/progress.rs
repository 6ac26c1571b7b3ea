//! Progress reconciliation between percent-complete, status and actuals.
//!
//! A single edit (to the percentage or to the status) fans out to the other
//! fields under MS-Project conventions. The function is pure; "today" is a
//! parameter so behavior is deterministic under test.
//!
//! The one asymmetric rule worth calling out: `actual_start_date` is a
//! historical record. Once work has started it stays recorded, even if the
//! task is later reset to 0%.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::TaskStatus;

/// The progress-bearing slice of a task.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub percent_complete: u8,
    pub status: TaskStatus,
    pub actual_start_date: Option<NaiveDate>,
    pub actual_finish_date: Option<NaiveDate>,
}

impl ProgressState {
    pub fn new(percent_complete: u8, status: TaskStatus) -> Self {
        Self {
            percent_complete,
            status,
            actual_start_date: None,
            actual_finish_date: None,
        }
    }
}

/// A single user edit to reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressChange {
    /// The percentage was set; values above 100 clamp.
    Percent(u8),
    /// The status was set directly.
    Status(TaskStatus),
    /// Nothing changed.
    None,
}

/// Apply one change and return the reconciled state.
pub fn reconcile(state: &ProgressState, change: ProgressChange, today: NaiveDate) -> ProgressState {
    match change {
        ProgressChange::Percent(raw) => {
            let percent = raw.min(100);
            let status = match percent {
                0 => TaskStatus::Pending,
                100 => TaskStatus::Done,
                _ => TaskStatus::InProgress,
            };
            let actual_start_date = if percent > 0 {
                state.actual_start_date.or(Some(today))
            } else {
                state.actual_start_date
            };
            let actual_finish_date = if percent == 100 { Some(today) } else { None };
            ProgressState {
                percent_complete: percent,
                status,
                actual_start_date,
                actual_finish_date,
            }
        }
        ProgressChange::Status(status) => match status {
            TaskStatus::Done => ProgressState {
                percent_complete: 100,
                status,
                actual_start_date: state.actual_start_date.or(Some(today)),
                actual_finish_date: Some(today),
            },
            TaskStatus::Pending => ProgressState {
                percent_complete: 0,
                status,
                actual_start_date: state.actual_start_date,
                actual_finish_date: None,
            },
            TaskStatus::InProgress => ProgressState {
                percent_complete: state.percent_complete.max(1),
                status,
                actual_start_date: state.actual_start_date.or(Some(today)),
                actual_finish_date: None,
            },
        },
        ProgressChange::None => state.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn percent_drives_status_and_actuals() {
        let start = ProgressState::default();
        let today = date(2026, 2, 10);

        let at_half = reconcile(&start, ProgressChange::Percent(50), today);
        assert_eq!(at_half.percent_complete, 50);
        assert_eq!(at_half.status, TaskStatus::InProgress);
        assert_eq!(at_half.actual_start_date, Some(today));
        assert_eq!(at_half.actual_finish_date, None);

        let later = date(2026, 2, 12);
        let reset = reconcile(&at_half, ProgressChange::Percent(0), later);
        assert_eq!(reset.percent_complete, 0);
        assert_eq!(reset.status, TaskStatus::Pending);
        // History survives the reset.
        assert_eq!(reset.actual_start_date, Some(today));
        assert_eq!(reset.actual_finish_date, None);

        let done_day = date(2026, 2, 15);
        let done = reconcile(&reset, ProgressChange::Status(TaskStatus::Done), done_day);
        assert_eq!(done.percent_complete, 100);
        assert_eq!(done.status, TaskStatus::Done);
        assert_eq!(done.actual_start_date, Some(today));
        assert_eq!(done.actual_finish_date, Some(done_day));
    }

    #[test]
    fn percent_clamps_above_100() {
        let today = date(2026, 2, 10);
        let state = reconcile(&ProgressState::default(), ProgressChange::Percent(130), today);
        assert_eq!(state.percent_complete, 100);
        assert_eq!(state.status, TaskStatus::Done);
        assert_eq!(state.actual_finish_date, Some(today));
    }

    #[test]
    fn dropping_below_100_clears_finish() {
        let today = date(2026, 2, 10);
        let done = reconcile(&ProgressState::default(), ProgressChange::Percent(100), today);
        let reopened = reconcile(&done, ProgressChange::Percent(80), date(2026, 2, 11));
        assert_eq!(reopened.status, TaskStatus::InProgress);
        assert_eq!(reopened.actual_finish_date, None);
        assert_eq!(reopened.actual_start_date, Some(today));
    }

    #[test]
    fn status_done_backfills_start() {
        let today = date(2026, 2, 15);
        let state = reconcile(
            &ProgressState::default(),
            ProgressChange::Status(TaskStatus::Done),
            today,
        );
        assert_eq!(state.percent_complete, 100);
        assert_eq!(state.actual_start_date, Some(today));
        assert_eq!(state.actual_finish_date, Some(today));
    }

    #[test]
    fn status_in_progress_floors_percent_at_one() {
        let today = date(2026, 2, 10);
        let state = reconcile(
            &ProgressState::default(),
            ProgressChange::Status(TaskStatus::InProgress),
            today,
        );
        assert_eq!(state.percent_complete, 1);
        assert_eq!(state.actual_start_date, Some(today));

        // A higher existing percentage is kept.
        let existing = ProgressState {
            percent_complete: 60,
            status: TaskStatus::InProgress,
            actual_start_date: Some(today),
            actual_finish_date: None,
        };
        let kept = reconcile(&existing, ProgressChange::Status(TaskStatus::InProgress), today);
        assert_eq!(kept.percent_complete, 60);
    }

    #[test]
    fn status_pending_preserves_start() {
        let today = date(2026, 2, 10);
        let started = reconcile(&ProgressState::default(), ProgressChange::Percent(40), today);
        let reset = reconcile(&started, ProgressChange::Status(TaskStatus::Pending), date(2026, 2, 20));
        assert_eq!(reset.percent_complete, 0);
        assert_eq!(reset.actual_start_date, Some(today));
        assert_eq!(reset.actual_finish_date, None);
    }

    #[test]
    fn no_change_is_identity() {
        let state = ProgressState {
            percent_complete: 42,
            status: TaskStatus::InProgress,
            actual_start_date: Some(date(2026, 2, 1)),
            actual_finish_date: None,
        };
        assert_eq!(reconcile(&state, ProgressChange::None, date(2026, 2, 10)), state);
    }

    #[test]
    fn same_percent_twice_is_idempotent() {
        let today = date(2026, 2, 10);
        let once = reconcile(&ProgressState::default(), ProgressChange::Percent(50), today);
        let twice = reconcile(&once, ProgressChange::Percent(50), date(2026, 2, 14));
        assert_eq!(once, twice);
    }
}
