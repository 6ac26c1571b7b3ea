//! Resource-aware scheduling: per-member calendars and time-off impact.
//!
//! The forward pass runs each task on a calendar composed from its
//! assignee's weekday mask (falling back to the project's) plus the project
//! exceptions and the member's approved time-off. The backward pass stays on
//! the project calendar, so slack is measured against project time; it may
//! not be realizable on the member's own calendar.
//!
//! This module also reports time-off-induced duration inflation as a
//! diagnostic. It never levels resources: over-allocation is out of scope by
//! design.

use chrono::NaiveDate;
use tracing::debug;

use auditplan_core::{
    Dependency, MemberId, ScheduleError, SchedulingResult, Task, TaskAssignment, TeamMember,
    TimeOff, TimeOffStatus, WeekdaySet, WorkCalendar,
};

use crate::cpm::{run_passes, ScheduleContext, TaskCalendars};

/// Resource inputs for the resource-aware variant.
#[derive(Debug, Clone, Copy)]
pub struct ResourceContext<'a> {
    pub members: &'a [TeamMember],
    pub assignments: &'a [TaskAssignment],
    /// All time-off rows; only approved entries take effect
    pub time_off: &'a [TimeOff],
}

impl ResourceContext<'_> {
    /// The member a task schedules against: the legacy single assignee when
    /// present, otherwise the first assignment in creation order.
    fn assignee_for<'a>(&'a self, task: &'a Task) -> Option<&'a MemberId> {
        task.assignee_id.as_ref().or_else(|| {
            self.assignments
                .iter()
                .find(|a| a.task_id == task.id)
                .map(|a| &a.user_id)
        })
    }

    fn member(&self, user_id: &str) -> Option<&TeamMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }
}

/// Schedule with per-assignee calendars in the forward pass.
pub fn calculate_critical_path_with_resources(
    tasks: &[Task],
    dependencies: &[Dependency],
    ctx: &ScheduleContext<'_>,
    resources: &ResourceContext<'_>,
) -> Result<SchedulingResult, ScheduleError> {
    let mut calendars = Vec::with_capacity(tasks.len());
    for task in tasks {
        calendars.push(compose_task_calendar(task, ctx.calendar, resources)?);
    }
    run_passes(tasks, dependencies, ctx, &TaskCalendars::PerTask(calendars))
}

/// Compose the working calendar a task is scheduled on.
fn compose_task_calendar(
    task: &Task,
    project_calendar: &WorkCalendar,
    resources: &ResourceContext<'_>,
) -> Result<WorkCalendar, ScheduleError> {
    let Some(user_id) = resources.assignee_for(task) else {
        return Ok(project_calendar.clone());
    };

    let member = resources.member(user_id);
    let mask = member
        .and_then(|m| m.work_days)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| project_calendar.work_days());

    let mut exceptions = project_calendar.exceptions().clone();
    for entry in resources.time_off {
        if entry.team_member_id == *user_id && entry.status == TimeOffStatus::Approved {
            let mut day = entry.start_date;
            while day <= entry.end_date {
                exceptions.insert(day);
                day = match day.succ_opt() {
                    Some(next) => next,
                    None => break,
                };
            }
        }
    }

    debug!(task = %task.id, member = %user_id, "composed per-member calendar");
    Ok(WorkCalendar::new(mask, exceptions)?)
}

// ============================================================================
// Time-off impact diagnostic
// ============================================================================

/// Reported duration inflation caused by approved time-off.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeOffImpact {
    /// ceil(estimated hours / member hours per day), in working days
    pub base_duration: i64,
    /// Base duration plus overlapping time-off working days
    pub effective_duration: i64,
    /// The time-off records that overlap the task window
    pub conflicts: Vec<TimeOff>,
}

/// Estimate how a member's approved time-off inflates a task whose effort is
/// given in hours. Diagnostic only; the schedule itself is not changed.
pub fn estimate_duration_with_time_off(
    estimated_hours: f64,
    start: NaiveDate,
    member: &TeamMember,
    time_off: &[TimeOff],
    project_days: WeekdaySet,
    holidays: &[NaiveDate],
) -> Result<TimeOffImpact, ScheduleError> {
    let hours_per_day = f64::from(member.work_hours_per_day.max(1));
    let base_duration = (estimated_hours / hours_per_day).ceil().max(1.0) as i64;

    let mask = member
        .work_days
        .filter(|m| !m.is_empty())
        .unwrap_or(project_days);
    let calendar = WorkCalendar::new(mask, holidays.iter().copied())?;

    let window_start = calendar.next_working_day(start);
    let window_end = calendar.add_working_days(window_start, base_duration);

    let mut lost_days = 0i64;
    let mut conflicts = Vec::new();
    for entry in time_off {
        if entry.team_member_id != member.user_id || entry.status != TimeOffStatus::Approved {
            continue;
        }
        if entry.end_date < window_start || entry.start_date > window_end {
            continue;
        }
        let overlap_start = entry.start_date.max(window_start);
        let overlap_end = entry.end_date.min(window_end);
        let mut day = overlap_start;
        let mut overlap_working = 0i64;
        while day <= overlap_end {
            if calendar.is_working_day(day) {
                overlap_working += 1;
            }
            day = match day.succ_opt() {
                Some(next) => next,
                None => break,
            };
        }
        if overlap_working > 0 {
            lost_days += overlap_working;
            conflicts.push(entry.clone());
        }
    }

    Ok(TimeOffImpact {
        base_duration,
        effective_duration: base_duration + lost_days,
        conflicts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditplan_core::WeekdaySet;
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sun_thu() -> WorkCalendar {
        WorkCalendar::new(WeekdaySet::sun_thu(), []).unwrap()
    }

    fn approved(id: &str, user: &str, from: NaiveDate, to: NaiveDate) -> TimeOff {
        TimeOff::new(id, user, from, to).status(TimeOffStatus::Approved)
    }

    #[test]
    fn time_off_pushes_the_assignees_task() {
        let cal = sun_thu();
        let tasks = vec![Task::new("a", "p1").duration(5).assignee("alice")];
        let members = vec![TeamMember::new("m1", "alice").work_days(WeekdaySet::sun_thu())];
        let time_off = vec![approved("t1", "alice", date(2026, 1, 20), date(2026, 1, 21))];
        let resources = ResourceContext {
            members: &members,
            assignments: &[],
            time_off: &time_off,
        };

        let ctx = ScheduleContext::new(date(2026, 1, 18), &cal);
        let result =
            calculate_critical_path_with_resources(&tasks, &[], &ctx, &resources).unwrap();

        // Working days for alice: Sun 18, Mon 19, Thu 22, Sun 25, Mon 26.
        let a = result.get("a").unwrap();
        assert_eq!(a.es, date(2026, 1, 18));
        assert_eq!(a.ef, date(2026, 1, 26));
    }

    #[test]
    fn unassigned_tasks_use_the_project_calendar() {
        let cal = sun_thu();
        let tasks = vec![Task::new("a", "p1").duration(5)];
        let time_off = vec![approved("t1", "alice", date(2026, 1, 20), date(2026, 1, 21))];
        let resources = ResourceContext {
            members: &[],
            assignments: &[],
            time_off: &time_off,
        };

        let ctx = ScheduleContext::new(date(2026, 1, 18), &cal);
        let result =
            calculate_critical_path_with_resources(&tasks, &[], &ctx, &resources).unwrap();
        assert_eq!(result.get("a").unwrap().ef, date(2026, 1, 22));
    }

    #[test]
    fn assignment_row_supplies_the_member_when_legacy_field_is_empty() {
        let cal = sun_thu();
        let tasks = vec![Task::new("a", "p1").duration(5)];
        let members = vec![TeamMember::new("m1", "alice")];
        let assignments = vec![TaskAssignment::new("a", "alice", 40.0)];
        let time_off = vec![approved("t1", "alice", date(2026, 1, 20), date(2026, 1, 21))];
        let resources = ResourceContext {
            members: &members,
            assignments: &assignments,
            time_off: &time_off,
        };

        let ctx = ScheduleContext::new(date(2026, 1, 18), &cal);
        let result =
            calculate_critical_path_with_resources(&tasks, &[], &ctx, &resources).unwrap();
        assert_eq!(result.get("a").unwrap().ef, date(2026, 1, 26));
    }

    #[test]
    fn backward_pass_stays_on_the_project_calendar() {
        // Slack is measured in project working days even when the forward
        // pass ran on the member's thinner calendar.
        let cal = sun_thu();
        let tasks = vec![Task::new("a", "p1").duration(5).assignee("alice")];
        let members = vec![TeamMember::new("m1", "alice")];
        let time_off = vec![approved("t1", "alice", date(2026, 1, 20), date(2026, 1, 21))];
        let resources = ResourceContext {
            members: &members,
            assignments: &[],
            time_off: &time_off,
        };

        let ctx = ScheduleContext::new(date(2026, 1, 18), &cal);
        let result =
            calculate_critical_path_with_resources(&tasks, &[], &ctx, &resources).unwrap();

        let a = result.get("a").unwrap();
        assert_eq!(a.lf, date(2026, 1, 26));
        // Counting back five project working days from Mon 26 lands on Tue 20.
        assert_eq!(a.ls, date(2026, 1, 20));
        assert_eq!(a.slack, 2);
    }

    #[test]
    fn impact_counts_overlapping_working_days() {
        let member = TeamMember::new("m1", "alice");
        let time_off = vec![approved("t1", "alice", date(2026, 1, 20), date(2026, 1, 21))];

        let impact = estimate_duration_with_time_off(
            40.0,
            date(2026, 1, 18),
            &member,
            &time_off,
            WeekdaySet::sun_thu(),
            &[],
        )
        .unwrap();

        assert_eq!(impact.base_duration, 5);
        assert_eq!(impact.effective_duration, 7);
        assert_eq!(impact.conflicts.len(), 1);
    }

    #[test]
    fn impact_ignores_weekend_only_time_off() {
        let member = TeamMember::new("m1", "alice");
        // Friday and Saturday are outside the Sun-Thu mask already.
        let time_off = vec![approved("t1", "alice", date(2026, 1, 23), date(2026, 1, 24))];

        let impact = estimate_duration_with_time_off(
            16.0,
            date(2026, 1, 18),
            &member,
            &time_off,
            WeekdaySet::sun_thu(),
            &[],
        )
        .unwrap();

        assert_eq!(impact.base_duration, 2);
        assert_eq!(impact.effective_duration, 2);
        assert!(impact.conflicts.is_empty());
    }

    #[test]
    fn impact_ignores_pending_requests() {
        let member = TeamMember::new("m1", "alice");
        let time_off = vec![TimeOff::new("t1", "alice", date(2026, 1, 19), date(2026, 1, 20))];

        let impact = estimate_duration_with_time_off(
            24.0,
            date(2026, 1, 18),
            &member,
            &time_off,
            WeekdaySet::sun_thu(),
            &[],
        )
        .unwrap();

        assert_eq!(impact.effective_duration, impact.base_duration);
    }

    #[test]
    fn impact_rounds_hours_up_to_whole_days() {
        let member = TeamMember::new("m1", "alice").work_hours(9);
        let impact = estimate_duration_with_time_off(
            10.0,
            date(2026, 1, 18),
            &member,
            &[],
            WeekdaySet::sun_thu(),
            &[],
        )
        .unwrap();
        assert_eq!(impact.base_duration, 2);
    }
}
