//! Critical Path Method passes on real calendar dates.
//!
//! # Algorithm
//!
//! 1. Topological sort (graph.rs)
//! 2. Forward pass: Early Start / Early Finish per task
//! 3. Backward pass: Late Start / Late Finish per task, in reverse order
//! 4. Slack = working days between ES and LS (signed)
//! 5. Critical path: tasks with slack <= 0, in topological order
//!
//! Two rules deserve emphasis because naive ports get them wrong:
//!
//! - **Dependencies win.** A must-start-on or start-no-earlier-than
//!   constraint takes the *later* of the constrained date and the
//!   dependency-driven date. The lost constraint is reported via
//!   `constraint_overridden`, never silently honored.
//! - **Slack is signed.** Finish-no-later-than pressure and negative lag can
//!   push late positions before early ones; the negative slack is returned
//!   as-is so consumers can surface the over-constraint.

use chrono::{NaiveDate, TimeDelta};
use tracing::debug;

use auditplan_core::{
    ConstraintType, Dependency, DependencyKind, ScheduleError, ScheduledTask, SchedulingMode,
    SchedulingResult, Task, WorkCalendar,
};

use crate::graph::{Edge, TaskGraph};

/// Calendar-level inputs for a scheduling request.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleContext<'a> {
    /// Project origin; the earliest date any auto task may start
    pub project_start: NaiveDate,
    /// Optional scheduling horizon; anchors terminal late finishes when it
    /// lies at or beyond the computed project end
    pub late_finish_anchor: Option<NaiveDate>,
    /// Project calendar; also the backward-pass calendar in every variant
    pub calendar: &'a WorkCalendar,
}

impl<'a> ScheduleContext<'a> {
    pub fn new(project_start: NaiveDate, calendar: &'a WorkCalendar) -> Self {
        Self {
            project_start,
            late_finish_anchor: None,
            calendar,
        }
    }

    pub fn with_anchor(mut self, anchor: Option<NaiveDate>) -> Self {
        self.late_finish_anchor = anchor;
        self
    }
}

/// Per-task calendar selection for the passes.
pub(crate) enum TaskCalendars<'a> {
    /// Every task uses the project calendar
    Uniform(&'a WorkCalendar),
    /// One composed calendar per task index (resource-aware forward pass)
    PerTask(Vec<WorkCalendar>),
}

impl TaskCalendars<'_> {
    fn get(&self, index: usize) -> &WorkCalendar {
        match self {
            TaskCalendars::Uniform(cal) => cal,
            TaskCalendars::PerTask(cals) => &cals[index],
        }
    }
}

/// Schedule tasks on the project calendar.
///
/// Pure: inputs are borrowed and never mutated; re-running on identical
/// inputs yields an identical result.
pub fn calculate_critical_path(
    tasks: &[Task],
    dependencies: &[Dependency],
    ctx: &ScheduleContext<'_>,
) -> Result<SchedulingResult, ScheduleError> {
    run_passes(tasks, dependencies, ctx, &TaskCalendars::Uniform(ctx.calendar))
}

pub(crate) fn run_passes(
    tasks: &[Task],
    dependencies: &[Dependency],
    ctx: &ScheduleContext<'_>,
    calendars: &TaskCalendars<'_>,
) -> Result<SchedulingResult, ScheduleError> {
    if tasks.is_empty() {
        return Ok(SchedulingResult::default());
    }

    let graph = TaskGraph::build(tasks, dependencies)?;
    debug!(tasks = tasks.len(), edges = dependencies.len(), "running scheduling passes");

    let n = tasks.len();
    let mut es = vec![ctx.project_start; n];
    let mut ef = vec![ctx.project_start; n];
    let mut overridden = vec![false; n];
    let mut fnlt = vec![false; n];

    // ════════════════════════════════════════════════════════════════════
    // FORWARD PASS: Early Start and Early Finish
    // ════════════════════════════════════════════════════════════════════

    for &i in &graph.topo_order {
        let task = &tasks[i];
        let cal = calendars.get(i);
        let origin = cal.next_working_day(ctx.project_start);

        if task.scheduling_mode == SchedulingMode::Manual {
            // Manual tasks record the user's intent verbatim; successors
            // still consume the resulting finish.
            let start = task.start_date.unwrap_or(origin);
            es[i] = start;
            ef[i] = cal.add_working_days(start, task.duration);
            continue;
        }

        let mut early = if graph.predecessors[i].is_empty() {
            origin
        } else {
            let mut best = None::<NaiveDate>;
            for edge in &graph.predecessors[i] {
                let cand = candidate_es(cal, edge, es[edge.predecessor], ef[edge.predecessor], task.duration);
                best = Some(best.map_or(cand, |b| b.max(cand)));
            }
            best.unwrap_or(origin)
        };

        if early < origin {
            early = origin;
        }
        early = cal.next_working_day(early);

        // Positive constraints lose to later dependency-driven dates.
        if matches!(
            task.constraint_type,
            ConstraintType::MustStartOn | ConstraintType::StartNoEarlierThan
        ) {
            if let Some(date) = task.constraint_date {
                let pinned = cal.next_working_day(date);
                overridden[i] = early > pinned;
                if pinned > early {
                    early = pinned;
                }
            }
        }

        es[i] = early;
        ef[i] = cal.add_working_days(early, task.duration);

        if task.constraint_type == ConstraintType::FinishNoLaterThan {
            if let Some(deadline) = task.constraint_date {
                fnlt[i] = ef[i] > deadline;
            }
        }
    }

    let project_end = ef.iter().copied().max();

    // ════════════════════════════════════════════════════════════════════
    // BACKWARD PASS: Late Start and Late Finish (project calendar)
    // ════════════════════════════════════════════════════════════════════

    let bcal = ctx.calendar;
    let anchor = match (ctx.late_finish_anchor, project_end) {
        (Some(horizon), Some(end)) if horizon >= end => horizon,
        (_, Some(end)) => end,
        (_, None) => ctx.project_start,
    };

    let mut ls = es.clone();
    let mut lf = ef.clone();

    for &i in graph.topo_order.iter().rev() {
        let task = &tasks[i];
        if task.scheduling_mode == SchedulingMode::Manual {
            ls[i] = es[i];
            lf[i] = ef[i];
            continue;
        }

        let late_finish = if graph.successors[i].is_empty() {
            anchor
        } else {
            let mut best = None::<NaiveDate>;
            for edge in &graph.successors[i] {
                let cand = candidate_lf(bcal, edge, ls[edge.successor], lf[edge.successor], task.duration);
                best = Some(best.map_or(cand, |b| b.min(cand)));
            }
            best.unwrap_or(anchor)
        };

        lf[i] = late_finish;
        ls[i] = bcal.subtract_working_days(late_finish, task.duration);
    }

    // ════════════════════════════════════════════════════════════════════
    // SLACK AND CRITICAL PATH
    // ════════════════════════════════════════════════════════════════════

    let mut scheduled: Vec<ScheduledTask> = Vec::with_capacity(n);
    for (i, task) in tasks.iter().enumerate() {
        let slack = bcal.working_days_between(es[i], ls[i]);
        scheduled.push(ScheduledTask {
            task: task.clone(),
            es: es[i],
            ef: ef[i],
            ls: ls[i],
            lf: lf[i],
            slack,
            is_critical: slack <= 0,
            constraint_overridden: overridden[i],
            fnlt_violation: fnlt[i],
        });
    }

    let critical_path = graph
        .topo_order
        .iter()
        .filter(|&&i| scheduled[i].is_critical)
        .map(|&i| tasks[i].id.clone())
        .collect();

    Ok(SchedulingResult {
        tasks: scheduled,
        critical_path,
        project_end_date: project_end,
    })
}

/// Early-start candidate imposed on a successor by one incoming edge.
///
/// For FS and SS the constraint lands on ES directly; for FF and SF it lands
/// on EF and converts to ES through the successor's duration. Lag is signed
/// exclusive stepping on the successor's calendar.
fn candidate_es(
    cal: &WorkCalendar,
    edge: &Edge,
    pred_es: NaiveDate,
    pred_ef: NaiveDate,
    duration: i64,
) -> NaiveDate {
    match edge.kind {
        DependencyKind::FinishToStart => {
            // ES(succ) >= day after EF(pred), plus lag
            let day_after = cal.next_working_day(pred_ef + TimeDelta::days(1));
            cal.offset_working_days(day_after, edge.lag_days)
        }
        DependencyKind::StartToStart => {
            // ES(succ) >= ES(pred) + lag
            cal.offset_working_days(cal.next_working_day(pred_es), edge.lag_days)
        }
        DependencyKind::FinishToFinish => {
            // EF(succ) >= EF(pred) + lag
            let finish = cal.offset_working_days(cal.next_working_day(pred_ef), edge.lag_days);
            cal.subtract_working_days(finish, duration)
        }
        DependencyKind::StartToFinish => {
            // EF(succ) >= ES(pred) + lag
            let finish = cal.offset_working_days(cal.next_working_day(pred_es), edge.lag_days);
            cal.subtract_working_days(finish, duration)
        }
    }
}

/// Late-finish candidate imposed on a predecessor by one outgoing edge.
/// Exact mirror of [`candidate_es`].
fn candidate_lf(
    cal: &WorkCalendar,
    edge: &Edge,
    succ_ls: NaiveDate,
    succ_lf: NaiveDate,
    duration: i64,
) -> NaiveDate {
    match edge.kind {
        DependencyKind::FinishToStart => {
            // LF(pred) <= day before LS(succ), minus lag
            let day_before = cal.previous_working_day(succ_ls - TimeDelta::days(1));
            cal.offset_working_days(day_before, -edge.lag_days)
        }
        DependencyKind::StartToStart => {
            // LS(pred) <= LS(succ) - lag
            let start = cal.offset_working_days(succ_ls, -edge.lag_days);
            cal.add_working_days(start, duration)
        }
        DependencyKind::FinishToFinish => {
            // LF(pred) <= LF(succ) - lag
            cal.offset_working_days(succ_lf, -edge.lag_days)
        }
        DependencyKind::StartToFinish => {
            // LS(pred) <= LF(succ) - lag
            let start = cal.offset_working_days(succ_lf, -edge.lag_days);
            cal.add_working_days(start, duration)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditplan_core::{CalendarException, WeekdaySet};
    use pretty_assertions::assert_eq;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sun_thu() -> WorkCalendar {
        WorkCalendar::new(WeekdaySet::sun_thu(), []).unwrap()
    }

    fn task(id: &str, duration: i64) -> Task {
        Task::new(id, "p1").duration(duration)
    }

    fn schedule(
        tasks: &[Task],
        deps: &[Dependency],
        calendar: &WorkCalendar,
    ) -> SchedulingResult {
        let ctx = ScheduleContext::new(date(2026, 1, 18), calendar);
        calculate_critical_path(tasks, deps, &ctx).unwrap()
    }

    #[test]
    fn empty_task_set_yields_empty_result() {
        let cal = sun_thu();
        let result = schedule(&[], &[], &cal);
        assert!(result.tasks.is_empty());
        assert!(result.critical_path.is_empty());
        assert_eq!(result.project_end_date, None);
    }

    #[test]
    fn single_task_is_critical_with_zero_slack() {
        let cal = sun_thu();
        let tasks = vec![task("a", 3)];
        let result = schedule(&tasks, &[], &cal);

        let a = result.get("a").unwrap();
        assert_eq!(a.es, date(2026, 1, 18));
        assert_eq!(a.ef, date(2026, 1, 20));
        assert_eq!(a.slack, 0);
        assert!(a.is_critical);
        assert_eq!(result.project_end_date, Some(date(2026, 1, 20)));
    }

    #[test]
    fn fs_chain_lands_after_weekend() {
        // A(3) then B(2): B starts the day after A finishes, and the chain
        // is fully critical.
        let cal = sun_thu();
        let tasks = vec![task("a", 3), task("b", 2)];
        let deps = vec![Dependency::finish_to_start("a", "b")];
        let result = schedule(&tasks, &deps, &cal);

        let a = result.get("a").unwrap();
        let b = result.get("b").unwrap();
        assert_eq!(a.es, date(2026, 1, 18));
        assert_eq!(a.ef, date(2026, 1, 20));
        assert_eq!(b.es, date(2026, 1, 21));
        assert_eq!(b.ef, date(2026, 1, 22));
        assert_eq!(a.slack, 0);
        assert_eq!(b.slack, 0);
        assert_eq!(result.critical_path, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.project_end_date, Some(date(2026, 1, 22)));
    }

    #[test]
    fn fs_across_weekend_lands_on_sunday() {
        // A finishes Thursday; its successor starts Sunday, not Saturday.
        let cal = sun_thu();
        let tasks = vec![task("a", 5), task("b", 1)];
        let deps = vec![Dependency::finish_to_start("a", "b")];
        let result = schedule(&tasks, &deps, &cal);

        assert_eq!(result.get("a").unwrap().ef, date(2026, 1, 22)); // Thursday
        assert_eq!(result.get("b").unwrap().es, date(2026, 1, 25)); // Sunday
    }

    #[test]
    fn ss_with_positive_lag() {
        let cal = sun_thu();
        let tasks = vec![task("a", 5), task("b", 2)];
        let deps = vec![Dependency::new("a", "b", DependencyKind::StartToStart, 2)];
        let result = schedule(&tasks, &deps, &cal);

        let a = result.get("a").unwrap();
        let b = result.get("b").unwrap();
        assert_eq!(a.es, date(2026, 1, 18));
        assert_eq!(a.ef, date(2026, 1, 22));
        assert_eq!(b.es, date(2026, 1, 20));
        assert_eq!(b.ef, date(2026, 1, 21));
    }

    #[test]
    fn ff_with_negative_lag() {
        let cal = sun_thu();
        let tasks = vec![task("a", 4), task("b", 3)];
        let deps = vec![Dependency::new("a", "b", DependencyKind::FinishToFinish, -1)];
        let result = schedule(&tasks, &deps, &cal);

        let a = result.get("a").unwrap();
        let b = result.get("b").unwrap();
        assert_eq!(a.es, date(2026, 1, 18));
        assert_eq!(a.ef, date(2026, 1, 21));
        assert_eq!(b.ef, date(2026, 1, 20));
        assert_eq!(b.es, date(2026, 1, 18));
    }

    #[test]
    fn sf_derives_finish_from_predecessor_start() {
        let cal = sun_thu();
        let tasks = vec![
            Task::new("a", "p1").duration(4).manual(date(2026, 1, 21)),
            task("b", 2),
        ];
        let deps = vec![Dependency::new("a", "b", DependencyKind::StartToFinish, 0)];
        let result = schedule(&tasks, &deps, &cal);

        // B must finish by A's start (Wed 21): EF = 21, ES = 20.
        let b = result.get("b").unwrap();
        assert_eq!(b.ef, date(2026, 1, 21));
        assert_eq!(b.es, date(2026, 1, 20));
    }

    #[test]
    fn holiday_splits_duration() {
        let cal = WorkCalendar::for_project(
            WeekdaySet::sun_thu(),
            &[CalendarException::holiday("p1", date(2026, 1, 20))],
        )
        .unwrap();
        let tasks = vec![task("a", 3)];
        let result = schedule(&tasks, &[], &cal);

        // Sun 18, Mon 19, holiday Tue skipped, Wed 21.
        let a = result.get("a").unwrap();
        assert_eq!(a.es, date(2026, 1, 18));
        assert_eq!(a.ef, date(2026, 1, 21));
    }

    #[test]
    fn negative_lag_clamps_to_project_start() {
        let cal = sun_thu();
        let tasks = vec![task("a", 1), task("b", 2)];
        let deps = vec![Dependency::new("a", "b", DependencyKind::StartToStart, -5)];
        let result = schedule(&tasks, &deps, &cal);

        assert_eq!(result.get("b").unwrap().es, date(2026, 1, 18));
    }

    #[test]
    fn milestone_collapses_to_a_point() {
        let cal = sun_thu();
        let tasks = vec![task("a", 3), Task::new("m", "p1").milestone()];
        let deps = vec![Dependency::finish_to_start("a", "m")];
        let result = schedule(&tasks, &deps, &cal);

        let m = result.get("m").unwrap();
        assert_eq!(m.es, date(2026, 1, 21));
        assert_eq!(m.es, m.ef);
        assert!(m.is_critical);
    }

    #[test]
    fn manual_task_ignores_predecessors() {
        let cal = sun_thu();
        let pinned = Task::new("b", "p1").duration(2).manual(date(2026, 1, 19));
        let tasks = vec![task("a", 5), pinned];
        let deps = vec![Dependency::finish_to_start("a", "b")];
        let result = schedule(&tasks, &deps, &cal);

        let b = result.get("b").unwrap();
        assert_eq!(b.es, date(2026, 1, 19));
        assert_eq!(b.ef, date(2026, 1, 20));
        // Manual tasks carry no float of their own.
        assert_eq!(b.ls, b.es);
        assert_eq!(b.lf, b.ef);
    }

    #[test]
    fn parallel_branch_has_slack() {
        // a(5) -> c(2); b(3) -> c(2). b can slip two working days.
        let cal = sun_thu();
        let tasks = vec![task("a", 5), task("b", 3), task("c", 2)];
        let deps = vec![
            Dependency::finish_to_start("a", "c"),
            Dependency::finish_to_start("b", "c"),
        ];
        let result = schedule(&tasks, &deps, &cal);

        assert_eq!(result.get("a").unwrap().slack, 0);
        assert_eq!(result.get("b").unwrap().slack, 2);
        assert!(!result.get("b").unwrap().is_critical);
        assert_eq!(
            result.critical_path,
            vec!["a".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn snet_constraint_pushes_start() {
        let cal = sun_thu();
        let tasks = vec![
            task("a", 2).constraint(ConstraintType::StartNoEarlierThan, date(2026, 1, 25)),
        ];
        let result = schedule(&tasks, &[], &cal);

        let a = result.get("a").unwrap();
        assert_eq!(a.es, date(2026, 1, 25));
        assert!(!a.constraint_overridden);
    }

    #[test]
    fn dependency_beats_mso_constraint() {
        // The predecessor pushes b past its must-start-on date; the later
        // date wins and the conflict is flagged.
        let cal = sun_thu();
        let tasks = vec![
            task("a", 5),
            task("b", 2).constraint(ConstraintType::MustStartOn, date(2026, 1, 19)),
        ];
        let deps = vec![Dependency::finish_to_start("a", "b")];
        let result = schedule(&tasks, &deps, &cal);

        let b = result.get("b").unwrap();
        assert_eq!(b.es, date(2026, 1, 25));
        assert!(b.constraint_overridden);
    }

    #[test]
    fn mso_on_weekend_snaps_forward() {
        let cal = sun_thu();
        let tasks = vec![
            // Friday the 23rd snaps to Sunday the 25th.
            task("a", 1).constraint(ConstraintType::MustStartOn, date(2026, 1, 23)),
        ];
        let result = schedule(&tasks, &[], &cal);
        assert_eq!(result.get("a").unwrap().es, date(2026, 1, 25));
    }

    #[test]
    fn fnlt_violation_is_reported_not_enforced() {
        let cal = sun_thu();
        let tasks = vec![
            task("a", 5).constraint(ConstraintType::FinishNoLaterThan, date(2026, 1, 20)),
        ];
        let result = schedule(&tasks, &[], &cal);

        let a = result.get("a").unwrap();
        // The schedule itself is unchanged.
        assert_eq!(a.ef, date(2026, 1, 22));
        assert!(a.fnlt_violation);
    }

    #[test]
    fn cycle_surfaces_as_schedule_error() {
        let cal = sun_thu();
        let tasks = vec![task("a", 1), task("b", 1)];
        let deps = vec![
            Dependency::finish_to_start("a", "b"),
            Dependency::finish_to_start("b", "a"),
        ];
        let ctx = ScheduleContext::new(date(2026, 1, 18), &cal);
        let err = calculate_critical_path(&tasks, &deps, &ctx).unwrap_err();
        assert!(matches!(err, ScheduleError::CycleDetected { .. }));
    }

    #[test]
    fn overconstrained_predecessor_reports_negative_slack() {
        // b is pinned before a can possibly finish; a's late dates fall
        // before its early dates and the signed slack says by how much.
        let cal = sun_thu();
        let tasks = vec![
            task("a", 5),
            Task::new("b", "p1").duration(1).manual(date(2026, 1, 19)),
        ];
        let deps = vec![Dependency::finish_to_start("a", "b")];
        let result = schedule(&tasks, &deps, &cal);

        let a = result.get("a").unwrap();
        assert_eq!(a.ef, date(2026, 1, 22));
        assert_eq!(a.lf, date(2026, 1, 18));
        assert!(a.slack < 0);
        assert!(a.is_critical);
    }

    #[test]
    fn later_horizon_grants_slack() {
        let cal = sun_thu();
        let tasks = vec![task("a", 3)];
        let ctx = ScheduleContext::new(date(2026, 1, 18), &cal)
            .with_anchor(Some(date(2026, 1, 26)));
        let result = calculate_critical_path(&tasks, &[], &ctx).unwrap();

        let a = result.get("a").unwrap();
        assert_eq!(a.lf, date(2026, 1, 26));
        assert_eq!(a.slack, 4);
        assert!(!a.is_critical);
        // The computed end is still the early finish, not the horizon.
        assert_eq!(result.project_end_date, Some(date(2026, 1, 20)));
    }

    #[test]
    fn horizon_before_computed_end_is_ignored() {
        let cal = sun_thu();
        let tasks = vec![task("a", 5)];
        let ctx = ScheduleContext::new(date(2026, 1, 18), &cal)
            .with_anchor(Some(date(2026, 1, 19)));
        let result = calculate_critical_path(&tasks, &[], &ctx).unwrap();
        assert_eq!(result.get("a").unwrap().lf, date(2026, 1, 22));
    }

    #[test]
    fn increasing_a_duration_never_shrinks_the_project() {
        let cal = sun_thu();
        let deps = vec![
            Dependency::finish_to_start("a", "c"),
            Dependency::finish_to_start("b", "c"),
        ];
        let mut previous_end = None;
        for duration in 1..10 {
            let tasks = vec![task("a", duration), task("b", 3), task("c", 2)];
            let end = schedule(&tasks, &deps, &cal).project_end_date;
            if let (Some(prev), Some(curr)) = (previous_end, end) {
                assert!(curr >= prev, "end shrank when duration grew to {duration}");
            }
            previous_end = end;
        }
    }

    #[test]
    fn rescheduling_identical_inputs_is_stable() {
        let cal = sun_thu();
        let tasks = vec![task("a", 5), task("b", 3), task("c", 2)];
        let deps = vec![
            Dependency::finish_to_start("a", "c"),
            Dependency::new("b", "c", DependencyKind::StartToStart, 1),
        ];
        let first = schedule(&tasks, &deps, &cal);
        let second = schedule(&tasks, &deps, &cal);
        assert_eq!(first, second);
    }

    #[test]
    fn inputs_are_not_mutated() {
        let cal = sun_thu();
        let tasks = vec![task("a", 5), task("b", 3)];
        let deps = vec![Dependency::finish_to_start("a", "b")];
        let tasks_before = tasks.clone();
        let deps_before = deps.clone();
        let _ = schedule(&tasks, &deps, &cal);
        assert_eq!(tasks, tasks_before);
        assert_eq!(deps, deps_before);
    }

    #[test]
    fn critical_path_covers_the_project_span() {
        let cal = sun_thu();
        let tasks = vec![task("a", 5), task("b", 3), task("c", 2), task("d", 1)];
        let deps = vec![
            Dependency::finish_to_start("a", "c"),
            Dependency::finish_to_start("b", "c"),
            Dependency::finish_to_start("b", "d"),
        ];
        let result = schedule(&tasks, &deps, &cal);

        // The critical chain a -> c spans the whole project duration.
        let total = result
            .critical_path
            .iter()
            .map(|id| result.get(id).unwrap().task.duration)
            .sum::<i64>();
        let span = cal.working_days_between(
            date(2026, 1, 18),
            result.project_end_date.unwrap(),
        ) + 1;
        assert_eq!(total, span);
    }
}
