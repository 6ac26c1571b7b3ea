//! # auditplan-core
//!
//! Core domain model and pure rules for the auditplan scheduling engine.
//!
//! This crate provides:
//! - Domain types: `Project`, `Task`, `Dependency`, `ProjectPhase`,
//!   `TeamMember`, `TaskAssignment`, `TimeOff`, `CalendarException`
//! - The working-day calendar engine ([`calendar`])
//! - Phase gating ([`phase`]), progress reconciliation ([`progress`]),
//!   input validation ([`validate`]) and the record-store seam ([`store`])
//! - Scheduling output types and error enums shared with the solver
//!
//! ## Example
//!
//! ```rust
//! use auditplan_core::{Dependency, DependencyKind, Task};
//!
//! let design = Task::new("design", "proj-1").duration(5);
//! let build = Task::new("build", "proj-1").duration(10);
//! let dep = Dependency::new("design", "build", DependencyKind::FinishToStart, 0);
//! assert_eq!(dep.predecessor_id, design.id);
//! assert_eq!(dep.successor_id, build.id);
//! ```

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod calendar;
pub mod phase;
pub mod progress;
pub mod store;
pub mod validate;

pub use calendar::{parse_iso_date, CalendarError, WeekdaySet, WorkCalendar};
pub use phase::{is_phase_locked, phase_locks, LockReason, PhaseLockInfo};
pub use progress::{reconcile, ProgressChange, ProgressState};
pub use store::{MemoryStore, RecordStore};
pub use validate::ValidationError;

// ============================================================================
// Type Aliases
// ============================================================================

/// Unique identifier for a task
pub type TaskId = String;

/// Unique identifier for a project phase
pub type PhaseId = String;

/// Unique identifier for a project
pub type ProjectId = String;

/// Unique identifier for a team member (user id in assignments/time-off)
pub type MemberId = String;

// ============================================================================
// Task
// ============================================================================

/// Regular task or zero-duration milestone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[default]
    Task,
    Milestone,
}

/// Planner-facing priority. Not consumed by the scheduler itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Task lifecycle status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Done,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "Pending"),
            TaskStatus::InProgress => write!(f, "In Progress"),
            TaskStatus::Done => write!(f, "Done"),
        }
    }
}

/// Whether the scheduler positions the task or the user pinned it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    #[default]
    Auto,
    Manual,
}

/// Date constraint kinds, MS-Project style.
///
/// Positive constraints (`MustStartOn`, `StartNoEarlierThan`) lose to
/// dependency-driven later dates; `FinishNoLaterThan` never moves a task and
/// is only reported when violated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    #[default]
    None,
    MustStartOn,
    StartNoEarlierThan,
    FinishNoLaterThan,
}

/// A schedulable unit of work.
///
/// Scheduling inputs live here; computed positions are returned on
/// [`ScheduledTask`] so that scheduling never mutates its inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,
    /// Owning project
    pub project_id: ProjectId,
    /// Owning phase, if the project is phased
    pub phase_id: Option<PhaseId>,
    /// Human-readable title
    pub title: String,
    /// Free-form description
    pub description: Option<String>,
    pub task_type: TaskType,
    pub priority: Priority,
    pub status: TaskStatus,
    /// Duration in working days (milestones use 0)
    pub duration: i64,
    pub scheduling_mode: SchedulingMode,
    pub constraint_type: ConstraintType,
    pub constraint_date: Option<NaiveDate>,
    /// User-pinned start, honored verbatim when `scheduling_mode` is manual
    pub start_date: Option<NaiveDate>,
    /// User-pinned end (informational; the pinned finish is derived from
    /// `start_date` and `duration`)
    pub end_date: Option<NaiveDate>,
    /// Legacy single assignee; the richer assignment set supplements it
    pub assignee_id: Option<MemberId>,
    /// Completion percentage, 0..=100
    pub percent_complete: u8,
    pub actual_start_date: Option<NaiveDate>,
    pub actual_finish_date: Option<NaiveDate>,
}

impl Task {
    /// Create a new auto-scheduled task with the given id.
    pub fn new(id: impl Into<TaskId>, project_id: impl Into<ProjectId>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            project_id: project_id.into(),
            phase_id: None,
            description: None,
            task_type: TaskType::Task,
            priority: Priority::Medium,
            status: TaskStatus::Pending,
            duration: 0,
            scheduling_mode: SchedulingMode::Auto,
            constraint_type: ConstraintType::None,
            constraint_date: None,
            start_date: None,
            end_date: None,
            assignee_id: None,
            percent_complete: 0,
            actual_start_date: None,
            actual_finish_date: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the duration in working days.
    pub fn duration(mut self, days: i64) -> Self {
        self.duration = days;
        self
    }

    pub fn phase(mut self, phase_id: impl Into<PhaseId>) -> Self {
        self.phase_id = Some(phase_id.into());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark as a milestone (forces duration to 0).
    pub fn milestone(mut self) -> Self {
        self.task_type = TaskType::Milestone;
        self.duration = 0;
        self
    }

    /// Pin the task manually at the given start date.
    pub fn manual(mut self, start: NaiveDate) -> Self {
        self.scheduling_mode = SchedulingMode::Manual;
        self.start_date = Some(start);
        self
    }

    /// Apply a date constraint.
    pub fn constraint(mut self, kind: ConstraintType, date: NaiveDate) -> Self {
        self.constraint_type = kind;
        self.constraint_date = Some(date);
        self
    }

    pub fn assignee(mut self, member_id: impl Into<MemberId>) -> Self {
        self.assignee_id = Some(member_id.into());
        self
    }

    pub fn percent(mut self, percent: u8) -> Self {
        self.percent_complete = percent.min(100);
        self
    }

    pub fn is_milestone(&self) -> bool {
        self.task_type == TaskType::Milestone
    }
}

// ============================================================================
// Dependency
// ============================================================================

/// Dependency kinds between a predecessor and a successor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// Successor starts after predecessor finishes
    #[default]
    FinishToStart,
    /// Successor starts when predecessor starts
    StartToStart,
    /// Successor finishes when predecessor finishes
    FinishToFinish,
    /// Successor finishes when predecessor starts
    StartToFinish,
}

/// A directed scheduling dependency with signed working-day lag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub predecessor_id: TaskId,
    pub successor_id: TaskId,
    pub kind: DependencyKind,
    /// Lag (positive) or lead (negative), in working days
    pub lag_days: i64,
}

impl Dependency {
    pub fn new(
        predecessor_id: impl Into<TaskId>,
        successor_id: impl Into<TaskId>,
        kind: DependencyKind,
        lag_days: i64,
    ) -> Self {
        Self {
            predecessor_id: predecessor_id.into(),
            successor_id: successor_id.into(),
            kind,
            lag_days,
        }
    }

    /// Finish-to-start with no lag, the overwhelmingly common case.
    pub fn finish_to_start(
        predecessor_id: impl Into<TaskId>,
        successor_id: impl Into<TaskId>,
    ) -> Self {
        Self::new(predecessor_id, successor_id, DependencyKind::FinishToStart, 0)
    }
}

// ============================================================================
// ProjectPhase
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Active,
    Completed,
}

/// An ordered phase within a project. `phase_order` forms the lock chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPhase {
    pub id: PhaseId,
    pub project_id: ProjectId,
    pub name: String,
    /// Position in the lock chain, starting at 1; unique within a project
    pub phase_order: u32,
    pub status: PhaseStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl ProjectPhase {
    pub fn new(
        id: impl Into<PhaseId>,
        project_id: impl Into<ProjectId>,
        name: impl Into<String>,
        phase_order: u32,
    ) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            name: name.into(),
            phase_order,
            status: PhaseStatus::Pending,
            start_date: None,
            end_date: None,
        }
    }

    pub fn status(mut self, status: PhaseStatus) -> Self {
        self.status = status;
        self
    }
}

// ============================================================================
// Project
// ============================================================================

/// A project: the scheduling origin, horizon and default calendar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub organization_id: String,
    pub name: String,
    pub status: String,
    /// Project origin for the forward pass; required for scheduling
    pub start_date: Option<NaiveDate>,
    /// Scheduling horizon; anchors terminal late finishes when set
    pub end_date: Option<NaiveDate>,
    /// Weekly working days (defaults to Sunday through Thursday)
    pub working_days: WeekdaySet,
    /// Default working hours per day, 1..=24
    pub default_work_hours: u8,
}

impl Project {
    pub fn new(id: impl Into<ProjectId>, organization_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            organization_id: organization_id.into(),
            status: "active".into(),
            start_date: None,
            end_date: None,
            working_days: WeekdaySet::default(),
            default_work_hours: 8,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn start(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn end(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn working_days(mut self, days: WeekdaySet) -> Self {
        self.working_days = days;
        self
    }
}

// ============================================================================
// TeamMember
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    #[default]
    Member,
    Viewer,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentType {
    #[default]
    FullTime,
    PartTime,
    Contractor,
}

/// A person who can be assigned to tasks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: String,
    /// The user id referenced by assignments and time-off
    pub user_id: MemberId,
    pub display_name: String,
    pub role: Role,
    pub employment_type: EmploymentType,
    /// Working hours per day, 1..=24 (default 8)
    pub work_hours_per_day: u8,
    /// Personal weekday mask; falls back to the project's when absent
    pub work_days: Option<WeekdaySet>,
    pub weekly_capacity_hours: Option<u32>,
    pub hourly_rate: Option<Decimal>,
}

impl TeamMember {
    pub fn new(id: impl Into<String>, user_id: impl Into<MemberId>) -> Self {
        let user_id = user_id.into();
        Self {
            id: id.into(),
            display_name: user_id.clone(),
            user_id,
            role: Role::Member,
            employment_type: EmploymentType::FullTime,
            work_hours_per_day: 8,
            work_days: None,
            weekly_capacity_hours: None,
            hourly_rate: None,
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn work_hours(mut self, hours: u8) -> Self {
        self.work_hours_per_day = hours;
        self
    }

    pub fn work_days(mut self, days: WeekdaySet) -> Self {
        self.work_days = Some(days);
        self
    }

    pub fn hourly_rate(mut self, rate: Decimal) -> Self {
        self.hourly_rate = Some(rate);
        self
    }
}

// ============================================================================
// TaskAssignment
// ============================================================================

/// Many-to-many task assignment with allocated hours.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task_id: TaskId,
    pub user_id: MemberId,
    /// Allocated effort in hours; must be positive
    pub allocated_hours: f64,
    pub actual_hours: f64,
    pub start_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl TaskAssignment {
    pub fn new(
        task_id: impl Into<TaskId>,
        user_id: impl Into<MemberId>,
        allocated_hours: f64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            user_id: user_id.into(),
            allocated_hours,
            actual_hours: 0.0,
            start_date: None,
            notes: None,
        }
    }
}

// ============================================================================
// TimeOff
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOffKind {
    #[default]
    Vacation,
    Sick,
    Personal,
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOffStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// A time-off request. Only approved entries affect scheduling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOff {
    pub id: String,
    pub team_member_id: MemberId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub kind: TimeOffKind,
    pub status: TimeOffStatus,
}

impl TimeOff {
    pub fn new(
        id: impl Into<String>,
        team_member_id: impl Into<MemberId>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            team_member_id: team_member_id.into(),
            start_date,
            end_date,
            kind: TimeOffKind::Vacation,
            status: TimeOffStatus::Pending,
        }
    }

    pub fn kind(mut self, kind: TimeOffKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn status(mut self, status: TimeOffStatus) -> Self {
        self.status = status;
        self
    }
}

// ============================================================================
// CalendarException
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    #[default]
    Holiday,
    NonWorking,
}

/// A project-level non-working date or date range.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarException {
    pub project_id: ProjectId,
    pub date: NaiveDate,
    /// Inclusive range end; a single date when absent
    pub end_date: Option<NaiveDate>,
    pub kind: ExceptionKind,
    pub name: Option<String>,
}

impl CalendarException {
    pub fn holiday(project_id: impl Into<ProjectId>, date: NaiveDate) -> Self {
        Self {
            project_id: project_id.into(),
            date,
            end_date: None,
            kind: ExceptionKind::Holiday,
            name: None,
        }
    }

    pub fn range(
        project_id: impl Into<ProjectId>,
        date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            date,
            end_date: Some(end_date),
            kind: ExceptionKind::NonWorking,
            name: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ============================================================================
// Scheduling Output
// ============================================================================

/// A task annotated with its computed schedule.
///
/// The input task is embedded (and flattened on the wire) so consumers see a
/// supersequence of the input properties plus the computed positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    #[serde(flatten)]
    pub task: Task,
    /// Early start
    pub es: NaiveDate,
    /// Early finish (inclusive)
    pub ef: NaiveDate,
    /// Late start
    pub ls: NaiveDate,
    /// Late finish (inclusive)
    pub lf: NaiveDate,
    /// Signed slack in working days; negative means over-constrained
    pub slack: i64,
    /// On the critical path (slack <= 0)
    pub is_critical: bool,
    /// A must-start-on / start-no-earlier-than date lost to a later
    /// dependency-driven position
    pub constraint_overridden: bool,
    /// The early finish breaches a finish-no-later-than date
    pub fnlt_violation: bool,
}

/// The result of a scheduling request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingResult {
    pub tasks: Vec<ScheduledTask>,
    /// Critical task ids in topological order
    pub critical_path: Vec<TaskId>,
    pub project_end_date: Option<NaiveDate>,
}

impl SchedulingResult {
    /// Look up a scheduled task by id.
    pub fn get(&self, id: &str) -> Option<&ScheduledTask> {
        self.tasks.iter().find(|t| t.task.id == id)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Scheduling error. Constraint conflicts are not errors; they surface as
/// diagnostics on [`ScheduledTask`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("circular dependency involving tasks: {task_ids:?}")]
    CycleDetected { task_ids: Vec<TaskId> },

    #[error("dependency references missing task '{missing}' (edge {predecessor_id} -> {successor_id})")]
    UnresolvedPredecessor {
        predecessor_id: TaskId,
        successor_id: TaskId,
        missing: TaskId,
    },

    #[error("task '{task_id}' has invalid duration {duration}")]
    InvalidDuration { task_id: TaskId, duration: i64 },

    #[error("project '{0}' not found")]
    ProjectNotFound(ProjectId),

    #[error("project '{0}' has no start date")]
    MissingProjectStart(ProjectId),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Calendar(#[from] CalendarError),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn task_builder() {
        let task = Task::new("fieldwork", "p1")
            .title("Fieldwork")
            .duration(5)
            .phase("ph1")
            .priority(Priority::High)
            .assignee("alice");

        assert_eq!(task.id, "fieldwork");
        assert_eq!(task.project_id, "p1");
        assert_eq!(task.title, "Fieldwork");
        assert_eq!(task.duration, 5);
        assert_eq!(task.phase_id.as_deref(), Some("ph1"));
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.assignee_id.as_deref(), Some("alice"));
        assert_eq!(task.scheduling_mode, SchedulingMode::Auto);
    }

    #[test]
    fn milestone_forces_zero_duration() {
        let task = Task::new("signoff", "p1").duration(3).milestone();
        assert!(task.is_milestone());
        assert_eq!(task.duration, 0);
    }

    #[test]
    fn manual_pin_records_intent() {
        let task = Task::new("kickoff", "p1").duration(2).manual(date(2026, 3, 1));
        assert_eq!(task.scheduling_mode, SchedulingMode::Manual);
        assert_eq!(task.start_date, Some(date(2026, 3, 1)));
    }

    #[test]
    fn percent_builder_clamps() {
        let task = Task::new("t", "p1").percent(140);
        assert_eq!(task.percent_complete, 100);
    }

    #[test]
    fn default_project_week_is_sun_thu() {
        let project = Project::new("p1", "org1");
        assert_eq!(project.working_days, WeekdaySet::sun_thu());
        assert_eq!(project.default_work_hours, 8);
    }

    #[test]
    fn dependency_serializes_kind_as_snake_case() {
        let dep = Dependency::new("a", "b", DependencyKind::StartToStart, 2);
        let json = serde_json::to_value(&dep).unwrap();
        assert_eq!(json["kind"], "start_to_start");
        assert_eq!(json["lag_days"], 2);
    }

    #[test]
    fn dates_serialize_as_iso() {
        let t = TimeOff::new("t1", "alice", date(2026, 1, 20), date(2026, 1, 21));
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["start_date"], "2026-01-20");
        assert_eq!(json["end_date"], "2026-01-21");
    }

    #[test]
    fn scheduled_task_flattens_input_fields() {
        let task = Task::new("a", "p1").duration(3);
        let scheduled = ScheduledTask {
            task: task.clone(),
            es: date(2026, 1, 18),
            ef: date(2026, 1, 20),
            ls: date(2026, 1, 18),
            lf: date(2026, 1, 20),
            slack: 0,
            is_critical: true,
            constraint_overridden: false,
            fnlt_violation: false,
        };
        let json = serde_json::to_value(&scheduled).unwrap();
        // Input identity and computed outputs live side by side.
        assert_eq!(json["id"], "a");
        assert_eq!(json["es"], "2026-01-18");
        assert_eq!(json["slack"], 0);
    }

    #[test]
    fn task_status_display() {
        assert_eq!(format!("{}", TaskStatus::Pending), "Pending");
        assert_eq!(format!("{}", TaskStatus::InProgress), "In Progress");
        assert_eq!(format!("{}", TaskStatus::Done), "Done");
    }
}
