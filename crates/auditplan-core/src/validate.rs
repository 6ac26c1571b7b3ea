//! Input validation for record-store writes and scheduling requests.
//!
//! One small check function per rule; the store runs them on every write and
//! the scheduling facade runs them again before building the graph, so a bad
//! row can never reach the passes.

use thiserror::Error;

use crate::{
    CalendarException, Dependency, PhaseId, ProjectPhase, Task, TaskAssignment, TaskId, TaskType,
    TeamMember, TimeOff,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("task '{task_id}': duration must be non-negative (got {duration})")]
    NegativeDuration { task_id: TaskId, duration: i64 },

    #[error("task '{task_id}': milestones must have zero duration (got {duration})")]
    MilestoneWithDuration { task_id: TaskId, duration: i64 },

    #[error("task '{task_id}': percent_complete must be at most 100 (got {value})")]
    PercentOutOfRange { task_id: TaskId, value: u8 },

    #[error("dependency '{task_id}' -> '{task_id}': a task cannot depend on itself")]
    SelfDependency { task_id: TaskId },

    #[error("dependency '{predecessor_id}' -> '{successor_id}': tasks belong to different projects")]
    CrossProjectDependency {
        predecessor_id: TaskId,
        successor_id: TaskId,
    },

    #[error("assignment for task '{task_id}': allocated_hours must be positive (got {hours})")]
    NonPositiveAllocation { task_id: TaskId, hours: f64 },

    #[error("assignment for task '{task_id}': actual_hours must be non-negative (got {hours})")]
    NegativeActualHours { task_id: TaskId, hours: f64 },

    #[error("time off '{id}': end_date precedes start_date")]
    InvertedTimeOffRange { id: String },

    #[error("calendar exception on {date}: end_date precedes date")]
    InvertedExceptionRange { date: chrono::NaiveDate },

    #[error("phase '{phase_id}': phase_order must be positive")]
    ZeroPhaseOrder { phase_id: PhaseId },

    #[error("phase '{phase_id}': phase_order {order} already used by phase '{other}'")]
    DuplicatePhaseOrder {
        phase_id: PhaseId,
        other: PhaseId,
        order: u32,
    },

    #[error("member '{id}': work_hours_per_day must be within 1..=24 (got {hours})")]
    WorkHoursOutOfRange { id: String, hours: u8 },

    #[error("unknown {entity} '{id}'")]
    UnknownEntity { entity: &'static str, id: String },
}

pub fn validate_task(task: &Task) -> Result<(), ValidationError> {
    if task.duration < 0 {
        return Err(ValidationError::NegativeDuration {
            task_id: task.id.clone(),
            duration: task.duration,
        });
    }
    if task.task_type == TaskType::Milestone && task.duration != 0 {
        return Err(ValidationError::MilestoneWithDuration {
            task_id: task.id.clone(),
            duration: task.duration,
        });
    }
    if task.percent_complete > 100 {
        return Err(ValidationError::PercentOutOfRange {
            task_id: task.id.clone(),
            value: task.percent_complete,
        });
    }
    Ok(())
}

pub fn validate_dependency(dep: &Dependency) -> Result<(), ValidationError> {
    if dep.predecessor_id == dep.successor_id {
        return Err(ValidationError::SelfDependency {
            task_id: dep.predecessor_id.clone(),
        });
    }
    Ok(())
}

pub fn validate_assignment(assignment: &TaskAssignment) -> Result<(), ValidationError> {
    if assignment.allocated_hours <= 0.0 {
        return Err(ValidationError::NonPositiveAllocation {
            task_id: assignment.task_id.clone(),
            hours: assignment.allocated_hours,
        });
    }
    if assignment.actual_hours < 0.0 {
        return Err(ValidationError::NegativeActualHours {
            task_id: assignment.task_id.clone(),
            hours: assignment.actual_hours,
        });
    }
    Ok(())
}

pub fn validate_time_off(time_off: &TimeOff) -> Result<(), ValidationError> {
    if time_off.end_date < time_off.start_date {
        return Err(ValidationError::InvertedTimeOffRange {
            id: time_off.id.clone(),
        });
    }
    Ok(())
}

pub fn validate_exception(exception: &CalendarException) -> Result<(), ValidationError> {
    if let Some(end) = exception.end_date {
        if end < exception.date {
            return Err(ValidationError::InvertedExceptionRange {
                date: exception.date,
            });
        }
    }
    Ok(())
}

pub fn validate_member(member: &TeamMember) -> Result<(), ValidationError> {
    if member.work_hours_per_day == 0 || member.work_hours_per_day > 24 {
        return Err(ValidationError::WorkHoursOutOfRange {
            id: member.id.clone(),
            hours: member.work_hours_per_day,
        });
    }
    Ok(())
}

/// Check a phase against its siblings: positive order, unique within project.
pub fn validate_phase(phase: &ProjectPhase, siblings: &[ProjectPhase]) -> Result<(), ValidationError> {
    if phase.phase_order == 0 {
        return Err(ValidationError::ZeroPhaseOrder {
            phase_id: phase.id.clone(),
        });
    }
    if let Some(other) = siblings.iter().find(|p| {
        p.id != phase.id && p.project_id == phase.project_id && p.phase_order == phase.phase_order
    }) {
        return Err(ValidationError::DuplicatePhaseOrder {
            phase_id: phase.id.clone(),
            other: other.id.clone(),
            order: phase.phase_order,
        });
    }
    Ok(())
}
