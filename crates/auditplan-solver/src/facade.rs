//! Store-driven scheduling entry point.
//!
//! Loads a project's rows through the [`RecordStore`] trait, validates them,
//! composes the project calendar and runs the requested scheduling variant.
//! This is the call the application layer makes; everything below it is pure.

use tracing::info;

use auditplan_core::{
    validate, RecordStore, ScheduleError, SchedulingResult, WorkCalendar,
};

use crate::cpm::{calculate_critical_path, ScheduleContext};
use crate::resource::{calculate_critical_path_with_resources, ResourceContext};

/// Knobs for a scheduling request.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleOptions {
    /// Compose per-assignee calendars in the forward pass
    pub resource_aware: bool,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self { resource_aware: true }
    }
}

/// Schedule a project straight from a record store.
pub fn schedule_from_store(
    store: &dyn RecordStore,
    project_id: &str,
    options: ScheduleOptions,
) -> Result<SchedulingResult, ScheduleError> {
    let project = store
        .project(project_id)
        .ok_or_else(|| ScheduleError::ProjectNotFound(project_id.to_string()))?;
    let project_start = project
        .start_date
        .ok_or_else(|| ScheduleError::MissingProjectStart(project_id.to_string()))?;

    let tasks = store.tasks(project_id);
    let dependencies = store.dependencies(project_id);
    let exceptions = store.calendar_exceptions(project_id);

    for task in &tasks {
        validate::validate_task(task)?;
    }
    for dep in &dependencies {
        validate::validate_dependency(dep)?;
    }
    for exception in &exceptions {
        validate::validate_exception(exception)?;
    }

    let calendar = WorkCalendar::for_project(project.working_days, &exceptions)?;
    let ctx = ScheduleContext::new(project_start, &calendar).with_anchor(project.end_date);

    info!(
        project = project_id,
        tasks = tasks.len(),
        dependencies = dependencies.len(),
        resource_aware = options.resource_aware,
        "scheduling project"
    );

    if options.resource_aware {
        let members = store.members(&project.organization_id);
        let assignments = store.assignments(project_id);
        let time_off = store.approved_time_off();
        let resources = ResourceContext {
            members: &members,
            assignments: &assignments,
            time_off: &time_off,
        };
        calculate_critical_path_with_resources(&tasks, &dependencies, &ctx, &resources)
    } else {
        calculate_critical_path(&tasks, &dependencies, &ctx)
    }
}
