//! # auditplan-solver
//!
//! Critical Path Method scheduling for auditplan projects.
//!
//! The solver turns a declarative description (tasks, dependencies,
//! calendars, assignments, time-off) into a fully positioned schedule:
//! early/late dates, signed slack, the critical path and the project end.
//!
//! References:
//!   - Kelley & Walker (1959) "Critical-Path Planning and Scheduling"
//!   - PMI PMBOK Guide, Chapter 6
//!
//! Entry points:
//! - [`calculate_critical_path`]: project calendar only
//! - [`calculate_critical_path_with_resources`]: per-assignee calendars in
//!   the forward pass
//! - [`schedule_from_store`]: load, validate and schedule from a
//!   [`auditplan_core::RecordStore`]
//!
//! ```rust
//! use auditplan_core::{Dependency, Task, WeekdaySet, WorkCalendar};
//! use auditplan_solver::{calculate_critical_path, ScheduleContext};
//! use chrono::NaiveDate;
//!
//! let calendar = WorkCalendar::new(WeekdaySet::sun_thu(), []).unwrap();
//! let tasks = vec![
//!     Task::new("plan", "p1").duration(3),
//!     Task::new("execute", "p1").duration(5),
//! ];
//! let deps = vec![Dependency::finish_to_start("plan", "execute")];
//! let start = NaiveDate::from_ymd_opt(2026, 1, 18).unwrap();
//!
//! let ctx = ScheduleContext::new(start, &calendar);
//! let result = calculate_critical_path(&tasks, &deps, &ctx).unwrap();
//! assert_eq!(result.critical_path, vec!["plan".to_string(), "execute".to_string()]);
//! ```

pub mod cpm;
pub mod facade;
pub mod graph;
pub mod resource;
pub mod summary;

pub use cpm::{calculate_critical_path, ScheduleContext};
pub use facade::{schedule_from_store, ScheduleOptions};
pub use graph::{Edge, GraphError, TaskGraph};
pub use resource::{
    calculate_critical_path_with_resources, estimate_duration_with_time_off, ResourceContext,
    TimeOffImpact,
};
pub use summary::ScheduleSummary;
