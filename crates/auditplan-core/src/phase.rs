//! Phase gating: which phases are open for work.
//!
//! Phases form a chain ordered by `phase_order`. A phase is locked while the
//! previous phase still has open tasks. Lock state drives UI affordances; the
//! scheduler itself never enforces it.

use serde::{Deserialize, Serialize};

use crate::{PhaseId, ProjectPhase, Task, TaskStatus};

/// Why a phase is (un)locked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// The first phase in the chain is always open.
    FirstPhase,
    /// Every task of the previous phase is done (or it has none).
    PreviousPhaseComplete,
    /// The previous phase still has open tasks.
    PreviousPhaseIncomplete,
}

/// Lock state for a single phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseLockInfo {
    pub phase_id: PhaseId,
    pub is_locked: bool,
    pub reason: LockReason,
    pub blocked_by_phase_id: Option<PhaseId>,
    pub blocked_by_phase_name: Option<String>,
}

/// Compute lock state for every phase of a project.
///
/// Phases are considered in `phase_order` ascending; the inputs are not
/// mutated. A previous phase with no tasks never blocks.
pub fn phase_locks(phases: &[ProjectPhase], tasks: &[Task]) -> Vec<PhaseLockInfo> {
    let mut ordered: Vec<&ProjectPhase> = phases.iter().collect();
    ordered.sort_by_key(|p| p.phase_order);

    let mut locks = Vec::with_capacity(ordered.len());
    for (i, phase) in ordered.iter().enumerate() {
        if i == 0 {
            locks.push(PhaseLockInfo {
                phase_id: phase.id.clone(),
                is_locked: false,
                reason: LockReason::FirstPhase,
                blocked_by_phase_id: None,
                blocked_by_phase_name: None,
            });
            continue;
        }

        let previous = ordered[i - 1];
        let previous_complete = tasks
            .iter()
            .filter(|t| t.phase_id.as_deref() == Some(previous.id.as_str()))
            .all(|t| t.status == TaskStatus::Done);

        if previous_complete {
            locks.push(PhaseLockInfo {
                phase_id: phase.id.clone(),
                is_locked: false,
                reason: LockReason::PreviousPhaseComplete,
                blocked_by_phase_id: None,
                blocked_by_phase_name: None,
            });
        } else {
            locks.push(PhaseLockInfo {
                phase_id: phase.id.clone(),
                is_locked: true,
                reason: LockReason::PreviousPhaseIncomplete,
                blocked_by_phase_id: Some(previous.id.clone()),
                blocked_by_phase_name: Some(previous.name.clone()),
            });
        }
    }
    locks
}

/// Look up a phase's lock state; unknown phase ids are not locked.
pub fn is_phase_locked(locks: &[PhaseLockInfo], phase_id: &str) -> bool {
    locks
        .iter()
        .find(|l| l.phase_id == phase_id)
        .is_some_and(|l| l.is_locked)
}
