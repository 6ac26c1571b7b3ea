//! Dependency graph construction and validation.
//!
//! Tasks stay in a borrowed arena (the input slice); the graph holds integer
//! indices into it. Dependency records are resolved to index pairs up front,
//! duplicate (predecessor, successor) pairs collapse to the most recently
//! asserted kind and lag, and Kahn's algorithm fixes a topological order
//! or reports the cycle.

use std::collections::{HashMap, VecDeque};

use auditplan_core::{Dependency, DependencyKind, ScheduleError, Task, TaskId};
use thiserror::Error;

/// Errors during graph construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Cycle detected in dependencies
    #[error("cycle detected involving tasks: {task_ids:?}")]
    CycleDetected { task_ids: Vec<TaskId> },

    /// A dependency references a task that doesn't exist
    #[error("dependency '{predecessor_id}' -> '{successor_id}' references missing task '{missing}'")]
    MissingDependency {
        predecessor_id: TaskId,
        successor_id: TaskId,
        missing: TaskId,
    },

    /// Negative duration on a task
    #[error("task '{task_id}' has invalid duration {duration}")]
    InvalidDuration { task_id: TaskId, duration: i64 },
}

impl From<GraphError> for ScheduleError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::CycleDetected { task_ids } => ScheduleError::CycleDetected { task_ids },
            GraphError::MissingDependency {
                predecessor_id,
                successor_id,
                missing,
            } => ScheduleError::UnresolvedPredecessor {
                predecessor_id,
                successor_id,
                missing,
            },
            GraphError::InvalidDuration { task_id, duration } => {
                ScheduleError::InvalidDuration { task_id, duration }
            }
        }
    }
}

/// A resolved dependency edge between task indices.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    /// Index of the predecessor task
    pub predecessor: usize,
    /// Index of the successor task
    pub successor: usize,
    pub kind: DependencyKind,
    /// Lag in working days (negative for lead time)
    pub lag_days: i64,
}

/// A flattened, schedulable view over a borrowed task slice.
#[derive(Debug)]
pub struct TaskGraph<'a> {
    /// The task arena, in input order
    pub tasks: &'a [Task],
    /// Incoming edges per task index
    pub predecessors: Vec<Vec<Edge>>,
    /// Outgoing edges per task index
    pub successors: Vec<Vec<Edge>>,
    /// Topological order over task indices
    pub topo_order: Vec<usize>,
    index: HashMap<&'a str, usize>,
}

impl<'a> TaskGraph<'a> {
    /// Build the graph, validating durations, resolving dependency
    /// references and checking acyclicity.
    pub fn build(tasks: &'a [Task], dependencies: &[Dependency]) -> Result<Self, GraphError> {
        for task in tasks {
            if task.duration < 0 {
                return Err(GraphError::InvalidDuration {
                    task_id: task.id.clone(),
                    duration: task.duration,
                });
            }
        }

        let index: HashMap<&str, usize> =
            tasks.iter().enumerate().map(|(i, t)| (t.id.as_str(), i)).collect();

        // Resolve to index edges; a re-asserted pair overwrites kind and lag
        // in place, keeping its original position.
        let mut edges: Vec<Edge> = Vec::with_capacity(dependencies.len());
        let mut seen: HashMap<(usize, usize), usize> = HashMap::new();
        for dep in dependencies {
            let resolve = |id: &TaskId| -> Result<usize, GraphError> {
                index.get(id.as_str()).copied().ok_or_else(|| {
                    GraphError::MissingDependency {
                        predecessor_id: dep.predecessor_id.clone(),
                        successor_id: dep.successor_id.clone(),
                        missing: id.clone(),
                    }
                })
            };
            let predecessor = resolve(&dep.predecessor_id)?;
            let successor = resolve(&dep.successor_id)?;
            match seen.get(&(predecessor, successor)) {
                Some(&at) => {
                    edges[at].kind = dep.kind;
                    edges[at].lag_days = dep.lag_days;
                }
                None => {
                    seen.insert((predecessor, successor), edges.len());
                    edges.push(Edge {
                        predecessor,
                        successor,
                        kind: dep.kind,
                        lag_days: dep.lag_days,
                    });
                }
            }
        }

        let mut predecessors: Vec<Vec<Edge>> = vec![Vec::new(); tasks.len()];
        let mut successors: Vec<Vec<Edge>> = vec![Vec::new(); tasks.len()];
        for edge in &edges {
            predecessors[edge.successor].push(*edge);
            successors[edge.predecessor].push(*edge);
        }

        let topo_order = topological_sort(tasks, &successors)?;

        Ok(Self {
            tasks,
            predecessors,
            successors,
            topo_order,
            index,
        })
    }

    /// Index of a task by id.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }
}

/// Kahn's algorithm over index adjacency. Ready tasks are taken in input
/// order, so scheduling output is stable for identical input.
fn topological_sort(
    tasks: &[Task],
    successors: &[Vec<Edge>],
) -> Result<Vec<usize>, GraphError> {
    let mut in_degree = vec![0usize; tasks.len()];
    for edges in successors {
        for edge in edges {
            in_degree[edge.successor] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(i) = queue.pop_front() {
        order.push(i);
        for edge in &successors[i] {
            in_degree[edge.successor] -= 1;
            if in_degree[edge.successor] == 0 {
                queue.push_back(edge.successor);
            }
        }
    }

    if order.len() != tasks.len() {
        let mut placed = vec![false; tasks.len()];
        for &i in &order {
            placed[i] = true;
        }
        let task_ids: Vec<TaskId> = tasks
            .iter()
            .enumerate()
            .filter(|(i, _)| !placed[*i])
            .map(|(_, t)| t.id.clone())
            .collect();
        tracing::warn!(?task_ids, "dependency cycle detected");
        return Err(GraphError::CycleDetected { task_ids });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditplan_core::Task;

    fn task(id: &str, duration: i64) -> Task {
        Task::new(id, "p1").duration(duration)
    }

    #[test]
    fn builds_adjacency_both_ways() {
        let tasks = vec![task("a", 5), task("b", 3)];
        let deps = vec![Dependency::finish_to_start("a", "b")];
        let graph = TaskGraph::build(&tasks, &deps).unwrap();

        assert_eq!(graph.successors[0].len(), 1);
        assert_eq!(graph.predecessors[1].len(), 1);
        assert_eq!(graph.successors[0][0].successor, 1);
        assert_eq!(graph.topo_order, vec![0, 1]);
    }

    #[test]
    fn reasserted_pair_keeps_latest_kind_and_lag() {
        let tasks = vec![task("a", 5), task("b", 3)];
        let deps = vec![
            Dependency::finish_to_start("a", "b"),
            Dependency::new("a", "b", DependencyKind::StartToStart, 2),
        ];
        let graph = TaskGraph::build(&tasks, &deps).unwrap();

        assert_eq!(graph.predecessors[1].len(), 1);
        let edge = &graph.predecessors[1][0];
        assert_eq!(edge.kind, DependencyKind::StartToStart);
        assert_eq!(edge.lag_days, 2);
    }

    #[test]
    fn missing_reference_is_reported() {
        let tasks = vec![task("a", 5)];
        let deps = vec![Dependency::finish_to_start("ghost", "a")];
        let err = TaskGraph::build(&tasks, &deps).unwrap_err();
        assert!(matches!(
            err,
            GraphError::MissingDependency { ref missing, .. } if missing == "ghost"
        ));
    }

    #[test]
    fn negative_duration_is_fatal() {
        let tasks = vec![task("a", -3)];
        let err = TaskGraph::build(&tasks, &[]).unwrap_err();
        assert!(matches!(err, GraphError::InvalidDuration { duration: -3, .. }));
    }

    #[test]
    fn cycle_lists_unplaced_tasks() {
        let tasks = vec![task("a", 1), task("b", 1), task("c", 1)];
        let deps = vec![
            Dependency::finish_to_start("a", "b"),
            Dependency::finish_to_start("b", "a"),
        ];
        let err = TaskGraph::build(&tasks, &deps).unwrap_err();
        match err {
            GraphError::CycleDetected { task_ids } => {
                assert_eq!(task_ids, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn graph_errors_convert_into_the_shared_taxonomy() {
        let err: ScheduleError = GraphError::MissingDependency {
            predecessor_id: "ghost".into(),
            successor_id: "a".into(),
            missing: "ghost".into(),
        }
        .into();
        assert!(matches!(
            err,
            ScheduleError::UnresolvedPredecessor { ref missing, .. } if missing == "ghost"
        ));
    }

    #[test]
    fn independent_tasks_keep_input_order() {
        let tasks = vec![task("z", 1), task("m", 1), task("a", 1)];
        let graph = TaskGraph::build(&tasks, &[]).unwrap();
        assert_eq!(graph.topo_order, vec![0, 1, 2]);
    }
}
