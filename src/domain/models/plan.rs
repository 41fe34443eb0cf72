//! Plan domain model: the DAG of tasks a sprint executes.

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::task::Task;

/// The task graph produced by the planning stage, before wave assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn task(&self, id: u64) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: u64) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Validate that every dependency id resolves to a task in this plan.
    pub fn validate_dependencies(&self) -> DomainResult<()> {
        let ids: std::collections::HashSet<u64> = self.tasks.iter().map(|t| t.id).collect();
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !ids.contains(dep) {
                    return Err(DomainError::CorruptPlan(format!(
                        "task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }
        Ok(())
    }

    /// Detect a cycle via DFS, returning the cycle path (task ids) if one exists.
    pub fn detect_cycle(&self) -> Option<Vec<u64>> {
        let mut visited = std::collections::HashSet::new();
        let mut rec_stack = std::collections::HashSet::new();
        let mut path = Vec::new();

        for task in &self.tasks {
            if !visited.contains(&task.id) {
                if let Some(cycle) =
                    Self::detect_cycle_from(task.id, self, &mut visited, &mut rec_stack, &mut path)
                {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn detect_cycle_from(
        id: u64,
        plan: &Plan,
        visited: &mut std::collections::HashSet<u64>,
        rec_stack: &mut std::collections::HashSet<u64>,
        path: &mut Vec<u64>,
    ) -> Option<Vec<u64>> {
        visited.insert(id);
        rec_stack.insert(id);
        path.push(id);

        if let Some(task) = plan.task(id) {
            for &dep in &task.depends_on {
                if rec_stack.contains(&dep) {
                    let start = path.iter().position(|&x| x == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                if !visited.contains(&dep) {
                    if let Some(cycle) = Self::detect_cycle_from(dep, plan, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        rec_stack.remove(&id);
        None
    }

    /// Reject a plan with a cyclic or structurally invalid dependency graph.
    ///
    /// This is the gate applied at plan-ingest time (spec's structural
    /// error kind), before any task is ever scheduled into a wave.
    pub fn validate(&self) -> DomainResult<()> {
        self.validate_dependencies()?;
        if let Some(cycle) = self.detect_cycle() {
            let first = cycle.first().copied().unwrap_or(0);
            return Err(DomainError::DependencyCycle(first));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::Task;

    fn task_with_deps(id: u64, deps: &[u64]) -> Task {
        let mut t = Task::new(id, format!("task-{id}"), "d");
        t.depends_on = deps.to_vec();
        t
    }

    #[test]
    fn accepts_acyclic_dag() {
        let plan = Plan::new(vec![
            task_with_deps(1, &[]),
            task_with_deps(2, &[1]),
            task_with_deps(3, &[1, 2]),
        ]);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn rejects_self_cycle() {
        let plan = Plan::new(vec![task_with_deps(1, &[1])]);
        assert!(matches!(plan.validate(), Err(DomainError::DependencyCycle(_))));
    }

    #[test]
    fn rejects_longer_cycle() {
        let plan = Plan::new(vec![
            task_with_deps(1, &[3]),
            task_with_deps(2, &[1]),
            task_with_deps(3, &[2]),
        ]);
        assert!(matches!(plan.validate(), Err(DomainError::DependencyCycle(_))));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let plan = Plan::new(vec![task_with_deps(1, &[99])]);
        assert!(matches!(plan.validate(), Err(DomainError::CorruptPlan(_))));
    }
}
