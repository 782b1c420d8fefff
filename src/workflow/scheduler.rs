//! Dependency Leveling
//!
//! Groups workflow steps into levels: every step in a level depends only on
//! steps in earlier levels, so a level can be dispatched concurrently once
//! the previous one has settled. Steps that can never be placed (cycles,
//! references to unknown ids) are reported as unscheduled instead of
//! blocking the rest of the workflow.

use std::collections::HashSet;

use super::definition::{Step, Workflow};
use crate::{Error, Result};

/// Execution plan for a workflow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Step ids grouped by level, declaration order within a level
    pub levels: Vec<Vec<String>>,
    /// Step ids that could not be placed in any level
    pub unscheduled: Vec<String>,
}

impl ExecutionPlan {
    pub fn from_workflow(workflow: &Workflow) -> Self {
        Self::from_steps(&workflow.steps)
    }

    /// Level `steps`.
    ///
    /// Each round collects every unprocessed step whose dependencies have all
    /// been processed. Leveling stops at the first round that places nothing.
    pub fn from_steps(steps: &[Step]) -> Self {
        let mut processed: HashSet<&str> = HashSet::new();
        let mut levels = Vec::new();

        loop {
            let level: Vec<&Step> = steps
                .iter()
                .filter(|s| !processed.contains(s.id.as_str()))
                .filter(|s| s.depends_on.iter().all(|d| processed.contains(d.as_str())))
                .collect();

            if level.is_empty() {
                break;
            }

            for step in &level {
                processed.insert(step.id.as_str());
            }
            levels.push(level.iter().map(|s| s.id.clone()).collect());
        }

        let unscheduled = steps
            .iter()
            .filter(|s| !processed.contains(s.id.as_str()))
            .map(|s| s.id.clone())
            .collect();

        Self { levels, unscheduled }
    }

    /// True when every step was placed in a level
    pub fn is_complete(&self) -> bool {
        self.unscheduled.is_empty()
    }

    /// Fail with [`Error::Dependency`] if any step is unscheduled
    pub fn require_complete(&self) -> Result<()> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(Error::Dependency(format!(
                "unresolvable dependencies for steps: {}",
                self.unscheduled.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> Step {
        Step::delay(id, 0).depends_on(deps)
    }

    #[test]
    fn test_simple_chain() {
        let plan = ExecutionPlan::from_steps(&[step("a", &[]), step("b", &["a"])]);
        assert_eq!(plan.levels, vec![vec!["a"], vec!["b"]]);
        assert!(plan.is_complete());
        assert!(plan.require_complete().is_ok());
    }

    #[test]
    fn test_diamond() {
        let plan = ExecutionPlan::from_steps(&[
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        assert_eq!(plan.levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn test_independent_steps_share_level() {
        let plan = ExecutionPlan::from_steps(&[step("a", &[]), step("b", &[]), step("c", &[])]);
        assert_eq!(plan.levels.len(), 1);
        assert_eq!(plan.levels[0], vec!["a", "b", "c"]);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let plan = ExecutionPlan::from_steps(&[step("b", &["a"]), step("a", &[])]);
        assert_eq!(plan.levels, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn test_cycle_is_unscheduled() {
        let plan = ExecutionPlan::from_steps(&[
            step("root", &[]),
            step("a", &["b"]),
            step("b", &["a"]),
        ]);
        assert_eq!(plan.levels, vec![vec!["root"]]);
        assert_eq!(plan.unscheduled, vec!["a", "b"]);
        assert!(matches!(plan.require_complete(), Err(Error::Dependency(_))));
    }

    #[test]
    fn test_missing_dependency_is_unscheduled() {
        let plan = ExecutionPlan::from_steps(&[step("a", &["ghost"]), step("b", &["a"])]);
        assert!(plan.levels.is_empty());
        assert_eq!(plan.unscheduled, vec!["a", "b"]);
    }

    #[test]
    fn test_self_dependency_is_unscheduled() {
        let plan = ExecutionPlan::from_steps(&[step("a", &["a"])]);
        assert_eq!(plan.unscheduled, vec!["a"]);
    }
}
