use super::{PlanError, PlanStep};
use std::collections::{BTreeMap, VecDeque};

/// Kahn's algorithm over the declared dependency edges. Returns indices
/// into `steps` in execution order, or `None` when a cycle keeps the
/// queue from consuming every node; the runner then falls back to input
/// order rather than refusing to run.
pub fn topological_order(steps: &[PlanStep]) -> Result<Option<Vec<usize>>, PlanError> {
    let mut index_by_id = BTreeMap::new();
    for (index, step) in steps.iter().enumerate() {
        if index_by_id.insert(step.id.as_str(), index).is_some() {
            return Err(PlanError::InvalidPlan(format!(
                "duplicate step id `{}`",
                step.id
            )));
        }
    }

    let mut adjacency = vec![Vec::new(); steps.len()];
    let mut indegree = vec![0usize; steps.len()];
    for (index, step) in steps.iter().enumerate() {
        for dep in &step.deps {
            let Some(&dep_index) = index_by_id.get(dep.as_str()) else {
                return Err(PlanError::InvalidPlan(format!(
                    "step `{}` depends on unknown step `{dep}`",
                    step.id
                )));
            };
            adjacency[dep_index].push(index);
            indegree[index] += 1;
        }
    }

    let mut queue = VecDeque::new();
    for (index, &degree) in indegree.iter().enumerate() {
        if degree == 0 {
            queue.push_back(index);
        }
    }

    let mut order = Vec::with_capacity(steps.len());
    while let Some(current) = queue.pop_front() {
        order.push(current);
        for &next in &adjacency[current] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() == steps.len() {
        Ok(Some(order))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepKind;
    use serde_json::json;

    fn step(id: &str, deps: &[&str]) -> PlanStep {
        PlanStep::new(id, StepKind::Audit, json!({})).with_deps(deps)
    }

    #[test]
    fn order_is_a_linear_extension_of_the_dag() {
        let steps = vec![
            step("c", &["a", "b"]),
            step("a", &[]),
            step("b", &["a"]),
        ];
        let order = topological_order(&steps)
            .expect("valid plan")
            .expect("acyclic");
        let position = |id: &str| {
            order
                .iter()
                .position(|&index| steps[index].id == id)
                .expect("present")
        };
        assert!(position("a") < position("b"));
        assert!(position("b") < position("c"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn cycles_yield_no_order() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert!(topological_order(&steps).expect("valid ids").is_none());
    }

    #[test]
    fn unknown_dependency_is_invalid() {
        let steps = vec![step("a", &["ghost"])];
        assert!(matches!(
            topological_order(&steps),
            Err(PlanError::InvalidPlan(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_invalid() {
        let steps = vec![step("a", &[]), step("a", &[])];
        assert!(matches!(
            topological_order(&steps),
            Err(PlanError::InvalidPlan(_))
        ));
    }
}
