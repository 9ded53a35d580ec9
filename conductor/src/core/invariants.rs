//! Semantic invariants not expressible via JSON Schema.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::types::{ExecutionStep, FileOperation, FilePlan, ProjectPlan};

/// Check plan invariants not expressible in JSON Schema:
/// - At least one step
/// - Non-empty, unique task ids
/// - Dependencies reference declared ids, never the step itself
/// - No dependency cycles
/// - Every dependency is listed before its dependent
pub fn validate_plan(plan: &ProjectPlan) -> Vec<String> {
    let mut errors = Vec::new();
    if plan.steps.is_empty() {
        errors.push("plan has no steps".to_string());
        return errors;
    }

    let mut seen = HashSet::new();
    for step in &plan.steps {
        if step.task_id.trim().is_empty() {
            errors.push("step with empty taskId".to_string());
        } else if !seen.insert(step.task_id.as_str()) {
            errors.push(format!("duplicate taskId '{}'", step.task_id));
        }
    }

    let position: HashMap<&str, usize> = plan
        .steps
        .iter()
        .enumerate()
        .map(|(idx, step)| (step.task_id.as_str(), idx))
        .collect();

    for (idx, step) in plan.steps.iter().enumerate() {
        for dep in &step.id_dependencies {
            if dep == &step.task_id {
                errors.push(format!("{}: depends on itself", step.task_id));
                continue;
            }
            match position.get(dep.as_str()) {
                None => errors.push(format!("{}: unknown dependency '{}'", step.task_id, dep)),
                Some(&dep_idx) if dep_idx > idx => errors.push(format!(
                    "{}: dependency '{}' is listed after its dependent",
                    step.task_id, dep
                )),
                Some(_) => {}
            }
        }
    }

    if stable_topological_order(&plan.steps).is_none() {
        errors.push("dependency cycle between steps".to_string());
    }

    errors
}

/// Reorder steps so every dependency precedes its dependent.
///
/// Ties keep their original relative order. Unknown and self dependencies are
/// ignored here (`validate_plan` reports them). Returns `None` on a cycle.
pub fn stable_topological_order(steps: &[ExecutionStep]) -> Option<Vec<usize>> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(idx, step)| (step.task_id.as_str(), idx))
        .collect();

    let mut indegree = vec![0usize; steps.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (idx, step) in steps.iter().enumerate() {
        let deps: HashSet<usize> = step
            .id_dependencies
            .iter()
            .filter_map(|dep| index.get(dep.as_str()).copied())
            .filter(|&dep_idx| dep_idx != idx)
            .collect();
        indegree[idx] = deps.len();
        for dep_idx in deps {
            dependents[dep_idx].push(idx);
        }
    }

    // Ready set keyed by original position keeps the order stable.
    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(idx, _)| idx)
        .collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(idx) = ready.pop_first() {
        order.push(idx);
        for &next in &dependents[idx] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    (order.len() == steps.len()).then_some(order)
}

/// Accept a plan whose only defect is step order by reordering it.
///
/// Any other violation is returned unchanged for the caller to report.
pub fn normalize_plan(mut plan: ProjectPlan) -> Result<ProjectPlan, Vec<String>> {
    if let Some(order) = stable_topological_order(&plan.steps) {
        let mut slots: Vec<Option<ExecutionStep>> = plan.steps.into_iter().map(Some).collect();
        plan.steps = order.into_iter().filter_map(|idx| slots[idx].take()).collect();
    }
    let errors = validate_plan(&plan);
    if errors.is_empty() {
        Ok(plan)
    } else {
        Err(errors)
    }
}

/// Structural checks on a proposed file plan.
pub fn validate_file_plan(plan: &FilePlan) -> Vec<String> {
    let mut errors = Vec::new();
    if plan.operations.is_empty() {
        errors.push("file plan has no operations (use noOp to propose no change)".to_string());
    }
    for (idx, op) in plan.operations.iter().enumerate() {
        if let Some(path) = op.path()
            && path.trim().is_empty()
        {
            errors.push(format!("operation {idx}: empty path"));
        }
        if let FileOperation::Edit { edits, .. } = op {
            if edits.is_empty() {
                errors.push(format!("operation {idx}: edit without edits"));
            }
            for edit in edits {
                if edit.range.start > edit.range.end {
                    errors.push(format!("operation {idx}: range start after end"));
                }
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::step;

    fn plan(steps: Vec<ExecutionStep>) -> ProjectPlan {
        ProjectPlan {
            strategy: "strategy".to_string(),
            steps,
        }
    }

    #[test]
    fn valid_plan_has_no_errors() {
        let plan = plan(vec![step("1", &[]), step("2", &["1"]), step("3", &["1", "2"])]);
        assert!(validate_plan(&plan).is_empty());
    }

    #[test]
    fn reports_duplicate_unknown_and_self_dependencies() {
        let plan = plan(vec![step("1", &["1"]), step("1", &[]), step("2", &["9"])]);
        let errors = validate_plan(&plan);
        assert!(errors.iter().any(|e| e.contains("duplicate taskId")));
        assert!(errors.iter().any(|e| e.contains("depends on itself")));
        assert!(errors.iter().any(|e| e.contains("unknown dependency '9'")));
    }

    #[test]
    fn reports_cycles_and_forward_references() {
        let plan = plan(vec![step("1", &["2"]), step("2", &["1"])]);
        let errors = validate_plan(&plan);
        assert!(errors.iter().any(|e| e.contains("cycle")));
        assert!(errors.iter().any(|e| e.contains("listed after")));
    }

    #[test]
    fn normalize_reorders_acyclic_plan_stably() {
        let plan = plan(vec![
            step("b", &["a"]),
            step("c", &[]),
            step("a", &[]),
            step("d", &["b"]),
        ]);
        let normalized = normalize_plan(plan).expect("normalize");
        let ids: Vec<&str> = normalized.steps.iter().map(|s| s.task_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn normalize_rejects_cycles() {
        let plan = plan(vec![step("1", &["2"]), step("2", &["1"])]);
        let errors = normalize_plan(plan).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn empty_plan_is_invalid() {
        assert_eq!(validate_plan(&plan(Vec::new())), vec!["plan has no steps"]);
    }

    #[test]
    fn file_plan_without_operations_is_invalid() {
        let plan = FilePlan {
            task_id: None,
            summary: "s".to_string(),
            operations: Vec::new(),
            research_notes: None,
            reasoning: "r".to_string(),
        };
        assert_eq!(validate_file_plan(&plan).len(), 1);
    }
}
