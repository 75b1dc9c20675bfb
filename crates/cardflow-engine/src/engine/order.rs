//! Dependency ordering and workflow-shape checks.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::ValidationError;

/// A node of the dependency graph: step id and the ids it depends on.
pub type Node<'a> = (&'a str, &'a [String]);

/// Topologically sort `nodes` (Kahn's algorithm).
///
/// Returns indices into `nodes`. Among steps that become eligible at the same
/// time, the one defined first runs first. Dependencies on unknown ids are
/// ignored here; [`check`] reports them. On a cycle, returns the ids that
/// could not be placed, in definition order.
pub fn execution_order(nodes: &[Node<'_>]) -> Result<Vec<usize>, Vec<String>> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, (id, _)) in nodes.iter().enumerate() {
        index.entry(*id).or_insert(i);
    }

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, (_, deps)) in nodes.iter().enumerate() {
        let unique: HashSet<&str> = deps.iter().map(String::as_str).collect();
        for dep in unique {
            if let Some(&d) = index.get(dep) {
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == nodes.len() {
        Ok(order)
    } else {
        let placed: HashSet<usize> = order.into_iter().collect();
        Err(nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| !placed.contains(i))
            .map(|(_, (id, _))| id.to_string())
            .collect())
    }
}

/// Collect every shape problem: duplicate ids, unknown dependencies, cycles.
pub fn check(nodes: &[Node<'_>]) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for (id, _) in nodes {
        if !seen.insert(*id) {
            errors.push(ValidationError::DuplicateStepId(id.to_string()));
        }
    }

    for (id, deps) in nodes {
        for dep in deps.iter() {
            if !seen.contains(dep.as_str()) {
                errors.push(ValidationError::UnknownDependency {
                    step: id.to_string(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    if let Err(unplaced) = execution_order(nodes) {
        errors.push(ValidationError::CircularDependency(unplaced));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn ids(nodes: &[Node<'_>], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| nodes[i].0.to_string()).collect()
    }

    #[test]
    fn test_dependencies_come_first() {
        let (a, b, c, d) = (deps(&["b", "c"]), deps(&[]), deps(&["b"]), deps(&["a"]));
        let nodes: Vec<Node> = vec![("a", &a[..]), ("b", &b[..]), ("c", &c[..]), ("d", &d[..])];

        let order = execution_order(&nodes).unwrap();
        assert_eq!(ids(&nodes, &order), vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_ties_follow_definition_order() {
        let none = deps(&[]);
        let on_first = deps(&["first"]);
        let nodes: Vec<Node> = vec![
            ("first", &none[..]),
            ("late", &on_first[..]),
            ("second", &none[..]),
            ("third", &none[..]),
        ];
        let order = execution_order(&nodes).unwrap();
        assert_eq!(ids(&nodes, &order), vec!["first", "late", "second", "third"]);
        assert_eq!(execution_order(&nodes).unwrap(), order);
    }

    #[test]
    fn test_cycle_reports_unplaced_steps() {
        let (a, b, c, root) = (deps(&["c"]), deps(&["a"]), deps(&["b"]), deps(&[]));
        let nodes: Vec<Node> = vec![("root", &root[..]), ("a", &a[..]), ("b", &b[..]), ("c", &c[..])];

        let unplaced = execution_order(&nodes).unwrap_err();
        assert_eq!(unplaced, vec!["a", "b", "c"]);

        let errors = check(&nodes);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("a, b, c"));
    }

    #[test]
    fn test_check_duplicates_and_unknown() {
        let none = deps(&[]);
        let bad = deps(&["nonexistent"]);
        let nodes: Vec<Node> = vec![("a", &none[..]), ("a", &none[..]), ("b", &bad[..])];

        let errors = check(&nodes);
        assert!(errors.contains(&ValidationError::DuplicateStepId("a".into())));
        assert!(errors.contains(&ValidationError::UnknownDependency {
            step: "b".into(),
            dependency: "nonexistent".into(),
        }));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let own = deps(&["a"]);
        let nodes: Vec<Node> = vec![("a", &own[..])];
        assert_eq!(execution_order(&nodes).unwrap_err(), vec!["a"]);
    }

    #[test]
    fn test_empty() {
        assert!(execution_order(&[]).unwrap().is_empty());
        assert!(check(&[]).is_empty());
    }
}
