//! Ordering of streams by their dependencies.
//!
//! Dependencies are buffered dataflows plus implicit (dynamic parameter)
//! edges; both mean "source before target".

use std::collections::VecDeque;

/// Kahn's algorithm over `n` nodes. Ties are broken by node index, so the
/// order is deterministic for a given graph.
///
/// On a cycle, returns the nodes that could not be ordered.
pub fn topological_order(n: usize, edges: &[(usize, usize)]) -> Result<Vec<usize>, Vec<usize>> {
    let mut in_degree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(u, v) in edges {
        in_degree[v] += 1;
        dependents[u].push(v);
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(u) = ready.pop_front() {
        order.push(u);
        for &v in &dependents[u] {
            in_degree[v] -= 1;
            if in_degree[v] == 0 {
                ready.push_back(v);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err((0..n).filter(|&i| in_degree[i] > 0).collect())
    }
}

/// Every node `target` depends on, directly or through other nodes.
pub fn ancestors(n: usize, edges: &[(usize, usize)], target: usize) -> Vec<usize> {
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &(u, v) in edges {
        preds[v].push(u);
    }
    let mut seen = vec![false; n];
    let mut stack = preds[target].clone();
    let mut out = Vec::new();
    while let Some(u) = stack.pop() {
        if seen[u] {
            continue;
        }
        seen[u] = true;
        out.push(u);
        stack.extend(preds[u].iter().copied());
    }
    out.sort_unstable();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_leaves_first() {
        // 0 -> 2, 1 -> 2, 2 -> 3
        let order = topological_order(4, &[(0, 2), (1, 2), (2, 3)]).unwrap();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn ties_follow_insertion_index() {
        let order = topological_order(3, &[(2, 0)]).unwrap();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn reports_cycle_members() {
        let err = topological_order(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]).unwrap_err();
        assert_eq!(err, vec![1, 2, 3]);
    }

    #[test]
    fn transitive_ancestors() {
        let edges = [(0, 1), (1, 3), (2, 3), (4, 0)];
        assert_eq!(ancestors(5, &edges, 3), vec![0, 1, 2, 4]);
        assert!(ancestors(5, &edges, 4).is_empty());
    }
}
