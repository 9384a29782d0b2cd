use std::collections::VecDeque;

use super::NodeIndex;

/// Kahn's algorithm over a forest of single-receiver edges.
///
/// Returns an order in which every node precedes its receiver, or the index
/// of a node that sits on a cycle.
pub(super) fn topological_order(downstream: &[Option<NodeIndex>]) -> Result<Vec<NodeIndex>, NodeIndex> {
    let n = downstream.len();
    let mut in_degree = vec![0usize; n];
    for receiver in downstream.iter().flatten() {
        in_degree[*receiver] += 1;
    }

    let mut queue: VecDeque<NodeIndex> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(i) = queue.pop_front() {
        order.push(i);
        if let Some(d) = downstream[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                queue.push_back(d);
            }
        }
    }

    if order.len() < n {
        // Nodes left with positive in-degree are on (or fed only by) a cycle
        let stuck = (0..n).find(|&i| in_degree[i] > 0).unwrap_or(0);
        return Err(stuck);
    }
    Ok(order)
}
