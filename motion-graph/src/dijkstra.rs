use crate::CsrGraph;
use float_ord::FloatOrd;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Single source shortest paths over non-negative weights.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortestPaths {
    pub source: usize,
    pub distances: Vec<f64>,
    pub predecessors: Vec<Option<usize>>,
}

impl ShortestPaths {
    /// The nodes from the source to `target`, both included, or `None` if `target` is unreachable.
    pub fn path_to(&self, target: usize) -> Option<Vec<usize>> {
        let mut path = vec![target];
        let mut node = target;
        while node != self.source {
            node = self.predecessors[node]?;
            path.push(node);
        }
        path.reverse();
        Some(path)
    }
}

/// Runs Dijkstra's algorithm from `source`.
pub fn shortest_paths(graph: &CsrGraph, source: usize) -> ShortestPaths {
    let node_count = graph.node_count();
    let mut distances = vec![f64::INFINITY; node_count];
    let mut predecessors = vec![None; node_count];
    let mut settled = vec![false; node_count];
    let mut heap = BinaryHeap::new();

    distances[source] = 0.0;
    heap.push(Reverse((FloatOrd(0.0), source)));
    while let Some(Reverse((FloatOrd(distance), node))) = heap.pop() {
        if settled[node] {
            continue;
        }
        settled[node] = true;
        for (target, weight) in graph.edges(node) {
            let candidate = distance + weight;
            if candidate < distances[target] {
                distances[target] = candidate;
                predecessors[target] = Some(node);
                heap.push(Reverse((FloatOrd(candidate), target)));
            }
        }
    }

    ShortestPaths {
        source,
        distances,
        predecessors,
    }
}
