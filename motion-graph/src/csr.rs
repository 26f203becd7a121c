/// A weighted directed graph in compressed sparse row form.
///
/// The out-edges of node `n` are `targets[offsets[n]..offsets[n + 1]]` with the matching `weights`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrGraph {
    offsets: Vec<usize>,
    targets: Vec<usize>,
    weights: Vec<f64>,
}

impl CsrGraph {
    pub fn node_count(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn edge_count(&self) -> usize {
        self.targets.len()
    }

    /// The `(target, weight)` pairs of the out-edges of `node`.
    pub fn edges(&self, node: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let range = self.offsets[node]..self.offsets[node + 1];
        self.targets[range.clone()]
            .iter()
            .copied()
            .zip(self.weights[range].iter().copied())
    }
}

/// Builds a [`CsrGraph`] from edges pushed in order of their source node.
///
/// Weights are sanitized on the way in: negative weights, which only arise from rounding, are
/// clamped to zero and non-finite weights drop their edge. The number of affected edges is kept
/// so that the caller can report it once.
#[derive(Debug, Clone)]
pub struct CsrBuilder {
    offsets: Vec<usize>,
    targets: Vec<usize>,
    weights: Vec<f64>,
    node_count: usize,
    clamped: usize,
    dropped: usize,
}

impl CsrBuilder {
    /// Preallocates room for exactly `edge_count` edges.
    pub fn with_capacity(node_count: usize, edge_count: usize) -> Self {
        let mut offsets = Vec::with_capacity(node_count + 1);
        offsets.push(0);
        Self {
            offsets,
            targets: Vec::with_capacity(edge_count),
            weights: Vec::with_capacity(edge_count),
            node_count,
            clamped: 0,
            dropped: 0,
        }
    }

    /// Adds an edge. Sources must be pushed in non-decreasing order.
    pub fn push(&mut self, source: usize, target: usize, weight: f64) {
        debug_assert!(source + 1 >= self.offsets.len(), "edges pushed out of order");
        debug_assert!(target < self.node_count);
        while self.offsets.len() <= source {
            self.offsets.push(self.targets.len());
        }
        let weight = if !weight.is_finite() {
            self.dropped += 1;
            return;
        } else if weight < 0.0 {
            self.clamped += 1;
            0.0
        } else {
            weight
        };
        self.targets.push(target);
        self.weights.push(weight);
    }

    /// The number of negative weights clamped to zero so far.
    pub fn clamped(&self) -> usize {
        self.clamped
    }

    /// The number of non-finite edges dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn build(mut self) -> CsrGraph {
        while self.offsets.len() <= self.node_count {
            self.offsets.push(self.targets.len());
        }
        CsrGraph {
            offsets: self.offsets,
            targets: self.targets,
            weights: self.weights,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rows_are_contiguous() {
        let mut builder = CsrBuilder::with_capacity(4, 4);
        builder.push(0, 1, 1.0);
        builder.push(0, 2, 2.0);
        builder.push(2, 3, -1e-12);
        builder.push(2, 1, f64::NAN);
        builder.push(2, 0, 3.0);
        assert_eq!(builder.clamped(), 1);
        assert_eq!(builder.dropped(), 1);
        let graph = builder.build();
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.edges(0).collect::<Vec<_>>(), vec![(1, 1.0), (2, 2.0)]);
        assert_eq!(graph.edges(1).count(), 0);
        assert_eq!(graph.edges(2).collect::<Vec<_>>(), vec![(3, 0.0), (0, 3.0)]);
        assert_eq!(graph.edges(3).count(), 0);
    }
}
