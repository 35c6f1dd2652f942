//! Linear solvers for the per-step pressure system.
//!
//! The system matrix is symmetric positive definite and its off-diagonal
//! pattern is a forest (the duct network has no loops), so a direct LDL^T
//! factorization eliminating leaves first produces no fill-in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SolverType {
    /// Successive over-relaxation, warm-started from the previous pressures
    Sor,
    /// Direct LDL^T (Cholesky) factorization
    #[default]
    Cholesky,
}

/// Why an iterative solve was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveFailure {
    NotConverged,
    NonFinite,
}

/// Symmetric matrix whose graph is a forest.
#[derive(Debug, Clone)]
pub struct TreeMatrix {
    /// Parent of each node, `None` for roots
    parent: Vec<Option<usize>>,
    /// Nodes in breadth-first order, roots first
    order: Vec<usize>,
    /// Neighbors of each node (tree edges only)
    neighbors: Vec<Vec<usize>>,
    pub diag: Vec<f64>,
    /// Off-diagonal entry between a node and its parent
    pub offdiag: Vec<f64>,

    // Cached factorization
    factor_diag: Vec<f64>,
    factor_l: Vec<f64>,
    factored_from: Option<(Vec<f64>, Vec<f64>)>,
}

impl TreeMatrix {
    /// Build the structure from undirected edges. Repeated edges are merged,
    /// and the edge list must not contain cycles.
    pub fn new(num_nodes: usize, edges: &[(usize, usize)]) -> Self {
        let mut neighbors = vec![Vec::new(); num_nodes];
        for &(a, b) in edges {
            if a != b && !neighbors[a].contains(&b) {
                neighbors[a].push(b);
                neighbors[b].push(a);
            }
        }

        let mut parent = vec![None; num_nodes];
        let mut visited = vec![false; num_nodes];
        let mut order = Vec::with_capacity(num_nodes);
        for root in 0..num_nodes {
            if visited[root] {
                continue;
            }
            visited[root] = true;
            let mut queue = std::collections::VecDeque::from([root]);
            while let Some(node) = queue.pop_front() {
                order.push(node);
                for &next in &neighbors[node] {
                    if !visited[next] {
                        visited[next] = true;
                        parent[next] = Some(node);
                        queue.push_back(next);
                    }
                }
            }
        }

        Self {
            parent,
            order,
            neighbors,
            diag: vec![0.0; num_nodes],
            offdiag: vec![0.0; num_nodes],
            factor_diag: vec![0.0; num_nodes],
            factor_l: vec![0.0; num_nodes],
            factored_from: None,
        }
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    pub fn parent(&self, node: usize) -> Option<usize> {
        self.parent[node]
    }

    /// Clear all entries before assembly.
    pub fn clear(&mut self) {
        self.diag.iter_mut().for_each(|d| *d = 0.0);
        self.offdiag.iter_mut().for_each(|d| *d = 0.0);
    }

    /// Add `w` times the edge Laplacian of (a, b): `+w` on both diagonals, `-w` off the diagonal.
    pub fn add_edge_weight(&mut self, a: usize, b: usize, w: f64) {
        self.diag[a] += w;
        self.diag[b] += w;
        if self.parent[a] == Some(b) {
            self.offdiag[a] -= w;
        } else if self.parent[b] == Some(a) {
            self.offdiag[b] -= w;
        }
    }

    /// Off-diagonal entry between `a` and `b`.
    fn entry(&self, a: usize, b: usize) -> f64 {
        if self.parent[a] == Some(b) {
            self.offdiag[a]
        } else if self.parent[b] == Some(a) {
            self.offdiag[b]
        } else {
            0.0
        }
    }

    fn factorize(&mut self) {
        if let Some((diag, offdiag)) = &self.factored_from {
            if *diag == self.diag && *offdiag == self.offdiag {
                return;
            }
        }
        self.factor_diag.copy_from_slice(&self.diag);
        for &node in self.order.iter().rev() {
            let d = self.factor_diag[node];
            match self.parent[node] {
                Some(p) if d != 0.0 => {
                    let m = self.offdiag[node];
                    let l = m / d;
                    self.factor_l[node] = l;
                    self.factor_diag[p] -= l * m;
                }
                _ => self.factor_l[node] = 0.0,
            }
        }
        self.factored_from = Some((self.diag.clone(), self.offdiag.clone()));
    }

    /// Direct solve of `M x = b`, reusing the factorization while the matrix is unchanged.
    pub fn solve_direct(&mut self, b: &[f64], x: &mut [f64]) {
        self.factorize();
        x.copy_from_slice(b);
        for &node in self.order.iter().rev() {
            if let Some(p) = self.parent[node] {
                x[p] -= self.factor_l[node] * x[node];
            }
        }
        for (xi, d) in x.iter_mut().zip(&self.factor_diag) {
            *xi /= d;
        }
        for &node in &self.order {
            if let Some(p) = self.parent[node] {
                x[node] -= self.factor_l[node] * x[p];
            }
        }
    }

    /// SOR iteration starting from the current contents of `x`.
    ///
    /// Returns the number of sweeps on success.
    pub fn solve_sor(
        &self,
        b: &[f64],
        x: &mut [f64],
        omega: f64,
        tolerance: f64,
        max_iterations: usize,
    ) -> Result<usize, SolveFailure> {
        for iteration in 1..=max_iterations {
            let mut max_change: f64 = 0.0;
            let mut max_value: f64 = 0.0;
            for node in 0..self.len() {
                let sum: f64 = self.neighbors[node]
                    .iter()
                    .map(|&n| self.entry(node, n) * x[n])
                    .sum();
                let gs = (b[node] - sum) / self.diag[node];
                let next = x[node] + omega * (gs - x[node]);
                if !next.is_finite() {
                    return Err(SolveFailure::NonFinite);
                }
                max_change = max_change.max((next - x[node]).abs());
                max_value = max_value.max(next.abs());
                x[node] = next;
            }
            if max_change <= tolerance * (1.0 + max_value) {
                return Ok(iteration);
            }
        }
        Err(SolveFailure::NotConverged)
    }

    /// `M x`, used in tests and diagnostics.
    pub fn multiply(&self, x: &[f64]) -> Vec<f64> {
        (0..self.len())
            .map(|node| {
                self.diag[node] * x[node]
                    + self.neighbors[node]
                        .iter()
                        .map(|&n| self.entry(node, n) * x[n])
                        .sum::<f64>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    /// A chain 0-1-2-3 with a side branch 1-4-5 and an isolated node 6.
    fn sample() -> TreeMatrix {
        let mut m = TreeMatrix::new(7, &[(0, 1), (1, 2), (2, 3), (1, 4), (4, 5), (4, 1)]);
        m.clear();
        for node in 0..7 {
            m.diag[node] += 0.5 + node as f64 * 0.1;
        }
        for (a, b, w) in [(0, 1, 2.0), (1, 2, 1.5), (2, 3, 0.7), (1, 4, 0.3), (4, 5, 1.1)] {
            m.add_edge_weight(a, b, w);
        }
        m
    }

    #[test]
    fn direct_solution_satisfies_system() {
        let mut m = sample();
        let b = [1.0, -2.0, 0.5, 3.0, 0.0, 1.0, 2.0];
        let mut x = [0.0; 7];
        m.solve_direct(&b, &mut x);
        for (lhs, rhs) in m.multiply(&x).iter().zip(&b) {
            assert_abs_diff_eq!(lhs, rhs, epsilon = 1.0e-12);
        }
        // Cached factorization gives the same answer
        let mut y = [0.0; 7];
        m.solve_direct(&b, &mut y);
        assert_eq!(x, y);
    }

    #[test]
    fn sor_agrees_with_direct() {
        let mut m = sample();
        let b = [1.0, -2.0, 0.5, 3.0, 0.0, 1.0, 2.0];
        let mut direct = [0.0; 7];
        m.solve_direct(&b, &mut direct);
        let mut iterative = [0.0; 7];
        let sweeps = m.solve_sor(&b, &mut iterative, 1.5, 1.0e-13, 500).unwrap();
        assert!(sweeps > 1);
        for (a, b) in direct.iter().zip(&iterative) {
            assert_abs_diff_eq!(a, b, epsilon = 1.0e-9);
        }
    }

    #[test]
    fn sor_reports_non_convergence() {
        let m = sample();
        let mut x = [0.0; 7];
        let b = [1.0; 7];
        assert_eq!(m.solve_sor(&b, &mut x, 1.0, 0.0, 2), Err(SolveFailure::NotConverged));
    }
}
