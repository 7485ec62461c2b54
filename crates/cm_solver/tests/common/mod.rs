#![allow(dead_code)]

use cm_core::CompartmentId;
use cm_tree::{CompartmentParams, CompartmentTree};

/// Numerical Recipes LCG; deterministic test data only.
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    pub fn below(&mut self, n: usize) -> usize {
        (self.next_u64() >> 33) as usize % n
    }
}

/// Random tree of `n` compartments; each new node hangs off an earlier one.
pub fn random_tree(n: usize, seed: u64) -> CompartmentTree {
    let mut rng = Lcg::new(seed);
    let mut tree = CompartmentTree::new();
    for i in 0..n {
        let parent = if i == 0 {
            None
        } else {
            Some(CompartmentId(rng.below(i) as u32))
        };
        let params = CompartmentParams::new(
            rng.range(0.01, 1.0),
            rng.range(0.01, 0.5),
            rng.range(0.001, 0.1),
            rng.range(-90.0, -20.0),
        );
        tree.add_compartment(parent, params).expect("random compartment");
    }
    tree
}

pub fn random_voltages(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = Lcg::new(seed);
    (0..n).map(|_| rng.range(-90.0, 0.0)).collect()
}

/// Gaussian elimination with partial pivoting on a dense copy.
pub fn dense_solve(matrix: &[Vec<f64>], rhs: &[f64]) -> Vec<f64> {
    let n = matrix.len();
    assert_eq!(rhs.len(), n, "rhs length must match matrix dimension");
    let mut aug: Vec<Vec<f64>> = matrix
        .iter()
        .zip(rhs)
        .map(|(row, &b)| {
            assert_eq!(row.len(), n, "dense_solve requires a square matrix");
            let mut row = row.clone();
            row.push(b);
            row
        })
        .collect();

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for row in (col + 1)..n {
            if aug[row][col].abs() > max_val {
                max_val = aug[row][col].abs();
                max_row = row;
            }
        }
        assert!(max_val > 1e-15, "matrix is singular or near-singular");
        aug.swap(col, max_row);

        let pivot = aug[col][col];
        for row in (col + 1)..n {
            let factor = aug[row][col] / pivot;
            for j in col..=n {
                aug[row][j] -= factor * aug[col][j];
            }
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = aug[i][n];
        for j in (i + 1)..n {
            sum -= aug[i][j] * x[j];
        }
        x[i] = sum / aug[i][i];
    }
    x
}
