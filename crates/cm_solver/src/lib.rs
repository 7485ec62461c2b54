#![forbid(unsafe_code)]

mod assemble;

pub use assemble::{assemble, steady_state_matrix, LinearSystem};

use cm_core::CompartmentId;
use cm_tree::CompartmentTree;
use thiserror::Error;
use tracing::warn;

/// Pivots at or below this fraction of the unreduced diagonal are singular.
pub const PIVOT_RELATIVE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("system assembly failed: {reason}")]
    Assembly { reason: String },
    #[error("singular system: pivot {pivot} at compartment {compartment:?}")]
    SingularSystem {
        compartment: CompartmentId,
        pivot: f64,
    },
}

/// Hines elimination for systems whose graph is the compartment tree.
///
/// Leaves are folded into their parents in post-order, then voltages are
/// recovered root-first. Both sweeps are linear in the compartment count.
#[derive(Debug, Clone, Default)]
pub struct TreeSolver {
    diag: Vec<f64>,
    rhs: Vec<f64>,
}

impl TreeSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn solve(
        &mut self,
        system: &LinearSystem,
        tree: &CompartmentTree,
        out: &mut [f64],
    ) -> Result<(), SolveError> {
        let n = tree.len();
        if system.len() != n || system.off.len() != n || system.rhs.len() != n || out.len() != n {
            return Err(SolveError::Assembly {
                reason: format!(
                    "system of size {} and output of size {} do not match {n} compartments",
                    system.len(),
                    out.len()
                ),
            });
        }

        self.diag.clear();
        self.diag.extend_from_slice(&system.diag);
        self.rhs.clear();
        self.rhs.extend_from_slice(&system.rhs);

        for &id in tree.elimination_order() {
            let i = id.index();
            let pivot = self.checked_pivot(system, id)?;
            let Some(parent) = tree.get(id).and_then(|compartment| compartment.parent) else {
                continue;
            };
            let p = parent.index();
            let factor = system.off[i] / pivot;
            self.diag[p] -= factor * system.off[i];
            self.rhs[p] -= factor * self.rhs[i];
        }

        for id in tree.substitution_order() {
            let i = id.index();
            let coupled = match tree.get(id).and_then(|compartment| compartment.parent) {
                Some(parent) => system.off[i] * out[parent.index()],
                None => 0.0,
            };
            out[i] = (self.rhs[i] - coupled) / self.diag[i];
        }
        Ok(())
    }

    fn checked_pivot(&self, system: &LinearSystem, id: CompartmentId) -> Result<f64, SolveError> {
        let i = id.index();
        let pivot = self.diag[i];
        let floor = system.diag[i].abs() * PIVOT_RELATIVE_TOLERANCE;
        if !pivot.is_finite() || pivot <= floor {
            warn!(compartment = id.0, pivot, "non-positive pivot in tree elimination");
            return Err(SolveError::SingularSystem {
                compartment: id,
                pivot,
            });
        }
        Ok(pivot)
    }
}

/// Allocating convenience wrapper around [`TreeSolver::solve`].
pub fn solve(system: &LinearSystem, tree: &CompartmentTree) -> Result<Vec<f64>, SolveError> {
    let mut out = vec![0.0; tree.len()];
    TreeSolver::new().solve(system, tree, &mut out)?;
    Ok(out)
}
