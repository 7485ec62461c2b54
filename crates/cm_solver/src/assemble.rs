use cm_receptors::Linearized;
use cm_tree::CompartmentTree;

use crate::SolveError;

/// Tree-sparse symmetric system `A v = b` for one step.
///
/// `off[i]` is the entry coupling compartment `i` to its parent, mirrored at
/// `(i, parent)` and `(parent, i)`; it is zero for the root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearSystem {
    pub diag: Vec<f64>,
    pub off: Vec<f64>,
    pub rhs: Vec<f64>,
}

impl LinearSystem {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            diag: Vec::with_capacity(n),
            off: Vec::with_capacity(n),
            rhs: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    pub fn to_dense(&self, tree: &CompartmentTree) -> Vec<Vec<f64>> {
        let n = self.len();
        let mut dense = vec![vec![0.0; n]; n];
        for compartment in tree.compartments() {
            let i = compartment.id.index();
            dense[i][i] = self.diag[i];
            if let Some(parent) = compartment.parent {
                let p = parent.index();
                dense[i][p] = self.off[i];
                dense[p][i] = self.off[i];
            }
        }
        dense
    }
}

/// Fills `system` for one implicit-midpoint step of size `dt_ms` starting
/// from `voltages`.
pub fn assemble(
    tree: &CompartmentTree,
    dt_ms: f64,
    voltages: &[f64],
    receptors: &[Linearized],
    i_ext: &[f64],
    system: &mut LinearSystem,
) -> Result<(), SolveError> {
    let n = tree.len();
    if n == 0 {
        return Err(SolveError::Assembly {
            reason: "tree has no compartments".to_string(),
        });
    }
    check_len("voltages", voltages.len(), n)?;
    check_len("receptor contributions", receptors.len(), n)?;
    if !i_ext.is_empty() {
        check_len("injected currents", i_ext.len(), n)?;
    }

    system.diag.clear();
    system.off.clear();
    system.rhs.clear();
    system.diag.resize(n, 0.0);
    system.off.resize(n, 0.0);
    system.rhs.resize(n, 0.0);

    for compartment in tree.compartments() {
        let i = compartment.id.index();
        let params = compartment.params;
        let v = voltages[i];

        let mut gg = params.c_m / dt_ms + params.g_l / 2.0;
        let mut ff = params.c_m / dt_ms * v - params.g_l * (v / 2.0 - params.e_l);

        if let Some(parent) = compartment.parent {
            let p = parent.index();
            if p >= n {
                return Err(orphan(i, p));
            }
            gg += params.g_c / 2.0;
            ff -= params.g_c * (v - voltages[p]) / 2.0;
            system.off[i] = -params.g_c / 2.0;
        }

        for child in &compartment.children {
            let c = child.index();
            let g_c = tree
                .get(*child)
                .ok_or_else(|| orphan(c, i))?
                .params
                .g_c;
            gg += g_c / 2.0;
            ff -= g_c * (v - voltages[c]) / 2.0;
        }

        let syn = receptors[i];
        gg += syn.g;
        ff += syn.i;
        if let Some(current) = i_ext.get(i) {
            ff += current;
        }

        system.diag[i] = gg;
        system.rhs[i] = ff;
    }
    Ok(())
}

/// Steady-state conductance matrix `G`: the dt -> inf limit without the
/// trapezoidal halving. Equilibria solve `-G v = g_L * e_L`.
pub fn steady_state_matrix(tree: &CompartmentTree) -> Vec<Vec<f64>> {
    let n = tree.len();
    let mut gg = vec![vec![0.0; n]; n];
    for compartment in tree.compartments() {
        let i = compartment.id.index();
        gg[i][i] -= compartment.params.g_l;
        if let Some(parent) = compartment.parent {
            let p = parent.index();
            let g_c = compartment.params.g_c;
            gg[i][i] -= g_c;
            gg[p][p] -= g_c;
            gg[i][p] += g_c;
            gg[p][i] += g_c;
        }
    }
    gg
}

fn check_len(what: &str, got: usize, expected: usize) -> Result<(), SolveError> {
    if got != expected {
        return Err(SolveError::Assembly {
            reason: format!("{what} length {got} does not match {expected} compartments"),
        });
    }
    Ok(())
}

fn orphan(index: usize, other: usize) -> SolveError {
    SolveError::Assembly {
        reason: format!("compartment {index} references missing neighbour {other}"),
    }
}
