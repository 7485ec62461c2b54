#![allow(dead_code)]

use cm_core::CompartmentId;
use cm_neuron::{CmNeuron, NeuronParams};
use cm_tree::CompartmentParams;

pub const SP: CompartmentParams = CompartmentParams {
    c_m: 1.0,
    g_c: 0.0,
    g_l: 0.1,
    e_l: -70.0,
};

pub const DP: [CompartmentParams; 9] = [
    dp(0.10, 0.10, 0.010, -70.0),
    dp(0.08, 0.11, 0.007, -70.0),
    dp(0.09, 0.07, 0.011, -70.0),
    dp(0.15, 0.12, 0.014, -70.0),
    dp(0.20, 0.32, 0.022, -55.0),
    dp(0.12, 0.12, 0.010, -23.0),
    dp(0.32, 0.09, 0.032, -32.0),
    dp(0.01, 0.05, 0.001, -88.0),
    dp(0.02, 0.03, 0.002, -90.0),
];

const fn dp(c_m: f64, g_c: f64, g_l: f64, e_l: f64) -> CompartmentParams {
    CompartmentParams { c_m, g_c, g_l, e_l }
}

/// Tree topology as parent index per compartment, root first.
pub struct Topology {
    pub name: &'static str,
    pub parents: &'static [Option<u32>],
}

pub const SOMA_ONLY: Topology = Topology {
    name: "soma",
    parents: &[None],
};
pub const ONE_DEND_ONE_COMP: Topology = Topology {
    name: "1dend_1comp",
    parents: &[None, Some(0)],
};
pub const TWO_DEND_ONE_COMP: Topology = Topology {
    name: "2dend_1comp",
    parents: &[None, Some(0), Some(0)],
};
pub const ONE_DEND_TWO_COMP: Topology = Topology {
    name: "1dend_2comp",
    parents: &[None, Some(0), Some(1)],
};
pub const FORKED_DEND: Topology = Topology {
    name: "tdend_4comp",
    parents: &[None, Some(0), Some(1), Some(2), Some(2)],
};
pub const TWO_FORKED_DENDS: Topology = Topology {
    name: "2tdend_4comp",
    parents: &[
        None,
        Some(0),
        Some(1),
        Some(2),
        Some(2),
        Some(0),
        Some(5),
        Some(6),
        Some(6),
    ],
};

/// Every topology whose compartments share `e_L = -70`.
pub const UNIFORM_LEAK: [Topology; 5] = [
    SOMA_ONLY,
    ONE_DEND_ONE_COMP,
    TWO_DEND_ONE_COMP,
    ONE_DEND_TWO_COMP,
    FORKED_DEND,
];

pub const ALL: [Topology; 6] = [
    SOMA_ONLY,
    ONE_DEND_ONE_COMP,
    TWO_DEND_ONE_COMP,
    ONE_DEND_TWO_COMP,
    FORKED_DEND,
    TWO_FORKED_DENDS,
];

impl Topology {
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Soma takes `SP`, dendrite `i` takes `DP[i - 1]`.
    pub fn params(&self) -> Vec<CompartmentParams> {
        (0..self.len())
            .map(|index| if index == 0 { SP } else { DP[index - 1] })
            .collect()
    }

    pub fn neuron(&self, dt_ms: f64) -> CmNeuron {
        let mut neuron = CmNeuron::new(NeuronParams {
            dt_ms,
            ..NeuronParams::default()
        })
        .expect("neuron params");
        for (parent, params) in self.parents.iter().zip(self.params()) {
            neuron
                .add_compartment(parent.map(CompartmentId), params)
                .expect("fixture compartment");
        }
        neuron
    }

    fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.parents
            .iter()
            .enumerate()
            .filter(move |(_, parent)| **parent == Some(index as u32))
            .map(|(child, _)| child)
    }

    /// One-step matrix written out term by term at `v = e_L`.
    pub fn reference_matrix(&self, dt: f64) -> Vec<Vec<f64>> {
        let params = self.params();
        let n = self.len();
        let mut aa = vec![vec![0.0; n]; n];
        for i in 0..n {
            aa[i][i] = params[i].c_m / dt + params[i].g_l / 2.0;
            if let Some(p) = self.parents[i] {
                let p = p as usize;
                aa[i][i] += params[i].g_c / 2.0;
                aa[i][p] = -params[i].g_c / 2.0;
                aa[p][i] = -params[i].g_c / 2.0;
            }
            for c in self.children(i) {
                aa[i][i] += params[c].g_c / 2.0;
            }
        }
        aa
    }

    pub fn reference_rhs(&self, dt: f64) -> Vec<f64> {
        let params = self.params();
        (0..self.len())
            .map(|i| {
                let own = params[i];
                let mut bb = own.c_m / dt * own.e_l + own.g_l * own.e_l / 2.0;
                if let Some(p) = self.parents[i] {
                    bb -= own.g_c * (own.e_l - params[p as usize].e_l) / 2.0;
                }
                for c in self.children(i) {
                    bb -= params[c].g_c * (own.e_l - params[c].e_l) / 2.0;
                }
                bb
            })
            .collect()
    }

    /// Right-hand side for an arbitrary start-of-step state: the explicit
    /// half of every current at `voltages`, plus the `e_L` half of the
    /// implicit leak.
    pub fn reference_rhs_at(&self, dt: f64, voltages: &[f64], currents: &[f64]) -> Vec<f64> {
        let params = self.params();
        (0..self.len())
            .map(|i| {
                let own = params[i];
                let v = voltages[i];
                let mut explicit = own.g_l * (own.e_l - v);
                if let Some(p) = self.parents[i] {
                    explicit += own.g_c * (voltages[p as usize] - v);
                }
                for c in self.children(i) {
                    explicit += params[c].g_c * (voltages[c] - v);
                }
                own.c_m / dt * v + explicit / 2.0 + own.g_l * own.e_l / 2.0 + currents[i]
            })
            .collect()
    }

    /// Steady-state conductance matrix.
    pub fn conductance_matrix(&self) -> Vec<Vec<f64>> {
        let params = self.params();
        let n = self.len();
        let mut gg = vec![vec![0.0; n]; n];
        for i in 0..n {
            gg[i][i] = -params[i].g_l;
            if let Some(p) = self.parents[i] {
                gg[i][i] -= params[i].g_c;
                gg[i][p as usize] = params[i].g_c;
                gg[p as usize][i] = params[i].g_c;
            }
            for c in self.children(i) {
                gg[i][i] -= params[c].g_c;
            }
        }
        gg
    }

    pub fn leak_drive(&self) -> Vec<f64> {
        self.params().iter().map(|p| p.g_l * p.e_l).collect()
    }
}

pub fn negate(matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
    matrix
        .iter()
        .map(|row| row.iter().map(|value| -value).collect())
        .collect()
}

/// Gaussian elimination with partial pivoting on a dense copy.
pub fn dense_solve(matrix: &[Vec<f64>], rhs: &[f64]) -> Vec<f64> {
    let n = matrix.len();
    assert_eq!(rhs.len(), n, "rhs length must match matrix dimension");
    let mut aug: Vec<Vec<f64>> = matrix
        .iter()
        .zip(rhs)
        .map(|(row, &b)| {
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

pub fn run_quiet(neuron: &mut CmNeuron, steps: usize) {
    for _ in 0..steps {
        neuron.step(&[]).expect("quiet step");
    }
}
