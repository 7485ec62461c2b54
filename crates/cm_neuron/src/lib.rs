#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use cm_core::{
    CompartmentId, ReceptorId, TimeGrid, DEFAULT_DT_MS, DEFAULT_MAX_DELAY_STEPS, DEFAULT_V_TH_MV,
};
use cm_receptors::{
    Receptor, ReceptorBank, ReceptorError, ReceptorKind, ReceptorModel, ReceptorParams,
    RiseDecay, RiseDecayState,
};
use cm_solver::{assemble, LinearSystem, SolveError, TreeSolver};
use cm_tree::{CompartmentParams, CompartmentTree, TreeError};
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NeuronParams {
    pub dt_ms: f64,
    /// Root-compartment threshold for spike detection.
    pub v_th: f64,
    pub max_delay_steps: u32,
}

impl Default for NeuronParams {
    fn default() -> Self {
        Self {
            dt_ms: DEFAULT_DT_MS,
            v_th: DEFAULT_V_TH_MV,
            max_delay_steps: DEFAULT_MAX_DELAY_STEPS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CmError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Receptor(#[from] ReceptorError),
    #[error(transparent)]
    Solve(#[from] SolveError),
    #[error("invalid neuron parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub spiked: bool,
}

/// One multi-compartment neuron: the compartment tree, its receptors, and
/// the per-step integration state.
///
/// `step` assembles and solves into staging buffers and only swaps them in
/// once every stage has succeeded.
#[derive(Debug, Clone)]
pub struct CmNeuron {
    params: NeuronParams,
    tree: CompartmentTree,
    bank: ReceptorBank,
    voltages: Vec<f64>,
    staged_voltages: Vec<f64>,
    system: LinearSystem,
    staged_system: LinearSystem,
    solver: TreeSolver,
    step_count: u64,
}

impl CmNeuron {
    pub fn new(params: NeuronParams) -> Result<Self, CmError> {
        let grid = TimeGrid::new(params.dt_ms).map_err(|_| CmError::InvalidParameter {
            name: "dt_ms",
            value: params.dt_ms,
        })?;
        if !params.v_th.is_finite() {
            return Err(CmError::InvalidParameter {
                name: "v_th",
                value: params.v_th,
            });
        }
        if params.max_delay_steps == 0 {
            return Err(CmError::InvalidParameter {
                name: "max_delay_steps",
                value: 0.0,
            });
        }
        Ok(Self {
            params,
            tree: CompartmentTree::new(),
            bank: ReceptorBank::new(grid, params.max_delay_steps),
            voltages: Vec::new(),
            staged_voltages: Vec::new(),
            system: LinearSystem::default(),
            staged_system: LinearSystem::default(),
            solver: TreeSolver::new(),
            step_count: 0,
        })
    }

    pub fn params(&self) -> NeuronParams {
        self.params
    }

    pub fn grid(&self) -> TimeGrid {
        self.bank.grid()
    }

    pub fn tree(&self) -> &CompartmentTree {
        &self.tree
    }

    pub fn receptors(&self) -> &ReceptorBank {
        &self.bank
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// New compartments start at their leak reversal.
    pub fn add_compartment(
        &mut self,
        parent: Option<CompartmentId>,
        params: CompartmentParams,
    ) -> Result<CompartmentId, CmError> {
        let id = self.tree.add_compartment(parent, params)?;
        self.voltages.push(params.e_l);
        Ok(id)
    }

    pub fn add_receptor(
        &mut self,
        compartment: CompartmentId,
        kind: ReceptorKind,
        params: ReceptorParams,
    ) -> Result<ReceptorId, CmError> {
        Ok(self.bank.add_receptor(&self.tree, compartment, kind, params)?)
    }

    pub fn deliver_spike(
        &mut self,
        receptor: ReceptorId,
        arrival_step: u64,
        weight: f64,
    ) -> Result<(), CmError> {
        Ok(self.bank.deliver_spike(receptor, arrival_step, weight)?)
    }

    pub fn deliver_spike_at(
        &mut self,
        receptor: ReceptorId,
        arrival_ms: f64,
        weight: f64,
    ) -> Result<(), CmError> {
        Ok(self.bank.deliver_spike_at(receptor, arrival_ms, weight)?)
    }

    /// Advances by one `dt`. `i_ext` is the injected current per compartment
    /// in nA; an empty slice means no injection.
    pub fn step(&mut self, i_ext: &[f64]) -> Result<StepOutput, CmError> {
        if let Err(err) = self.stage(i_ext) {
            self.bank.discard_staged();
            warn!(step = self.step_count, error = %err, "step rejected");
            return Err(err);
        }

        let v_prev = self.voltages.first().copied();
        std::mem::swap(&mut self.voltages, &mut self.staged_voltages);
        std::mem::swap(&mut self.system, &mut self.staged_system);
        let committed = self.bank.commit();
        debug_assert!(committed, "receptor state was not staged");
        self.step_count += 1;

        let v_th = self.params.v_th;
        let spiked = match (v_prev, self.voltages.first()) {
            (Some(before), Some(&after)) => before < v_th && after >= v_th,
            _ => false,
        };
        trace!(
            step = self.step_count,
            v_root = self.voltages.first().copied().unwrap_or(f64::NAN),
            spiked,
            "neuron stepped"
        );
        Ok(StepOutput { spiked })
    }

    fn stage(&mut self, i_ext: &[f64]) -> Result<(), CmError> {
        if let Some(&value) = i_ext.iter().find(|value| !value.is_finite()) {
            return Err(CmError::InvalidParameter {
                name: "i_ext",
                value,
            });
        }
        let contributions = self.bank.step_conductances(&self.voltages)?;
        assemble(
            &self.tree,
            self.params.dt_ms,
            &self.voltages,
            contributions,
            i_ext,
            &mut self.staged_system,
        )?;
        self.staged_voltages.clear();
        self.staged_voltages.resize(self.tree.len(), 0.0);
        self.solver
            .solve(&self.staged_system, &self.tree, &mut self.staged_voltages)?;
        Ok(())
    }

    pub fn voltages(&self) -> &[f64] {
        &self.voltages
    }

    pub fn voltage(&self, id: CompartmentId) -> Result<f64, CmError> {
        self.voltages
            .get(id.index())
            .copied()
            .ok_or(CmError::Tree(TreeError::InvalidCompartment(id)))
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn time_ms(&self) -> f64 {
        self.grid().step_start_ms(self.step_count)
    }

    /// System solved by the most recent successful step.
    pub fn last_system(&self) -> &LinearSystem {
        &self.system
    }

    /// Compartment voltages as `v_comp{i}` and receptor conductances as
    /// `g_{KIND}{r}`.
    pub fn recordables(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (index, v) in self.voltages.iter().enumerate() {
            out.insert(format!("v_comp{index}"), *v);
        }
        for receptor in self.bank.receptors() {
            out.insert(
                format!("g_{}{}", receptor.kind.tag(), receptor.id.0),
                receptor.conductance(),
            );
        }
        out
    }

    pub fn reset(&mut self) {
        self.voltages = self.tree.leak_reversals();
        self.staged_voltages.clear();
        self.system = LinearSystem::default();
        self.staged_system = LinearSystem::default();
        self.bank.reset();
        self.step_count = 0;
    }

    pub fn config_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CM:NEURON:CFG");
        update_f64(&mut hasher, self.params.dt_ms);
        update_f64(&mut hasher, self.params.v_th);
        update_u32(&mut hasher, self.params.max_delay_steps);
        update_u32(&mut hasher, self.tree.len() as u32);
        for compartment in self.tree.compartments() {
            update_u32(&mut hasher, compartment.id.0);
            update_u32(&mut hasher, compartment.parent.map_or(u32::MAX, |id| id.0));
            update_f64(&mut hasher, compartment.params.c_m);
            update_f64(&mut hasher, compartment.params.g_c);
            update_f64(&mut hasher, compartment.params.g_l);
            update_f64(&mut hasher, compartment.params.e_l);
        }
        update_u32(&mut hasher, self.bank.len() as u32);
        for receptor in self.bank.receptors() {
            update_receptor_config(&mut hasher, receptor);
        }
        *hasher.finalize().as_bytes()
    }

    pub fn snapshot_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CM:NEURON:SNAP");
        update_u64(&mut hasher, self.step_count);
        update_u32(&mut hasher, self.voltages.len() as u32);
        for v in &self.voltages {
            update_f64(&mut hasher, *v);
        }
        for receptor in self.bank.receptors() {
            update_state(&mut hasher, &receptor.state.primary);
            update_state(&mut hasher, &receptor.state.secondary);
        }
        update_u64(&mut hasher, self.bank.pending_spikes() as u64);
        *hasher.finalize().as_bytes()
    }
}

fn update_receptor_config(hasher: &mut blake3::Hasher, receptor: &Receptor) {
    update_u32(hasher, receptor.id.0);
    update_u32(hasher, receptor.compartment.0);
    update_u8(hasher, receptor.kind.code());
    update_f64(hasher, receptor.model.e_rev());
    match &receptor.model {
        ReceptorModel::Linear { kinetics, .. } | ReceptorModel::Nmda { kinetics, .. } => {
            update_kinetics(hasher, kinetics);
        }
        ReceptorModel::AmpaNmda {
            ampa,
            nmda,
            nmda_ratio,
            ..
        } => {
            update_kinetics(hasher, ampa);
            update_kinetics(hasher, nmda);
            update_f64(hasher, *nmda_ratio);
        }
    }
}

fn update_kinetics(hasher: &mut blake3::Hasher, kinetics: &RiseDecay) {
    update_f64(hasher, kinetics.tau_r);
    update_f64(hasher, kinetics.tau_d);
}

fn update_state(hasher: &mut blake3::Hasher, state: &RiseDecayState) {
    update_f64(hasher, state.g_r);
    update_f64(hasher, state.g_d);
}

fn update_u8(hasher: &mut blake3::Hasher, value: u8) {
    hasher.update(&[value]);
}

fn update_u32(hasher: &mut blake3::Hasher, value: u32) {
    hasher.update(&value.to_le_bytes());
}

fn update_u64(hasher: &mut blake3::Hasher, value: u64) {
    hasher.update(&value.to_le_bytes());
}

fn update_f64(hasher: &mut blake3::Hasher, value: f64) {
    hasher.update(&value.to_bits().to_le_bytes());
}
