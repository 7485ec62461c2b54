#![forbid(unsafe_code)]

mod kinetics;
mod queue;

pub use kinetics::{
    Linearized, ReceptorKind, ReceptorModel, ReceptorParams, ReceptorState, RiseDecay,
    RiseDecayState,
};
pub use queue::{SpikeEvent, SpikeRingBuffer};

use cm_core::{CompartmentId, ReceptorId, TimeGrid, TimeGridError};
use cm_tree::CompartmentTree;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReceptorError {
    #[error("compartment {0:?} does not exist")]
    InvalidCompartment(CompartmentId),
    #[error("receptor {0:?} does not exist")]
    InvalidReceptor(ReceptorId),
    #[error("invalid receptor parameter {name} = {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("spike for step {arrival_step} arrived after step {current_step} started")]
    LateSpike { arrival_step: u64, current_step: u64 },
    #[error("spike for step {arrival_step} is beyond the {horizon_steps}-step buffer horizon at step {current_step}")]
    BeyondHorizon {
        arrival_step: u64,
        current_step: u64,
        horizon_steps: u32,
    },
    #[error("invalid spike time: {0}")]
    Time(#[from] TimeGridError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Receptor {
    pub id: ReceptorId,
    pub compartment: CompartmentId,
    pub kind: ReceptorKind,
    pub model: ReceptorModel,
    pub state: ReceptorState,
}

impl Receptor {
    pub fn conductance(&self) -> f64 {
        self.model.conductance(&self.state)
    }
}

/// All synaptic conductance processes of one neuron plus the buffer of
/// spikes scheduled for them.
///
/// A step is two-phase: `step_conductances` computes next kinetic state and
/// linearised contributions into staging buffers, `commit` makes them current.
/// Dropping a staged step leaves the bank exactly as before.
#[derive(Debug, Clone)]
pub struct ReceptorBank {
    grid: TimeGrid,
    receptors: Vec<Receptor>,
    by_compartment: Vec<Vec<ReceptorId>>,
    buffer: SpikeRingBuffer,
    step: u64,
    staged_step: Option<u64>,
    staged_states: Vec<ReceptorState>,
    spike_weights: Vec<f64>,
    contributions: Vec<Linearized>,
}

impl ReceptorBank {
    pub fn new(grid: TimeGrid, max_delay_steps: u32) -> Self {
        Self {
            grid,
            receptors: Vec::new(),
            by_compartment: Vec::new(),
            buffer: SpikeRingBuffer::new(max_delay_steps),
            step: 0,
            staged_step: None,
            staged_states: Vec::new(),
            spike_weights: Vec::new(),
            contributions: Vec::new(),
        }
    }

    pub fn grid(&self) -> TimeGrid {
        self.grid
    }

    pub fn current_step(&self) -> u64 {
        self.step
    }

    pub fn horizon_steps(&self) -> u32 {
        self.buffer.horizon_steps()
    }

    pub fn len(&self) -> usize {
        self.receptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receptors.is_empty()
    }

    pub fn receptors(&self) -> impl Iterator<Item = &Receptor> {
        self.receptors.iter()
    }

    pub fn receptor(&self, id: ReceptorId) -> Result<&Receptor, ReceptorError> {
        self.receptors
            .get(id.index())
            .ok_or(ReceptorError::InvalidReceptor(id))
    }

    /// Receptors attached to `compartment`, in creation order.
    pub fn attached(&self, compartment: CompartmentId) -> &[ReceptorId] {
        self.by_compartment
            .get(compartment.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn pending_spikes(&self) -> usize {
        self.buffer.pending()
    }

    pub fn add_receptor(
        &mut self,
        tree: &CompartmentTree,
        compartment: CompartmentId,
        kind: ReceptorKind,
        params: ReceptorParams,
    ) -> Result<ReceptorId, ReceptorError> {
        if !tree.contains(compartment) {
            return Err(ReceptorError::InvalidCompartment(compartment));
        }
        let model = ReceptorModel::build(kind, params, self.grid.dt_ms())?;
        let id = ReceptorId(self.receptors.len() as u32);
        if self.by_compartment.len() <= compartment.index() {
            self.by_compartment.resize(compartment.index() + 1, Vec::new());
        }
        self.by_compartment[compartment.index()].push(id);
        self.receptors.push(Receptor {
            id,
            compartment,
            kind,
            model,
            state: ReceptorState::default(),
        });
        self.staged_step = None;
        debug!(
            receptor = id.0,
            compartment = compartment.0,
            kind = kind.tag(),
            e_rev = model.e_rev(),
            "receptor added"
        );
        Ok(id)
    }

    /// Schedules a conductance increment for the step that starts at
    /// `arrival_step`. The step that ends at that time is never affected.
    pub fn deliver_spike(
        &mut self,
        receptor: ReceptorId,
        arrival_step: u64,
        weight: f64,
    ) -> Result<(), ReceptorError> {
        self.receptor(receptor)?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(ReceptorError::InvalidParameter {
                name: "weight",
                value: weight,
            });
        }
        if arrival_step < self.step {
            return Err(ReceptorError::LateSpike {
                arrival_step,
                current_step: self.step,
            });
        }
        let horizon_steps = self.buffer.horizon_steps();
        if arrival_step - self.step > horizon_steps as u64 {
            return Err(ReceptorError::BeyondHorizon {
                arrival_step,
                current_step: self.step,
                horizon_steps,
            });
        }
        self.buffer.push(SpikeEvent {
            deliver_step: arrival_step,
            receptor,
            weight,
        });
        self.staged_step = None;
        Ok(())
    }

    pub fn deliver_spike_at(
        &mut self,
        receptor: ReceptorId,
        arrival_ms: f64,
        weight: f64,
    ) -> Result<(), ReceptorError> {
        let arrival_step = self.grid.step_at(arrival_ms)?;
        self.deliver_spike(receptor, arrival_step, weight)
    }

    /// Advances every receptor by one `dt` into staging and returns the
    /// linearised contribution per compartment, evaluated at `voltages`.
    pub fn step_conductances(&mut self, voltages: &[f64]) -> Result<&[Linearized], ReceptorError> {
        self.staged_step = None;
        self.spike_weights.clear();
        self.spike_weights.resize(self.receptors.len(), 0.0);
        self.buffer.accumulate(self.step, &mut self.spike_weights);

        self.contributions.clear();
        self.contributions
            .resize(voltages.len(), Linearized::default());
        self.staged_states.clear();
        for (receptor, &weight) in self.receptors.iter().zip(self.spike_weights.iter()) {
            let index = receptor.compartment.index();
            let v = *voltages
                .get(index)
                .ok_or(ReceptorError::InvalidCompartment(receptor.compartment))?;
            let mut state = receptor.state;
            receptor.model.advance(&mut state, weight);
            self.contributions[index] += receptor.model.linearize(&state, v);
            self.staged_states.push(state);
        }
        self.staged_step = Some(self.step);
        trace!(step = self.step, receptors = self.receptors.len(), "conductances staged");
        Ok(&self.contributions)
    }

    /// Makes the staged step current. Returns false when nothing was staged.
    pub fn commit(&mut self) -> bool {
        if self.staged_step != Some(self.step) {
            return false;
        }
        for (receptor, state) in self.receptors.iter_mut().zip(self.staged_states.iter()) {
            receptor.state = *state;
        }
        self.buffer.clear_step(self.step);
        self.step += 1;
        self.staged_step = None;
        true
    }

    pub fn discard_staged(&mut self) {
        self.staged_step = None;
    }

    /// Total receptor conductance per compartment for the committed state.
    pub fn conductances(&self, compartment_count: usize) -> Vec<f64> {
        let mut out = vec![0.0; compartment_count];
        for receptor in &self.receptors {
            if let Some(slot) = out.get_mut(receptor.compartment.index()) {
                *slot += receptor.conductance();
            }
        }
        out
    }

    pub fn conductance(&self, id: ReceptorId) -> Result<f64, ReceptorError> {
        self.receptor(id).map(Receptor::conductance)
    }

    pub fn reset(&mut self) {
        for receptor in &mut self.receptors {
            receptor.state = ReceptorState::default();
        }
        self.buffer.clear();
        self.step = 0;
        self.staged_step = None;
    }
}
