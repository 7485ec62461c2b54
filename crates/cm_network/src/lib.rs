#![forbid(unsafe_code)]

use cm_core::{NeuronId, ReceptorId};
use cm_neuron::{CmError, CmNeuron};
use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u32);

/// A spike in flight on one connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeMessage {
    pub arrival_step: u64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    #[error("neuron {0:?} does not exist")]
    InvalidNeuron(NeuronId),
    #[error("delay of {delay_steps} steps is outside 1..={horizon_steps}")]
    InvalidDelay { delay_steps: u32, horizon_steps: u32 },
    #[error("invalid connection weight {0}")]
    InvalidWeight(f64),
    #[error("neuron is at step {neuron_step}, network is at step {network_step}")]
    OutOfStep {
        neuron: Option<NeuronId>,
        neuron_step: u64,
        network_step: u64,
    },
    #[error("expected currents for {expected} neurons, got {got}")]
    CurrentCount { expected: usize, got: usize },
    #[error("neuron {neuron:?} failed: {source}")]
    Neuron {
        neuron: NeuronId,
        #[source]
        source: CmError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stepping {
    Sequential,
    #[default]
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub pre: NeuronId,
    pub post: NeuronId,
    pub receptor: ReceptorId,
    pub weight: f64,
    pub delay_steps: u32,
}

#[derive(Debug)]
struct Outgoing {
    info: ConnectionInfo,
    sender: Sender<SpikeMessage>,
}

#[derive(Debug)]
struct Inbound {
    connection: ConnectionId,
    receptor: ReceptorId,
    receiver: Receiver<SpikeMessage>,
}

/// Neurons stepped in lockstep. Spikes cross between trees only as
/// messages on per-connection channels, each with an explicit delay.
#[derive(Debug, Default)]
pub struct Network {
    neurons: Vec<CmNeuron>,
    inbound: Vec<Vec<Inbound>>,
    outgoing: Vec<Vec<usize>>,
    connections: Vec<Outgoing>,
    stepping: Stepping,
    step: u64,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stepping(stepping: Stepping) -> Self {
        Self {
            stepping,
            ..Self::default()
        }
    }

    pub fn stepping(&self) -> Stepping {
        self.stepping
    }

    pub fn len(&self) -> usize {
        self.neurons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neurons.is_empty()
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Neurons join at the network's current step. A neuron whose own step
    /// count differs is rejected, since spike arrival steps are counted on
    /// the network clock.
    pub fn add_neuron(&mut self, neuron: CmNeuron) -> Result<NeuronId, NetworkError> {
        if neuron.step_count() != self.step {
            return Err(NetworkError::OutOfStep {
                neuron: None,
                neuron_step: neuron.step_count(),
                network_step: self.step,
            });
        }
        let id = NeuronId(self.neurons.len() as u32);
        self.neurons.push(neuron);
        self.inbound.push(Vec::new());
        self.outgoing.push(Vec::new());
        debug!(neuron = id.0, compartments = self.neurons[id.index()].len(), "neuron added");
        Ok(id)
    }

    pub fn neuron(&self, id: NeuronId) -> Result<&CmNeuron, NetworkError> {
        self.neurons
            .get(id.index())
            .ok_or(NetworkError::InvalidNeuron(id))
    }

    /// Mutable access for adding receptors after the neuron joined. Stepping
    /// a neuron through this handle makes the next network step fail.
    pub fn neuron_mut(&mut self, id: NeuronId) -> Result<&mut CmNeuron, NetworkError> {
        self.neurons
            .get_mut(id.index())
            .ok_or(NetworkError::InvalidNeuron(id))
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionInfo> {
        self.connections.iter().map(|outgoing| &outgoing.info)
    }

    pub fn connect(
        &mut self,
        pre: NeuronId,
        post: NeuronId,
        receptor: ReceptorId,
        weight: f64,
        delay_steps: u32,
    ) -> Result<ConnectionId, NetworkError> {
        self.neuron(pre)?;
        let target = self.neuron(post)?;
        target
            .receptors()
            .receptor(receptor)
            .map_err(|source| NetworkError::Neuron {
                neuron: post,
                source: source.into(),
            })?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(NetworkError::InvalidWeight(weight));
        }
        let horizon_steps = target.receptors().horizon_steps();
        if delay_steps == 0 || delay_steps > horizon_steps {
            return Err(NetworkError::InvalidDelay {
                delay_steps,
                horizon_steps,
            });
        }

        let id = ConnectionId(self.connections.len() as u32);
        let (sender, receiver) = crossbeam_channel::unbounded();
        let info = ConnectionInfo {
            id,
            pre,
            post,
            receptor,
            weight,
            delay_steps,
        };
        self.outgoing[pre.index()].push(self.connections.len());
        self.connections.push(Outgoing { info, sender });
        self.inbound[post.index()].push(Inbound {
            connection: id,
            receptor,
            receiver,
        });
        debug!(
            connection = id.0,
            pre = pre.0,
            post = post.0,
            receptor = receptor.0,
            weight,
            delay_steps,
            "neurons connected"
        );
        Ok(id)
    }

    /// Advances every neuron by one step and returns the ids that spiked, in
    /// ascending order. `currents` is either empty or one vector per neuron.
    ///
    /// Inputs and the lockstep of every neuron are validated before any
    /// neuron moves. If a neuron still fails
    /// mid-step the network is no longer in lockstep and must be `reset`.
    pub fn step(&mut self, currents: &[Vec<f64>]) -> Result<Vec<NeuronId>, NetworkError> {
        self.validate_currents(currents)?;
        let emit_step = self.step;

        let run_one = |(index, (neuron, inbound)): (usize, (&mut CmNeuron, &Vec<Inbound>))| {
            let id = NeuronId(index as u32);
            drain_inbound(neuron, inbound).map_err(|source| NetworkError::Neuron {
                neuron: id,
                source,
            })?;
            let input = currents.get(index).map(Vec::as_slice).unwrap_or(&[]);
            neuron
                .step(input)
                .map(|output| output.spiked)
                .map_err(|source| NetworkError::Neuron { neuron: id, source })
        };

        let results: Vec<Result<bool, NetworkError>> = match self.stepping {
            Stepping::Parallel => self
                .neurons
                .par_iter_mut()
                .zip(self.inbound.par_iter())
                .enumerate()
                .map(run_one)
                .collect(),
            Stepping::Sequential => self
                .neurons
                .iter_mut()
                .zip(self.inbound.iter())
                .enumerate()
                .map(run_one)
                .collect(),
        };

        let mut spiked = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(true) => spiked.push(NeuronId(index as u32)),
                Ok(false) => {}
                Err(err) => {
                    warn!(step = emit_step, error = %err, "network step rejected");
                    return Err(err);
                }
            }
        }

        for pre in &spiked {
            for &connection in &self.outgoing[pre.index()] {
                let outgoing = &self.connections[connection];
                let message = SpikeMessage {
                    arrival_step: emit_step + outgoing.info.delay_steps as u64,
                    weight: outgoing.info.weight,
                };
                // The receiving half lives in `self.inbound`, so the channel
                // cannot be disconnected here.
                if outgoing.sender.send(message).is_err() {
                    warn!(connection = outgoing.info.id.0, "spike channel disconnected");
                }
            }
        }

        self.step += 1;
        trace!(step = emit_step, spikes = spiked.len(), "network stepped");
        Ok(spiked)
    }

    /// Steps `steps` times with the same currents, returning
    /// `(step, neuron)` for every spike.
    pub fn run(
        &mut self,
        steps: u64,
        currents: &[Vec<f64>],
    ) -> Result<Vec<(u64, NeuronId)>, NetworkError> {
        let mut record = Vec::new();
        for _ in 0..steps {
            let step = self.step;
            for neuron in self.step(currents)? {
                record.push((step, neuron));
            }
        }
        Ok(record)
    }

    /// Resets every neuron and drops spikes still in flight.
    pub fn reset(&mut self) {
        for neuron in &mut self.neurons {
            neuron.reset();
        }
        for inbound in self.inbound.iter().flatten() {
            inbound.receiver.try_iter().for_each(drop);
        }
        self.step = 0;
    }

    pub fn snapshot_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CM:NETWORK:SNAP");
        hasher.update(&self.step.to_le_bytes());
        hasher.update(&(self.neurons.len() as u32).to_le_bytes());
        for neuron in &self.neurons {
            hasher.update(&neuron.snapshot_digest());
        }
        for inbound in self.inbound.iter().flatten() {
            hasher.update(&inbound.connection.0.to_le_bytes());
            hasher.update(&(inbound.receiver.len() as u64).to_le_bytes());
        }
        *hasher.finalize().as_bytes()
    }

    fn validate_currents(&self, currents: &[Vec<f64>]) -> Result<(), NetworkError> {
        for (index, neuron) in self.neurons.iter().enumerate() {
            if neuron.step_count() != self.step {
                return Err(NetworkError::OutOfStep {
                    neuron: Some(NeuronId(index as u32)),
                    neuron_step: neuron.step_count(),
                    network_step: self.step,
                });
            }
        }
        if currents.is_empty() {
            return Ok(());
        }
        if currents.len() != self.neurons.len() {
            return Err(NetworkError::CurrentCount {
                expected: self.neurons.len(),
                got: currents.len(),
            });
        }
        for (index, (neuron, input)) in self.neurons.iter().zip(currents).enumerate() {
            let neuron_id = NeuronId(index as u32);
            if !input.is_empty() && input.len() != neuron.len() {
                return Err(NetworkError::CurrentCount {
                    expected: neuron.len(),
                    got: input.len(),
                });
            }
            if let Some(&value) = input.iter().find(|value| !value.is_finite()) {
                return Err(NetworkError::Neuron {
                    neuron: neuron_id,
                    source: CmError::InvalidParameter {
                        name: "i_ext",
                        value,
                    },
                });
            }
        }
        Ok(())
    }
}

/// Moves every queued message into the neuron's receptor buffer, in
/// connection order.
fn drain_inbound(neuron: &mut CmNeuron, inbound: &[Inbound]) -> Result<(), CmError> {
    for link in inbound {
        for message in link.receiver.try_iter() {
            trace!(
                connection = link.connection.0,
                arrival_step = message.arrival_step,
                "spike delivered"
            );
            neuron.deliver_spike(link.receptor, message.arrival_step, message.weight)?;
        }
    }
    Ok(())
}
