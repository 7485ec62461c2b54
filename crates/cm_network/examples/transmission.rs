//! Two passive neurons: a driven soma excites a ball-and-stick cell through
//! an AMPA synapse. Run with `RUST_LOG=debug` to see construction events.

use cm_core::{CompartmentId, NeuronId};
use cm_network::{Network, NetworkError};
use cm_neuron::{CmNeuron, NeuronParams};
use cm_receptors::{ReceptorKind, ReceptorParams};
use cm_tree::CompartmentParams;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let soma = CompartmentParams::new(1.0, 0.1, 0.1, -70.0);

    let mut driver = CmNeuron::new(NeuronParams::default())?;
    driver.add_compartment(None, soma)?;

    let mut target = CmNeuron::new(NeuronParams::default())?;
    let root = target.add_compartment(None, soma)?;
    let dend = target.add_compartment(Some(root), CompartmentParams::new(0.1, 0.1, 0.01, -70.0))?;
    let synapse = target.add_receptor(dend, ReceptorKind::Ampa, ReceptorParams::default())?;

    let mut network = Network::new();
    let pre = network.add_neuron(driver)?;
    let post = network.add_neuron(target)?;
    network.connect(pre, post, synapse, 0.1, 10)?;

    let currents = vec![vec![2.0], Vec::new()];
    let mut peak = f64::NEG_INFINITY;
    for _ in 0..1_000 {
        for neuron in network.step(&currents)? {
            info!(neuron = neuron.0, step = network.step_count() - 1, "spike");
        }
        peak = peak.max(voltage(&network, post, CompartmentId(0))?);
    }

    let target = network.neuron(post)?;
    info!(
        time_ms = target.time_ms(),
        v_soma = target.voltages()[0],
        v_dend = target.voltages()[1],
        peak_soma = peak,
        "run finished"
    );
    Ok(())
}

fn voltage(network: &Network, id: NeuronId, compartment: CompartmentId) -> Result<f64, NetworkError> {
    network
        .neuron(id)?
        .voltage(compartment)
        .map_err(|source| NetworkError::Neuron { neuron: id, source })
}
