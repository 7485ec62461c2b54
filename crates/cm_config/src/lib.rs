#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use cm_core::{
    CompartmentId, NeuronId, ReceptorId, DEFAULT_DT_MS, DEFAULT_MAX_DELAY_STEPS, DEFAULT_V_TH_MV,
};
use cm_network::{Network, NetworkError, Stepping};
use cm_neuron::{CmError, CmNeuron, NeuronParams};
use cm_receptors::{ReceptorKind, ReceptorParams};
use cm_tree::CompartmentParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("neuron {index}: {source}")]
    Neuron {
        index: usize,
        #[source]
        source: CmError,
    },
    #[error("neuron {index} could not join the network: {source}")]
    Join {
        index: usize,
        #[source]
        source: NetworkError,
    },
    #[error("connection {index}: {source}")]
    Connection {
        index: usize,
        #[source]
        source: NetworkError,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CompartmentSpec {
    /// Index of the parent compartment; absent for the root.
    #[serde(default)]
    pub parent: Option<u32>,
    pub c_m: f64,
    #[serde(default)]
    pub g_c: f64,
    pub g_l: f64,
    pub e_l: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ReceptorSpec {
    pub compartment: u32,
    pub kind: ReceptorKind,
    #[serde(default)]
    pub tau_r: Option<f64>,
    #[serde(default)]
    pub tau_d: Option<f64>,
    #[serde(default)]
    pub e_rev: Option<f64>,
    #[serde(default)]
    pub tau_r_nmda: Option<f64>,
    #[serde(default)]
    pub tau_d_nmda: Option<f64>,
    #[serde(default)]
    pub nmda_ratio: Option<f64>,
}

impl ReceptorSpec {
    pub fn params(&self) -> ReceptorParams {
        ReceptorParams {
            tau_r: self.tau_r,
            tau_d: self.tau_d,
            e_rev: self.e_rev,
            tau_r_nmda: self.tau_r_nmda,
            tau_d_nmda: self.tau_d_nmda,
            nmda_ratio: self.nmda_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NeuronSpec {
    #[serde(default = "default_dt_ms")]
    pub dt_ms: f64,
    #[serde(default = "default_v_th")]
    pub v_th: f64,
    #[serde(default = "default_max_delay_steps")]
    pub max_delay_steps: u32,
    pub compartments: Vec<CompartmentSpec>,
    #[serde(default)]
    pub receptors: Vec<ReceptorSpec>,
}

impl NeuronSpec {
    pub fn params(&self) -> NeuronParams {
        NeuronParams {
            dt_ms: self.dt_ms,
            v_th: self.v_th,
            max_delay_steps: self.max_delay_steps,
        }
    }

    /// Builds compartments then receptors, in file order. Ids are the list
    /// positions.
    pub fn build(&self) -> Result<CmNeuron, CmError> {
        let mut neuron = CmNeuron::new(self.params())?;
        for compartment in &self.compartments {
            neuron.add_compartment(
                compartment.parent.map(CompartmentId),
                CompartmentParams::new(
                    compartment.c_m,
                    compartment.g_c,
                    compartment.g_l,
                    compartment.e_l,
                ),
            )?;
        }
        for receptor in &self.receptors {
            neuron.add_receptor(
                CompartmentId(receptor.compartment),
                receptor.kind,
                receptor.params(),
            )?;
        }
        debug!(
            compartments = neuron.len(),
            receptors = neuron.receptors().len(),
            "neuron built from yaml"
        );
        Ok(neuron)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SteppingSpec {
    Sequential,
    #[default]
    Parallel,
}

impl From<SteppingSpec> for Stepping {
    fn from(value: SteppingSpec) -> Self {
        match value {
            SteppingSpec::Sequential => Stepping::Sequential,
            SteppingSpec::Parallel => Stepping::Parallel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSpec {
    pub pre: u32,
    pub post: u32,
    pub receptor: u32,
    pub weight: f64,
    #[serde(default = "default_delay_steps")]
    pub delay_steps: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    #[serde(default)]
    pub stepping: SteppingSpec,
    pub neurons: Vec<NeuronSpec>,
    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,
}

impl NetworkSpec {
    pub fn build(&self) -> Result<Network, ConfigError> {
        let mut network = Network::with_stepping(self.stepping.into());
        for (index, spec) in self.neurons.iter().enumerate() {
            let neuron = spec
                .build()
                .map_err(|source| ConfigError::Neuron { index, source })?;
            network
                .add_neuron(neuron)
                .map_err(|source| ConfigError::Join { index, source })?;
        }
        for (index, connection) in self.connections.iter().enumerate() {
            network
                .connect(
                    NeuronId(connection.pre),
                    NeuronId(connection.post),
                    ReceptorId(connection.receptor),
                    connection.weight,
                    connection.delay_steps,
                )
                .map_err(|source| ConfigError::Connection { index, source })?;
        }
        Ok(network)
    }
}

pub fn load_neuron_spec<P: AsRef<Path>>(path: P) -> Result<NeuronSpec, ConfigError> {
    load_file(path.as_ref().to_path_buf())
}

pub fn load_network_spec<P: AsRef<Path>>(path: P) -> Result<NetworkSpec, ConfigError> {
    load_file(path.as_ref().to_path_buf())
}

/// Loads and builds in one go, tagging build failures as neuron 0.
pub fn load_neuron<P: AsRef<Path>>(path: P) -> Result<CmNeuron, ConfigError> {
    load_neuron_spec(path)?
        .build()
        .map_err(|source| ConfigError::Neuron { index: 0, source })
}

pub fn load_network<P: AsRef<Path>>(path: P) -> Result<Network, ConfigError> {
    load_network_spec(path)?.build()
}

fn load_file<T: for<'de> Deserialize<'de>>(path: PathBuf) -> Result<T, ConfigError> {
    let reader = std::fs::File::open(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    serde_yaml::from_reader(reader).map_err(|source| ConfigError::Parse { path, source })
}

fn default_dt_ms() -> f64 {
    DEFAULT_DT_MS
}

fn default_v_th() -> f64 {
    DEFAULT_V_TH_MV
}

fn default_max_delay_steps() -> u32 {
    DEFAULT_MAX_DELAY_STEPS
}

fn default_delay_steps() -> u32 {
    1
}
