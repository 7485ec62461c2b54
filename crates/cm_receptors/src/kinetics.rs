//! Two-state rise/decay conductance kinetics.
//!
//! A spike of weight `w` subtracts `w * g_norm` from the rise state and adds
//! the same amount to the decay state; the conductance is their sum, so a
//! single unit spike traces a difference of exponentials peaking at 1.

use cm_core::is_finite_positive;
use serde::{Deserialize, Serialize};

use crate::ReceptorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceptorKind {
    Ampa,
    Gaba,
    Nmda,
    AmpaNmda,
}

impl ReceptorKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "AMPA" => Some(Self::Ampa),
            "GABA" => Some(Self::Gaba),
            "NMDA" => Some(Self::Nmda),
            "AMPA_NMDA" => Some(Self::AmpaNmda),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Ampa => "AMPA",
            Self::Gaba => "GABA",
            Self::Nmda => "NMDA",
            Self::AmpaNmda => "AMPA_NMDA",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Ampa => 0,
            Self::Gaba => 1,
            Self::Nmda => 2,
            Self::AmpaNmda => 3,
        }
    }
}

/// Optional overrides of the per-kind defaults. `tau_r_nmda`, `tau_d_nmda`
/// and `nmda_ratio` only apply to `AmpaNmda`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReceptorParams {
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

impl ReceptorParams {
    pub fn with_taus(tau_r: f64, tau_d: f64) -> Self {
        Self {
            tau_r: Some(tau_r),
            tau_d: Some(tau_d),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiseDecay {
    pub tau_r: f64,
    pub tau_d: f64,
    pub g_norm: f64,
    prop_r: f64,
    prop_d: f64,
}

impl RiseDecay {
    pub fn new(tau_r: f64, tau_d: f64, dt_ms: f64) -> Result<Self, ReceptorError> {
        if !is_finite_positive(tau_r) {
            return Err(ReceptorError::InvalidParameter {
                name: "tau_r",
                value: tau_r,
            });
        }
        if !is_finite_positive(tau_d) || tau_d <= tau_r {
            return Err(ReceptorError::InvalidParameter {
                name: "tau_d",
                value: tau_d,
            });
        }
        Ok(Self {
            tau_r,
            tau_d,
            g_norm: peak_normalization(tau_r, tau_d),
            prop_r: (-dt_ms / tau_r).exp(),
            prop_d: (-dt_ms / tau_d).exp(),
        })
    }

    /// Mean conductance per unit weight per ms under a steady spike rate.
    pub fn surface(&self) -> f64 {
        self.g_norm * (self.tau_d - self.tau_r)
    }
}

fn peak_normalization(tau_r: f64, tau_d: f64) -> f64 {
    let tp = (tau_r * tau_d) / (tau_d - tau_r) * (tau_d / tau_r).ln();
    1.0 / ((-tp / tau_d).exp() - (-tp / tau_r).exp())
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiseDecayState {
    pub g_r: f64,
    pub g_d: f64,
}

impl RiseDecayState {
    /// Spikes due this step land at its start, so the end-of-step
    /// conductance already reflects them.
    pub fn advance(&mut self, kinetics: &RiseDecay, spike_weight: f64) {
        let s = spike_weight * kinetics.g_norm;
        self.g_r -= s;
        self.g_d += s;
        self.g_r *= kinetics.prop_r;
        self.g_d *= kinetics.prop_d;
    }

    pub fn conductance(&self) -> f64 {
        (self.g_r + self.g_d).max(0.0)
    }
}

/// Per-receptor state. The secondary pair is only used by `AmpaNmda`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReceptorState {
    pub primary: RiseDecayState,
    pub secondary: RiseDecayState,
}

/// Current linearised around the start-of-step voltage, already split for the
/// trapezoidal scheme: `g` adds to the matrix diagonal, `i` to the right-hand
/// side.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Linearized {
    pub g: f64,
    pub i: f64,
}

impl Linearized {
    fn from_current(i_tot: f64, d_i_dv: f64, v: f64) -> Self {
        Self {
            g: -d_i_dv / 2.0,
            i: i_tot - d_i_dv * v / 2.0,
        }
    }
}

impl std::ops::AddAssign for Linearized {
    fn add_assign(&mut self, rhs: Self) {
        self.g += rhs.g;
        self.i += rhs.i;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReceptorModel {
    Linear {
        kinetics: RiseDecay,
        e_rev: f64,
    },
    Nmda {
        kinetics: RiseDecay,
        e_rev: f64,
    },
    AmpaNmda {
        ampa: RiseDecay,
        nmda: RiseDecay,
        e_rev: f64,
        nmda_ratio: f64,
    },
}

impl ReceptorModel {
    pub fn build(
        kind: ReceptorKind,
        params: ReceptorParams,
        dt_ms: f64,
    ) -> Result<Self, ReceptorError> {
        let (tau_r, tau_d, e_rev) = match kind {
            ReceptorKind::Ampa => (0.2, 3.0, 0.0),
            ReceptorKind::Gaba => (0.2, 10.0, -80.0),
            ReceptorKind::Nmda => (0.2, 43.0, 0.0),
            ReceptorKind::AmpaNmda => (0.2, 3.0, 0.0),
        };
        let tau_r = params.tau_r.unwrap_or(tau_r);
        let tau_d = params.tau_d.unwrap_or(tau_d);
        let e_rev = params.e_rev.unwrap_or(e_rev);
        if !e_rev.is_finite() {
            return Err(ReceptorError::InvalidParameter {
                name: "e_rev",
                value: e_rev,
            });
        }
        let kinetics = RiseDecay::new(tau_r, tau_d, dt_ms)?;
        match kind {
            ReceptorKind::Ampa | ReceptorKind::Gaba => Ok(Self::Linear { kinetics, e_rev }),
            ReceptorKind::Nmda => Ok(Self::Nmda { kinetics, e_rev }),
            ReceptorKind::AmpaNmda => {
                let nmda = RiseDecay::new(
                    params.tau_r_nmda.unwrap_or(0.2),
                    params.tau_d_nmda.unwrap_or(43.0),
                    dt_ms,
                )?;
                let nmda_ratio = params.nmda_ratio.unwrap_or(2.0);
                if !nmda_ratio.is_finite() || nmda_ratio < 0.0 {
                    return Err(ReceptorError::InvalidParameter {
                        name: "nmda_ratio",
                        value: nmda_ratio,
                    });
                }
                Ok(Self::AmpaNmda {
                    ampa: kinetics,
                    nmda,
                    e_rev,
                    nmda_ratio,
                })
            }
        }
    }

    pub fn advance(&self, state: &mut ReceptorState, spike_weight: f64) {
        match self {
            Self::Linear { kinetics, .. } | Self::Nmda { kinetics, .. } => {
                state.primary.advance(kinetics, spike_weight);
            }
            Self::AmpaNmda { ampa, nmda, .. } => {
                state.primary.advance(ampa, spike_weight);
                state.secondary.advance(nmda, spike_weight);
            }
        }
    }

    pub fn linearize(&self, state: &ReceptorState, v: f64) -> Linearized {
        match *self {
            Self::Linear { e_rev, .. } => {
                let g = state.primary.conductance();
                Linearized::from_current(g * (e_rev - v), -g, v)
            }
            Self::Nmda { e_rev, .. } => {
                let (i_tot, d_i_dv) = nmda_current(state.primary.conductance(), e_rev, v);
                Linearized::from_current(i_tot, d_i_dv, v)
            }
            Self::AmpaNmda {
                e_rev, nmda_ratio, ..
            } => {
                let g_ampa = state.primary.conductance();
                let (i_nmda, d_nmda) = nmda_current(state.secondary.conductance(), e_rev, v);
                let i_tot = g_ampa * (e_rev - v) + nmda_ratio * i_nmda;
                let d_i_dv = -g_ampa + nmda_ratio * d_nmda;
                Linearized::from_current(i_tot, d_i_dv, v)
            }
        }
    }

    pub fn conductance(&self, state: &ReceptorState) -> f64 {
        match self {
            Self::Linear { .. } | Self::Nmda { .. } => state.primary.conductance(),
            Self::AmpaNmda { nmda_ratio, .. } => {
                state.primary.conductance() + nmda_ratio * state.secondary.conductance()
            }
        }
    }

    pub fn e_rev(&self) -> f64 {
        match *self {
            Self::Linear { e_rev, .. } | Self::Nmda { e_rev, .. } | Self::AmpaNmda { e_rev, .. } => {
                e_rev
            }
        }
    }

    pub fn primary_kinetics(&self) -> &RiseDecay {
        match self {
            Self::Linear { kinetics, .. } | Self::Nmda { kinetics, .. } => kinetics,
            Self::AmpaNmda { ampa, .. } => ampa,
        }
    }
}

/// Magnesium block.
fn nmda_sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + 0.3 * (-0.1 * v).exp())
}

fn nmda_sigmoid_dv(v: f64) -> f64 {
    let e = (-0.1 * v).exp();
    0.03 * e / (0.3 * e + 1.0).powi(2)
}

fn nmda_current(g: f64, e_rev: f64, v: f64) -> (f64, f64) {
    let sig = nmda_sigmoid(v);
    let i_tot = g * (e_rev - v) * sig;
    let d_i_dv = -g * sig + g * (e_rev - v) * nmda_sigmoid_dv(v);
    (i_tot, d_i_dv)
}
