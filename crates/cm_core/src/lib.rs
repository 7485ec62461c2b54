#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NeuronId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompartmentId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReceptorId(pub u32);

impl CompartmentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ReceptorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl NeuronId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub const DEFAULT_DT_MS: f64 = 0.1;
pub const DEFAULT_V_TH_MV: f64 = -55.0;
pub const DEFAULT_MAX_DELAY_STEPS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TimeGridError {
    #[error("resolution must be finite and positive")]
    InvalidResolution,
    #[error("time {0} ms is negative or not finite")]
    InvalidTime(OrderedMs),
}

/// Millisecond value carried by errors; compared bitwise so errors stay `Eq`.
#[derive(Debug, Clone, Copy)]
pub struct OrderedMs(pub f64);

impl PartialEq for OrderedMs {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedMs {}

impl std::fmt::Display for OrderedMs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed simulation resolution. Step `k` covers `[k*dt, (k+1)*dt)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeGrid {
    dt_ms: f64,
}

impl TimeGrid {
    pub fn new(dt_ms: f64) -> Result<Self, TimeGridError> {
        if !dt_ms.is_finite() || dt_ms <= 0.0 {
            return Err(TimeGridError::InvalidResolution);
        }
        Ok(Self { dt_ms })
    }

    pub fn dt_ms(&self) -> f64 {
        self.dt_ms
    }

    pub fn step_start_ms(&self, step: u64) -> f64 {
        step as f64 * self.dt_ms
    }

    /// Step index whose start lies nearest to `time_ms`.
    pub fn step_at(&self, time_ms: f64) -> Result<u64, TimeGridError> {
        if !time_ms.is_finite() || time_ms < 0.0 {
            return Err(TimeGridError::InvalidTime(OrderedMs(time_ms)));
        }
        Ok((time_ms / self.dt_ms).round() as u64)
    }
}

impl Default for TimeGrid {
    fn default() -> Self {
        Self {
            dt_ms: DEFAULT_DT_MS,
        }
    }
}

pub fn is_finite_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

pub fn is_finite_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
