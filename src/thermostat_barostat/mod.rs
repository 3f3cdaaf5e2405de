//! Temperature and pressure controllers.
//!
//! Both are [`Controller`]s the integrator calls after the constraint stage of
//! every step, thermostat first. Each decides for itself whether the current
//! step is on its cadence.

pub mod andersen;
pub mod berendsen;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{Real, DEFAULT_BAROSTAT_COUPLING_PS, DEFAULT_COMPRESSIBILITY_PER_BAR};
use crate::error::Result;
use crate::system::SystemState;

pub use andersen::AndersenThermostat;
pub use berendsen::{instantaneous_pressure, BerendsenBarostat};

/// What a controller gets to see about the step it is applied on.
#[derive(Clone, Copy, Debug)]
pub struct ControllerContext {
    /// 0-based index of the step just integrated.
    pub step_index: u64,
    pub dt: Real,
    /// `sum r . F` from the latest force evaluation plus the constraint
    /// forces of the step.
    pub virial: Real,
    /// Smallest box edge the force field stays correct for: twice the
    /// longest cutoff. `None` when no term has a cutoff.
    pub min_box_edge: Option<Real>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerEffect {
    pub velocities_changed: bool,
    /// Positions or box moved; cached forces are stale.
    pub positions_changed: bool,
}

pub trait Controller: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn maybe_apply(&mut self, state: &mut SystemState, ctx: &ControllerContext) -> Result<ControllerEffect>;

    /// Whether step reports should carry pressure and volume.
    fn reports_pressure(&self) -> bool {
        false
    }
}

/// `enableThermostat(T, collision frequency)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThermostatConfig {
    pub target_temperature_k: Real,
    pub collision_frequency_per_ps: Real,
    #[serde(default)]
    pub seed: u64,
}

/// `enableBarostat(P, every N steps)`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarostatConfig {
    pub target_pressure_bar: Real,
    pub apply_every_n_steps: u64,
    #[serde(default = "default_compressibility")]
    pub compressibility_per_bar: Real,
    #[serde(default = "default_coupling")]
    pub coupling_time_ps: Real,
}

fn default_compressibility() -> Real {
    DEFAULT_COMPRESSIBILITY_PER_BAR
}

fn default_coupling() -> Real {
    DEFAULT_BAROSTAT_COUPLING_PS
}

impl BarostatConfig {
    pub fn new(target_pressure_bar: Real, apply_every_n_steps: u64) -> Self {
        Self {
            target_pressure_bar,
            apply_every_n_steps,
            compressibility_per_bar: DEFAULT_COMPRESSIBILITY_PER_BAR,
            coupling_time_ps: DEFAULT_BAROSTAT_COUPLING_PS,
        }
    }
}
