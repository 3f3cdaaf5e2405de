/*
Berendsen weak-coupling barostat.

On its cadence it scales the box and every molecule's centre of mass by mu,

    mu^3 = 1 - (N dt / tau_p) * beta * (P0 - P)

clamped to [0.5, 1.5] before the cube root. Intramolecular geometry is left
alone, so constrained waters and bonds stay satisfied.

A scaling that would take any box edge below twice the nonbonded cutoff is
refused and the state is left untouched.
 */
use nalgebra::Vector3;

use super::{BarostatConfig, Controller, ControllerContext, ControllerEffect};
use crate::constants::{Real, BAROSTAT_SCALE_MAX, BAROSTAT_SCALE_MIN, BAR_PER_KJ_MOL_NM3};
use crate::error::{MdError, Result};
use crate::system::SystemState;

/// `P = (2 KE + W) / (3 V)` in bar; `None` for an unbounded system.
pub fn instantaneous_pressure(state: &SystemState, virial: Real) -> Option<Real> {
    let volume = state.volume()?;
    Some((2.0 * state.kinetic_energy() + virial) / (3.0 * volume) * BAR_PER_KJ_MOL_NM3)
}

#[derive(Debug)]
pub struct BerendsenBarostat {
    target_pressure: Real,
    apply_every: u64,
    compressibility: Real,
    tau_p: Real,
    molecules: Vec<Vec<usize>>,
    last_pressure: Option<Real>,
}

impl BerendsenBarostat {
    pub fn new(config: &BarostatConfig, state: &SystemState) -> Result<Self> {
        if config.apply_every_n_steps == 0 {
            return Err(MdError::InvalidConfig(
                "barostat must apply every N >= 1 steps".to_string(),
            ));
        }
        if !(config.compressibility_per_bar > 0.0) || !(config.coupling_time_ps > 0.0) {
            return Err(MdError::InvalidConfig(format!(
                "barostat compressibility ({}) and coupling time ({}) must be positive",
                config.compressibility_per_bar, config.coupling_time_ps
            )));
        }
        if !state.is_periodic() {
            return Err(MdError::InvalidConfig(
                "barostat requires a periodic box".to_string(),
            ));
        }
        Ok(Self {
            target_pressure: config.target_pressure_bar,
            apply_every: config.apply_every_n_steps,
            compressibility: config.compressibility_per_bar,
            tau_p: config.coupling_time_ps,
            molecules: state.molecules(),
            last_pressure: None,
        })
    }

    pub fn is_due(&self, step_index: u64) -> bool {
        step_index % self.apply_every == 0
    }

    pub fn last_pressure(&self) -> Option<Real> {
        self.last_pressure
    }
}

impl Controller for BerendsenBarostat {
    fn name(&self) -> &'static str {
        "berendsen barostat"
    }

    fn reports_pressure(&self) -> bool {
        true
    }

    fn maybe_apply(&mut self, state: &mut SystemState, ctx: &ControllerContext) -> Result<ControllerEffect> {
        if !self.is_due(ctx.step_index) || ctx.dt <= 0.0 {
            return Ok(ControllerEffect::default());
        }
        let Some(pressure) = instantaneous_pressure(state, ctx.virial) else {
            return Ok(ControllerEffect::default());
        };
        self.last_pressure = Some(pressure);

        let coupling = self.apply_every as Real * ctx.dt / self.tau_p;
        let scale = 1.0 - coupling * self.compressibility * (self.target_pressure - pressure);
        let mu = scale.clamp(BAROSTAT_SCALE_MIN, BAROSTAT_SCALE_MAX).cbrt();

        let Some(b) = state.simulation_box.as_mut() else {
            return Ok(ControllerEffect::default());
        };
        if let Some(min_edge) = ctx.min_box_edge {
            let edge = b.lengths().min() * mu;
            if edge < min_edge {
                return Err(MdError::BoxBelowCutoff {
                    edge,
                    cutoff: 0.5 * min_edge,
                });
            }
        }
        b.scale(mu);
        for molecule in &self.molecules {
            let com = state.center_of_mass(molecule);
            let shift: Vector3<Real> = com * (mu - 1.0);
            for &i in molecule {
                state.atoms[i].position += shift;
            }
        }
        log::debug!(
            "step {}: pressure {:.1} bar, box scaled by {:.6}",
            ctx.step_index,
            pressure,
            mu
        );
        Ok(ControllerEffect {
            velocities_changed: false,
            positions_changed: true,
        })
    }
}
