/*
Andersen thermostat.

Every step, each atom independently suffers a "collision" with the heat bath
with probability p = 1 - exp(-nu dt); a colliding atom throws away its velocity
and draws a new one from the Maxwell-Boltzmann distribution at the target
temperature. The random source is seeded so a fixed seed reproduces a fixed
trajectory.
 */
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{Controller, ControllerContext, ControllerEffect, ThermostatConfig};
use crate::constants::Real;
use crate::error::{MdError, Result};
use crate::system::{maxwell_boltzmann_velocity, SystemState};

#[derive(Debug)]
pub struct AndersenThermostat {
    target_temperature: Real,
    collision_frequency: Real,
    rng: StdRng,
    collisions: u64,
}

impl AndersenThermostat {
    pub fn new(config: &ThermostatConfig) -> Result<Self> {
        if !(config.target_temperature_k > 0.0) {
            return Err(MdError::InvalidConfig(format!(
                "thermostat temperature must be positive, got {}",
                config.target_temperature_k
            )));
        }
        if !(config.collision_frequency_per_ps > 0.0) {
            return Err(MdError::InvalidConfig(format!(
                "thermostat collision frequency must be positive, got {}",
                config.collision_frequency_per_ps
            )));
        }
        Ok(Self {
            target_temperature: config.target_temperature_k,
            collision_frequency: config.collision_frequency_per_ps,
            rng: StdRng::seed_from_u64(config.seed),
            collisions: 0,
        })
    }

    /// Per-atom collision probability for one step of length `dt`.
    pub fn collision_probability(&self, dt: Real) -> Real {
        1.0 - (-self.collision_frequency * dt).exp()
    }

    pub fn collisions(&self) -> u64 {
        self.collisions
    }
}

impl Controller for AndersenThermostat {
    fn name(&self) -> &'static str {
        "andersen thermostat"
    }

    fn maybe_apply(&mut self, state: &mut SystemState, ctx: &ControllerContext) -> Result<ControllerEffect> {
        if ctx.dt <= 0.0 {
            return Ok(ControllerEffect::default());
        }
        let p_coll = self.collision_probability(ctx.dt);

        let mut hits = 0u64;
        for atom in state.atoms.iter_mut() {
            let r: Real = self.rng.random();
            if r < p_coll {
                atom.velocity =
                    maxwell_boltzmann_velocity(self.target_temperature, atom.mass, &mut self.rng);
                hits += 1;
            }
        }
        self.collisions += hits;
        if hits > 0 {
            log::debug!("step {}: {} andersen collision(s)", ctx.step_index, hits);
        }
        Ok(ControllerEffect {
            velocities_changed: hits > 0,
            positions_changed: false,
        })
    }
}
