/*
Velocity Verlet integrator and the per-step state machine.

One call to `step` runs, in order:

    half-kick with the cached forces (computed first if there are none)
    drift
    constraint position stage (SHAKE) against the pre-drift positions
    new forces, half-kick
    constraint velocity stage (RATTLE)
    controllers in order; RATTLE again after any velocity change
    a fresh force evaluation if a controller moved atoms
    report

The virial handed to controllers and used for the reported pressure includes
the constraint forces: the mean of the SHAKE and RATTLE contributions, since
each acts over one half kick.

Positions are never wrapped back into the box: molecules stay whole and the
barostat can take their centres of mass directly.
 */
use nalgebra::Vector3;
use serde::Serialize;

use crate::constants::Real;
use crate::constraints::ConstraintSolver;
use crate::device::{Device, DeviceKind};
use crate::error::{MdError, Result};
use crate::forcefield::{EnergyBreakdown, ForceEvaluation, ForceField};
use crate::system::{Atom, SimulationBox, SystemState};
use crate::thermostat_barostat::{instantaneous_pressure, Controller, ControllerContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegratorState {
    /// Constructed; no forces computed yet.
    Idle,
    Stepping,
    /// The step just taken produced a report.
    Reporting,
    Terminated,
}

#[derive(Clone, Debug, Serialize)]
pub struct StepReport {
    pub step_index: u64,
    pub time_ps: Real,
    pub kinetic_energy: Real,
    pub potential_energy: Real,
    pub total_energy: Real,
    pub breakdown: EnergyBreakdown,
    pub temperature_k: Real,
    pub pressure_bar: Option<Real>,
    pub volume_nm3: Option<Real>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegratorSettings {
    pub dt: Real,
    pub steps: u64,
    pub report_every: u64,
}

pub struct Integrator {
    state: SystemState,
    force_field: ForceField,
    constraints: ConstraintSolver,
    device: Box<dyn Device>,
    controllers: Vec<Box<dyn Controller>>,
    dt: Real,
    steps: u64,
    report_every: u64,
    step_index: u64,
    phase: IntegratorState,
    forces: Option<ForceEvaluation>,
    degrees_of_freedom: usize,
}

impl std::fmt::Debug for Integrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integrator")
            .field("device", &self.device.kind())
            .field("dt", &self.dt)
            .field("steps", &self.steps)
            .field("step_index", &self.step_index)
            .field("phase", &self.phase)
            .finish()
    }
}

impl Integrator {
    pub fn new(
        mut state: SystemState,
        force_field: ForceField,
        constraints: ConstraintSolver,
        device: Box<dyn Device>,
        settings: IntegratorSettings,
    ) -> Result<Self> {
        if !(settings.dt > 0.0) || !settings.dt.is_finite() {
            return Err(MdError::InvalidConfig(format!(
                "time step must be positive, got {} ps",
                settings.dt
            )));
        }
        if settings.report_every == 0 {
            return Err(MdError::InvalidConfig(
                "report interval must be at least 1".to_string(),
            ));
        }

        // start from velocities that already respect the constraints
        constraints.apply_velocities(&mut state, settings.dt)?;
        let degrees_of_freedom = (3 * state.atom_count()).saturating_sub(constraints.count());
        let phase = if settings.steps == 0 {
            IntegratorState::Terminated
        } else {
            IntegratorState::Idle
        };

        Ok(Self {
            state,
            force_field,
            constraints,
            device,
            controllers: Vec::new(),
            dt: settings.dt,
            steps: settings.steps,
            report_every: settings.report_every,
            step_index: 0,
            phase,
            forces: None,
            degrees_of_freedom,
        })
    }

    /// Appends a controller; controllers run in the order they were added.
    pub fn with_controller(mut self, controller: Box<dyn Controller>) -> Self {
        self.controllers.push(controller);
        self
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn into_state(self) -> SystemState {
        self.state
    }

    pub fn phase(&self) -> IntegratorState {
        self.phase
    }

    /// Steps completed so far.
    pub fn completed_steps(&self) -> u64 {
        self.step_index
    }

    pub fn total_steps(&self) -> u64 {
        self.steps
    }

    pub fn dt(&self) -> Real {
        self.dt
    }

    pub fn time_ps(&self) -> Real {
        self.step_index as Real * self.dt
    }

    pub fn degrees_of_freedom(&self) -> usize {
        self.degrees_of_freedom
    }

    pub fn device_kind(&self) -> DeviceKind {
        self.device.kind()
    }

    pub fn force_field(&self) -> &ForceField {
        &self.force_field
    }

    pub fn constraints(&self) -> &ConstraintSolver {
        &self.constraints
    }

    fn is_report_step(&self, k: u64) -> bool {
        (k + 1) % self.report_every == 0 || k + 1 == self.steps
    }

    /// Advances one step. Returns the step's report when it falls on the
    /// report cadence or is the last step. On error the state is rolled back
    /// to the end of the previous step.
    pub fn step(&mut self) -> Result<Option<StepReport>> {
        if self.phase == IntegratorState::Terminated {
            return Err(MdError::AlreadyTerminated { steps: self.steps });
        }
        let checkpoint: (Vec<Atom>, Option<SimulationBox>) =
            (self.state.atoms.clone(), self.state.simulation_box);

        match self.advance() {
            Ok(report) => {
                self.step_index += 1;
                self.phase = if self.step_index >= self.steps {
                    IntegratorState::Terminated
                } else if report.is_some() {
                    IntegratorState::Reporting
                } else {
                    IntegratorState::Stepping
                };
                Ok(report)
            }
            Err(e) => {
                let (atoms, simulation_box) = checkpoint;
                self.state.atoms = atoms;
                self.state.simulation_box = simulation_box;
                self.forces = None;
                Err(e)
            }
        }
    }

    fn advance(&mut self) -> Result<Option<StepReport>> {
        let k = self.step_index;
        let dt = self.dt;

        let current = match self.forces.take() {
            Some(forces) => forces,
            None => self.evaluate()?,
        };
        let previous = self.state.positions();
        half_kick(&mut self.state.atoms, &current.forces, dt);
        for atom in self.state.atoms.iter_mut() {
            atom.position += dt * atom.velocity;
        }
        let position_virial = self.constraints.apply(&mut self.state, &previous, dt)?;

        let mut evaluation = self.evaluate()?;
        half_kick(&mut self.state.atoms, &evaluation.forces, dt);
        let velocity_virial = self.constraints.apply_velocities(&mut self.state, dt)?;
        let constraint_virial = 0.5 * (position_virial + velocity_virial);

        let ctx = ControllerContext {
            step_index: k,
            dt,
            virial: evaluation.virial + constraint_virial,
            min_box_edge: self.force_field.cutoff().map(|c| 2.0 * c),
        };
        let mut moved = false;
        for controller in self.controllers.iter_mut() {
            let effect = controller.maybe_apply(&mut self.state, &ctx)?;
            if effect.velocities_changed {
                self.constraints.apply_velocities(&mut self.state, dt)?;
            }
            moved |= effect.positions_changed;
        }
        if moved {
            evaluation = self.evaluate()?;
        }

        let kinetic_energy = self.state.kinetic_energy();
        let potential_energy = evaluation.potential_energy();
        let total_energy = kinetic_energy + potential_energy;
        if !total_energy.is_finite() {
            return Err(MdError::NumericalInstability {
                step: k,
                detail: format!(
                    "kinetic energy {kinetic_energy}, potential energy {potential_energy}"
                ),
            });
        }

        let report = if self.is_report_step(k) {
            let with_pressure = self.controllers.iter().any(|c| c.reports_pressure());
            Some(StepReport {
                step_index: k,
                time_ps: (k + 1) as Real * dt,
                kinetic_energy,
                potential_energy,
                total_energy,
                breakdown: evaluation.breakdown,
                temperature_k: self.state.temperature(self.degrees_of_freedom),
                pressure_bar: if with_pressure {
                    instantaneous_pressure(&self.state, evaluation.virial + constraint_virial)
                } else {
                    None
                },
                volume_nm3: if with_pressure { self.state.volume() } else { None },
            })
        } else {
            None
        };
        self.forces = Some(evaluation);
        Ok(report)
    }

    fn evaluate(&self) -> Result<ForceEvaluation> {
        self.force_field
            .compute_forces(&self.state, self.device.as_ref())
    }
}

fn half_kick(atoms: &mut [Atom], forces: &[Vector3<Real>], dt: Real) {
    for (atom, force) in atoms.iter_mut().zip(forces) {
        atom.velocity += 0.5 * dt * force / atom.mass;
    }
}
