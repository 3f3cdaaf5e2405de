//! Top-level run loop.
//!
//! The driver owns the integrator (and through it the only mutable
//! `SystemState`), forwards reports to a [`Reporter`], hands snapshots to a
//! [`TrajectoryWriter`] on its cadence and checks for cancellation between
//! steps. Any error ends the run; the state of the last completed step stays
//! available through [`SimulationDriver::state`].

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use crate::config::RunConfig;
use crate::constraints::ConstraintSolver;
use crate::device;
use crate::error::{Component, MdError, Result};
use crate::forcefield::ForceField;
use crate::integrator::{Integrator, IntegratorSettings, IntegratorState, StepReport};
use crate::io::{StateLoader, TrajectoryWriter};
use crate::reporter::Reporter;
use crate::system::SystemState;
use crate::thermostat_barostat::{AndersenThermostat, BerendsenBarostat};

/// Cooperative stop flag, honoured between steps only.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub steps_completed: u64,
    pub reports_emitted: usize,
    pub frames_written: usize,
    pub cancelled: bool,
    pub last_report: Option<StepReport>,
    pub final_state: SystemState,
    pub wall_time: Duration,
}

#[derive(Debug, Error)]
#[error("run failed in {component} {}: {error}", progress(.last_completed_step))]
pub struct RunFailure {
    /// 0-based index of the last step that completed, if any did.
    pub last_completed_step: Option<u64>,
    pub component: Component,
    #[source]
    pub error: MdError,
}

fn progress(last_completed_step: &Option<u64>) -> String {
    match last_completed_step {
        Some(step) => format!("after step {step}"),
        None => "before the first step completed".to_string(),
    }
}

#[derive(Debug)]
pub struct SimulationDriver {
    integrator: Integrator,
    trajectory_every: Option<NonZeroU64>,
    cancel: CancellationToken,
}

impl SimulationDriver {
    /// `trajectory_every: None` writes only the final frame.
    pub fn new(integrator: Integrator, trajectory_every: Option<NonZeroU64>) -> Self {
        Self {
            integrator,
            trajectory_every,
            cancel: CancellationToken::new(),
        }
    }

    /// Assembles force field, constraints, device and controllers for `state`
    /// as `config` describes.
    pub fn from_config(config: &RunConfig, mut state: SystemState) -> Result<Self> {
        config.validate()?;
        state.validate("initial state")?;

        if let Some(seed) = config.velocity_seed {
            log::info!(
                "drawing velocities at {} K (seed {seed})",
                config.initial_temperature_k
            );
            state.assign_maxwell_boltzmann_velocities(
                config.initial_temperature_k,
                &mut StdRng::seed_from_u64(seed),
            );
        }

        let force_field =
            ForceField::from_topology(&state, &config.forces, config.nonbonded_cutoff_nm)?;
        let constraints = ConstraintSolver::from_state(&state, &config.constraints)?;
        let barostat = match &config.barostat {
            Some(b) => Some(BerendsenBarostat::new(b, &state)?),
            None => None,
        };
        let thermostat = match &config.thermostat {
            Some(t) => Some(AndersenThermostat::new(t)?),
            None => None,
        };
        let device = device::provision(config.device, config.device_timeout())?;

        let mut integrator = Integrator::new(
            state,
            force_field,
            constraints,
            device,
            IntegratorSettings {
                dt: config.dt_ps,
                steps: config.steps,
                report_every: config.report_every,
            },
        )?;
        if let Some(t) = thermostat {
            integrator = integrator.with_controller(Box::new(t));
        }
        if let Some(b) = barostat {
            integrator = integrator.with_controller(Box::new(b));
        }
        Ok(Self::new(integrator, config.trajectory_every))
    }

    /// Loads the system and state files named by `config`, then
    /// [`SimulationDriver::from_config`].
    pub fn load(config: &RunConfig, loader: &dyn StateLoader) -> Result<Self> {
        let (Some(system), Some(state)) = (&config.system, &config.state) else {
            return Err(MdError::InvalidConfig(
                "both `system` and `state` files are required".to_string(),
            ));
        };
        let state = loader.load(system, state)?;
        Self::from_config(config, state)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn integrator(&self) -> &Integrator {
        &self.integrator
    }

    /// State after the last completed step.
    pub fn state(&self) -> &SystemState {
        self.integrator.state()
    }

    pub fn into_state(self) -> SystemState {
        self.integrator.into_state()
    }

    pub fn run(
        &mut self,
        reporter: &mut dyn Reporter,
        mut trajectory: Option<&mut dyn TrajectoryWriter>,
    ) -> std::result::Result<RunSummary, RunFailure> {
        let started = Instant::now();
        let total = self.integrator.total_steps();
        log::info!(
            "starting run: {} step(s) of {} ps on the {} device, {} degrees of freedom",
            total,
            self.integrator.dt(),
            self.integrator.device_kind(),
            self.integrator.degrees_of_freedom()
        );

        let mut reports_emitted = 0;
        let mut frames_written = 0;
        let mut last_report = None;
        let mut last_frame = None;
        let mut cancelled = false;

        while self.integrator.phase() != IntegratorState::Terminated {
            if self.cancel.is_cancelled() {
                log::warn!(
                    "run cancelled after {} of {} step(s)",
                    self.integrator.completed_steps(),
                    total
                );
                cancelled = true;
                break;
            }
            let report = self
                .integrator
                .step()
                .map_err(|e| self.failure(e, None))?;
            let step = self.integrator.completed_steps() - 1;

            if let Some(report) = report {
                reporter
                    .report(&report)
                    .map_err(|e| self.failure(e, Some(Component::Reporter)))?;
                reports_emitted += 1;
                last_report = Some(report);
            }
            if let (Some(every), Some(writer)) = (self.trajectory_every, trajectory.as_deref_mut()) {
                if (step + 1) % every.get() == 0 {
                    writer
                        .write_frame(self.integrator.state(), step)
                        .map_err(|e| self.failure(e, Some(Component::TrajectoryWriter)))?;
                    frames_written += 1;
                    last_frame = Some(step);
                }
            }
        }

        let steps_completed = self.integrator.completed_steps();
        if let Some(writer) = trajectory.as_deref_mut() {
            let final_step = steps_completed.saturating_sub(1);
            if last_frame != Some(final_step) || steps_completed == 0 {
                writer
                    .write_frame(self.integrator.state(), final_step)
                    .map_err(|e| self.failure(e, Some(Component::TrajectoryWriter)))?;
                frames_written += 1;
            }
            writer
                .finish()
                .map_err(|e| self.failure(e, Some(Component::TrajectoryWriter)))?;
        }
        reporter
            .finish()
            .map_err(|e| self.failure(e, Some(Component::Reporter)))?;

        let wall_time = started.elapsed();
        log::info!(
            "run finished: {} step(s), {} report(s), {} frame(s) in {:.2?}",
            steps_completed,
            reports_emitted,
            frames_written,
            wall_time
        );
        Ok(RunSummary {
            steps_completed,
            reports_emitted,
            frames_written,
            cancelled,
            last_report,
            final_state: self.integrator.state().clone(),
            wall_time,
        })
    }

    fn failure(&self, error: MdError, component: Option<Component>) -> RunFailure {
        let failure = RunFailure {
            last_completed_step: self.integrator.completed_steps().checked_sub(1),
            component: component.unwrap_or_else(|| error.component()),
            error,
        };
        log::error!("{failure}");
        failure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders;
    use crate::device::HostDevice;
    use crate::reporter::VecReporter;
    use crate::thermostat_barostat::{Controller, ControllerContext, ControllerEffect};
    use nalgebra::Vector3;

    struct FailingWriter {
        calls: usize,
    }

    impl TrajectoryWriter for FailingWriter {
        fn write_frame(&mut self, _: &SystemState, step: u64) -> Result<()> {
            self.calls += 1;
            Err(MdError::Output {
                path: format!("frame-{step}.pdb").into(),
                source: std::io::Error::other("disk full"),
            })
        }
    }

    #[derive(Default)]
    struct CountingWriter {
        steps: Vec<u64>,
        finished: bool,
    }

    impl TrajectoryWriter for CountingWriter {
        fn write_frame(&mut self, _: &SystemState, step: u64) -> Result<()> {
            self.steps.push(step);
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    /// Sends one atom off to infinity on the given step.
    #[derive(Debug)]
    struct BlowUpAt(u64);

    impl Controller for BlowUpAt {
        fn name(&self) -> &'static str {
            "blow-up"
        }

        fn maybe_apply(&mut self, state: &mut SystemState, ctx: &ControllerContext) -> Result<ControllerEffect> {
            if ctx.step_index == self.0 {
                state.atoms[0].velocity = Vector3::repeat(f64::INFINITY);
            }
            Ok(ControllerEffect::default())
        }
    }

    fn ethane_config(steps: u64, report_every: u64) -> RunConfig {
        RunConfig {
            steps,
            report_every,
            dt_ps: 0.0005,
            velocity_seed: Some(11),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_report_count_is_ceil_of_steps_over_interval() {
        for (steps, every, expected) in [(10, 3, 4), (9, 3, 3), (1, 5, 1), (0, 4, 0)] {
            let config = ethane_config(steps, every);
            let mut driver = SimulationDriver::from_config(&config, builders::make_ethane()).unwrap();
            let mut reports = VecReporter::default();
            let summary = driver.run(&mut reports, None).unwrap();
            assert_eq!(summary.reports_emitted, expected, "{steps} / {every}");
            assert_eq!(reports.reports.len(), expected);
            assert_eq!(summary.steps_completed, steps);
            assert_eq!(driver.integrator().phase(), IntegratorState::Terminated);
        }
    }

    #[test]
    fn test_trajectory_cadence_and_final_frame() {
        let config = RunConfig {
            trajectory_every: NonZeroU64::new(4),
            ..ethane_config(10, 5)
        };
        let mut driver = SimulationDriver::from_config(&config, builders::make_ethane()).unwrap();
        let mut writer = CountingWriter::default();
        let summary = driver.run(&mut VecReporter::default(), Some(&mut writer)).unwrap();
        assert_eq!(writer.steps, vec![3, 7, 9]);
        assert!(writer.finished);
        assert_eq!(summary.frames_written, 3);
    }

    #[test]
    fn test_cancelled_before_start_runs_nothing() {
        let mut driver =
            SimulationDriver::from_config(&ethane_config(50, 5), builders::make_ethane()).unwrap();
        driver.cancellation_token().cancel();
        let summary = driver.run(&mut VecReporter::default(), None).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.steps_completed, 0);
        assert_eq!(summary.reports_emitted, 0);
    }

    #[test]
    fn test_writer_failure_names_component_and_step() {
        let config = RunConfig {
            trajectory_every: NonZeroU64::new(2),
            ..ethane_config(10, 5)
        };
        let mut driver = SimulationDriver::from_config(&config, builders::make_ethane()).unwrap();
        let mut writer = FailingWriter { calls: 0 };
        let failure = driver
            .run(&mut VecReporter::default(), Some(&mut writer))
            .unwrap_err();
        assert_eq!(failure.component, Component::TrajectoryWriter);
        assert_eq!(failure.last_completed_step, Some(1));
        assert_eq!(writer.calls, 1);
        assert_eq!(driver.integrator().completed_steps(), 2);
    }

    #[test]
    fn test_non_finite_step_stops_the_run_on_the_last_good_state() {
        let mut state = builders::make_ethane();
        state.assign_maxwell_boltzmann_velocities(300.0, &mut StdRng::seed_from_u64(7));
        let ff = ForceField::from_topology(&state, &crate::forcefield::ForceFlags::default(), 1.0).unwrap();
        let constraints = ConstraintSolver::disabled(state.atom_count());
        let settings = IntegratorSettings {
            dt: 0.0005,
            steps: 10,
            report_every: 1,
        };
        let integrator = Integrator::new(state, ff, constraints, Box::new(HostDevice), settings)
            .unwrap()
            .with_controller(Box::new(BlowUpAt(3)));
        let mut driver = SimulationDriver::new(integrator, None);
        let mut reports = VecReporter::default();
        let mut writer = CountingWriter::default();

        let failure = driver.run(&mut reports, Some(&mut writer)).unwrap_err();
        assert_eq!(failure.component, Component::Integrator);
        assert!(matches!(
            failure.error,
            MdError::NumericalInstability { step: 3, .. }
        ));
        assert_eq!(failure.last_completed_step, Some(2));
        let steps: Vec<u64> = reports.reports.iter().map(|r| r.step_index).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(driver.integrator().completed_steps(), 3);
        assert!(writer.steps.is_empty() && !writer.finished);
        assert!(driver
            .state()
            .atoms
            .iter()
            .all(|a| a.velocity.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_zero_trajectory_interval_writes_only_the_final_frame() {
        let config = ethane_config(6, 3);
        let integrator = SimulationDriver::from_config(&config, builders::make_ethane())
            .unwrap()
            .integrator;
        let mut driver = SimulationDriver::new(integrator, NonZeroU64::new(0));
        let mut writer = CountingWriter::default();
        driver.run(&mut VecReporter::default(), Some(&mut writer)).unwrap();
        assert_eq!(writer.steps, vec![5]);
    }

    #[test]
    fn test_barostat_on_unbounded_system_is_rejected() {
        let mut config = ethane_config(10, 5);
        config.enable_barostat(1.0, 5);
        let err = SimulationDriver::from_config(&config, builders::make_ethane()).unwrap_err();
        assert!(matches!(err, MdError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_requires_both_files() {
        let config = RunConfig::default();
        let err = SimulationDriver::load(&config, &crate::io::JsonStateLoader).unwrap_err();
        assert!(matches!(err, MdError::InvalidConfig(_)));
    }
}
