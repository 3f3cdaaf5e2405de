//! End-to-end runs through the public API.

use std::fs;

use nexus_md::builders;
use nexus_md::constants::THERMOSTAT_TEMPERATURE_BAND;
use nexus_md::constraints::{ConstraintKind, ConstraintSolver};
use nexus_md::device::{AcceleratorDevice, HostDevice};
use nexus_md::forcefield::{ForceField, ForceFlags};
use nexus_md::integrator::IntegratorSettings;
use nexus_md::io::{write_state_json, write_system_json, JsonStateLoader, PdbTrajectoryWriter};
use nexus_md::error::Component;
use nexus_md::reporter::{CsvReporter, Reporter, VecReporter};
use nexus_md::thermostat_barostat::ThermostatConfig;
use nexus_md::{
    DeviceKind, Integrator, IntegratorState, MdError, RunConfig, SimulationDriver, StepReport,
};

fn run_to_end(config: &RunConfig, state: nexus_md::SystemState) -> Vec<StepReport> {
    let mut driver = SimulationDriver::from_config(config, state).unwrap();
    let mut reports = VecReporter::default();
    driver.run(&mut reports, None).unwrap();
    reports.reports
}

fn thermostatted_water(seed: u64) -> RunConfig {
    let mut config = RunConfig {
        steps: 100,
        report_every: 10,
        nonbonded_cutoff_nm: 0.9,
        ..RunConfig::default()
    };
    config.constraints.rigid_water = true;
    config.constraints.h_covalent_bond = true;
    config.thermostat = Some(ThermostatConfig {
        target_temperature_k: 300.0,
        collision_frequency_per_ps: 10.0,
        seed,
    });
    config
}

#[test]
fn conservative_run_reports_on_cadence_and_conserves_energy() {
    let config = RunConfig {
        steps: 100,
        report_every: 10,
        dt_ps: 0.0005,
        velocity_seed: Some(5),
        ..RunConfig::default()
    };
    let mut driver = SimulationDriver::from_config(&config, builders::make_ethane()).unwrap();
    let initial_kinetic = driver.state().kinetic_energy();
    let initial_total = initial_kinetic
        + driver
            .integrator()
            .force_field()
            .compute_forces(driver.state(), &HostDevice)
            .unwrap()
            .potential_energy();

    let mut reports = VecReporter::default();
    let summary = driver.run(&mut reports, None).unwrap();

    let steps: Vec<u64> = reports.reports.iter().map(|r| r.step_index).collect();
    assert_eq!(steps, vec![9, 19, 29, 39, 49, 59, 69, 79, 89, 99]);
    assert_eq!(summary.steps_completed, 100);
    for r in &reports.reports {
        assert!(r.kinetic_energy.is_finite() && r.potential_energy.is_finite());
        assert!((r.total_energy - (r.kinetic_energy + r.potential_energy)).abs() < 1e-9);
        assert!(
            (r.total_energy - initial_total).abs() < 0.05 * initial_kinetic,
            "step {}: E = {}, E0 = {}",
            r.step_index,
            r.total_energy,
            initial_total
        );
        assert!(r.pressure_bar.is_none());
    }
}

#[test]
fn constrained_thermostatted_run_ends_near_target_temperature() {
    let config = thermostatted_water(7);
    let state = builders::make_solvated_ethane(4, 0.5, 3);
    let mut driver = SimulationDriver::from_config(&config, state).unwrap();

    let solver = driver.integrator().constraints();
    assert_eq!(solver.constraints(ConstraintKind::HCovalentBond).len(), 6);
    assert_eq!(solver.constraints(ConstraintKind::RigidWater).len(), 3 * 56);

    let mut reports = VecReporter::default();
    let summary = driver.run(&mut reports, None).unwrap();
    let last = summary.last_report.unwrap();
    assert_eq!(last.step_index, 99);
    assert!(
        (last.temperature_k - 300.0).abs() < THERMOSTAT_TEMPERATURE_BAND * 300.0,
        "terminal temperature {}",
        last.temperature_k
    );

    let deviation = driver.integrator().constraints().max_deviation(driver.state());
    assert!(deviation < 1e-8, "constraint deviation {deviation}");
}

#[test]
fn fixed_thermostat_seed_reproduces_temperatures() {
    let temperatures = |seed: u64| -> Vec<f64> {
        run_to_end(&thermostatted_water(seed), builders::make_solvated_ethane(4, 0.5, 3))
            .iter()
            .map(|r| r.temperature_k)
            .collect()
    };
    let first = temperatures(21);
    assert_eq!(first.len(), 10);
    assert_eq!(first, temperatures(21));
    assert_ne!(first, temperatures(22));
}

#[test]
fn barostat_changes_volume_only_on_its_cadence() {
    let mut config = RunConfig {
        steps: 20,
        report_every: 1,
        nonbonded_cutoff_nm: 0.7,
        ..RunConfig::default()
    };
    config.constraints.rigid_water = true;
    config.enable_barostat(1.0, 5);

    let reports = run_to_end(&config, builders::make_water_box(3, 0.5, 2));
    assert_eq!(reports.len(), 20);
    let initial_volume = 1.5f64.powi(3);
    let mut previous = initial_volume;
    for r in &reports {
        let volume = r.volume_nm3.unwrap();
        assert!(r.pressure_bar.unwrap().is_finite());
        if r.step_index % 5 != 0 {
            assert_eq!(volume, previous, "volume moved at step {}", r.step_index);
        }
        previous = volume;
    }
    assert_ne!(reports[0].volume_nm3.unwrap(), initial_volume);
}

#[test]
fn barostat_may_not_shrink_the_box_below_twice_the_cutoff() {
    let mut config = RunConfig {
        steps: 60,
        report_every: 1,
        nonbonded_cutoff_nm: 0.7,
        ..RunConfig::default()
    };
    config.constraints.rigid_water = true;
    // a target this high squeezes the box by a few percent per step
    config.enable_barostat(1.0e6, 1);

    let mut driver =
        SimulationDriver::from_config(&config, builders::make_water_box(3, 0.5, 2)).unwrap();
    let mut reports = VecReporter::default();
    let failure = driver.run(&mut reports, None).unwrap_err();

    assert_eq!(failure.component, Component::Controller);
    assert!(matches!(failure.error, MdError::BoxBelowCutoff { .. }));
    assert!(driver.integrator().completed_steps() < 60);
    assert_eq!(reports.reports.len() as u64, driver.integrator().completed_steps());
    let edge = driver.state().simulation_box.unwrap().lengths().min();
    assert!(edge >= 1.4, "box edge {edge} nm with a 0.7 nm cutoff");
}

#[test]
fn integrator_terminates_after_its_steps() {
    let state = builders::make_ethane();
    let ff = ForceField::from_topology(&state, &ForceFlags::default(), 1.0).unwrap();
    let constraints = ConstraintSolver::disabled(state.atom_count());
    let mut integrator = Integrator::new(
        state,
        ff,
        constraints,
        Box::new(HostDevice),
        IntegratorSettings {
            dt: 0.0005,
            steps: 5,
            report_every: 2,
        },
    )
    .unwrap();

    let mut reports = 0;
    for _ in 0..5 {
        if integrator.step().unwrap().is_some() {
            reports += 1;
        }
    }
    assert_eq!(reports, 3);
    assert_eq!(integrator.phase(), IntegratorState::Terminated);
    assert!(matches!(
        integrator.step(),
        Err(MdError::AlreadyTerminated { steps: 5 })
    ));
}

#[test]
fn host_and_accelerator_trajectories_agree() {
    let run = |device: DeviceKind| {
        let config = RunConfig {
            steps: 20,
            report_every: 5,
            device,
            nonbonded_cutoff_nm: 0.9,
            dt_ps: 0.001,
            ..RunConfig::default()
        };
        run_to_end(&config, builders::make_solvated_ethane(4, 0.5, 9))
    };
    let host = run(DeviceKind::Host);
    let accel = run(DeviceKind::Accelerator);
    assert_eq!(host.len(), accel.len());
    for (h, a) in host.iter().zip(&accel) {
        let scale = 1.0 + h.total_energy.abs();
        assert!(
            (h.total_energy - a.total_energy).abs() < 1e-6 * scale,
            "step {}: {} vs {}",
            h.step_index,
            h.total_energy,
            a.total_energy
        );
    }

    let state = builders::make_solvated_ethane(4, 0.5, 9);
    let ff = ForceField::from_topology(&state, &ForceFlags::default(), 0.9).unwrap();
    let accelerator = AcceleratorDevice::new(std::time::Duration::from_secs(30)).unwrap();
    let on_host = ff.compute_forces(&state, &HostDevice).unwrap();
    let on_accel = ff.compute_forces(&state, &accelerator).unwrap();
    for (h, a) in on_host.forces.iter().zip(&on_accel.forces) {
        assert!((h - a).norm() < 1e-8 * (1.0 + h.norm()));
    }
}

#[test]
fn runs_from_files_and_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let state = builders::make_water_box(2, 0.5, 4);
    write_system_json(&state, &dir.path().join("system.json")).unwrap();
    write_state_json(&state, &dir.path().join("state.json")).unwrap();
    fs::write(
        dir.path().join("run.json"),
        r#"{
            "steps": 12,
            "report_every": 4,
            "nonbonded_cutoff_nm": 0.45,
            "trajectory_every": 6,
            "constraints": { "rigid_water": true },
            "system": "system.json",
            "state": "state.json"
        }"#,
    )
    .unwrap();

    let config = RunConfig::from_json_file(dir.path().join("run.json")).unwrap();
    let mut driver = SimulationDriver::load(&config, &JsonStateLoader).unwrap();
    let csv_path = dir.path().join("report.csv");
    let pdb_path = dir.path().join("traj.pdb");
    let mut csv = CsvReporter::create(&csv_path).unwrap();
    let mut pdb = PdbTrajectoryWriter::create(&pdb_path).unwrap();
    let summary = driver.run(&mut csv, Some(&mut pdb)).unwrap();

    assert_eq!(summary.reports_emitted, 3);
    assert_eq!(summary.frames_written, 2);
    let rows = fs::read_to_string(&csv_path).unwrap();
    assert_eq!(rows.lines().count(), 1 + 3);
    let trajectory = fs::read_to_string(&pdb_path).unwrap();
    assert_eq!(trajectory.matches("ENDMDL").count(), 2);
}

/// Accepts `limit` reports, then fails.
struct ReporterFailingAfter {
    limit: usize,
    seen: usize,
}

impl Reporter for ReporterFailingAfter {
    fn report(&mut self, _: &StepReport) -> nexus_md::Result<()> {
        self.seen += 1;
        if self.seen > self.limit {
            return Err(MdError::Output {
                path: "report.csv".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        Ok(())
    }
}

#[test]
fn failed_run_leaves_no_trajectory_behind() {
    let dir = tempfile::tempdir().unwrap();
    let pdb_path = dir.path().join("traj.pdb");
    let config = RunConfig {
        steps: 10,
        report_every: 1,
        trajectory_every: std::num::NonZeroU64::new(1),
        dt_ps: 0.0005,
        velocity_seed: Some(2),
        ..RunConfig::default()
    };
    let mut driver = SimulationDriver::from_config(&config, builders::make_ethane()).unwrap();
    let mut reporter = ReporterFailingAfter { limit: 2, seen: 0 };
    let mut pdb = PdbTrajectoryWriter::create(&pdb_path).unwrap();
    let failure = driver.run(&mut reporter, Some(&mut pdb)).unwrap_err();
    assert_eq!(failure.component, Component::Reporter);
    assert_eq!(failure.last_completed_step, Some(2));
    assert_eq!(pdb.frames_written(), 2);
    drop(pdb);

    assert!(!pdb_path.exists());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn malformed_state_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let state = builders::make_ethane();
    write_system_json(&state, &dir.path().join("system.json")).unwrap();
    fs::write(
        dir.path().join("state.json"),
        r#"{ "positions": [[0.0, 0.0, 0.0]] }"#,
    )
    .unwrap();
    let config = RunConfig {
        system: Some(dir.path().join("system.json")),
        state: Some(dir.path().join("state.json")),
        ..RunConfig::default()
    };
    let err = SimulationDriver::load(&config, &JsonStateLoader).unwrap_err();
    assert!(matches!(err, MdError::MalformedInput { .. }));
}
