//! `nexus_md` command line entry point.
//!
//!   nexus_md --config run.json
//!   nexus_md --demo water --steps 500 --report-every 50 --pdb-output water.pdb

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use nexus_md::builders;
use nexus_md::io::{self, JsonStateLoader, PdbTrajectoryWriter, TrajectoryWriter};
use nexus_md::reporter::{CsvReporter, FanoutReporter, LogReporter};
use nexus_md::{DeviceKind, MdError, RunConfig, SimulationDriver, SystemState};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Demo {
    /// One ethane molecule in vacuum
    Ethane,
    /// Rigid TIP3P water with a thermostat and barostat
    Water,
}

#[derive(Parser, Debug)]
#[command(name = "nexus_md", version)]
#[command(about = "Molecular dynamics driver: bonded + nonbonded forces, constraints, thermostat, barostat")]
struct Args {
    /// JSON run configuration
    #[arg(long, conflicts_with = "demo", required_unless_present = "demo")]
    config: Option<PathBuf>,

    /// Run a built-in system instead of loading one
    #[arg(long, value_enum)]
    demo: Option<Demo>,

    /// Override the number of steps
    #[arg(long)]
    steps: Option<u64>,

    /// Override the report interval
    #[arg(long)]
    report_every: Option<u64>,

    /// Run force evaluation on the accelerator backend
    #[arg(long)]
    accelerator: bool,

    /// Also write reports to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Write the trajectory to this PDB file
    #[arg(long)]
    pdb_output: Option<PathBuf>,

    /// Write the demo system as system.json / state.json into this directory and exit
    #[arg(long, requires = "demo")]
    export: Option<PathBuf>,
}

fn demo_setup(demo: Demo) -> (RunConfig, SystemState) {
    let mut config = RunConfig::default();
    match demo {
        Demo::Ethane => {
            config.dt_ps = 0.0005;
            config.velocity_seed = Some(1);
            (config, builders::make_ethane())
        }
        Demo::Water => {
            config.constraints.rigid_water = true;
            config.nonbonded_cutoff_nm = 1.0;
            config.enable_thermostat(300.0, 10.0);
            config.enable_barostat(1.0, 25);
            (config, builders::make_water_box(6, 0.35, 1))
        }
    }
}

fn run(args: Args) -> Result<(), MdError> {
    let (mut config, demo_state) = match (&args.config, args.demo) {
        (Some(path), _) => (RunConfig::from_json_file(path)?, None),
        (None, Some(demo)) => {
            let (config, state) = demo_setup(demo);
            (config, Some(state))
        }
        (None, None) => {
            return Err(MdError::InvalidConfig(
                "either --config or --demo is required".to_string(),
            ))
        }
    };

    if let (Some(dir), Some(state)) = (&args.export, &demo_state) {
        io::write_system_json(state, &dir.join("system.json"))?;
        io::write_state_json(state, &dir.join("state.json"))?;
        log::info!("wrote system.json and state.json to {}", dir.display());
        return Ok(());
    }

    if let Some(steps) = args.steps {
        config.steps = steps;
    }
    if let Some(every) = args.report_every {
        config.report_every = every;
    }
    if args.accelerator {
        config.device = DeviceKind::Accelerator;
    }
    if args.csv.is_some() {
        config.report_csv = args.csv.clone();
    }
    if args.pdb_output.is_some() {
        config.pdb_output = args.pdb_output.clone();
    }

    let mut driver = match demo_state {
        Some(state) => SimulationDriver::from_config(&config, state)?,
        None => SimulationDriver::load(&config, &JsonStateLoader)?,
    };

    let mut reporter = FanoutReporter::new().with(Box::new(LogReporter));
    if let Some(path) = &config.report_csv {
        reporter = reporter.with(Box::new(CsvReporter::create(path)?));
    }
    let mut pdb = match &config.pdb_output {
        Some(path) => Some(PdbTrajectoryWriter::create(path)?),
        None => None,
    };

    let summary = driver
        .run(
            &mut reporter,
            pdb.as_mut().map(|w| w as &mut dyn TrajectoryWriter),
        )
        .map_err(|failure| failure.error)?;

    if let Some(report) = &summary.last_report {
        log::info!(
            "final: T {:.2} K, E {:.4} kJ/mol{}",
            report.temperature_k,
            report.total_energy,
            report
                .pressure_bar
                .map(|p| format!(", P {p:.2} bar"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
