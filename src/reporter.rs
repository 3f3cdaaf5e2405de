//! Step report sinks.

use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{MdError, Result};
use crate::integrator::StepReport;

pub trait Reporter {
    /// Called with each report, in step order.
    fn report(&mut self, report: &StepReport) -> Result<()>;

    /// Called once after the last report of a run that did not fail.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Logs one line per report at info level.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&mut self, r: &StepReport) -> Result<()> {
        match (r.pressure_bar, r.volume_nm3) {
            (Some(p), Some(v)) => log::info!(
                "step {:>8}  t {:>9.3} ps  KE {:>12.4}  PE {:>12.4}  E {:>12.4}  T {:>8.2} K  P {:>9.2} bar  V {:>8.4} nm^3",
                r.step_index,
                r.time_ps,
                r.kinetic_energy,
                r.potential_energy,
                r.total_energy,
                r.temperature_k,
                p,
                v
            ),
            _ => log::info!(
                "step {:>8}  t {:>9.3} ps  KE {:>12.4}  PE {:>12.4}  E {:>12.4}  T {:>8.2} K",
                r.step_index,
                r.time_ps,
                r.kinetic_energy,
                r.potential_energy,
                r.total_energy,
                r.temperature_k
            ),
        }
        log::debug!(
            "step {:>8}  bond {:.4}  angle {:.4}  torsion {:.4}  nonbonded {:.4}",
            r.step_index,
            r.breakdown.harmonic_bond,
            r.breakdown.harmonic_angle,
            r.breakdown.periodic_torsion,
            r.breakdown.nonbonded
        );
        Ok(())
    }
}

const CSV_HEADER: [&str; 12] = [
    "step",
    "time_ps",
    "kinetic_kj_mol",
    "potential_kj_mol",
    "total_kj_mol",
    "harmonic_bond_kj_mol",
    "harmonic_angle_kj_mol",
    "periodic_torsion_kj_mol",
    "nonbonded_kj_mol",
    "temperature_k",
    "pressure_bar",
    "volume_nm3",
];

/// One CSV row per report; pressure and volume are empty without a barostat.
pub struct CsvReporter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvReporter {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|source| MdError::Output {
            path: path.clone(),
            source,
        })?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(CSV_HEADER)?;
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reporter for CsvReporter {
    fn report(&mut self, r: &StepReport) -> Result<()> {
        let optional = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        self.writer.write_record([
            r.step_index.to_string(),
            r.time_ps.to_string(),
            r.kinetic_energy.to_string(),
            r.potential_energy.to_string(),
            r.total_energy.to_string(),
            r.breakdown.harmonic_bond.to_string(),
            r.breakdown.harmonic_angle.to_string(),
            r.breakdown.periodic_torsion.to_string(),
            r.breakdown.nonbonded.to_string(),
            r.temperature_k.to_string(),
            optional(r.pressure_bar),
            optional(r.volume_nm3),
        ])?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().map_err(|source| MdError::Output {
            path: self.path.clone(),
            source,
        })
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct VecReporter {
    pub reports: Vec<StepReport>,
}

impl Reporter for VecReporter {
    fn report(&mut self, report: &StepReport) -> Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

/// Forwards every report to each inner reporter in turn.
#[derive(Default)]
pub struct FanoutReporter {
    reporters: Vec<Box<dyn Reporter>>,
}

impl FanoutReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }
}

impl Reporter for FanoutReporter {
    fn report(&mut self, report: &StepReport) -> Result<()> {
        self.reporters.iter_mut().try_for_each(|r| r.report(report))
    }

    fn finish(&mut self) -> Result<()> {
        self.reporters.iter_mut().try_for_each(|r| r.finish())
    }
}
