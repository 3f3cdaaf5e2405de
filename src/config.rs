//! Run configuration.
//!
//! Everything a run needs besides the system itself, read from JSON. Every
//! field has a default, so `{}` is a valid (if not very useful) config: 100
//! steps on the host, all forces on, no constraints, no controllers.

use std::fs;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{Real, DEFAULT_CUTOFF_NM, DEFAULT_DEVICE_TIMEOUT_MS, DEFAULT_DT_PS};
use crate::constraints::ConstraintFlags;
use crate::device::DeviceKind;
use crate::error::{MdError, Result};
use crate::forcefield::ForceFlags;
use crate::thermostat_barostat::{BarostatConfig, ThermostatConfig};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub device: DeviceKind,
    pub dt_ps: Real,
    pub steps: u64,
    pub report_every: u64,
    pub forces: ForceFlags,
    pub constraints: ConstraintFlags,
    pub thermostat: Option<ThermostatConfig>,
    pub barostat: Option<BarostatConfig>,
    pub nonbonded_cutoff_nm: Real,
    pub device_timeout_ms: u64,
    /// Write a trajectory frame every N steps; `None` writes only the final frame.
    pub trajectory_every: Option<NonZeroU64>,
    /// When set, velocities are redrawn at `initial_temperature_k` before the run.
    pub velocity_seed: Option<u64>,
    pub initial_temperature_k: Real,

    /// JSON system descriptor (atoms, topology, box).
    pub system: Option<PathBuf>,
    /// JSON state (positions, optional velocities and box).
    pub state: Option<PathBuf>,
    pub pdb_output: Option<PathBuf>,
    pub report_csv: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::Host,
            dt_ps: DEFAULT_DT_PS,
            steps: 100,
            report_every: 10,
            forces: ForceFlags::default(),
            constraints: ConstraintFlags::default(),
            thermostat: None,
            barostat: None,
            nonbonded_cutoff_nm: DEFAULT_CUTOFF_NM,
            device_timeout_ms: DEFAULT_DEVICE_TIMEOUT_MS,
            trajectory_every: None,
            velocity_seed: None,
            initial_temperature_k: 300.0,
            system: None,
            state: None,
            pdb_output: None,
            report_csv: None,
        }
    }
}

impl RunConfig {
    /// Reads and validates a config. Relative file references are taken
    /// relative to the config file's directory.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let source = path.display().to_string();
        let text = fs::read_to_string(path)
            .map_err(|e| MdError::malformed(&source, format!("cannot read config: {e}")))?;
        let mut config: RunConfig = serde_json::from_str(&text)
            .map_err(|e| MdError::malformed(&source, e.to_string()))?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        log::info!("loaded run configuration from {source}");
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for file in [
            &mut self.system,
            &mut self.state,
            &mut self.pdb_output,
            &mut self.report_csv,
        ]
        .into_iter()
        .flatten()
        {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
    }

    pub fn enable_thermostat(&mut self, target_temperature_k: Real, collision_frequency_per_ps: Real) {
        let seed = self.thermostat.map(|t| t.seed).unwrap_or_default();
        self.thermostat = Some(ThermostatConfig {
            target_temperature_k,
            collision_frequency_per_ps,
            seed,
        });
    }

    pub fn enable_barostat(&mut self, target_pressure_bar: Real, apply_every_n_steps: u64) {
        self.barostat = Some(BarostatConfig::new(target_pressure_bar, apply_every_n_steps));
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(MdError::InvalidConfig(msg));

        if !(self.dt_ps > 0.0) || !self.dt_ps.is_finite() {
            return invalid(format!("dt_ps must be positive, got {}", self.dt_ps));
        }
        if self.report_every == 0 {
            return invalid("report_every must be at least 1".to_string());
        }
        if !(self.nonbonded_cutoff_nm > 0.0) {
            return invalid(format!(
                "nonbonded_cutoff_nm must be positive, got {}",
                self.nonbonded_cutoff_nm
            ));
        }
        if self.velocity_seed.is_some() && self.initial_temperature_k < 0.0 {
            return invalid(format!(
                "initial_temperature_k must not be negative, got {}",
                self.initial_temperature_k
            ));
        }
        if let Some(t) = &self.thermostat {
            if !(t.target_temperature_k > 0.0) {
                return invalid(format!(
                    "thermostat target temperature must be positive, got {}",
                    t.target_temperature_k
                ));
            }
            if !(t.collision_frequency_per_ps > 0.0) {
                return invalid(format!(
                    "thermostat collision frequency must be positive, got {}",
                    t.collision_frequency_per_ps
                ));
            }
        }
        if let Some(b) = &self.barostat {
            if b.apply_every_n_steps == 0 {
                return invalid("barostat apply_every_n_steps must be at least 1".to_string());
            }
            if !(b.compressibility_per_bar > 0.0) || !(b.coupling_time_ps > 0.0) {
                return invalid(format!(
                    "barostat compressibility ({}) and coupling time ({}) must be positive",
                    b.compressibility_per_bar, b.coupling_time_ps
                ));
            }
        }
        if self.state.is_some() && self.system.is_none() {
            return invalid("a state file needs a system file".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_gives_defaults() {
        let config: RunConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RunConfig::default());
        assert_eq!(config.steps, 100);
        assert_eq!(config.report_every, 10);
        assert!(config.forces.harmonic_bond && config.forces.nonbonded);
        assert!(!config.constraints.rigid_water && !config.constraints.h_covalent_bond);
        assert!(config.thermostat.is_none() && config.barostat.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parses_quick_start_settings() {
        let json = r#"{
            "device": "accelerator",
            "steps": 100,
            "report_every": 10,
            "forces": { "periodic_torsion": false },
            "constraints": { "rigid_water": true, "h_covalent_bond": true },
            "thermostat": { "target_temperature_k": 300.0, "collision_frequency_per_ps": 10.0 },
            "barostat": { "target_pressure_bar": 1.0, "apply_every_n_steps": 200 }
        }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.device, DeviceKind::Accelerator);
        assert!(!config.forces.periodic_torsion);
        assert!(config.forces.harmonic_angle);
        assert!(config.constraints.rigid_water);
        assert_eq!(config.thermostat.unwrap().seed, 0);
        let barostat = config.barostat.unwrap();
        assert_eq!(barostat.apply_every_n_steps, 200);
        assert!(barostat.compressibility_per_bar > 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_setters_match_config_blocks() {
        let mut config = RunConfig::default();
        config.enable_thermostat(300.0, 10.0);
        config.enable_barostat(1.0, 200);
        assert_eq!(config.thermostat.unwrap().target_temperature_k, 300.0);
        assert_eq!(config.barostat.unwrap(), BarostatConfig::new(1.0, 200));
    }

    #[test]
    fn test_validate_rejects_out_of_bounds_values() {
        let mut config = RunConfig::default();
        config.report_every = 0;
        assert!(matches!(config.validate(), Err(MdError::InvalidConfig(_))));

        let mut config = RunConfig::default();
        config.enable_thermostat(-1.0, 10.0);
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.enable_barostat(1.0, 0);
        assert!(config.validate().is_err());

        let mut config = RunConfig::default();
        config.dt_ps = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_is_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "stepz": 10 }}"#).unwrap();
        let err = RunConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, MdError::MalformedInput { .. }));
    }

    #[test]
    fn test_zero_trajectory_interval_is_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "trajectory_every": 0 }}"#).unwrap();
        let err = RunConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, MdError::MalformedInput { .. }));

        let config: RunConfig = serde_json::from_str(r#"{ "trajectory_every": 25 }"#).unwrap();
        assert_eq!(config.trajectory_every, NonZeroU64::new(25));
    }

    #[test]
    fn test_relative_paths_follow_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        fs::write(
            &path,
            r#"{ "system": "system.json", "pdb_output": "/tmp/out.pdb" }"#,
        )
        .unwrap();
        let config = RunConfig::from_json_file(&path).unwrap();
        assert_eq!(config.system.unwrap(), dir.path().join("system.json"));
        assert_eq!(config.pdb_output.unwrap(), PathBuf::from("/tmp/out.pdb"));
    }
}
