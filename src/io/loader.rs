/*
JSON system and state files.

system.json
    {
      "atoms":    [{ "element": "O", "mass": 15.999, "charge": -0.834,
                     "sigma": 0.315, "epsilon": 0.636, "name": "OW", "residue": "HOH" }, ...],
      "bonds":    [{ "atoms": [0, 1], "k": 462750.4, "r0": 0.09572 }, ...],
      "angles":   [{ "atoms": [1, 0, 2], "k": 836.8, "theta0": 1.824 }, ...],
      "torsions": [{ "atoms": [2, 0, 1, 5], "k": 0.6276, "periodicity": 3, "phase": 0.0 }, ...],
      "box":      [3.0, 3.0, 3.0]
    }

state.json
    { "positions": [[x, y, z], ...], "velocities": [[...], ...], "box": [...] }

Lengths in nm, angles in radians. `velocities` is optional (atoms start at
rest), and a `box` in the state file overrides the one in the system file.
 */
use std::fs;
use std::path::Path;

use nalgebra::Vector3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::StateLoader;
use crate::constants::Real;
use crate::error::{MdError, Result};
use crate::system::{Angle, Atom, Bond, SimulationBox, SystemState, Topology, Torsion};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AtomRecord {
    pub element: String,
    pub mass: Real,
    #[serde(default)]
    pub charge: Real,
    #[serde(default)]
    pub sigma: Real,
    #[serde(default)]
    pub epsilon: Real,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub residue: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BondRecord {
    pub atoms: [usize; 2],
    pub k: Real,
    pub r0: Real,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AngleRecord {
    pub atoms: [usize; 3],
    pub k: Real,
    pub theta0: Real,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TorsionRecord {
    pub atoms: [usize; 4],
    pub k: Real,
    pub periodicity: u32,
    #[serde(default)]
    pub phase: Real,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemFile {
    pub atoms: Vec<AtomRecord>,
    #[serde(default)]
    pub bonds: Vec<BondRecord>,
    #[serde(default)]
    pub angles: Vec<AngleRecord>,
    #[serde(default)]
    pub torsions: Vec<TorsionRecord>,
    #[serde(default, rename = "box", skip_serializing_if = "Option::is_none")]
    pub simulation_box: Option<[Real; 3]>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateFile {
    pub positions: Vec<[Real; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocities: Option<Vec<[Real; 3]>>,
    #[serde(default, rename = "box", skip_serializing_if = "Option::is_none")]
    pub simulation_box: Option<[Real; 3]>,
}

impl SystemFile {
    pub fn from_state(state: &SystemState) -> Self {
        Self {
            atoms: state
                .atoms
                .iter()
                .map(|a| AtomRecord {
                    element: a.element.clone(),
                    mass: a.mass,
                    charge: a.charge,
                    sigma: a.sigma,
                    epsilon: a.epsilon,
                    name: Some(a.name.clone()),
                    residue: Some(a.residue.clone()),
                })
                .collect(),
            bonds: state
                .topology
                .bonds
                .iter()
                .map(|b| BondRecord { atoms: [b.atom1, b.atom2], k: b.k, r0: b.r0 })
                .collect(),
            angles: state
                .topology
                .angles
                .iter()
                .map(|a| AngleRecord {
                    atoms: [a.atom1, a.atom2, a.atom3],
                    k: a.k,
                    theta0: a.theta0,
                })
                .collect(),
            torsions: state
                .topology
                .torsions
                .iter()
                .map(|t| TorsionRecord {
                    atoms: [t.atom1, t.atom2, t.atom3, t.atom4],
                    k: t.k,
                    periodicity: t.periodicity,
                    phase: t.phase,
                })
                .collect(),
            simulation_box: state.simulation_box.map(box_array),
        }
    }
}

impl StateFile {
    pub fn from_state(state: &SystemState) -> Self {
        Self {
            positions: state.atoms.iter().map(|a| vector_array(&a.position)).collect(),
            velocities: Some(state.atoms.iter().map(|a| vector_array(&a.velocity)).collect()),
            simulation_box: state.simulation_box.map(box_array),
        }
    }
}

fn vector_array(v: &Vector3<Real>) -> [Real; 3] {
    [v[0], v[1], v[2]]
}

fn box_array(b: SimulationBox) -> [Real; 3] {
    [b.x_dimension, b.y_dimension, b.z_dimension]
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let source = path.display().to_string();
    let text = fs::read_to_string(path)
        .map_err(|e| MdError::malformed(&source, format!("cannot read file: {e}")))?;
    serde_json::from_str(&text).map_err(|e| MdError::malformed(&source, e.to_string()))
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| MdError::Output {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    fs::write(path, text).map_err(|source| MdError::Output {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes the atoms, topology and box of `state` as a system file.
pub fn write_system_json(state: &SystemState, path: &Path) -> Result<()> {
    write_json(&SystemFile::from_state(state), path)
}

/// Writes positions, velocities and box of `state` as a state file.
pub fn write_state_json(state: &SystemState, path: &Path) -> Result<()> {
    write_json(&StateFile::from_state(state), path)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonStateLoader;

impl JsonStateLoader {
    /// Combines already-parsed files; `source` names the state file in errors.
    pub fn assemble(system: SystemFile, state: StateFile, source: &str) -> Result<SystemState> {
        let n = system.atoms.len();
        if state.positions.len() != n {
            return Err(MdError::malformed(
                source,
                format!(
                    "{} position(s) for {n} atom(s) in the system file",
                    state.positions.len()
                ),
            ));
        }
        if let Some(velocities) = &state.velocities {
            if velocities.len() != n {
                return Err(MdError::malformed(
                    source,
                    format!("{} velocit(ies) for {n} atom(s)", velocities.len()),
                ));
            }
        }

        let atoms = system
            .atoms
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                let [x, y, z] = state.positions[i];
                let mut atom = Atom::new(&record.element, record.mass, Vector3::new(x, y, z))
                    .with_nonbonded(record.charge, record.sigma, record.epsilon);
                atom.name = record.name.unwrap_or_else(|| record.element.clone());
                atom.residue = record.residue.unwrap_or_else(|| "UNK".to_string());
                if let Some(velocities) = &state.velocities {
                    let [vx, vy, vz] = velocities[i];
                    atom.velocity = Vector3::new(vx, vy, vz);
                }
                atom
            })
            .collect();

        let topology = Topology {
            bonds: system
                .bonds
                .iter()
                .map(|b| Bond { atom1: b.atoms[0], atom2: b.atoms[1], k: b.k, r0: b.r0 })
                .collect(),
            angles: system
                .angles
                .iter()
                .map(|a| Angle {
                    atom1: a.atoms[0],
                    atom2: a.atoms[1],
                    atom3: a.atoms[2],
                    k: a.k,
                    theta0: a.theta0,
                })
                .collect(),
            torsions: system
                .torsions
                .iter()
                .map(|t| Torsion {
                    atom1: t.atoms[0],
                    atom2: t.atoms[1],
                    atom3: t.atoms[2],
                    atom4: t.atoms[3],
                    k: t.k,
                    periodicity: t.periodicity,
                    phase: t.phase,
                })
                .collect(),
        };
        let simulation_box = state
            .simulation_box
            .or(system.simulation_box)
            .map(|[x, y, z]| SimulationBox::new(x, y, z));

        SystemState::new(atoms, topology, simulation_box, source)
    }
}

impl StateLoader for JsonStateLoader {
    fn load(&self, system: &Path, state: &Path) -> Result<SystemState> {
        let system_file: SystemFile = read_json(system)?;
        let state_file: StateFile = read_json(state)?;
        let loaded = Self::assemble(system_file, state_file, &state.display().to_string())?;
        log::info!(
            "loaded {} atom(s), {} bond(s), {} angle(s), {} torsion(s) from {}",
            loaded.atom_count(),
            loaded.topology.bonds.len(),
            loaded.topology.angles.len(),
            loaded.topology.torsions.len(),
            system.display()
        );
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders;

    fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_loads_what_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let original = builders::make_water_box(2, 0.31, 6);
        let system = dir.path().join("system.json");
        let state = dir.path().join("state.json");
        write_system_json(&original, &system).unwrap();
        write_state_json(&original, &state).unwrap();

        let loaded = JsonStateLoader.load(&system, &state).unwrap();
        assert_eq!(loaded.topology, original.topology);
        assert_eq!(loaded.simulation_box, original.simulation_box);
        for (a, b) in loaded.atoms.iter().zip(&original.atoms) {
            assert_eq!((&a.name, &a.residue, &a.element), (&b.name, &b.residue, &b.element));
            assert!((a.position - b.position).norm() < 1e-12);
            assert!((a.velocity - b.velocity).norm() < 1e-12);
            assert!((a.charge - b.charge).abs() < 1e-12);
        }
    }

    #[test]
    fn test_minimal_files_and_box_override() {
        let dir = tempfile::tempdir().unwrap();
        let system = write(
            dir.path(),
            "system.json",
            r#"{ "atoms": [ { "element": "Ar", "mass": 39.948 },
                            { "element": "Ar", "mass": 39.948 } ],
                 "box": [2.0, 2.0, 2.0] }"#,
        );
        let state = write(
            dir.path(),
            "state.json",
            r#"{ "positions": [[0.0, 0.0, 0.0], [0.4, 0.0, 0.0]], "box": [3.0, 3.0, 3.0] }"#,
        );
        let loaded = JsonStateLoader.load(&system, &state).unwrap();
        assert_eq!(loaded.atom_count(), 2);
        assert_eq!(loaded.atoms[1].name, "Ar");
        assert_eq!(loaded.atoms[1].velocity, Vector3::zeros());
        assert_eq!(loaded.simulation_box, Some(SimulationBox::cubic(3.0)));
    }

    #[test]
    fn test_rejects_inconsistent_input() {
        let dir = tempfile::tempdir().unwrap();
        let system = write(
            dir.path(),
            "system.json",
            r#"{ "atoms": [ { "element": "H", "mass": 1.008 }, { "element": "H", "mass": 1.008 } ],
                 "bonds": [ { "atoms": [0, 2], "k": 1.0, "r0": 0.074 } ] }"#,
        );
        let state = write(dir.path(), "state.json", r#"{ "positions": [[0,0,0], [0.074,0,0]] }"#);
        let err = JsonStateLoader.load(&system, &state).unwrap_err();
        assert!(matches!(err, MdError::MalformedInput { .. }), "{err}");

        let system = write(
            dir.path(),
            "system2.json",
            r#"{ "atoms": [ { "element": "H", "mass": 1.008 } ] }"#,
        );
        let err = JsonStateLoader.load(&system, &state).unwrap_err();
        assert!(matches!(err, MdError::MalformedInput { .. }));

        let garbage = write(dir.path(), "garbage.json", "{ not json");
        assert!(JsonStateLoader.load(&garbage, &state).is_err());
        let missing = dir.path().join("missing.json");
        assert!(JsonStateLoader.load(&system, &missing).is_err());
    }
}
