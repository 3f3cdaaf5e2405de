//! Multi-model PDB trajectory output.
//!
//! One MODEL block per frame, coordinates converted from nm to Angstrom. A
//! CRYST1 record precedes each periodic frame since the barostat can change
//! the box between frames. Residue numbers follow the molecules of the bond
//! graph.
//!
//! Frames go to a temporary file next to the output path, which only takes
//! the output's name once [`TrajectoryWriter::finish`] succeeds. A run that
//! fails leaves nothing at the output path.

use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::TrajectoryWriter;
use crate::error::{MdError, Result};
use crate::system::SystemState;

const ANGSTROM_PER_NM: f64 = 10.0;

pub struct PdbTrajectoryWriter {
    path: PathBuf,
    /// `None` once finished.
    out: Option<BufWriter<NamedTempFile>>,
    residue_ids: Vec<usize>,
    frames: usize,
}

impl PdbTrajectoryWriter {
    /// Starts a trajectory that will replace `path` when finished.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file = NamedTempFile::new_in(dir).map_err(|source| MdError::Output {
            path: path.clone(),
            source,
        })?;
        let mut writer = Self {
            path,
            out: Some(BufWriter::new(file)),
            residue_ids: Vec::new(),
            frames: 0,
        };
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        writer.emit(|out| {
            writeln!(out, "REMARK   1 nexus_md trajectory")?;
            writeln!(out, "REMARK   1 created {stamp}")
        })?;
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> usize {
        self.frames
    }

    fn output_error(&self, source: io::Error) -> MdError {
        MdError::Output {
            path: self.path.clone(),
            source,
        }
    }

    fn emit<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce(&mut BufWriter<NamedTempFile>) -> io::Result<()>,
    {
        let result = match self.out.as_mut() {
            Some(out) => body(out),
            None => Err(io::Error::other("trajectory already finished")),
        };
        result.map_err(|source| self.output_error(source))
    }
}

impl TrajectoryWriter for PdbTrajectoryWriter {
    fn write_frame(&mut self, state: &SystemState, step: u64) -> Result<()> {
        if self.residue_ids.len() != state.atom_count() {
            self.residue_ids = vec![0; state.atom_count()];
            for (id, molecule) in state.molecules().iter().enumerate() {
                for &i in molecule {
                    self.residue_ids[i] = id + 1;
                }
            }
        }
        self.frames += 1;
        let model = self.frames;
        let residue_ids = std::mem::take(&mut self.residue_ids);

        let result = self.emit(|out| {
            writeln!(out, "REMARK   2 step {step}")?;
            if let Some(b) = &state.simulation_box {
                writeln!(
                    out,
                    "CRYST1{:9.3}{:9.3}{:9.3}{:7.2}{:7.2}{:7.2} P 1           1",
                    b.x_dimension * ANGSTROM_PER_NM,
                    b.y_dimension * ANGSTROM_PER_NM,
                    b.z_dimension * ANGSTROM_PER_NM,
                    90.0,
                    90.0,
                    90.0
                )?;
            }
            writeln!(out, "MODEL     {:>4}", model % 10_000)?;
            for (i, atom) in state.atoms.iter().enumerate() {
                let p = atom.position * ANGSTROM_PER_NM;
                writeln!(
                    out,
                    "ATOM  {:>5} {:<4} {:>3} A{:>4}    {:>8.3}{:>8.3}{:>8.3}{:>6.2}{:>6.2}          {:>2}",
                    (i + 1) % 100_000,
                    atom_name(&atom.name),
                    truncate(&atom.residue, 3),
                    residue_ids[i] % 10_000,
                    p[0],
                    p[1],
                    p[2],
                    1.0,
                    0.0,
                    truncate(&atom.element, 2)
                )?;
            }
            writeln!(out, "ENDMDL")
        });
        self.residue_ids = residue_ids;
        result
    }

    fn finish(&mut self) -> Result<()> {
        self.emit(|out| writeln!(out, "END"))?;
        let Some(out) = self.out.take() else {
            return Err(self.output_error(io::Error::other("trajectory already finished")));
        };
        let file = out
            .into_inner()
            .map_err(|e| self.output_error(e.into_error()))?;
        file.persist(&self.path)
            .map_err(|e| self.output_error(e.error))?;
        log::info!("wrote {} frame(s) to {}", self.frames, self.path.display());
        Ok(())
    }
}

/// Four-column atom name field; names shorter than four characters start in
/// column 14.
fn atom_name(name: &str) -> String {
    let name = truncate(name, 4);
    if name.len() >= 4 {
        name.to_string()
    } else {
        format!(" {name}")
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders;
    use std::fs;

    #[test]
    fn test_writes_models_in_angstrom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.pdb");
        let state = builders::make_ethane();
        let mut writer = PdbTrajectoryWriter::create(&path).unwrap();
        writer.write_frame(&state, 0).unwrap();
        writer.write_frame(&state, 10).unwrap();
        writer.finish().unwrap();
        assert_eq!(writer.frames_written(), 2);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("REMARK"));
        assert_eq!(text.matches("MODEL").count(), 2);
        assert_eq!(text.matches("ENDMDL").count(), 2);
        assert_eq!(text.lines().filter(|l| l.starts_with("ATOM")).count(), 16);
        assert!(!text.contains("CRYST1"));
        assert!(text.trim_end().ends_with("END"));

        // second carbon sits 1.526 A along x
        let c2 = text.lines().filter(|l| l.starts_with("ATOM")).nth(1).unwrap();
        let x: f64 = c2[30..38].trim().parse().unwrap();
        assert!((x - 1.526).abs() < 1e-3);
        assert_eq!(&c2[76..78], " C");
    }

    #[test]
    fn test_periodic_frames_carry_the_box() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("water.pdb");
        let state = builders::make_water_box(2, 0.31, 1);
        let mut writer = PdbTrajectoryWriter::create(&path).unwrap();
        writer.write_frame(&state, 0).unwrap();
        writer.finish().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let cryst = text.lines().find(|l| l.starts_with("CRYST1")).unwrap();
        assert!(cryst.contains("6.200"));
        // eight waters, eight residues
        let last = text.lines().filter(|l| l.starts_with("ATOM")).last().unwrap();
        assert_eq!(last[22..26].trim(), "8");
        assert_eq!(last[17..20].trim(), "HOH");
    }

    #[test]
    fn test_unfinished_trajectory_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.pdb");
        let state = builders::make_ethane();
        {
            let mut writer = PdbTrajectoryWriter::create(&path).unwrap();
            writer.write_frame(&state, 0).unwrap();
            assert!(!path.exists());
        }
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_finish_replaces_an_existing_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traj.pdb");
        fs::write(&path, "stale").unwrap();
        let mut writer = PdbTrajectoryWriter::create(&path).unwrap();
        writer.write_frame(&builders::make_ethane(), 0).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "stale");
        writer.finish().unwrap();
        assert!(fs::read_to_string(&path).unwrap().starts_with("REMARK"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        assert!(matches!(writer.finish(), Err(MdError::Output { .. })));
        assert!(matches!(
            writer.write_frame(&builders::make_ethane(), 1),
            Err(MdError::Output { .. })
        ));
    }

    #[test]
    fn test_unwritable_path_is_an_output_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no").join("such").join("dir.pdb");
        assert!(matches!(
            PdbTrajectoryWriter::create(&path),
            Err(MdError::Output { .. })
        ));
    }
}
