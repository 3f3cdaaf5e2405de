//! Input and output collaborators of the driver.
//!
//! The driver only sees the two traits; the JSON loader and the PDB writer
//! are the implementations the binary uses.

pub mod loader;
pub mod pdb;

use std::path::Path;

use crate::error::Result;
use crate::system::SystemState;

pub use loader::{write_state_json, write_system_json, JsonStateLoader};
pub use pdb::PdbTrajectoryWriter;

/// Builds a validated [`SystemState`] from a system descriptor plus a state
/// (coordinates) file.
pub trait StateLoader {
    fn load(&self, system: &Path, state: &Path) -> Result<SystemState>;
}

/// Receives read-only snapshots of the state; must not keep references to it.
pub trait TrajectoryWriter {
    fn write_frame(&mut self, state: &SystemState, step: u64) -> Result<()>;

    /// Flushes and closes the trajectory. Called once, after a successful run.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
