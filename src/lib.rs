/*

=========================================================
 nexus_md: molecular dynamics simulation driver
=========================================================

Step loop
---------
Velocity Verlet, one step at a time:

    v(t + dt/2) = v(t) + F(t) dt / 2m
    x(t + dt)   = x(t) + v(t + dt/2) dt         -> SHAKE
    v(t + dt)   = v(t + dt/2) + F(t + dt) dt / 2m -> RATTLE

then the Andersen thermostat (every step) and the Berendsen barostat (every
N steps), then a report on the report cadence.

Forces
------
- harmonic bonds and angles
- periodic torsions
- Lennard-Jones + Coulomb with a shifted cutoff, bonded exclusions and scaled
  1-4 pairs

Each term can be switched off on its own; switching off bonds or angles is
allowed but warned about.

Constraints
-----------
- rigid water (O-H, O-H, H-H)
- bonds to hydrogen

Backends
--------
- host: serial, deterministic
- accelerator: data-parallel on a dedicated worker pool, bounded wait

Units: nm, ps, amu, kJ/mol, K, e.
 */

pub mod builders;
pub mod config;
pub mod constants;
pub mod constraints;
pub mod device;
pub mod driver;
pub mod error;
pub mod forcefield;
pub mod integrator;
pub mod io;
pub mod reporter;
pub mod system;
pub mod thermostat_barostat;

pub use config::RunConfig;
pub use constants::Real;
pub use device::DeviceKind;
pub use driver::{CancellationToken, RunFailure, RunSummary, SimulationDriver};
pub use error::{MdError, Result};
pub use integrator::{Integrator, IntegratorState, StepReport};
pub use system::SystemState;
