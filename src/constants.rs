/*
Units used throughout the crate (the usual biomolecular MD set):

    length       nm
    time         ps
    mass         amu (g/mol)
    energy       kJ/mol
    temperature  K
    charge       e

With these, 1 amu nm^2 / ps^2 == 1 kJ/mol, so kinetic energy needs no conversion.
 */

/// Fixed-width real used for every accumulation, on every backend.
pub type Real = f64;

/// Boltzmann constant in kJ/(mol K).
pub const BOLTZMANN_KJ_MOL_K: Real = 0.008_314_462_618;

/// Coulomb prefactor 1/(4 pi eps0) in kJ nm / (mol e^2).
pub const COULOMB_KJ_NM_MOL: Real = 138.935_458;

/// 1 kJ/(mol nm^3) expressed in bar.
pub const BAR_PER_KJ_MOL_NM3: Real = 16.605_390_4;

// 1-4 scaling, AMBER convention
pub const COULOMB_14_SCALE: Real = 1.0 / 1.2;
pub const LJ_14_SCALE: Real = 0.5;

// TIP3P geometry, used when the topology carries no O-H bond / H-O-H angle
pub const TIP3P_OH_NM: Real = 0.095_72;
pub const TIP3P_HOH_DEG: Real = 104.52;

// SHAKE / RATTLE. The tolerance is relative: |r^2 - d^2| / (2 d^2) for positions,
// |r . v| / d^2 (in 1/ps) for velocities.
pub const CONSTRAINT_TOLERANCE: Real = 1.0e-10;
pub const VELOCITY_CONSTRAINT_TOLERANCE: Real = 1.0e-10;
pub const CONSTRAINT_MAX_ITERATIONS: usize = 500;

/// Largest relative deviation from the template (along the previous bond
/// direction) that the position solver is guaranteed to recover from.
pub const MAX_SUPPORTED_DEVIATION: Real = 0.30;

// Berendsen barostat defaults; water compressibility
pub const DEFAULT_COMPRESSIBILITY_PER_BAR: Real = 4.5e-5;
pub const DEFAULT_BAROSTAT_COUPLING_PS: Real = 1.0;
pub const BAROSTAT_SCALE_MIN: Real = 0.5;
pub const BAROSTAT_SCALE_MAX: Real = 1.5;

/// Reported temperature band (fraction of the target) accepted after a short
/// thermostatted run of a small system.
pub const THERMOSTAT_TEMPERATURE_BAND: Real = 0.35;

pub const DEFAULT_DT_PS: Real = 0.002;
pub const DEFAULT_CUTOFF_NM: Real = 1.0;
pub const DEFAULT_DEVICE_TIMEOUT_MS: u64 = 30_000;
