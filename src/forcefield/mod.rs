//! Force field composition.
//!
//! A [`ForceField`] is an immutable list of [`ForceTerm`]s built once from the
//! system topology. Terms are mutually additive: each one sees the state
//! read-only and returns a force buffer aligned to the atoms, and the field sums
//! them in a fixed order once every term has finished.

pub mod bonded;
pub mod nonbonded;

use std::fmt;
use std::sync::Arc;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::Real;
use crate::device::Device;
use crate::error::{Component, MdError, Result};
use crate::system::SystemState;

pub use bonded::{HarmonicAngleTerm, HarmonicBondTerm, PeriodicTorsionTerm};
pub use nonbonded::NonbondedTerm;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ForceKind {
    HarmonicBond,
    HarmonicAngle,
    PeriodicTorsion,
    Nonbonded,
}

impl fmt::Display for ForceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForceKind::HarmonicBond => "harmonic bond",
            ForceKind::HarmonicAngle => "harmonic angle",
            ForceKind::PeriodicTorsion => "periodic torsion",
            ForceKind::Nonbonded => "nonbonded",
        };
        f.write_str(name)
    }
}

/// What a single term hands back for one evaluation.
#[derive(Clone, Debug)]
pub struct TermOutput {
    pub kind: ForceKind,
    pub forces: Vec<Vector3<Real>>,
    pub energy: Real,
    /// `sum r . F` over the term's interactions, for the pressure estimate.
    pub virial: Real,
}

impl TermOutput {
    pub fn zeroed(kind: ForceKind, atom_count: usize) -> Self {
        Self {
            kind,
            forces: vec![Vector3::zeros(); atom_count],
            energy: 0.0,
            virial: 0.0,
        }
    }
}

pub trait ForceTerm: Send + Sync + fmt::Debug {
    fn kind(&self) -> ForceKind;

    fn evaluate(&self, state: &SystemState) -> Result<TermOutput>;

    /// Data-parallel evaluation used by the accelerator backend. Must produce
    /// the same result as [`ForceTerm::evaluate`] up to summation order.
    fn evaluate_parallel(&self, state: &SystemState) -> Result<TermOutput> {
        self.evaluate(state)
    }

    /// Interaction range under minimum-image periodicity, if the term has one.
    fn cutoff(&self) -> Option<Real> {
        None
    }
}

/// Checks every index against the state before a term touches it.
pub(crate) fn check_indices(kind: ForceKind, indices: &[usize], atom_count: usize) -> Result<()> {
    match indices.iter().find(|&&i| i >= atom_count) {
        Some(&i) => Err(MdError::topology(Component::ForceField, kind.to_string(), i, atom_count)),
        None => Ok(()),
    }
}

/// Which terms are switched on. All on by default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForceFlags {
    pub harmonic_bond: bool,
    pub harmonic_angle: bool,
    pub periodic_torsion: bool,
    pub nonbonded: bool,
}

impl Default for ForceFlags {
    fn default() -> Self {
        Self {
            harmonic_bond: true,
            harmonic_angle: true,
            periodic_torsion: true,
            nonbonded: true,
        }
    }
}

impl ForceFlags {
    pub fn none() -> Self {
        Self {
            harmonic_bond: false,
            harmonic_angle: false,
            periodic_torsion: false,
            nonbonded: false,
        }
    }

    /// Switching off bond or angle terms is allowed, but the structure can
    /// collapse without them.
    pub fn stability_warning(&self) -> Option<ForceFieldWarning> {
        match (self.harmonic_bond, self.harmonic_angle) {
            (false, false) => Some(ForceFieldWarning::BondAndAngleDisabled),
            (false, true) => Some(ForceFieldWarning::BondDisabled),
            (true, false) => Some(ForceFieldWarning::AngleDisabled),
            (true, true) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForceFieldWarning {
    BondDisabled,
    AngleDisabled,
    BondAndAngleDisabled,
}

impl fmt::Display for ForceFieldWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForceFieldWarning::BondDisabled => {
                write!(f, "harmonic bond force is off; the system may collapse")
            }
            ForceFieldWarning::AngleDisabled => {
                write!(f, "harmonic angle force is off; the system may collapse")
            }
            ForceFieldWarning::BondAndAngleDisabled => write!(
                f,
                "both harmonic bond and harmonic angle forces are off; the system is likely to diverge"
            ),
        }
    }
}

/// Per-term energies of one evaluation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct EnergyBreakdown {
    pub harmonic_bond: Real,
    pub harmonic_angle: Real,
    pub periodic_torsion: Real,
    pub nonbonded: Real,
}

impl EnergyBreakdown {
    pub fn add(&mut self, kind: ForceKind, energy: Real) {
        match kind {
            ForceKind::HarmonicBond => self.harmonic_bond += energy,
            ForceKind::HarmonicAngle => self.harmonic_angle += energy,
            ForceKind::PeriodicTorsion => self.periodic_torsion += energy,
            ForceKind::Nonbonded => self.nonbonded += energy,
        }
    }

    pub fn get(&self, kind: ForceKind) -> Real {
        match kind {
            ForceKind::HarmonicBond => self.harmonic_bond,
            ForceKind::HarmonicAngle => self.harmonic_angle,
            ForceKind::PeriodicTorsion => self.periodic_torsion,
            ForceKind::Nonbonded => self.nonbonded,
        }
    }

    pub fn total(&self) -> Real {
        self.harmonic_bond + self.harmonic_angle + self.periodic_torsion + self.nonbonded
    }
}

/// Summed result of all enabled terms.
#[derive(Clone, Debug)]
pub struct ForceEvaluation {
    pub forces: Vec<Vector3<Real>>,
    pub breakdown: EnergyBreakdown,
    pub virial: Real,
}

impl ForceEvaluation {
    pub fn potential_energy(&self) -> Real {
        self.breakdown.total()
    }
}

#[derive(Debug, Clone)]
pub struct ForceField {
    terms: Vec<Arc<dyn ForceTerm>>,
    warning: Option<ForceFieldWarning>,
}

impl ForceField {
    pub fn new(terms: Vec<Arc<dyn ForceTerm>>) -> Self {
        Self {
            terms,
            warning: None,
        }
    }

    /// Builds one term per enabled flag from the state's topology.
    pub fn from_topology(state: &SystemState, flags: &ForceFlags, cutoff: Real) -> Result<Self> {
        let mut terms: Vec<Arc<dyn ForceTerm>> = Vec::new();
        if flags.harmonic_bond {
            terms.push(Arc::new(HarmonicBondTerm::new(state.topology.bonds.clone())));
        }
        if flags.harmonic_angle {
            terms.push(Arc::new(HarmonicAngleTerm::new(state.topology.angles.clone())));
        }
        if flags.periodic_torsion {
            terms.push(Arc::new(PeriodicTorsionTerm::new(
                state.topology.torsions.clone(),
            )));
        }
        if flags.nonbonded {
            terms.push(Arc::new(NonbondedTerm::from_state(state, cutoff)?));
        }

        let warning = flags.stability_warning();
        if let Some(w) = warning {
            log::warn!("{w}");
        }
        log::info!(
            "force field: {} term(s) [{}]",
            terms.len(),
            terms
                .iter()
                .map(|t| t.kind().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self { terms, warning })
    }

    pub fn terms(&self) -> &[Arc<dyn ForceTerm>] {
        &self.terms
    }

    pub fn warning(&self) -> Option<ForceFieldWarning> {
        self.warning
    }

    /// Longest cutoff over all terms. A periodic box needs every edge to be
    /// at least twice this.
    pub fn cutoff(&self) -> Option<Real> {
        self.terms
            .iter()
            .filter_map(|term| term.cutoff())
            .reduce(Real::max)
    }

    /// Evaluates every term on `device` and sums the forces per atom.
    pub fn compute_forces(&self, state: &SystemState, device: &dyn Device) -> Result<ForceEvaluation> {
        let n = state.atom_count();
        let outputs = device.evaluate(&self.terms, state)?;

        let mut forces = vec![Vector3::zeros(); n];
        let mut breakdown = EnergyBreakdown::default();
        let mut virial = 0.0;
        for output in outputs {
            if output.forces.len() != n {
                return Err(MdError::topology(
                    Component::ForceField,
                    output.kind.to_string(),
                    output.forces.len().max(n).saturating_sub(1),
                    n,
                ));
            }
            for (total, f) in forces.iter_mut().zip(&output.forces) {
                *total += f;
            }
            breakdown.add(output.kind, output.energy);
            virial += output.virial;
        }
        Ok(ForceEvaluation {
            forces,
            breakdown,
            virial,
        })
    }
}
