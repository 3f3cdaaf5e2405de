//! Error taxonomy for the simulation driver.
//!
//! Every variant is fatal to a run: MD correctness depends on an unbroken step
//! sequence, so nothing here is retried.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::constraints::ConstraintKind;
use crate::device::DeviceKind;

pub type Result<T> = std::result::Result<T, MdError>;

#[derive(Debug, Error)]
pub enum MdError {
    /// Topology/state input is missing records or inconsistent.
    #[error("malformed input in `{path}`: {detail}")]
    MalformedInput { path: String, detail: String },

    /// The run configuration violates one of its documented bounds.
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    /// A force term or constraint disagrees with the system it is applied to.
    /// Indicates a setup bug.
    #[error("{term} references atom {index}, but the system has {atom_count} atoms")]
    TopologyMismatch {
        component: Component,
        term: String,
        index: usize,
        atom_count: usize,
    },

    /// Iterative constraint solve exceeded its iteration cap.
    #[error(
        "{kind} constraint did not converge after {iterations} iterations \
         (max relative deviation {max_deviation:e})"
    )]
    ConstraintDivergence {
        kind: ConstraintKind,
        iterations: usize,
        max_deviation: f64,
    },

    /// The barostat would take the box below the size the nonbonded cutoff
    /// needs for a single minimum image.
    #[error(
        "box scaling would shrink the smallest edge to {edge} nm, below twice \
         the nonbonded cutoff ({cutoff} nm)"
    )]
    BoxBelowCutoff { edge: f64, cutoff: f64 },

    #[error("{device} device unavailable: {reason}")]
    DeviceUnavailable { device: DeviceKind, reason: String },

    #[error("{device} device failed: {reason}")]
    DeviceError { device: DeviceKind, reason: String },

    #[error("integrator already terminated after {steps} steps")]
    AlreadyTerminated { steps: u64 },

    /// Energies went non-finite; the trajectory can no longer be trusted.
    #[error("numerical instability at step {step}: {detail}")]
    NumericalInstability { step: u64, detail: String },

    #[error("failed to write `{path}`: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write report row: {0}")]
    Csv(#[from] csv::Error),
}

impl MdError {
    pub fn malformed(path: impl Into<String>, detail: impl Into<String>) -> Self {
        MdError::MalformedInput {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn topology(
        component: Component,
        term: impl Into<String>,
        index: usize,
        atom_count: usize,
    ) -> Self {
        MdError::TopologyMismatch {
            component,
            term: term.into(),
            index,
            atom_count,
        }
    }

    /// Name of the component that raised the error.
    pub fn component(&self) -> Component {
        match self {
            MdError::MalformedInput { .. } => Component::Loader,
            MdError::InvalidConfig(_) => Component::Config,
            MdError::TopologyMismatch { component, .. } => *component,
            MdError::ConstraintDivergence { .. } => Component::ConstraintSolver,
            MdError::BoxBelowCutoff { .. } => Component::Controller,
            MdError::DeviceUnavailable { .. } | MdError::DeviceError { .. } => Component::Device,
            MdError::AlreadyTerminated { .. } | MdError::NumericalInstability { .. } => {
                Component::Integrator
            }
            MdError::Output { .. } => Component::TrajectoryWriter,
            MdError::Csv(_) => Component::Reporter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Loader,
    Config,
    ForceField,
    ConstraintSolver,
    Controller,
    Device,
    Integrator,
    Reporter,
    TrajectoryWriter,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Loader => "loader",
            Component::Config => "config",
            Component::ForceField => "force field",
            Component::ConstraintSolver => "constraint solver",
            Component::Controller => "controller",
            Component::Device => "device",
            Component::Integrator => "integrator",
            Component::Reporter => "reporter",
            Component::TrajectoryWriter => "trajectory writer",
        };
        f.write_str(name)
    }
}
