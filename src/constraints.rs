/*
Distance constraints: rigid water and bonds to hydrogen.

Both kinds are reduced to lists of (atom, atom, length) derived once from the
topology. Positions are corrected with SHAKE along the previous step's bond
vectors, velocities with RATTLE. The two groups never share atoms: water atoms
are left out of the hydrogen-bond group.
 */
use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::{
    Real, CONSTRAINT_MAX_ITERATIONS, CONSTRAINT_TOLERANCE, TIP3P_HOH_DEG, TIP3P_OH_NM,
    VELOCITY_CONSTRAINT_TOLERANCE,
};
use crate::error::{Component, MdError, Result};
use crate::system::{SimulationBox, SystemState, WaterMolecule};

const SHAKE_EPS: Real = 1.0e-8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    RigidWater,
    HCovalentBond,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::RigidWater => f.write_str("rigid water"),
            ConstraintKind::HCovalentBond => f.write_str("H-covalent bond"),
        }
    }
}

/// Which constraint kinds are switched on. Both off by default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstraintFlags {
    pub rigid_water: bool,
    pub h_covalent_bond: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceConstraint {
    pub atom1: usize,
    pub atom2: usize,
    pub length: Real,
}

#[derive(Clone, Debug)]
struct ConstraintGroup {
    kind: ConstraintKind,
    constraints: Vec<DistanceConstraint>,
}

#[derive(Clone, Debug)]
pub struct ConstraintSolver {
    groups: Vec<ConstraintGroup>,
    atom_count: usize,
    tolerance: Real,
    velocity_tolerance: Real,
    max_iterations: usize,
}

impl ConstraintSolver {
    /// A solver with nothing to enforce.
    pub fn disabled(atom_count: usize) -> Self {
        Self {
            groups: Vec::new(),
            atom_count,
            tolerance: CONSTRAINT_TOLERANCE,
            velocity_tolerance: VELOCITY_CONSTRAINT_TOLERANCE,
            max_iterations: CONSTRAINT_MAX_ITERATIONS,
        }
    }

    pub fn from_state(state: &SystemState, flags: &ConstraintFlags) -> Result<Self> {
        let mut solver = Self::disabled(state.atom_count());
        let waters = state.water_molecules();

        if flags.rigid_water {
            let constraints: Vec<DistanceConstraint> = waters
                .iter()
                .flat_map(|w| water_template(state, w))
                .collect();
            log::info!(
                "rigid water: {} molecule(s), {} constraint(s)",
                waters.len(),
                constraints.len()
            );
            solver.groups.push(ConstraintGroup {
                kind: ConstraintKind::RigidWater,
                constraints,
            });
        }

        if flags.h_covalent_bond {
            let mut in_water = vec![false; state.atom_count()];
            for w in &waters {
                in_water[w.oxygen] = true;
                in_water[w.hydrogens[0]] = true;
                in_water[w.hydrogens[1]] = true;
            }
            let mut constraints = Vec::new();
            for bond in state.hydrogen_bonds() {
                if in_water[bond.atom1] || in_water[bond.atom2] {
                    continue;
                }
                if !(bond.r0 > 0.0) {
                    return Err(MdError::malformed(
                        "topology",
                        format!(
                            "hydrogen bond {}-{} has non-positive reference length {}",
                            bond.atom1, bond.atom2, bond.r0
                        ),
                    ));
                }
                constraints.push(DistanceConstraint {
                    atom1: bond.atom1,
                    atom2: bond.atom2,
                    length: bond.r0,
                });
            }
            log::info!("H-covalent bonds: {} constraint(s)", constraints.len());
            solver.groups.push(ConstraintGroup {
                kind: ConstraintKind::HCovalentBond,
                constraints,
            });
        }
        Ok(solver)
    }

    /// Overrides the relative tolerance and iteration cap.
    pub fn with_limits(mut self, tolerance: Real, max_iterations: usize) -> Self {
        self.tolerance = tolerance;
        self.velocity_tolerance = tolerance;
        self.max_iterations = max_iterations;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.constraints.is_empty())
    }

    /// Number of scalar constraints; each removes one degree of freedom.
    pub fn count(&self) -> usize {
        self.groups.iter().map(|g| g.constraints.len()).sum()
    }

    pub fn constraints(&self, kind: ConstraintKind) -> &[DistanceConstraint] {
        self.groups
            .iter()
            .find(|g| g.kind == kind)
            .map(|g| g.constraints.as_slice())
            .unwrap_or(&[])
    }

    /// Largest relative length error over all constraints.
    pub fn max_deviation(&self, state: &SystemState) -> Real {
        self.groups
            .iter()
            .flat_map(|g| g.constraints.iter())
            .map(|c| relative_deviation(state, c))
            .fold(0.0, Real::max)
    }

    /// Position stage: pulls the tentative positions in `state` back onto the
    /// constraint surface and corrects velocities by the displacement over `dt`.
    ///
    /// Returns the virial (sum of r . F, kJ/mol) of the constraint forces that
    /// produced the correction, taken as acting over the drift's half kick.
    pub fn apply(&self, state: &mut SystemState, previous: &[Vector3<Real>], dt: Real) -> Result<Real> {
        if self.is_empty() {
            return Ok(0.0);
        }
        self.check_size(state)?;
        if previous.len() != state.atom_count() {
            return Err(MdError::topology(
                Component::ConstraintSolver,
                "previous positions",
                previous.len().max(state.atom_count()) - 1,
                state.atom_count(),
            ));
        }

        let tentative = state.positions();
        let mut multipliers = 0.0;
        for group in &self.groups {
            multipliers += self.shake(group, state, previous)?;
        }
        if !(dt > 0.0) {
            return Ok(0.0);
        }
        for (atom, before) in state.atoms.iter_mut().zip(&tentative) {
            atom.velocity += (atom.position - before) / dt;
        }
        // x += F dt^2 / 2m, so the pair force on atom2 is 2 g s / dt^2
        Ok(2.0 * multipliers / (dt * dt))
    }

    /// Velocity stage: removes relative velocity along every constrained pair.
    ///
    /// Returns the virial of the constraint forces behind the velocity change,
    /// taken as acting over a half kick of length `dt / 2`.
    pub fn apply_velocities(&self, state: &mut SystemState, dt: Real) -> Result<Real> {
        if self.is_empty() {
            return Ok(0.0);
        }
        self.check_size(state)?;
        let mut multipliers = 0.0;
        for group in &self.groups {
            multipliers += self.rattle(group, state)?;
        }
        if !(dt > 0.0) {
            return Ok(0.0);
        }
        // v += F dt / 2m, so the pair force on atom2 is -2 k r / dt
        Ok(-2.0 * multipliers / dt)
    }

    fn check_size(&self, state: &SystemState) -> Result<()> {
        if state.atom_count() != self.atom_count {
            return Err(MdError::topology(
                Component::ConstraintSolver,
                "constraint list",
                self.atom_count.max(state.atom_count()) - 1,
                state.atom_count(),
            ));
        }
        Ok(())
    }

    /// Returns the sum of g |s|^2 over every correction applied.
    fn shake(&self, group: &ConstraintGroup, state: &mut SystemState, previous: &[Vector3<Real>]) -> Result<Real> {
        let cell = state.simulation_box;
        let mut multipliers = 0.0;
        for iteration in 0..self.max_iterations {
            let mut corrected = false;
            for c in &group.constraints {
                let r = state.displacement(c.atom1, c.atom2);
                let d2 = c.length * c.length;
                let diff = d2 - r.norm_squared();
                let deviation = diff.abs() / (2.0 * d2);
                if deviation <= self.tolerance {
                    continue;
                }
                corrected = true;

                let s = image(cell.as_ref(), previous[c.atom2] - previous[c.atom1]);
                let rs = r.dot(&s);
                if rs < SHAKE_EPS * d2 {
                    return Err(MdError::ConstraintDivergence {
                        kind: group.kind,
                        iterations: iteration + 1,
                        max_deviation: deviation,
                    });
                }
                let inv1 = 1.0 / state.atoms[c.atom1].mass;
                let inv2 = 1.0 / state.atoms[c.atom2].mass;
                let g = diff / (2.0 * (inv1 + inv2) * rs);
                state.atoms[c.atom1].position -= s * (g * inv1);
                state.atoms[c.atom2].position += s * (g * inv2);
                multipliers += g * s.norm_squared();
            }
            if !corrected {
                return Ok(multipliers);
            }
        }

        let max_deviation = group
            .constraints
            .iter()
            .map(|c| relative_deviation(state, c))
            .fold(0.0, Real::max);
        if max_deviation <= self.tolerance {
            return Ok(multipliers);
        }
        Err(MdError::ConstraintDivergence {
            kind: group.kind,
            iterations: self.max_iterations,
            max_deviation,
        })
    }

    /// Returns the sum of k |r|^2 over every correction applied.
    fn rattle(&self, group: &ConstraintGroup, state: &mut SystemState) -> Result<Real> {
        let mut worst = 0.0;
        let mut multipliers = 0.0;
        for _ in 0..self.max_iterations {
            let mut corrected = false;
            worst = 0.0;
            for c in &group.constraints {
                let r = state.displacement(c.atom1, c.atom2);
                let v = state.atoms[c.atom2].velocity - state.atoms[c.atom1].velocity;
                let r2 = r.norm_squared();
                let rv = r.dot(&v);
                let deviation = rv.abs() / (c.length * c.length);
                if deviation <= self.velocity_tolerance || r2 <= SHAKE_EPS {
                    continue;
                }
                corrected = true;
                worst = Real::max(worst, deviation);

                let inv1 = 1.0 / state.atoms[c.atom1].mass;
                let inv2 = 1.0 / state.atoms[c.atom2].mass;
                let k = rv / ((inv1 + inv2) * r2);
                state.atoms[c.atom1].velocity += r * (k * inv1);
                state.atoms[c.atom2].velocity -= r * (k * inv2);
                multipliers += k * r2;
            }
            if !corrected {
                return Ok(multipliers);
            }
        }
        Err(MdError::ConstraintDivergence {
            kind: group.kind,
            iterations: self.max_iterations,
            max_deviation: worst,
        })
    }
}

fn image(cell: Option<&SimulationBox>, d: Vector3<Real>) -> Vector3<Real> {
    match cell {
        Some(b) => b.minimum_image(d),
        None => d,
    }
}

fn relative_deviation(state: &SystemState, c: &DistanceConstraint) -> Real {
    let d2 = c.length * c.length;
    (d2 - state.displacement(c.atom1, c.atom2).norm_squared()).abs() / (2.0 * d2)
}

/// O-H lengths from the topology's O-H bonds, H-H from the H-O-H angle; TIP3P
/// values for whatever the topology leaves out.
fn water_template(state: &SystemState, water: &WaterMolecule) -> [DistanceConstraint; 3] {
    let [h1, h2] = water.hydrogens;
    let o = water.oxygen;
    let bond_length = |h: usize| {
        state
            .topology
            .bonds
            .iter()
            .find(|b| (b.atom1 == o && b.atom2 == h) || (b.atom1 == h && b.atom2 == o))
            .map(|b| b.r0)
            .filter(|r0| *r0 > 0.0)
            .unwrap_or(TIP3P_OH_NM)
    };
    let r1 = bond_length(h1);
    let r2 = bond_length(h2);
    let theta = state
        .topology
        .angles
        .iter()
        .find(|a| {
            a.atom2 == o
                && ((a.atom1 == h1 && a.atom3 == h2) || (a.atom1 == h2 && a.atom3 == h1))
        })
        .map(|a| a.theta0)
        .unwrap_or_else(|| TIP3P_HOH_DEG.to_radians());
    let r_hh = (r1 * r1 + r2 * r2 - 2.0 * r1 * r2 * theta.cos()).sqrt();

    [
        DistanceConstraint { atom1: o, atom2: h1, length: r1 },
        DistanceConstraint { atom1: o, atom2: h2, length: r2 },
        DistanceConstraint { atom1: h1, atom2: h2, length: r_hh },
    ]
}
