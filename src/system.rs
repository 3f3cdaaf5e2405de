/*
System state: atoms, box and bonded topology.

This is the one mutable entity of a run. Everything else (force terms,
constraints, controllers) reads it or is handed it by `&mut` for the duration
of a single call.
 */
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::constants::{Real, BOLTZMANN_KJ_MOL_K};
use crate::error::{MdError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Atom {
    pub name: String,
    pub residue: String,
    pub element: String,
    pub position: Vector3<Real>,
    pub velocity: Vector3<Real>,
    pub mass: Real,
    pub charge: Real,
    pub sigma: Real,
    pub epsilon: Real,
}

impl Atom {
    pub fn new(element: &str, mass: Real, position: Vector3<Real>) -> Self {
        Self {
            name: element.to_string(),
            residue: "UNK".to_string(),
            element: element.to_string(),
            position,
            velocity: Vector3::zeros(),
            mass,
            charge: 0.0,
            sigma: 0.0,
            epsilon: 0.0,
        }
    }

    pub fn with_name(mut self, name: &str, residue: &str) -> Self {
        self.name = name.to_string();
        self.residue = residue.to_string();
        self
    }

    pub fn with_nonbonded(mut self, charge: Real, sigma: Real, epsilon: Real) -> Self {
        self.charge = charge;
        self.sigma = sigma;
        self.epsilon = epsilon;
        self
    }

    pub fn is_hydrogen(&self) -> bool {
        self.element.eq_ignore_ascii_case("H")
    }

    pub fn is_oxygen(&self) -> bool {
        self.element.eq_ignore_ascii_case("O")
    }
}

/// Harmonic bond, `E = k/2 (r - r0)^2`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bond {
    pub atom1: usize,
    pub atom2: usize,
    pub k: Real,
    pub r0: Real,
}

/// Harmonic angle centred on `atom2`, `theta0` in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Angle {
    pub atom1: usize,
    pub atom2: usize,
    pub atom3: usize,
    pub k: Real,
    pub theta0: Real,
}

/// Periodic torsion, `E = k (1 + cos(n phi - phase))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Torsion {
    pub atom1: usize,
    pub atom2: usize,
    pub atom3: usize,
    pub atom4: usize,
    pub k: Real,
    pub periodicity: u32,
    pub phase: Real,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Topology {
    pub bonds: Vec<Bond>,
    pub angles: Vec<Angle>,
    pub torsions: Vec<Torsion>,
}

/// Orthorhombic periodic box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimulationBox {
    pub x_dimension: Real,
    pub y_dimension: Real,
    pub z_dimension: Real,
}

impl SimulationBox {
    pub fn new(x_dimension: Real, y_dimension: Real, z_dimension: Real) -> Self {
        Self {
            x_dimension,
            y_dimension,
            z_dimension,
        }
    }

    pub fn cubic(edge: Real) -> Self {
        Self::new(edge, edge, edge)
    }

    pub fn lengths(&self) -> Vector3<Real> {
        Vector3::new(self.x_dimension, self.y_dimension, self.z_dimension)
    }

    pub fn volume(&self) -> Real {
        self.x_dimension * self.y_dimension * self.z_dimension
    }

    pub fn scale(&mut self, factor: Real) {
        self.x_dimension *= factor;
        self.y_dimension *= factor;
        self.z_dimension *= factor;
    }

    /// Minimum image of a displacement vector.
    pub fn minimum_image(&self, rij: Vector3<Real>) -> Vector3<Real> {
        let l = self.lengths();
        Vector3::new(
            rij[0] - l[0] * (rij[0] / l[0]).round(),
            rij[1] - l[1] * (rij[1] / l[1]).round(),
            rij[2] - l[2] * (rij[2] / l[2]).round(),
        )
    }
}

/// Oxygen plus its two hydrogens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaterMolecule {
    pub oxygen: usize,
    pub hydrogens: [usize; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct SystemState {
    pub atoms: Vec<Atom>,
    pub topology: Topology,
    /// `None` means an unbounded (non-periodic) system.
    pub simulation_box: Option<SimulationBox>,
}

impl SystemState {
    /// Builds a state and checks its invariants; `source` names the input in
    /// error messages.
    pub fn new(
        atoms: Vec<Atom>,
        topology: Topology,
        simulation_box: Option<SimulationBox>,
        source: &str,
    ) -> Result<Self> {
        let state = Self {
            atoms,
            topology,
            simulation_box,
        };
        state.validate(source)?;
        Ok(state)
    }

    pub fn validate(&self, source: &str) -> Result<()> {
        let n = self.atoms.len();
        for (i, atom) in self.atoms.iter().enumerate() {
            if !(atom.mass > 0.0) || !atom.mass.is_finite() {
                return Err(MdError::malformed(
                    source,
                    format!("atom {i} has non-positive mass {}", atom.mass),
                ));
            }
            if !atom.position.iter().chain(atom.velocity.iter()).all(|x| x.is_finite()) {
                return Err(MdError::malformed(
                    source,
                    format!("atom {i} has a non-finite position or velocity"),
                ));
            }
        }
        if let Some(b) = &self.simulation_box {
            if !b.lengths().iter().all(|l| *l > 0.0 && l.is_finite()) {
                return Err(MdError::malformed(
                    source,
                    format!(
                        "box dimensions must be positive, got {} x {} x {}",
                        b.x_dimension, b.y_dimension, b.z_dimension
                    ),
                ));
            }
        }

        let check = |what: &str, indices: &[usize]| -> Result<()> {
            match indices.iter().find(|&&i| i >= n) {
                Some(i) => Err(MdError::malformed(
                    source,
                    format!("{what} {indices:?} references atom {i}, but there are {n} atoms"),
                )),
                None => Ok(()),
            }
        };
        for b in &self.topology.bonds {
            check("bond", &[b.atom1, b.atom2])?;
            if b.atom1 == b.atom2 {
                return Err(MdError::malformed(
                    source,
                    format!("bond joins atom {} to itself", b.atom1),
                ));
            }
        }
        for a in &self.topology.angles {
            check("angle", &[a.atom1, a.atom2, a.atom3])?;
        }
        for t in &self.topology.torsions {
            check("torsion", &[t.atom1, t.atom2, t.atom3, t.atom4])?;
        }
        Ok(())
    }

    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    pub fn positions(&self) -> Vec<Vector3<Real>> {
        self.atoms.iter().map(|a| a.position).collect()
    }

    pub fn is_periodic(&self) -> bool {
        self.simulation_box.is_some()
    }

    pub fn volume(&self) -> Option<Real> {
        self.simulation_box.map(|b| b.volume())
    }

    /// `r_j - r_i`, minimum-imaged when the box is periodic.
    pub fn displacement(&self, i: usize, j: usize) -> Vector3<Real> {
        let rij = self.atoms[j].position - self.atoms[i].position;
        match &self.simulation_box {
            Some(b) => b.minimum_image(rij),
            None => rij,
        }
    }

    pub fn kinetic_energy(&self) -> Real {
        self.atoms
            .iter()
            .map(|a| 0.5 * a.mass * a.velocity.norm_squared())
            .sum()
    }

    /// Instantaneous temperature from equipartition, `T = 2 KE / (dof kB)`.
    pub fn temperature(&self, degrees_of_freedom: usize) -> Real {
        if degrees_of_freedom == 0 {
            return 0.0;
        }
        2.0 * self.kinetic_energy() / (degrees_of_freedom as Real * BOLTZMANN_KJ_MOL_K)
    }

    /// Bonded neighbour lists.
    pub fn neighbors(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.atoms.len()];
        for b in &self.topology.bonds {
            out[b.atom1].push(b.atom2);
            out[b.atom2].push(b.atom1);
        }
        out
    }

    /// Connected components of the bond graph, each sorted by atom index.
    pub fn molecules(&self) -> Vec<Vec<usize>> {
        let neighbors = self.neighbors();
        let mut seen = vec![false; self.atoms.len()];
        let mut molecules = Vec::new();
        for start in 0..self.atoms.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut stack = vec![start];
            let mut members = Vec::new();
            while let Some(i) = stack.pop() {
                members.push(i);
                for &j in &neighbors[i] {
                    if !seen[j] {
                        seen[j] = true;
                        stack.push(j);
                    }
                }
            }
            members.sort_unstable();
            molecules.push(members);
        }
        molecules
    }

    /// O bonded to exactly two hydrogens, each of which is bonded only to that O.
    pub fn water_molecules(&self) -> Vec<WaterMolecule> {
        let neighbors = self.neighbors();
        self.atoms
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_oxygen())
            .filter_map(|(o, _)| match neighbors[o].as_slice() {
                [h1, h2]
                    if self.atoms[*h1].is_hydrogen()
                        && self.atoms[*h2].is_hydrogen()
                        && neighbors[*h1].len() == 1
                        && neighbors[*h2].len() == 1 =>
                {
                    Some(WaterMolecule {
                        oxygen: o,
                        hydrogens: [*h1, *h2],
                    })
                }
                _ => None,
            })
            .collect()
    }

    /// Bonds with a hydrogen at one end, water bonds included.
    pub fn hydrogen_bonds(&self) -> Vec<Bond> {
        self.topology
            .bonds
            .iter()
            .filter(|b| self.atoms[b.atom1].is_hydrogen() || self.atoms[b.atom2].is_hydrogen())
            .copied()
            .collect()
    }

    pub fn center_of_mass(&self, indices: &[usize]) -> Vector3<Real> {
        let mut total_mass = 0.0;
        let mut weighted = Vector3::zeros();
        for &i in indices {
            weighted += self.atoms[i].mass * self.atoms[i].position;
            total_mass += self.atoms[i].mass;
        }
        if total_mass > 0.0 {
            weighted / total_mass
        } else {
            weighted
        }
    }

    /// Draws every velocity from the Maxwell-Boltzmann distribution at
    /// `temperature` and removes the centre-of-mass drift.
    pub fn assign_maxwell_boltzmann_velocities<R: Rng + ?Sized>(
        &mut self,
        temperature: Real,
        rng: &mut R,
    ) {
        if temperature <= 0.0 {
            for atom in &mut self.atoms {
                atom.velocity = Vector3::zeros();
            }
            return;
        }
        for atom in &mut self.atoms {
            atom.velocity = maxwell_boltzmann_velocity(temperature, atom.mass, rng);
        }
        self.remove_com_velocity();
    }

    pub fn remove_com_velocity(&mut self) {
        let total_mass: Real = self.atoms.iter().map(|a| a.mass).sum();
        if total_mass <= 0.0 {
            return;
        }
        let momentum: Vector3<Real> = self
            .atoms
            .iter()
            .fold(Vector3::zeros(), |acc, a| acc + a.mass * a.velocity);
        let v_com = momentum / total_mass;
        for atom in &mut self.atoms {
            atom.velocity -= v_com;
        }
    }
}

/// One Maxwell-Boltzmann sample, sigma = sqrt(kB T / m) per component.
pub fn maxwell_boltzmann_velocity<R: Rng + ?Sized>(
    temperature: Real,
    mass: Real,
    rng: &mut R,
) -> Vector3<Real> {
    let sigma = (BOLTZMANN_KJ_MOL_K * temperature / mass).sqrt();
    match Normal::new(0.0, sigma) {
        Ok(normal) => Vector3::new(normal.sample(rng), normal.sample(rng), normal.sample(rng)),
        Err(_) => Vector3::zeros(),
    }
}
