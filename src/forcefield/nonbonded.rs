/*
Nonbonded term: Lennard-Jones + Coulomb over all atom pairs within a cutoff.

- Lorentz-Berthelot mixing: sigma_ij = (sigma_i + sigma_j) / 2, eps_ij = sqrt(eps_i eps_j)
- 1-2 and 1-3 pairs are excluded, 1-4 pairs are scaled (AMBER factors) and
  evaluated without cutoff
- all other pairs are cut at `cutoff` with the energy shifted to zero there
- minimum image under a periodic box
 */
use itertools::Itertools;
use nalgebra::Vector3;
use rayon::prelude::*;

use super::{ForceKind, ForceTerm, TermOutput};
use crate::constants::{Real, COULOMB_14_SCALE, COULOMB_KJ_NM_MOL, LJ_14_SCALE};
use crate::error::{Component, MdError, Result};
use crate::system::SystemState;

pub fn lennard_jones_potential(r: Real, sigma: Real, eps: Real) -> Real {
    if r < 1e-9 || eps == 0.0 {
        return 0.0;
    }
    let sr6 = (sigma / r).powi(6);
    4.0 * eps * (sr6 * sr6 - sr6)
}

/// `-dV/dr` of the Lennard-Jones potential.
pub fn lennard_jones_force(r: Real, sigma: Real, epsilon: Real) -> Real {
    if r < 1e-9 || epsilon == 0.0 {
        return 0.0;
    }
    let sr6 = (sigma / r).powi(6);
    24.0 * epsilon * (2.0 * sr6 * sr6 - sr6) / r
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum PairClass {
    Excluded,
    OneFour,
    Normal,
}

#[derive(Clone, Copy, Debug)]
struct PairParams {
    charge: Real,
    sigma: Real,
    epsilon: Real,
}

#[derive(Debug, Clone)]
pub struct NonbondedTerm {
    params: Vec<PairParams>,
    /// Sorted partner lists, only partners with a higher index are stored.
    excluded: Vec<Vec<usize>>,
    one_four: Vec<Vec<usize>>,
    cutoff: Real,
}

impl NonbondedTerm {
    pub fn from_state(state: &SystemState, cutoff: Real) -> Result<Self> {
        if !(cutoff > 0.0) {
            return Err(MdError::InvalidConfig(format!(
                "nonbonded cutoff must be positive, got {cutoff}"
            )));
        }
        if let Some(b) = &state.simulation_box {
            let half_edge = 0.5 * b.lengths().min();
            if cutoff > half_edge {
                return Err(MdError::InvalidConfig(format!(
                    "nonbonded cutoff {cutoff} nm exceeds half the smallest box edge ({half_edge} nm)"
                )));
            }
        }

        let n = state.atom_count();
        let neighbors = state.neighbors();
        let mut excluded = vec![Vec::new(); n];
        let mut one_four = vec![Vec::new(); n];
        let push = |lists: &mut Vec<Vec<usize>>, a: usize, b: usize| {
            if a != b {
                lists[a.min(b)].push(a.max(b));
            }
        };

        for b in &state.topology.bonds {
            push(&mut excluded, b.atom1, b.atom2);
        }
        for center in 0..n {
            for (a, c) in neighbors[center].iter().tuple_combinations() {
                push(&mut excluded, *a, *c);
            }
        }
        for list in excluded.iter_mut() {
            list.sort_unstable();
            list.dedup();
        }
        for b in &state.topology.bonds {
            for &i in neighbors[b.atom1].iter().filter(|&&i| i != b.atom2) {
                for &l in neighbors[b.atom2].iter().filter(|&&l| l != b.atom1) {
                    let (lo, hi) = (i.min(l), i.max(l));
                    if lo != hi && excluded[lo].binary_search(&hi).is_err() {
                        one_four[lo].push(hi);
                    }
                }
            }
        }
        for list in one_four.iter_mut() {
            list.sort_unstable();
            list.dedup();
        }

        let params = state
            .atoms
            .iter()
            .map(|a| PairParams {
                charge: a.charge,
                sigma: a.sigma,
                epsilon: a.epsilon,
            })
            .collect();

        Ok(Self {
            params,
            excluded,
            one_four,
            cutoff,
        })
    }

    fn classify(&self, lo: usize, hi: usize) -> PairClass {
        if self.excluded[lo].binary_search(&hi).is_ok() {
            PairClass::Excluded
        } else if self.one_four[lo].binary_search(&hi).is_ok() {
            PairClass::OneFour
        } else {
            PairClass::Normal
        }
    }

    /// Energy and `f/r` for pair `lo < hi`, with `rij = r_hi - r_lo`.
    fn pair(&self, state: &SystemState, lo: usize, hi: usize) -> Option<(Real, Real, Vector3<Real>)> {
        let class = self.classify(lo, hi);
        if class == PairClass::Excluded {
            return None;
        }
        let rij = state.displacement(lo, hi);
        let r = rij.norm();
        if r < 1e-9 || (class == PairClass::Normal && r > self.cutoff) {
            return None;
        }

        let (a, b) = (&self.params[lo], &self.params[hi]);
        let sigma = 0.5 * (a.sigma + b.sigma);
        let epsilon = (a.epsilon * b.epsilon).sqrt();
        let qq = COULOMB_KJ_NM_MOL * a.charge * b.charge;

        let (coulomb_scale, lj_scale) = match class {
            PairClass::OneFour => (COULOMB_14_SCALE, LJ_14_SCALE),
            _ => (1.0, 1.0),
        };

        let mut energy = coulomb_scale * qq / r + lj_scale * lennard_jones_potential(r, sigma, epsilon);
        if class == PairClass::Normal {
            energy -= qq / self.cutoff + lennard_jones_potential(self.cutoff, sigma, epsilon);
        }
        let force = coulomb_scale * qq / (r * r) + lj_scale * lennard_jones_force(r, sigma, epsilon);
        Some((energy, force / r, rij))
    }

    fn check_size(&self, state: &SystemState) -> Result<()> {
        if self.params.len() != state.atom_count() {
            return Err(MdError::topology(
                Component::ForceField,
                ForceKind::Nonbonded.to_string(),
                self.params.len().max(state.atom_count()) - 1,
                state.atom_count(),
            ));
        }
        Ok(())
    }
}

impl ForceTerm for NonbondedTerm {
    fn kind(&self) -> ForceKind {
        ForceKind::Nonbonded
    }

    fn cutoff(&self) -> Option<Real> {
        Some(self.cutoff)
    }

    fn evaluate(&self, state: &SystemState) -> Result<TermOutput> {
        self.check_size(state)?;
        let n = state.atom_count();
        let mut out = TermOutput::zeroed(self.kind(), n);
        for i in 0..n {
            for j in (i + 1)..n {
                if let Some((energy, f_over_r, rij)) = self.pair(state, i, j) {
                    let f = rij * f_over_r;
                    out.forces[j] += f;
                    out.forces[i] -= f;
                    out.energy += energy;
                    out.virial += f_over_r * rij.norm_squared();
                }
            }
        }
        Ok(out)
    }

    /// One row per atom, each row sums the full force on its atom, so no two
    /// workers write the same slot. Energy and virial are halved.
    fn evaluate_parallel(&self, state: &SystemState) -> Result<TermOutput> {
        self.check_size(state)?;
        let n = state.atom_count();
        let rows: Vec<(Vector3<Real>, Real, Real)> = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut force = Vector3::zeros();
                let mut energy = 0.0;
                let mut virial = 0.0;
                for j in (0..n).filter(|&j| j != i) {
                    let (lo, hi) = (i.min(j), i.max(j));
                    if let Some((e, f_over_r, rij)) = self.pair(state, lo, hi) {
                        let f = rij * f_over_r;
                        if i == hi {
                            force += f;
                        } else {
                            force -= f;
                        }
                        energy += 0.5 * e;
                        virial += 0.5 * f_over_r * rij.norm_squared();
                    }
                }
                (force, energy, virial)
            })
            .collect();

        let mut out = TermOutput::zeroed(self.kind(), n);
        for (i, (force, energy, virial)) in rows.into_iter().enumerate() {
            out.forces[i] = force;
            out.energy += energy;
            out.virial += virial;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders;
    use crate::forcefield::tests::assert_forces_match_gradient;
    use crate::system::{Atom, Bond, SimulationBox, Topology};

    #[test]
    fn test_lennard_jones_minimum() {
        let sigma = 0.3;
        let r_min = (2.0 as Real).powf(1.0 / 6.0) * sigma;
        assert!((lennard_jones_potential(r_min, sigma, 0.5) + 0.5).abs() < 1e-12);
        assert!(lennard_jones_force(r_min, sigma, 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_energy_is_zero_at_the_cutoff() {
        let atoms = vec![
            Atom::new("Ar", 39.9, Vector3::zeros()).with_nonbonded(0.2, 0.34, 0.99),
            Atom::new("Ar", 39.9, Vector3::new(0.9 - 1e-9, 0.0, 0.0)).with_nonbonded(-0.1, 0.34, 0.99),
        ];
        let state = SystemState::new(atoms, Topology::default(), None, "inline").unwrap();
        let term = NonbondedTerm::from_state(&state, 0.9).unwrap();
        let out = term.evaluate(&state).unwrap();
        assert!(out.energy.abs() < 1e-6, "energy at cutoff {}", out.energy);
    }

    #[test]
    fn test_exclusions_and_one_four_scaling() {
        let state = builders::make_ethane();
        let term = NonbondedTerm::from_state(&state, 1.0).unwrap();
        // C-C bonded, C0-H(on C1) is 1-3, H-H across the C-C bond is 1-4
        assert_eq!(term.classify(0, 1), PairClass::Excluded);
        assert_eq!(term.classify(0, 5), PairClass::Excluded);
        assert_eq!(term.classify(2, 3), PairClass::Excluded);
        assert_eq!(term.classify(2, 5), PairClass::OneFour);
    }

    #[test]
    fn test_forces_match_finite_differences() {
        let state = builders::make_ethane();
        let term = NonbondedTerm::from_state(&state, 1.0).unwrap();
        assert_forces_match_gradient(&term, &state, 1e-4);
    }

    #[test]
    fn test_parallel_rows_agree_with_serial_pairs() {
        let state = builders::make_water_box(3, 0.31, 11);
        let term = NonbondedTerm::from_state(&state, 0.45).unwrap();
        let serial = term.evaluate(&state).unwrap();
        let parallel = term.evaluate_parallel(&state).unwrap();
        assert!((serial.energy - parallel.energy).abs() < 1e-8 * (1.0 + serial.energy.abs()));
        assert!((serial.virial - parallel.virial).abs() < 1e-8 * (1.0 + serial.virial.abs()));
        for (a, b) in serial.forces.iter().zip(&parallel.forces) {
            assert!((a - b).norm() < 1e-8 * (1.0 + a.norm()));
        }
    }

    #[test]
    fn test_minimum_image_pairs_across_boundary() {
        let atoms = vec![
            Atom::new("Ar", 39.9, Vector3::new(0.05, 0.5, 0.5)).with_nonbonded(0.0, 0.34, 0.99),
            Atom::new("Ar", 39.9, Vector3::new(1.95, 0.5, 0.5)).with_nonbonded(0.0, 0.34, 0.99),
        ];
        let state = SystemState::new(
            atoms,
            Topology::default(),
            Some(SimulationBox::cubic(2.0)),
            "inline",
        )
        .unwrap();
        let term = NonbondedTerm::from_state(&state, 0.9).unwrap();
        let out = term.evaluate(&state).unwrap();
        // 0.1 nm apart through the boundary: strongly repulsive
        assert!(out.energy > 0.0);
        assert!(out.forces[0][0] > 0.0);
        assert!(out.forces[1][0] < 0.0);
    }

    #[test]
    fn test_cutoff_larger_than_half_box_is_rejected() {
        let atoms = vec![Atom::new("Ar", 39.9, Vector3::zeros())];
        let state =
            SystemState::new(atoms, Topology::default(), Some(SimulationBox::cubic(1.5)), "inline")
                .unwrap();
        assert!(matches!(
            NonbondedTerm::from_state(&state, 1.0),
            Err(MdError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bonded_pair_contributes_nothing() {
        let atoms = vec![
            Atom::new("C", 12.0, Vector3::zeros()).with_nonbonded(0.5, 0.34, 0.4),
            Atom::new("C", 12.0, Vector3::new(0.15, 0.0, 0.0)).with_nonbonded(0.5, 0.34, 0.4),
        ];
        let topology = Topology {
            bonds: vec![Bond { atom1: 0, atom2: 1, k: 1.0, r0: 0.15 }],
            ..Default::default()
        };
        let state = SystemState::new(atoms, topology, None, "inline").unwrap();
        let out = NonbondedTerm::from_state(&state, 1.0).unwrap().evaluate(&state).unwrap();
        assert_eq!(out.energy, 0.0);
    }
}
