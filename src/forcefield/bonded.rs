/*
Bonded terms: harmonic bond stretch, harmonic angle bend, periodic torsion.

All three work from displacement vectors obtained through
`SystemState::displacement`, so bonded pairs that straddle a periodic boundary
are handled with the minimum image. Forces are analytic.
 */
use nalgebra::Vector3;

use super::{check_indices, ForceKind, ForceTerm, TermOutput};
use crate::constants::Real;
use crate::error::Result;
use crate::system::{Angle, Bond, SystemState, Torsion};

const GEOMETRY_EPS: Real = 1e-12;

#[derive(Debug, Clone)]
pub struct HarmonicBondTerm {
    bonds: Vec<Bond>,
}

impl HarmonicBondTerm {
    pub fn new(bonds: Vec<Bond>) -> Self {
        Self { bonds }
    }
}

impl ForceTerm for HarmonicBondTerm {
    fn kind(&self) -> ForceKind {
        ForceKind::HarmonicBond
    }

    fn evaluate(&self, state: &SystemState) -> Result<TermOutput> {
        let n = state.atom_count();
        let mut out = TermOutput::zeroed(self.kind(), n);
        for bond in &self.bonds {
            check_indices(self.kind(), &[bond.atom1, bond.atom2], n)?;
            let rij = state.displacement(bond.atom1, bond.atom2);
            let r = rij.norm();
            let dr = r - bond.r0;
            out.energy += 0.5 * bond.k * dr * dr;
            if r <= GEOMETRY_EPS {
                continue;
            }
            // force on atom2; atom1 gets the opposite
            let f = rij * (-bond.k * dr / r);
            out.forces[bond.atom2] += f;
            out.forces[bond.atom1] -= f;
            out.virial += rij.dot(&f);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct HarmonicAngleTerm {
    angles: Vec<Angle>,
}

impl HarmonicAngleTerm {
    pub fn new(angles: Vec<Angle>) -> Self {
        Self { angles }
    }
}

/// Angle at `atom2` between the arms to `atom1` and `atom3`, in radians.
pub fn angle_value(state: &SystemState, angle: &Angle) -> Real {
    let u = state.displacement(angle.atom2, angle.atom1);
    let v = state.displacement(angle.atom2, angle.atom3);
    let denom = u.norm() * v.norm();
    if denom <= GEOMETRY_EPS {
        return angle.theta0;
    }
    (u.dot(&v) / denom).clamp(-1.0, 1.0).acos()
}

impl ForceTerm for HarmonicAngleTerm {
    fn kind(&self) -> ForceKind {
        ForceKind::HarmonicAngle
    }

    fn evaluate(&self, state: &SystemState) -> Result<TermOutput> {
        let n = state.atom_count();
        let mut out = TermOutput::zeroed(self.kind(), n);
        for angle in &self.angles {
            check_indices(self.kind(), &[angle.atom1, angle.atom2, angle.atom3], n)?;
            let u = state.displacement(angle.atom2, angle.atom1);
            let v = state.displacement(angle.atom2, angle.atom3);
            let theta = angle_value(state, angle);
            let dtheta = theta - angle.theta0;
            out.energy += 0.5 * angle.k * dtheta * dtheta;

            // p is normal to the plane; u x p and p x v point along increasing theta
            let p = u.cross(&v);
            let (u_norm, v_norm, p_norm) = (u.norm(), v.norm(), p.norm());
            if p_norm <= GEOMETRY_EPS || u_norm <= GEOMETRY_EPS || v_norm <= GEOMETRY_EPS {
                continue;
            }
            let de_dtheta = angle.k * dtheta;
            let f1 = u.cross(&p) * (-de_dtheta / (u_norm * u.cross(&p).norm()));
            let f3 = p.cross(&v) * (-de_dtheta / (v_norm * p.cross(&v).norm()));
            let f2 = -(f1 + f3);

            out.forces[angle.atom1] += f1;
            out.forces[angle.atom2] += f2;
            out.forces[angle.atom3] += f3;
            out.virial += u.dot(&f1) + v.dot(&f3);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct PeriodicTorsionTerm {
    torsions: Vec<Torsion>,
}

impl PeriodicTorsionTerm {
    pub fn new(torsions: Vec<Torsion>) -> Self {
        Self { torsions }
    }
}

struct TorsionGeometry {
    r_ij: Vector3<Real>,
    r_kj: Vector3<Real>,
    r_kl: Vector3<Real>,
    m: Vector3<Real>,
    n: Vector3<Real>,
    phi: Real,
}

fn torsion_geometry(state: &SystemState, t: &Torsion) -> TorsionGeometry {
    let r_ij = state.displacement(t.atom2, t.atom1);
    let r_kj = state.displacement(t.atom2, t.atom3);
    let r_kl = state.displacement(t.atom4, t.atom3);
    let m = r_ij.cross(&r_kj);
    let n = r_kj.cross(&r_kl);
    let denom = m.norm() * n.norm();
    let phi = if denom <= GEOMETRY_EPS {
        0.0
    } else {
        let cos_phi = (m.dot(&n) / denom).clamp(-1.0, 1.0);
        let sign = if r_ij.dot(&n) < 0.0 { -1.0 } else { 1.0 };
        sign * cos_phi.acos()
    };
    TorsionGeometry {
        r_ij,
        r_kj,
        r_kl,
        m,
        n,
        phi,
    }
}

/// Dihedral angle of the torsion, in radians within [-pi, pi].
pub fn torsion_angle(state: &SystemState, torsion: &Torsion) -> Real {
    torsion_geometry(state, torsion).phi
}

impl ForceTerm for PeriodicTorsionTerm {
    fn kind(&self) -> ForceKind {
        ForceKind::PeriodicTorsion
    }

    fn evaluate(&self, state: &SystemState) -> Result<TermOutput> {
        let n_atoms = state.atom_count();
        let mut out = TermOutput::zeroed(self.kind(), n_atoms);
        for t in &self.torsions {
            check_indices(self.kind(), &[t.atom1, t.atom2, t.atom3, t.atom4], n_atoms)?;
            let g = torsion_geometry(state, t);
            let mult = t.periodicity as Real;
            out.energy += t.k * (1.0 + (mult * g.phi - t.phase).cos());

            let iprm = g.m.norm_squared();
            let iprn = g.n.norm_squared();
            let nrkj2 = g.r_kj.norm_squared();
            if iprm <= GEOMETRY_EPS || iprn <= GEOMETRY_EPS || nrkj2 <= GEOMETRY_EPS {
                continue;
            }
            let nrkj = nrkj2.sqrt();
            let ddphi = -t.k * mult * (mult * g.phi - t.phase).sin();

            let f_i = g.m * (-ddphi * nrkj / iprm);
            let f_l = g.n * (ddphi * nrkj / iprn);
            let p = g.r_ij.dot(&g.r_kj) / nrkj2;
            let q = g.r_kl.dot(&g.r_kj) / nrkj2;
            let s = f_i * p - f_l * q;
            let f_j = f_i - s;
            let f_k = f_l + s;

            out.forces[t.atom1] += f_i;
            out.forces[t.atom2] -= f_j;
            out.forces[t.atom3] -= f_k;
            out.forces[t.atom4] += f_l;

            // positions relative to atom2
            let d_l = g.r_kj - g.r_kl;
            out.virial += g.r_ij.dot(&f_i) - g.r_kj.dot(&f_k) + d_l.dot(&f_l);
        }
        Ok(out)
    }
}
