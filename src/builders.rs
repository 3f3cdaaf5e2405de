/*
Ready-made systems for the demo binary and the tests.

Ethane uses AMBER-style parameters (GAFF c3/hc, converted to nm and kJ/mol),
water is TIP3P. Geometries are built at the force field's reference lengths so
constrained runs start on the constraint surface.
 */
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, UnitSphere};

use crate::constants::{Real, TIP3P_HOH_DEG, TIP3P_OH_NM};
use crate::system::{Angle, Atom, Bond, SimulationBox, SystemState, Topology, Torsion};

pub const CARBON_MASS: Real = 12.011;
pub const HYDROGEN_MASS: Real = 1.008;
pub const OXYGEN_MASS: Real = 15.999;

const CC_LENGTH: Real = 0.1526;
const CC_K: Real = 259_408.0;
const CH_LENGTH: Real = 0.1090;
const CH_K: Real = 284_512.0;
const HCH_K: Real = 292.88;
const CCH_K: Real = 418.4;
const TETRAHEDRAL_DEG: Real = 109.5;
const HCCH_K: Real = 0.6276;

const CARBON_CHARGE: Real = -0.093;
const CARBON_SIGMA: Real = 0.339967;
const CARBON_EPSILON: Real = 0.457730;
const METHYL_H_CHARGE: Real = 0.031;
const METHYL_H_SIGMA: Real = 0.264953;
const METHYL_H_EPSILON: Real = 0.065689;

const TIP3P_OH_K: Real = 462_750.4;
const TIP3P_HOH_K: Real = 836.8;
const TIP3P_O_CHARGE: Real = -0.834;
const TIP3P_H_CHARGE: Real = 0.417;
const TIP3P_O_SIGMA: Real = 0.315061;
const TIP3P_O_EPSILON: Real = 0.636386;

/// Temperature of the velocities `make_water_box` draws.
pub const WATER_BOX_TEMPERATURE_K: Real = 300.0;

/// Staggered ethane, at rest: C0 at the origin, C1 on +x, H2-H4 on C0 and
/// H5-H7 on C1.
pub fn make_ethane() -> SystemState {
    let (atoms, topology) = ethane_parts(Vector3::zeros());
    SystemState {
        atoms,
        topology,
        simulation_box: None,
    }
}

/// `waters_per_side^3` TIP3P waters on a cubic lattice with random
/// orientations, Maxwell-Boltzmann velocities at 300 K. The box edge is
/// `waters_per_side * spacing`.
pub fn make_water_box(waters_per_side: usize, spacing: Real, seed: u64) -> SystemState {
    let mut rng = StdRng::seed_from_u64(seed);
    let edge = waters_per_side as Real * spacing;
    let mut atoms = Vec::new();
    let mut topology = Topology::default();
    for site in lattice(waters_per_side, spacing) {
        push_water(&mut atoms, &mut topology, site, &mut rng);
    }
    let mut state = SystemState {
        atoms,
        topology,
        simulation_box: Some(SimulationBox::cubic(edge)),
    };
    state.assign_maxwell_boltzmann_velocities(WATER_BOX_TEMPERATURE_K, &mut rng);
    state
}

/// One ethane at the centre of a water lattice. Waters whose oxygen sits
/// closer than `max(spacing, 0.45 nm)` to the centre are left out. Ethane
/// occupies atoms 0-7; everything gets velocities at 300 K.
pub fn make_solvated_ethane(waters_per_side: usize, spacing: Real, seed: u64) -> SystemState {
    let mut rng = StdRng::seed_from_u64(seed);
    let edge = waters_per_side as Real * spacing;
    let centre = Vector3::repeat(0.5 * edge);
    let clearance = spacing.max(0.45);

    // put the C-C midpoint on the centre
    let (mut atoms, mut topology) =
        ethane_parts(centre - Vector3::new(0.5 * CC_LENGTH, 0.0, 0.0));
    for site in lattice(waters_per_side, spacing) {
        if (site - centre).norm() < clearance {
            continue;
        }
        push_water(&mut atoms, &mut topology, site, &mut rng);
    }
    let mut state = SystemState {
        atoms,
        topology,
        simulation_box: Some(SimulationBox::cubic(edge)),
    };
    state.assign_maxwell_boltzmann_velocities(WATER_BOX_TEMPERATURE_K, &mut rng);
    state
}

fn lattice(per_side: usize, spacing: Real) -> Vec<Vector3<Real>> {
    let mut sites = Vec::with_capacity(per_side.pow(3));
    for i in 0..per_side {
        for j in 0..per_side {
            for k in 0..per_side {
                sites.push(Vector3::new(
                    (i as Real + 0.5) * spacing,
                    (j as Real + 0.5) * spacing,
                    (k as Real + 0.5) * spacing,
                ));
            }
        }
    }
    sites
}

/// Ethane atoms and topology; always the first eight atoms of a system.
fn ethane_parts(origin: Vector3<Real>) -> (Vec<Atom>, Topology) {
    let alpha = TETRAHEDRAL_DEG.to_radians();
    let (sin_a, cos_a) = alpha.sin_cos();
    let c0 = origin;
    let c1 = origin + Vector3::new(CC_LENGTH, 0.0, 0.0);

    let carbon = |name: &str, position| {
        Atom::new("C", CARBON_MASS, position)
            .with_name(name, "ETH")
            .with_nonbonded(CARBON_CHARGE, CARBON_SIGMA, CARBON_EPSILON)
    };
    let hydrogen = |name: &str, position| {
        Atom::new("H", HYDROGEN_MASS, position)
            .with_name(name, "ETH")
            .with_nonbonded(METHYL_H_CHARGE, METHYL_H_SIGMA, METHYL_H_EPSILON)
    };

    let mut atoms = vec![carbon("C1", c0), carbon("C2", c1)];
    // C-C-H is alpha on both ends; the methyls are rotated 60 degrees apart
    for (n, degrees) in [0.0, 120.0, 240.0_f64].into_iter().enumerate() {
        let phi = degrees.to_radians();
        let dir = Vector3::new(cos_a, sin_a * phi.cos(), sin_a * phi.sin());
        atoms.push(hydrogen(&format!("H1{}", n + 1), c0 + CH_LENGTH * dir));
    }
    for (n, degrees) in [60.0, 180.0, 300.0_f64].into_iter().enumerate() {
        let phi = degrees.to_radians();
        let dir = Vector3::new(-cos_a, sin_a * phi.cos(), sin_a * phi.sin());
        atoms.push(hydrogen(&format!("H2{}", n + 1), c1 + CH_LENGTH * dir));
    }

    let (c0, c1) = (0, 1);
    let first_methyl = [2, 3, 4];
    let second_methyl = [5, 6, 7];

    let mut topology = Topology::default();
    topology.bonds.push(Bond { atom1: c0, atom2: c1, k: CC_K, r0: CC_LENGTH });
    for (carbon, methyl) in [(c0, first_methyl), (c1, second_methyl)] {
        for &h in &methyl {
            topology.bonds.push(Bond { atom1: carbon, atom2: h, k: CH_K, r0: CH_LENGTH });
        }
    }

    for (carbon, other, methyl) in [(c0, c1, first_methyl), (c1, c0, second_methyl)] {
        for &h in &methyl {
            topology.angles.push(Angle {
                atom1: other,
                atom2: carbon,
                atom3: h,
                k: CCH_K,
                theta0: alpha,
            });
        }
        for (a, b) in [(0, 1), (0, 2), (1, 2)] {
            topology.angles.push(Angle {
                atom1: methyl[a],
                atom2: carbon,
                atom3: methyl[b],
                k: HCH_K,
                theta0: alpha,
            });
        }
    }

    for &h1 in &first_methyl {
        for &h2 in &second_methyl {
            topology.torsions.push(Torsion {
                atom1: h1,
                atom2: c0,
                atom3: c1,
                atom4: h2,
                k: HCCH_K,
                periodicity: 3,
                phase: 0.0,
            });
        }
    }
    (atoms, topology)
}

fn push_water(atoms: &mut Vec<Atom>, topology: &mut Topology, oxygen: Vector3<Real>, rng: &mut StdRng) {
    let half_angle = 0.5 * TIP3P_HOH_DEG.to_radians();
    let bisector = random_unit(rng);
    let mut normal = bisector.cross(&random_unit(rng));
    if normal.norm() < 1e-6 {
        normal = bisector.cross(&Vector3::x());
        if normal.norm() < 1e-6 {
            normal = bisector.cross(&Vector3::y());
        }
    }
    let normal = normal.normalize();

    let h1 = oxygen + TIP3P_OH_NM * (half_angle.cos() * bisector + half_angle.sin() * normal);
    let h2 = oxygen + TIP3P_OH_NM * (half_angle.cos() * bisector - half_angle.sin() * normal);

    let o = atoms.len();
    atoms.push(
        Atom::new("O", OXYGEN_MASS, oxygen)
            .with_name("OW", "HOH")
            .with_nonbonded(TIP3P_O_CHARGE, TIP3P_O_SIGMA, TIP3P_O_EPSILON),
    );
    for (name, position) in [("HW1", h1), ("HW2", h2)] {
        atoms.push(
            Atom::new("H", HYDROGEN_MASS, position)
                .with_name(name, "HOH")
                .with_nonbonded(TIP3P_H_CHARGE, 0.0, 0.0),
        );
    }
    for h in [o + 1, o + 2] {
        topology.bonds.push(Bond { atom1: o, atom2: h, k: TIP3P_OH_K, r0: TIP3P_OH_NM });
    }
    topology.angles.push(Angle {
        atom1: o + 1,
        atom2: o,
        atom3: o + 2,
        k: TIP3P_HOH_K,
        theta0: TIP3P_HOH_DEG.to_radians(),
    });
}

fn random_unit(rng: &mut StdRng) -> Vector3<Real> {
    let [x, y, z]: [Real; 3] = UnitSphere.sample(rng);
    Vector3::new(x, y, z)
}
