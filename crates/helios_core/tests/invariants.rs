//! Cross-module invariants exercised over randomized inputs.

use helios_core::array::{Algebra, EvaluatedArray};
use helios_core::cell::{CellVariable, FaceConstraint};
use helios_core::conservation::{ConservationLaw, EnergyConservation, ParticleConservation};
use helios_core::fvm::{flux_operator, harmonic_mean_to_faces, theta_system};
use helios_core::geometry::Geometry;
use helios_core::physics::{SourceContribution, SourceTerms};
use helios_core::profiles::CoreProfiles;

/// Deterministic pseudo-random stream for property-style sweeps.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn in_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

#[test]
fn face_values_and_cell_gradients_are_consistent() {
    let mut rng = Lcg(7);
    for case in 0..50 {
        let n = 4 + (case % 20);
        let dr = rng.in_range(0.01, 0.5);
        let values: Vec<f64> = (0..n).map(|_| rng.in_range(10.0, 1.0e4)).collect();
        let left = if case % 2 == 0 {
            FaceConstraint::Gradient(rng.in_range(-100.0, 100.0))
        } else {
            FaceConstraint::Value(rng.in_range(10.0, 1.0e4))
        };
        let right = if case % 3 == 0 {
            FaceConstraint::Value(rng.in_range(10.0, 1.0e4))
        } else {
            FaceConstraint::Gradient(rng.in_range(-100.0, 100.0))
        };
        let variable = CellVariable::new(values.into(), dr, left, right);
        let faces = variable.face_values();
        let grad = variable.grad();
        for i in 0..n {
            let lhs = faces[i + 1] - faces[i];
            let rhs = dr * grad[i];
            let scale = lhs.abs().max(rhs.abs()).max(1e-12);
            assert!(
                (lhs - rhs).abs() / scale < 1e-5,
                "case {case} cell {i}: {lhs} vs {rhs}"
            );
        }
    }
}

#[test]
fn harmonic_mean_is_bounded_by_its_arguments() {
    let mut rng = Lcg(13);
    for _ in 0..200 {
        let a = rng.in_range(1e-6, 1e6);
        let b = rng.in_range(1e-6, 1e6);
        let cells = EvaluatedArray::new(vec![a, b]);
        let faces = harmonic_mean_to_faces(&cells);
        let mean = faces[1];
        assert!(mean >= a.min(b) * (1.0 - 1e-12));
        assert!(mean <= a.max(b) * (1.0 + 1e-12));
    }
}

#[test]
fn energy_rescaling_is_linear_for_arbitrary_factors() {
    let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
    let law = EnergyConservation::default();
    let mut rng = Lcg(29);
    let profiles = CoreProfiles::new(
        EvaluatedArray::new((0..25).map(|_| rng.in_range(1e3, 2e4)).collect()),
        EvaluatedArray::new((0..25).map(|_| rng.in_range(1e3, 2e4)).collect()),
        EvaluatedArray::new((0..25).map(|_| rng.in_range(5e19, 2e20)).collect()),
        EvaluatedArray::zeros(25),
    );
    let before = law.compute(&profiles, &geometry);
    for _ in 0..20 {
        let factor = rng.in_range(0.8, 1.2);
        let after = law.compute(&law.apply(&profiles, factor), &geometry);
        let expected = factor * before;
        assert!(
            (after - expected).abs() / expected.abs() < 1e-5,
            "factor {factor}: {after} vs {expected}"
        );
    }
}

#[test]
fn particle_rescaling_leaves_temperatures_alone() {
    let geometry = Geometry::circular(16, 6.2, 2.0, 5.3).unwrap();
    let law = ParticleConservation::default();
    let profiles = CoreProfiles::new(
        EvaluatedArray::full(9.0e3, 16),
        EvaluatedArray::full(1.1e4, 16),
        EvaluatedArray::full(1.0e20, 16),
        EvaluatedArray::zeros(16),
    );
    let corrected = law.apply(&profiles, 0.93);
    assert_eq!(corrected.ti, profiles.ti);
    assert_eq!(corrected.te, profiles.te);
    let n_before = law.compute(&profiles, &geometry);
    let n_after = law.compute(&corrected, &geometry);
    assert!((n_after / n_before - 0.93).abs() < 1e-12);
}

#[test]
fn source_merging_is_associative_and_commutative_in_the_arrays() {
    let mut rng = Lcg(41);
    let mut random_source = |name: &str| {
        let heating: Vec<f64> = (0..12).map(|_| rng.in_range(0.0, 5.0)).collect();
        SourceTerms {
            ion_heating: EvaluatedArray::new(heating.clone()),
            electron_heating: EvaluatedArray::new(heating),
            particle: EvaluatedArray::zeros(12),
            current: EvaluatedArray::zeros(12),
            contributions: vec![SourceContribution {
                model: name.to_string(),
                ion_power_mw: 1.0,
                electron_power_mw: 1.0,
                particle_rate: 0.0,
                driven_current_a: 0.0,
            }],
        }
    };
    let a = random_source("a");
    let b = random_source("b");
    let c = random_source("c");

    let left = (a.clone() + b.clone()) + c.clone();
    let right = a.clone() + (b.clone() + c.clone());
    assert_eq!(left, right);
    assert_eq!(left.contributions.len(), 3);

    // Metadata order differs under commutation, the fields do not.
    let ab = a.clone() + b.clone();
    let ba = b + a;
    assert_eq!(ab.ion_heating, ba.ion_heating);
    assert_eq!(ab.electron_heating, ba.electron_heating);
}

#[test]
fn implicit_step_conserves_content_under_zero_flux_boundaries() {
    let geometry = Geometry::circular(20, 6.2, 2.0, 5.3).unwrap();
    let mut rng = Lcg(53);
    let d_face = EvaluatedArray::new((0..21).map(|_| rng.in_range(0.2, 3.0)).collect());
    let v_face = EvaluatedArray::zeros(21);
    let op = flux_operator(
        &d_face,
        &v_face,
        &geometry,
        FaceConstraint::Gradient(0.0),
        FaceConstraint::Gradient(0.0),
    );
    let transient = EvaluatedArray::full(1.0, 20);
    let x_old = EvaluatedArray::new((0..20).map(|_| rng.in_range(1e19, 2e20)).collect());
    let source = EvaluatedArray::zeros(20);

    let x_new = theta_system(&op, &op, &transient, &x_old, &source, 1e-3, 1.0).solve();

    let content_before = geometry.volume_integral(&x_old);
    let content_after = geometry.volume_integral(&x_new);
    assert!(
        ((content_after - content_before) / content_before).abs() < 1e-10,
        "content drifted: {content_before} -> {content_after}"
    );
}
