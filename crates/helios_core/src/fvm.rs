//! Finite-volume discretization of the generic 1-D transport equation.
//!
//! Everything here is generic over [`Algebra`], so the exact same assembly
//! runs on plain arrays inside the solvers and on traced arrays inside the
//! differentiable pipeline. The discretized equation per cell `i` is
//!
//! ```text
//! a_c (x_new - x_old) / dt + theta * div F(x_new)
//!                          + (1 - theta) * div F(x_old) = S
//! F = -D dx/dr + v x,   div F|_i = (A[i+1] F[i+1] - A[i] F[i]) / V[i]
//! ```
//!
//! with face areas `A` and cell volumes `V` carrying the `sqrt(g)` metric
//! weighting of the toroidal divergence. The flux operator is affine in
//! `x` (`div F = M x + k` with tridiagonal `M` and a boundary-sourced
//! constant `k`), which is what keeps every implicit update one
//! tridiagonal solve per equation.

use crate::array::Algebra;
use crate::cell::FaceConstraint;
use crate::geometry::Geometry;

/// Guard against zero denominators in harmonic interpolation.
const HARMONIC_EPS: f64 = 1.0e-30;

/// Harmonic-mean interpolation of a cell-centered diffusivity to faces:
/// `2ab / (a + b + eps)` on interior faces, nearest cell on boundaries.
pub fn harmonic_mean_to_faces<A: Algebra>(d_cell: &A) -> A {
    let n = d_cell.len();
    assert!(n >= 2, "harmonic interpolation needs at least two cells");
    let left = d_cell.slice(0..n - 1);
    let right = d_cell.slice(1..n);
    let numerator = left.mul(&right).scale(2.0);
    let denominator = left.add(&right).shift(HARMONIC_EPS);
    let interior = numerator.div(&denominator);
    A::concat(&[
        &d_cell.slice(0..1),
        &interior,
        &d_cell.slice(n - 1..n),
    ])
}

/// Linear (arithmetic-mean) interpolation of a cell-centered quantity to
/// faces, nearest cell on boundaries.
pub fn average_to_faces<A: Algebra>(v_cell: &A) -> A {
    let n = v_cell.len();
    assert!(n >= 2);
    let interior = v_cell
        .slice(0..n - 1)
        .add(&v_cell.slice(1..n))
        .scale(0.5);
    A::concat(&[
        &v_cell.slice(0..1),
        &interior,
        &v_cell.slice(n - 1..n),
    ])
}

/// The affine flux-divergence operator `div F = M x + bc_const` with `M`
/// stored as tridiagonal bands.
#[derive(Debug, Clone)]
pub struct FluxOperator<A> {
    /// Sub-diagonal, length `n - 1`.
    pub sub: A,
    /// Diagonal, length `n`.
    pub diag: A,
    /// Super-diagonal, length `n - 1`.
    pub sup: A,
    /// Boundary-condition constant, length `n`.
    pub bc_const: A,
}

impl<A: Algebra> FluxOperator<A> {
    /// Band-wise sum of two operators over the same mesh.
    pub fn add(&self, other: &FluxOperator<A>) -> FluxOperator<A> {
        FluxOperator {
            sub: self.sub.add(&other.sub),
            diag: self.diag.add(&other.diag),
            sup: self.sup.add(&other.sup),
            bc_const: self.bc_const.add(&other.bc_const),
        }
    }

    /// `M x + bc_const`.
    pub fn apply(&self, x: &A) -> A {
        let n = x.len();
        let zero = x.full_like(0.0, 1);
        let from_below = A::concat(&[&zero, &self.sub.mul(&x.slice(0..n - 1))]);
        let from_above = A::concat(&[&self.sup.mul(&x.slice(1..n)), &zero]);
        self.diag
            .mul(x)
            .add(&from_below)
            .add(&from_above)
            .add(&self.bc_const)
    }
}

/// Assembles the flux-divergence operator for one equation from its face
/// diffusivity/convection and the boundary constraints.
pub fn flux_operator<A: Algebra>(
    d_face: &A,
    v_face: &A,
    geometry: &Geometry,
    left: FaceConstraint,
    right: FaceConstraint,
) -> FluxOperator<A> {
    let n = geometry.n_cells;
    assert!(n >= 3, "flux assembly needs at least three cells");
    assert_eq!(d_face.len(), n + 1, "face diffusivity length mismatch");
    assert_eq!(v_face.len(), n + 1, "face convection length mismatch");
    let dr = geometry.dr;

    let inv_vol: Vec<f64> = geometry.volume_cell.iter().map(|v| 1.0 / v).collect();
    let area = geometry.area_face.as_slice();

    // Interior faces f = 1..n-1: F_f = c_lo[f] x[f-1] + c_hi[f] x[f].
    let d_int = d_face.slice(1..n);
    let v_int = v_face.slice(1..n);
    let c_lo = d_int.scale(1.0 / dr).add(&v_int.scale(0.5));
    let c_hi = d_int.scale(-1.0 / dr).add(&v_int.scale(0.5));

    let area_int = d_face.lift(&area[1..n]);
    let inv_vol_all = d_face.lift(&inv_vol);

    // t_up[i] = A[i+1] c_lo[i+1] for rows 0..n-2;
    // t_dn[i-1] = A[i] c_hi[i] for rows 1..n-1.
    let t_up = area_int.mul(&c_lo);
    let t_dn = area_int.mul(&c_hi);

    let sub = t_up.mul(&inv_vol_all.slice(1..n)).neg();
    let sup = t_dn.mul(&inv_vol_all.slice(0..n - 1));

    // Boundary fluxes: F_0 = b0_coeff x[0] + b0_const and
    // F_n = bn_coeff x[n-1] + bn_const.
    let d0 = d_face.slice(0..1);
    let v0 = v_face.slice(0..1);
    let dn = d_face.slice(n..n + 1);
    let vn = v_face.slice(n..n + 1);

    let (b0_coeff, b0_const) = match left {
        FaceConstraint::Gradient(g) => (
            v0.clone(),
            d0.scale(-g).add(&v0.scale(-g * dr / 2.0)),
        ),
        FaceConstraint::Value(xb) => (
            d0.scale(-2.0 / dr),
            d0.scale(2.0 * xb / dr).add(&v0.scale(xb)),
        ),
    };
    let (bn_coeff, bn_const) = match right {
        FaceConstraint::Gradient(g) => (
            vn.clone(),
            dn.scale(-g).add(&vn.scale(g * dr / 2.0)),
        ),
        FaceConstraint::Value(xb) => (
            dn.scale(2.0 / dr),
            dn.scale(-2.0 * xb / dr).add(&vn.scale(xb)),
        ),
    };

    let diag_first = t_up
        .slice(0..1)
        .sub(&b0_coeff.scale(area[0]))
        .scale(inv_vol[0]);
    let diag_mid = t_up
        .slice(1..n - 1)
        .sub(&t_dn.slice(0..n - 2))
        .mul(&inv_vol_all.slice(1..n - 1));
    let diag_last = bn_coeff
        .scale(area[n])
        .sub(&t_dn.slice(n - 2..n - 1))
        .scale(inv_vol[n - 1]);
    let diag = A::concat(&[&diag_first, &diag_mid, &diag_last]);

    let zeros_mid = d_face.full_like(0.0, n - 2);
    let bc_first = b0_const.scale(-area[0] * inv_vol[0]);
    let bc_last = bn_const.scale(area[n] * inv_vol[n - 1]);
    let bc_const = A::concat(&[&bc_first, &zeros_mid, &bc_last]);

    FluxOperator {
        sub,
        diag,
        sup,
        bc_const,
    }
}

/// The assembled tridiagonal system for one equation's theta-implicit
/// update.
#[derive(Debug, Clone)]
pub struct ThetaSystem<A> {
    pub sub: A,
    pub diag: A,
    pub sup: A,
    pub rhs: A,
}

impl<A: Algebra> ThetaSystem<A> {
    pub fn solve(&self) -> A {
        A::solve_tridiagonal(&self.sub, &self.diag, &self.sup, &self.rhs)
    }
}

/// Builds the implicit system
/// `(a_c/dt + theta M_new) x_new = a_c/dt x_old - theta k_new
///  - (1-theta) (M_old x_old + k_old) + S`.
pub fn theta_system<A: Algebra>(
    op_new: &FluxOperator<A>,
    op_old: &FluxOperator<A>,
    transient: &A,
    x_old: &A,
    source: &A,
    dt: f64,
    theta: f64,
) -> ThetaSystem<A> {
    assert!(dt > 0.0, "time step must be positive");
    assert!((0.0..=1.0).contains(&theta), "theta must lie in [0, 1]");

    let sub = op_new.sub.scale(theta);
    let sup = op_new.sup.scale(theta);
    let diag = transient.scale(1.0 / dt).add(&op_new.diag.scale(theta));

    let mut rhs = transient
        .mul(x_old)
        .scale(1.0 / dt)
        .add(source)
        .sub(&op_new.bc_const.scale(theta));
    if theta < 1.0 {
        rhs = rhs.sub(&op_old.apply(x_old).scale(1.0 - theta));
    }

    ThetaSystem {
        sub,
        diag,
        sup,
        rhs,
    }
}

/// Residual of the theta-weighted update at a candidate `x_new`:
/// `a_c (x_new - x_old)/dt + theta (M_new x_new + k_new)
///  + (1-theta)(M_old x_old + k_old) - S`.
pub fn residual<A: Algebra>(
    op_new: &FluxOperator<A>,
    op_old: &FluxOperator<A>,
    transient: &A,
    x_new: &A,
    x_old: &A,
    source: &A,
    dt: f64,
    theta: f64,
) -> A {
    let mut r = transient
        .mul(&x_new.sub(x_old))
        .scale(1.0 / dt)
        .add(&op_new.apply(x_new).scale(theta))
        .sub(source);
    if theta < 1.0 {
        r = r.add(&op_old.apply(x_old).scale(1.0 - theta));
    }
    r
}

#[cfg(test)]
mod tests {
    use super::{
        average_to_faces, flux_operator, harmonic_mean_to_faces, residual, theta_system,
    };
    use crate::array::{Algebra, EvaluatedArray};
    use crate::cell::FaceConstraint;
    use crate::geometry::Geometry;
    use approx::assert_relative_eq;

    fn geometry(n: usize) -> Geometry {
        Geometry::circular(n, 6.2, 2.0, 5.3).expect("valid geometry")
    }

    #[test]
    fn harmonic_mean_stays_between_the_cells() {
        let d = EvaluatedArray::new(vec![0.5, 4.0, 1.5, 8.0, 0.1]);
        let faces = harmonic_mean_to_faces(&d);
        assert_eq!(faces.len(), 6);
        assert_eq!(faces[0], d[0]);
        assert_eq!(faces[5], d[4]);
        for i in 1..5 {
            let (a, b) = (d[i - 1], d[i]);
            assert!(faces[i] >= a.min(b) - 1e-12, "face {i} below min");
            assert!(faces[i] <= a.max(b) + 1e-12, "face {i} above max");
        }
    }

    #[test]
    fn harmonic_mean_of_equal_cells_is_exact() {
        let d = EvaluatedArray::full(3.0, 6);
        let faces = harmonic_mean_to_faces(&d);
        for i in 0..7 {
            assert_relative_eq!(faces[i], 3.0, max_relative = 1e-12);
        }
    }

    #[test]
    fn face_average_is_linear() {
        let v = EvaluatedArray::new(vec![1.0, 3.0, 5.0]);
        let faces = average_to_faces(&v);
        assert_eq!(faces.as_slice(), &[1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn zero_flux_boundaries_conserve_content() {
        // With zero-gradient boundaries and no convection, the volume
        // integral of div F vanishes for any state (fluxes telescope).
        let geometry = geometry(12);
        let d_face = EvaluatedArray::full(2.5, 13);
        let v_face = EvaluatedArray::zeros(13);
        let op = flux_operator(
            &d_face,
            &v_face,
            &geometry,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Gradient(0.0),
        );
        let x = EvaluatedArray::new((0..12).map(|i| (i as f64 * 0.7).sin() + 2.0).collect());
        let div = op.apply(&x);
        let total: f64 = div
            .iter()
            .zip(geometry.volume_cell.iter())
            .map(|(f, v)| f * v)
            .sum();
        assert!(total.abs() < 1e-9, "net flux {total}");
    }

    #[test]
    fn uniform_state_is_stationary_under_matching_dirichlet() {
        // x == xb everywhere with an edge Value(xb) produces no fluxes.
        let geometry = geometry(10);
        let d_face = EvaluatedArray::full(1.0, 11);
        let v_face = EvaluatedArray::zeros(11);
        let op = flux_operator(
            &d_face,
            &v_face,
            &geometry,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Value(4.0),
        );
        let x = EvaluatedArray::full(4.0, 10);
        let div = op.apply(&x);
        for i in 0..10 {
            assert!(div[i].abs() < 1e-10, "cell {i}: {}", div[i]);
        }
    }

    #[test]
    fn implicit_step_preserves_uniform_state() {
        let geometry = geometry(10);
        let d_face = EvaluatedArray::full(1.0, 11);
        let v_face = EvaluatedArray::zeros(11);
        let op = flux_operator(
            &d_face,
            &v_face,
            &geometry,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Gradient(0.0),
        );
        let transient = EvaluatedArray::full(1.0e20, 10);
        let x_old = EvaluatedArray::full(1.0e4, 10);
        let source = EvaluatedArray::zeros(10);
        let system = theta_system(&op, &op, &transient, &x_old, &source, 1e-4, 1.0);
        let x_new = system.solve();
        for i in 0..10 {
            assert_relative_eq!(x_new[i], 1.0e4, max_relative = 1e-12);
        }
    }

    #[test]
    fn dirichlet_edge_pulls_the_profile_toward_the_boundary() {
        let geometry = geometry(10);
        let d_face = EvaluatedArray::full(1.0, 11);
        let v_face = EvaluatedArray::zeros(11);
        let op = flux_operator(
            &d_face,
            &v_face,
            &geometry,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Value(1.0e3),
        );
        let transient = EvaluatedArray::full(1.0, 10);
        let x_old = EvaluatedArray::full(1.0e4, 10);
        let source = EvaluatedArray::zeros(10);
        let system = theta_system(&op, &op, &transient, &x_old, &source, 1.0, 1.0);
        let x_new = system.solve();
        // Edge cell relaxes toward the boundary value, the core lags.
        assert!(x_new[9] < x_old[9]);
        assert!(x_new[9] < x_new[0]);
        assert!(x_new.iter().all(|v| *v >= 1.0e3 - 1e-6));
    }

    #[test]
    fn residual_vanishes_at_the_exact_implicit_solution() {
        let geometry = geometry(8);
        let d_face = EvaluatedArray::new((0..9).map(|i| 1.0 + 0.1 * i as f64).collect());
        let v_face = EvaluatedArray::full(0.2, 9);
        let op = flux_operator(
            &d_face,
            &v_face,
            &geometry,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Value(500.0),
        );
        let transient = EvaluatedArray::full(2.0e19, 8);
        let x_old = EvaluatedArray::new((0..8).map(|i| 1.0e4 - 500.0 * i as f64).collect());
        let source = EvaluatedArray::full(1.0e22, 8);
        let dt = 5e-4;
        for theta in [1.0, 0.5] {
            let system = theta_system(&op, &op, &transient, &x_old, &source, dt, theta);
            let x_new = system.solve();
            let r = residual(&op, &op, &transient, &x_new, &x_old, &source, dt, theta);
            let scale = transient[0] * x_old[0] / dt;
            for i in 0..8 {
                assert!(
                    (r[i] / scale).abs() < 1e-10,
                    "theta {theta} cell {i}: {}",
                    r[i]
                );
            }
        }
    }

    #[test]
    fn traced_assembly_matches_eager_assembly() {
        use crate::tape::Tape;

        let geometry = geometry(9);
        let d_vals: Vec<f64> = (0..10).map(|i| 0.5 + 0.05 * i as f64).collect();
        let v_vals = vec![0.1; 10];
        let x_vals: Vec<f64> = (0..9).map(|i| 1.0e4 - 300.0 * i as f64).collect();
        let transient_vals = vec![1.0e20; 9];
        let source_vals = vec![2.0e23; 9];

        let eager_op = flux_operator(
            &EvaluatedArray::new(d_vals.clone()),
            &EvaluatedArray::new(v_vals.clone()),
            &geometry,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Value(800.0),
        );
        let eager = theta_system(
            &eager_op,
            &eager_op,
            &EvaluatedArray::new(transient_vals.clone()),
            &EvaluatedArray::new(x_vals.clone()),
            &EvaluatedArray::new(source_vals.clone()),
            1e-4,
            1.0,
        )
        .solve();

        let tape = Tape::new();
        let traced_op = flux_operator(
            &tape.leaf(&d_vals),
            &tape.leaf(&v_vals),
            &geometry,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Value(800.0),
        );
        let traced = theta_system(
            &traced_op,
            &traced_op,
            &tape.leaf(&transient_vals),
            &tape.leaf(&x_vals),
            &tape.leaf(&source_vals),
            1e-4,
            1.0,
        )
        .solve();

        for i in 0..9 {
            assert_relative_eq!(traced.get(i), eager[i], max_relative = 1e-12);
        }
    }
}
