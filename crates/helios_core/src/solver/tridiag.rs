//! Direct solution of tridiagonal systems.

use num_traits::Float;

/// Thomas algorithm for `A x = rhs` with sub-/super-diagonals of length
/// `n - 1` and diagonal/right-hand side of length `n`.
///
/// Row `i` reads `sub[i-1]·x[i-1] + diag[i]·x[i] + sup[i]·x[i+1] = rhs[i]`.
/// The transport systems assembled by the coefficient builder are strictly
/// diagonally dominant (positive transient term on the diagonal), so no
/// pivoting is performed.
pub fn thomas<T: Float>(sub: &[T], diag: &[T], sup: &[T], rhs: &[T]) -> Vec<T> {
    let n = diag.len();
    assert!(n > 0, "empty tridiagonal system");
    assert_eq!(sub.len(), n - 1, "sub-diagonal must have length n - 1");
    assert_eq!(sup.len(), n - 1, "super-diagonal must have length n - 1");
    assert_eq!(rhs.len(), n, "right-hand side must have length n");

    if n == 1 {
        return vec![rhs[0] / diag[0]];
    }

    let zero = T::zero();
    let mut c_star = vec![zero; n - 1];
    let mut d_star = vec![zero; n];

    c_star[0] = sup[0] / diag[0];
    d_star[0] = rhs[0] / diag[0];
    for i in 1..n {
        let denom = diag[i] - sub[i - 1] * c_star[i - 1];
        if i < n - 1 {
            c_star[i] = sup[i] / denom;
        }
        d_star[i] = (rhs[i] - sub[i - 1] * d_star[i - 1]) / denom;
    }

    let mut x = vec![zero; n];
    x[n - 1] = d_star[n - 1];
    for i in (0..n - 1).rev() {
        x[i] = d_star[i] - c_star[i] * x[i + 1];
    }
    x
}

/// `A x` for the same band layout as [`thomas`]. Used by the θ-scheme to
/// evaluate the explicit part of the update and by tests as an oracle.
pub fn tridiag_matvec<T: Float>(sub: &[T], diag: &[T], sup: &[T], x: &[T]) -> Vec<T> {
    let n = diag.len();
    assert_eq!(x.len(), n);
    let mut out = vec![T::zero(); n];
    for i in 0..n {
        let mut acc = diag[i] * x[i];
        if i > 0 {
            acc = acc + sub[i - 1] * x[i - 1];
        }
        if i + 1 < n {
            acc = acc + sup[i] * x[i + 1];
        }
        out[i] = acc;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{thomas, tridiag_matvec};
    use approx::assert_relative_eq;

    #[test]
    fn solves_known_system() {
        // [2 1 0; 1 3 1; 0 1 2] x = [3, 10, 9] -> x = [0.5, 2, 3.5]
        let sub = [1.0, 1.0];
        let diag = [2.0, 3.0, 2.0];
        let sup = [1.0, 1.0];
        let rhs = [3.0, 10.0, 9.0];
        let x = thomas(&sub, &diag, &sup, &rhs);
        assert_relative_eq!(x[0], 0.5, max_relative = 1e-12);
        assert_relative_eq!(x[1], 2.0, max_relative = 1e-12);
        assert_relative_eq!(x[2], 3.5, max_relative = 1e-12);
    }

    #[test]
    fn solve_then_matvec_roundtrip() {
        let n = 24;
        let sub: Vec<f64> = (0..n - 1).map(|i| -0.4 - 0.01 * i as f64).collect();
        let sup: Vec<f64> = (0..n - 1).map(|i| -0.3 - 0.02 * i as f64).collect();
        let diag: Vec<f64> = (0..n).map(|i| 2.0 + 0.05 * i as f64).collect();
        let rhs: Vec<f64> = (0..n).map(|i| (i as f64).sin() + 1.5).collect();

        let x = thomas(&sub, &diag, &sup, &rhs);
        let reconstructed = tridiag_matvec(&sub, &diag, &sup, &x);
        for (a, b) in reconstructed.iter().zip(rhs.iter()) {
            assert_relative_eq!(a, b, max_relative = 1e-10);
        }
    }

    #[test]
    fn single_cell_system() {
        let x = thomas::<f64>(&[], &[4.0], &[], &[2.0]);
        assert_eq!(x, vec![0.5]);
    }

    #[test]
    fn works_in_single_precision() {
        let x = thomas::<f32>(&[1.0], &[2.0, 3.0], &[1.0], &[4.0, 7.0]);
        assert!((x[0] - 1.0).abs() < 1e-6);
        assert!((x[1] - 2.0).abs() < 1e-6);
    }
}
