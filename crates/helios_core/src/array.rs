//! Dense 1-D numeric arrays.
//!
//! Two array variants coexist in the crate: [`EvaluatedArray`], which is
//! plain evaluated storage, and [`crate::tape::Traced`], which carries the
//! same values plus a reverse-mode autodiff graph. The finite-volume
//! kernels are written once against the [`Algebra`] trait and instantiated
//! for either variant, so the differentiable forward pass runs the exact
//! same arithmetic as the plain solver.

use std::ops::{Index, Range};

use serde::{Deserialize, Serialize};

use crate::solver::tridiag::thomas;

/// Shared algebra over dense 1-D arrays.
///
/// Reductions to `f64` (`min_value`, `max_value`) are value-space reads and
/// never participate in gradients; traced callers use them only for
/// diagnostics outside the differentiated region.
pub trait Algebra: Clone + Sized {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element read from the materialized values.
    fn get(&self, index: usize) -> f64;

    /// Materialized values as an owned vector.
    fn to_values(&self) -> Vec<f64>;

    /// Wraps plain values in the same execution context as `self`
    /// (a constant leaf on the tape for traced arrays).
    fn lift(&self, values: &[f64]) -> Self;

    fn full_like(&self, value: f64, len: usize) -> Self {
        self.lift(&vec![value; len])
    }

    fn add(&self, rhs: &Self) -> Self;
    fn sub(&self, rhs: &Self) -> Self;
    fn mul(&self, rhs: &Self) -> Self;
    fn div(&self, rhs: &Self) -> Self;
    fn neg(&self) -> Self;

    fn scale(&self, factor: f64) -> Self;
    fn shift(&self, offset: f64) -> Self;

    /// Element-wise `max(self, floor)`.
    fn clamp_min(&self, floor: f64) -> Self;
    /// Element-wise `min(self, cap)`.
    fn clamp_max(&self, cap: f64) -> Self;

    fn abs(&self) -> Self;
    fn sqrt(&self) -> Self;
    fn exp(&self) -> Self;
    fn ln(&self) -> Self;
    fn powf(&self, exponent: f64) -> Self;

    fn slice(&self, range: Range<usize>) -> Self;
    fn concat(parts: &[&Self]) -> Self;

    /// Sum reduction as a length-1 array (stays on the tape when traced).
    fn sum(&self) -> Self;
    /// Mean reduction as a length-1 array.
    fn mean(&self) -> Self;

    /// Broadcast-multiply by a length-1 array.
    fn mul_scalar_node(&self, scalar: &Self) -> Self;

    /// `mask[i] ? on_true[i] : on_false[i]`.
    fn select(mask: &[bool], on_true: &Self, on_false: &Self) -> Self;

    /// Solves the tridiagonal system with sub/super diagonals of length
    /// `n - 1` and diagonal/rhs of length `n`.
    fn solve_tridiagonal(sub: &Self, diag: &Self, sup: &Self, rhs: &Self) -> Self;

    /// Value of a length-1 array.
    fn scalar(&self) -> f64 {
        debug_assert_eq!(self.len(), 1, "scalar() expects a length-1 array");
        self.get(0)
    }

    fn min_value(&self) -> f64 {
        (0..self.len()).fold(f64::INFINITY, |acc, i| acc.min(self.get(i)))
    }

    fn max_value(&self) -> f64 {
        (0..self.len()).fold(f64::NEG_INFINITY, |acc, i| acc.max(self.get(i)))
    }
}

/// An evaluated dense 1-D array.
///
/// Values are materialized; shape and element access never re-trigger any
/// computation, and the contents do not depend on any pending lazy state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluatedArray {
    data: Vec<f64>,
}

impl EvaluatedArray {
    pub fn new(data: Vec<f64>) -> Self {
        Self { data }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            data: vec![0.0; len],
        }
    }

    pub fn full(value: f64, len: usize) -> Self {
        Self {
            data: vec![value; len],
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f64> {
        self.data.iter()
    }

    /// True when every element is finite (no NaN, no ±inf).
    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    fn zip_with(&self, rhs: &Self, f: impl Fn(f64, f64) -> f64) -> Self {
        assert_eq!(
            self.data.len(),
            rhs.data.len(),
            "element-wise op on arrays of different lengths"
        );
        Self {
            data: self
                .data
                .iter()
                .zip(rhs.data.iter())
                .map(|(a, b)| f(*a, *b))
                .collect(),
        }
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            data: self.data.iter().map(|v| f(*v)).collect(),
        }
    }
}

impl From<Vec<f64>> for EvaluatedArray {
    fn from(data: Vec<f64>) -> Self {
        Self { data }
    }
}

impl From<&[f64]> for EvaluatedArray {
    fn from(data: &[f64]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }
}

impl Index<usize> for EvaluatedArray {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.data[index]
    }
}

impl Algebra for EvaluatedArray {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn get(&self, index: usize) -> f64 {
        self.data[index]
    }

    fn to_values(&self) -> Vec<f64> {
        self.data.clone()
    }

    fn lift(&self, values: &[f64]) -> Self {
        Self {
            data: values.to_vec(),
        }
    }

    fn add(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |a, b| a + b)
    }

    fn sub(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |a, b| a - b)
    }

    fn mul(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |a, b| a * b)
    }

    fn div(&self, rhs: &Self) -> Self {
        self.zip_with(rhs, |a, b| a / b)
    }

    fn neg(&self) -> Self {
        self.map(|v| -v)
    }

    fn scale(&self, factor: f64) -> Self {
        self.map(|v| v * factor)
    }

    fn shift(&self, offset: f64) -> Self {
        self.map(|v| v + offset)
    }

    fn clamp_min(&self, floor: f64) -> Self {
        self.map(|v| v.max(floor))
    }

    fn clamp_max(&self, cap: f64) -> Self {
        self.map(|v| v.min(cap))
    }

    fn abs(&self) -> Self {
        self.map(f64::abs)
    }

    fn sqrt(&self) -> Self {
        self.map(f64::sqrt)
    }

    fn exp(&self) -> Self {
        self.map(f64::exp)
    }

    fn ln(&self) -> Self {
        self.map(f64::ln)
    }

    fn powf(&self, exponent: f64) -> Self {
        self.map(|v| v.powf(exponent))
    }

    fn slice(&self, range: Range<usize>) -> Self {
        Self {
            data: self.data[range].to_vec(),
        }
    }

    fn concat(parts: &[&Self]) -> Self {
        let mut data = Vec::with_capacity(parts.iter().map(|p| p.data.len()).sum());
        for part in parts {
            data.extend_from_slice(&part.data);
        }
        Self { data }
    }

    fn sum(&self) -> Self {
        Self {
            data: vec![self.data.iter().sum()],
        }
    }

    fn mean(&self) -> Self {
        let n = self.data.len().max(1) as f64;
        Self {
            data: vec![self.data.iter().sum::<f64>() / n],
        }
    }

    fn mul_scalar_node(&self, scalar: &Self) -> Self {
        assert_eq!(scalar.len(), 1, "broadcast factor must have length 1");
        self.scale(scalar.data[0])
    }

    fn select(mask: &[bool], on_true: &Self, on_false: &Self) -> Self {
        assert_eq!(mask.len(), on_true.len());
        assert_eq!(mask.len(), on_false.len());
        Self {
            data: mask
                .iter()
                .enumerate()
                .map(|(i, m)| if *m { on_true.data[i] } else { on_false.data[i] })
                .collect(),
        }
    }

    fn solve_tridiagonal(sub: &Self, diag: &Self, sup: &Self, rhs: &Self) -> Self {
        Self {
            data: thomas(&sub.data, &diag.data, &sup.data, &rhs.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Algebra, EvaluatedArray};
    use approx::assert_relative_eq;

    #[test]
    fn elementwise_arithmetic() {
        let a = EvaluatedArray::new(vec![1.0, 2.0, 3.0]);
        let b = EvaluatedArray::new(vec![4.0, 5.0, 6.0]);
        assert_eq!(a.add(&b).as_slice(), &[5.0, 7.0, 9.0]);
        assert_eq!(b.sub(&a).as_slice(), &[3.0, 3.0, 3.0]);
        assert_eq!(a.mul(&b).as_slice(), &[4.0, 10.0, 18.0]);
        assert_eq!(b.div(&a).as_slice(), &[4.0, 2.5, 2.0]);
        assert_eq!(a.neg().as_slice(), &[-1.0, -2.0, -3.0]);
    }

    #[test]
    fn reductions_and_scalars() {
        let a = EvaluatedArray::new(vec![2.0, 4.0, 6.0]);
        assert_eq!(a.sum().scalar(), 12.0);
        assert_eq!(a.mean().scalar(), 4.0);
        assert_eq!(a.min_value(), 2.0);
        assert_eq!(a.max_value(), 6.0);
        assert_eq!(a.scale(0.5).as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(a.shift(-2.0).as_slice(), &[0.0, 2.0, 4.0]);
    }

    #[test]
    fn clamping_and_maps() {
        let a = EvaluatedArray::new(vec![-1.0, 0.5, 9.0]);
        assert_eq!(a.clamp_min(0.0).as_slice(), &[0.0, 0.5, 9.0]);
        assert_eq!(a.clamp_max(1.0).as_slice(), &[-1.0, 0.5, 1.0]);
        assert_eq!(a.abs().as_slice(), &[1.0, 0.5, 9.0]);
        assert_relative_eq!(
            EvaluatedArray::new(vec![4.0]).sqrt().scalar(),
            2.0,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            EvaluatedArray::new(vec![2.0]).powf(3.0).scalar(),
            8.0,
            max_relative = 1e-12
        );
    }

    #[test]
    fn slicing_and_concat() {
        let a = EvaluatedArray::new(vec![1.0, 2.0, 3.0, 4.0]);
        let head = a.slice(0..2);
        let tail = a.slice(2..4);
        assert_eq!(head.as_slice(), &[1.0, 2.0]);
        let joined = EvaluatedArray::concat(&[&head, &tail]);
        assert_eq!(joined, a);
    }

    #[test]
    fn select_routes_by_mask() {
        let a = EvaluatedArray::new(vec![1.0, 1.0, 1.0]);
        let b = EvaluatedArray::new(vec![2.0, 2.0, 2.0]);
        let mixed = EvaluatedArray::select(&[true, false, true], &a, &b);
        assert_eq!(mixed.as_slice(), &[1.0, 2.0, 1.0]);
    }

    #[test]
    fn finite_detection() {
        assert!(EvaluatedArray::new(vec![1.0, 2.0]).all_finite());
        assert!(!EvaluatedArray::new(vec![1.0, f64::NAN]).all_finite());
        assert!(!EvaluatedArray::new(vec![f64::INFINITY]).all_finite());
    }
}
