//! Cell-centered profile variables with face constraints.

use serde::{Deserialize, Serialize};

use crate::array::{Algebra, EvaluatedArray};

/// Constraint imposed on a boundary face: either the face value itself or
/// the gradient across it. Exactly one applies per side; the set is closed,
/// so a new kind of constraint is a code change rather than a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FaceConstraint {
    Value(f64),
    Gradient(f64),
}

/// A profile on cell centers together with the mesh spacing and one
/// constraint per boundary face.
///
/// All derived quantities are pure functions of the stored state; nothing
/// here caches or mutates.
#[derive(Debug, Clone, PartialEq)]
pub struct CellVariable {
    values: EvaluatedArray,
    dr: f64,
    left: FaceConstraint,
    right: FaceConstraint,
}

impl CellVariable {
    pub fn new(values: EvaluatedArray, dr: f64, left: FaceConstraint, right: FaceConstraint) -> Self {
        assert!(dr > 0.0, "mesh spacing must be positive");
        assert!(values.len() >= 2, "cell variable needs at least two cells");
        Self {
            values,
            dr,
            left,
            right,
        }
    }

    pub fn values(&self) -> &EvaluatedArray {
        &self.values
    }

    pub fn dr(&self) -> f64 {
        self.dr
    }

    pub fn left(&self) -> FaceConstraint {
        self.left
    }

    pub fn right(&self) -> FaceConstraint {
        self.right
    }

    pub fn n_cells(&self) -> usize {
        self.values.len()
    }

    /// Face values: arithmetic mean of the adjacent cells on interior
    /// faces; on a boundary face `Value(x)` yields `x` and `Gradient(g)`
    /// extrapolates the neighboring cell by half a spacing.
    pub fn face_values(&self) -> EvaluatedArray {
        let n = self.n_cells();
        let cells = self.values.as_slice();
        let mut faces = Vec::with_capacity(n + 1);
        faces.push(match self.left {
            FaceConstraint::Value(x) => x,
            FaceConstraint::Gradient(g) => cells[0] - g * self.dr / 2.0,
        });
        for i in 1..n {
            faces.push(0.5 * (cells[i - 1] + cells[i]));
        }
        faces.push(match self.right {
            FaceConstraint::Value(x) => x,
            FaceConstraint::Gradient(g) => cells[n - 1] + g * self.dr / 2.0,
        });
        faces.into()
    }

    /// Face gradients: `(cell[i] - cell[i-1]) / dr` on interior faces; a
    /// boundary `Value(x)` implies the one-sided difference over `dr/2`,
    /// and a boundary `Gradient(g)` is `g` itself.
    pub fn face_gradients(&self) -> EvaluatedArray {
        let n = self.n_cells();
        let cells = self.values.as_slice();
        let mut faces = Vec::with_capacity(n + 1);
        faces.push(match self.left {
            FaceConstraint::Value(x) => (cells[0] - x) / (self.dr / 2.0),
            FaceConstraint::Gradient(g) => g,
        });
        for i in 1..n {
            faces.push((cells[i] - cells[i - 1]) / self.dr);
        }
        faces.push(match self.right {
            FaceConstraint::Value(x) => (x - cells[n - 1]) / (self.dr / 2.0),
            FaceConstraint::Gradient(g) => g,
        });
        faces.into()
    }

    /// Cell-centered gradient, `(face_value[i+1] - face_value[i]) / dr`.
    pub fn grad(&self) -> EvaluatedArray {
        let faces = self.face_values();
        let n = self.n_cells();
        (0..n)
            .map(|i| (faces[i + 1] - faces[i]) / self.dr)
            .collect::<Vec<_>>()
            .into()
    }
}
