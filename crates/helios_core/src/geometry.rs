//! Mesh geometry and metric factors for a circular torus.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::array::{Algebra, EvaluatedArray};
use crate::error::SimulationError;

/// Radial mesh with the metric quantities the finite-volume assembly
/// needs. Built once per mesh and immutable afterwards.
///
/// The metric follows the thin circular torus: flux-surface volume
/// `V(r) = 2 pi^2 R0 r^2`, so `g0 = dV/dr = 4 pi^2 R0 r`, `g1 = g0^2`,
/// `g2 = g1 / R0^2` and `g3 = 1 / R0^2`. The Jacobian `sqrt(g)` reduces to
/// the constant `2 pi R0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub major_radius: f64,
    pub minor_radius: f64,
    pub toroidal_field: f64,
    pub n_cells: usize,
    pub dr: f64,
    /// Cell-center radii, length `n_cells`.
    pub r_cell: EvaluatedArray,
    /// Face radii, length `n_cells + 1`; `r_face[0] = 0` is the magnetic
    /// axis.
    pub r_face: EvaluatedArray,
    pub g0_face: EvaluatedArray,
    pub g1_face: EvaluatedArray,
    pub g2_face: EvaluatedArray,
    pub g3_face: EvaluatedArray,
    /// `sqrt(g)` for the thin torus.
    pub jacobian: f64,
    /// Cell volumes, length `n_cells`.
    pub volume_cell: EvaluatedArray,
    /// Face areas, length `n_cells + 1`; zero on the axis face, which is
    /// what makes the axis boundary inert in the flux balance.
    pub area_face: EvaluatedArray,
    /// Geometric weighting of the transient term in the flux-diffusion
    /// equation, length `n_cells`.
    pub psi_transient: EvaluatedArray,
}

impl Geometry {
    /// Circular plasma of minor radius `a` centered at major radius `r0`
    /// in a toroidal field `b0`, meshed with `n_cells` uniform cells.
    pub fn circular(
        n_cells: usize,
        major_radius: f64,
        minor_radius: f64,
        toroidal_field: f64,
    ) -> Result<Self, SimulationError> {
        if n_cells < 4 {
            return Err(SimulationError::ConfigurationInvalid(format!(
                "mesh needs at least 4 cells, got {n_cells}"
            )));
        }
        if major_radius <= 0.0 || minor_radius <= 0.0 {
            return Err(SimulationError::ConfigurationInvalid(
                "major and minor radius must be positive".to_string(),
            ));
        }
        if minor_radius >= major_radius {
            return Err(SimulationError::ConfigurationInvalid(format!(
                "minor radius {minor_radius} must be smaller than major radius {major_radius}"
            )));
        }
        if toroidal_field <= 0.0 {
            return Err(SimulationError::ConfigurationInvalid(
                "toroidal field must be positive".to_string(),
            ));
        }

        let dr = minor_radius / n_cells as f64;
        let r_cell: Vec<f64> = (0..n_cells).map(|i| (i as f64 + 0.5) * dr).collect();
        let r_face: Vec<f64> = (0..=n_cells).map(|i| i as f64 * dr).collect();

        let g0: Vec<f64> = r_face
            .iter()
            .map(|r| 4.0 * PI * PI * major_radius * r)
            .collect();
        let g1: Vec<f64> = g0.iter().map(|g| g * g).collect();
        let g2: Vec<f64> = g1.iter().map(|g| g / (major_radius * major_radius)).collect();
        let g3 = vec![1.0 / (major_radius * major_radius); n_cells + 1];

        let volume_cell: Vec<f64> = (0..n_cells)
            .map(|i| {
                2.0 * PI * PI * major_radius * (r_face[i + 1] * r_face[i + 1] - r_face[i] * r_face[i])
            })
            .collect();
        let area_face = g0.clone();

        let psi_transient: Vec<f64> = r_cell
            .iter()
            .map(|r| 1.0 + (r / major_radius) * (r / major_radius))
            .collect();

        Ok(Self {
            major_radius,
            minor_radius,
            toroidal_field,
            n_cells,
            dr,
            r_cell: r_cell.into(),
            r_face: r_face.into(),
            g0_face: g0.into(),
            g1_face: g1.into(),
            g2_face: g2.into(),
            g3_face: g3.into(),
            jacobian: 2.0 * PI * major_radius,
            volume_cell: volume_cell.into(),
            area_face: area_face.into(),
            psi_transient: psi_transient.into(),
        })
    }

    /// Total plasma volume, `2 pi^2 R0 a^2`.
    pub fn total_volume(&self) -> f64 {
        2.0 * PI * PI * self.major_radius * self.minor_radius * self.minor_radius
    }

    /// `sum(values * V_cell)` over the mesh.
    pub fn volume_integral(&self, cell_values: &EvaluatedArray) -> f64 {
        assert_eq!(cell_values.len(), self.n_cells);
        cell_values
            .iter()
            .zip(self.volume_cell.iter())
            .map(|(x, v)| x * v)
            .sum()
    }

    /// Inverse aspect ratio `r / R0` at cell centers.
    pub fn inverse_aspect_cell(&self) -> EvaluatedArray {
        self.r_cell
            .iter()
            .map(|r| r / self.major_radius)
            .collect::<Vec<_>>()
            .into()
    }
}
