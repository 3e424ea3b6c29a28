//! Resistivity and bootstrap current.

use crate::array::EvaluatedArray;
use crate::cell::{CellVariable, FaceConstraint};
use crate::geometry::Geometry;
use crate::physics::{ModelParams, SourceContribution, SourceModel, SourceTerms, MU_0};
use crate::profiles::CoreProfiles;

/// Magnitude cap for any single current-density component, A/m^2.
pub const CURRENT_DENSITY_CAP: f64 = 1.0e7;

/// Spitzer parallel resistivity with a trapped-particle (neoclassical)
/// correction, Ohm*m on cell centers.
#[derive(Debug, Clone)]
pub struct SpitzerResistivity {
    pub ln_lambda: f64,
}

impl Default for SpitzerResistivity {
    fn default() -> Self {
        Self { ln_lambda: 17.0 }
    }
}

impl SpitzerResistivity {
    /// `eta = 1.65e-9 * Zeff * lnLambda * Te_keV^(-3/2) / (1 - sqrt(eps))^2`.
    pub fn eta_cell(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> EvaluatedArray {
        let zeff = params.zeff.unwrap_or(1.5);
        let eps = geometry.inverse_aspect_cell();
        let n = profiles.n_cells();
        (0..n)
            .map(|i| {
                let te_kev = (profiles.te[i] / 1000.0).max(1e-6);
                let spitzer = 1.65e-9 * zeff * self.ln_lambda * te_kev.powf(-1.5);
                let trapped = (1.0 - eps[i].sqrt()).max(0.1);
                spitzer / (trapped * trapped)
            })
            .collect::<Vec<_>>()
            .into()
    }
}

/// Poloidal field at cell centers assuming a uniform current profile
/// carrying `i_plasma_a` amperes, T.
pub fn poloidal_field_cell(geometry: &Geometry, i_plasma_a: f64) -> EvaluatedArray {
    let a = geometry.minor_radius;
    geometry
        .r_cell
        .iter()
        .map(|r| MU_0 * i_plasma_a * r / (2.0 * std::f64::consts::PI * a * a))
        .collect::<Vec<_>>()
        .into()
}

/// Gaussian externally driven current profile normalized so the
/// volume-to-area integral carries the full plasma current, A/m^2.
pub fn gaussian_current_profile(geometry: &Geometry, i_plasma_a: f64, width_norm: f64) -> EvaluatedArray {
    let w = width_norm * geometry.minor_radius;
    let a = geometry.minor_radius;
    // integral of exp(-(r/w)^2) over the poloidal cross-section
    let norm = std::f64::consts::PI * w * w * (1.0 - (-(a / w) * (a / w)).exp());
    let j0 = i_plasma_a / norm;
    geometry
        .r_cell
        .iter()
        .map(|r| j0 * (-(r / w) * (r / w)).exp())
        .collect::<Vec<_>>()
        .into()
}

/// Externally driven (inductive + auxiliary) current source.
#[derive(Debug, Clone)]
pub struct ExternalCurrentDrive {
    pub width_norm: f64,
}

impl Default for ExternalCurrentDrive {
    fn default() -> Self {
        Self { width_norm: 0.5 }
    }
}

impl SourceModel for ExternalCurrentDrive {
    fn name(&self) -> &str {
        "external-current"
    }

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> SourceTerms {
        let n = profiles.n_cells();
        let i_plasma = params.plasma_current_a(15.0);
        let current = gaussian_current_profile(geometry, i_plasma, self.width_norm);
        let mut terms = SourceTerms::zero(n);
        if i_plasma != 0.0 {
            terms.contributions.push(SourceContribution {
                model: self.name().to_string(),
                ion_power_mw: 0.0,
                electron_power_mw: 0.0,
                particle_rate: 0.0,
                driven_current_a: i_plasma,
            });
        }
        terms.current = current;
        terms
    }
}

/// Pressure-gradient-driven bootstrap current.
///
/// `j_bs = -c * sqrt(eps) * (1 - sqrt(eps)/2) * (dp/dr) / B_pol`, clamped
/// to [`CURRENT_DENSITY_CAP`] in magnitude with the sign preserved.
#[derive(Debug, Clone)]
pub struct BootstrapCurrent {
    pub coefficient: f64,
}

impl Default for BootstrapCurrent {
    fn default() -> Self {
        Self { coefficient: 2.44 }
    }
}

impl SourceModel for BootstrapCurrent {
    fn name(&self) -> &str {
        "bootstrap"
    }

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> SourceTerms {
        let n = profiles.n_cells();
        let pressure = profiles.pressure();
        let pressure_var = CellVariable::new(
            pressure.clone(),
            geometry.dr,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Value(pressure[n - 1] * 0.5),
        );
        let grad_p = pressure_var.grad();
        let b_pol = poloidal_field_cell(geometry, params.plasma_current_a(15.0));
        let eps = geometry.inverse_aspect_cell();

        let current: Vec<f64> = (0..n)
            .map(|i| {
                let trapped = eps[i].sqrt();
                let raw = -self.coefficient * trapped * (1.0 - 0.5 * trapped) * grad_p[i]
                    / b_pol[i].max(1e-6);
                raw.clamp(-CURRENT_DENSITY_CAP, CURRENT_DENSITY_CAP)
            })
            .collect();
        let current: EvaluatedArray = current.into();

        let mut terms = SourceTerms::zero(n);
        let integrated = current
            .iter()
            .zip(geometry.volume_cell.iter())
            .map(|(j, v)| j * v / (2.0 * std::f64::consts::PI * geometry.major_radius))
            .sum::<f64>();
        if current.iter().any(|j| *j != 0.0) {
            terms.contributions.push(SourceContribution {
                model: self.name().to_string(),
                ion_power_mw: 0.0,
                electron_power_mw: 0.0,
                particle_rate: 0.0,
                driven_current_a: integrated,
            });
        }
        terms.current = current;
        terms
    }
}
