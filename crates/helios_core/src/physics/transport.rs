//! Reference transport closures.

use crate::array::{Algebra, EvaluatedArray};
use crate::cell::{CellVariable, FaceConstraint};
use crate::geometry::Geometry;
use crate::physics::{
    ModelParams, TransportCoefficients, TransportModel, DEUTERIUM_MASS, ELEMENTARY_CHARGE,
};
use crate::profiles::CoreProfiles;

/// Spatially constant transport coefficients, taken from the parameter bag.
#[derive(Debug, Clone, Default)]
pub struct ConstantTransport;

impl TransportModel for ConstantTransport {
    fn name(&self) -> &str {
        "constant"
    }

    fn coefficients(
        &self,
        profiles: &CoreProfiles,
        _geometry: &Geometry,
        params: &ModelParams,
    ) -> TransportCoefficients {
        let n = profiles.n_cells();
        TransportCoefficients {
            chi_ion: EvaluatedArray::full(params.chi_ion_or(1.0), n),
            chi_electron: EvaluatedArray::full(params.chi_electron_or(1.0), n),
            d_particle: EvaluatedArray::full(params.particle_diffusivity_or(0.3), n),
            v_conv: EvaluatedArray::full(params.convection_velocity_or(0.0), n),
        }
    }
}

/// Bohm / gyro-Bohm mixing-length closure.
///
/// The Bohm branch scales with the normalized electron pressure gradient,
/// the gyro-Bohm branch with the normalized gyroradius. The two dial-in
/// coefficients come from the parameter bag so validation harnesses can
/// retune them without touching the model.
#[derive(Debug, Clone, Default)]
pub struct BohmGyroBohm;

impl BohmGyroBohm {
    const DEFAULT_BOHM: f64 = 8.0e-3;
    const DEFAULT_GYROBOHM: f64 = 0.5;
    /// Keeps edge cells diffusive even where the gradient vanishes.
    const CHI_FLOOR: f64 = 0.05;
}

impl TransportModel for BohmGyroBohm {
    fn name(&self) -> &str {
        "bohm-gyrobohm"
    }

    fn coefficients(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> TransportCoefficients {
        let n = profiles.n_cells();
        let b0 = geometry.toroidal_field;
        let c_bohm = params.bohm_coefficient.unwrap_or(Self::DEFAULT_BOHM);
        let c_gyrobohm = params.gyrobohm_coefficient.unwrap_or(Self::DEFAULT_GYROBOHM);

        // Electron pressure gradient from the cell variable machinery; the
        // edge boundary value only shapes the outermost gradient.
        let pe = Algebra::mul(&profiles.ne, &profiles.te).scale(ELEMENTARY_CHARGE);
        let pe_var = CellVariable::new(
            pe.clone(),
            geometry.dr,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Value(pe[n - 1] * 0.5),
        );
        let grad_pe = pe_var.grad();

        let mut chi_e = Vec::with_capacity(n);
        let mut chi_i = Vec::with_capacity(n);
        for i in 0..n {
            let te_joule = profiles.te[i] * ELEMENTARY_CHARGE;
            // chi_unit = T_e / (e B), the Bohm diffusivity scale.
            let chi_unit = te_joule / (ELEMENTARY_CHARGE * b0);
            let normalized_grad =
                geometry.minor_radius * grad_pe[i].abs() / pe[i].max(1e-300);
            let bohm = c_bohm * chi_unit / 16.0 * normalized_grad;

            let rho_s = (DEUTERIUM_MASS * te_joule).sqrt() / (ELEMENTARY_CHARGE * b0);
            let gyrobohm = c_gyrobohm * chi_unit * rho_s / geometry.minor_radius;

            let electron = (bohm + gyrobohm).max(Self::CHI_FLOOR);
            // Ion channel: gyro-Bohm dominated, half the Bohm drive.
            let ion = (2.0 * gyrobohm + 0.5 * bohm).max(Self::CHI_FLOOR);
            chi_e.push(electron);
            chi_i.push(ion);
        }

        TransportCoefficients {
            chi_ion: chi_i.into(),
            chi_electron: chi_e.into(),
            d_particle: EvaluatedArray::full(params.particle_diffusivity_or(0.3), n),
            v_conv: EvaluatedArray::full(params.convection_velocity_or(0.0), n),
        }
    }
}

/// Critical-gradient closure: transport is stiff above a threshold in the
/// normalized temperature gradient `R0 / L_T` and neoclassical-small
/// below it.
#[derive(Debug, Clone)]
pub struct CriticalGradient {
    /// Floor diffusivity below threshold, m^2/s.
    pub chi_floor: f64,
    /// Stiffness above threshold, m^2/s per unit of excess gradient.
    pub stiffness: f64,
    /// Threshold in `R0 / L_T`.
    pub threshold: f64,
}

impl Default for CriticalGradient {
    fn default() -> Self {
        Self {
            chi_floor: 0.5,
            stiffness: 0.4,
            threshold: 5.0,
        }
    }
}

impl CriticalGradient {
    fn channel(
        &self,
        temperature: &EvaluatedArray,
        geometry: &Geometry,
    ) -> EvaluatedArray {
        let n = temperature.len();
        let variable = CellVariable::new(
            temperature.clone(),
            geometry.dr,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Value(temperature[n - 1] * 0.5),
        );
        let grad = variable.grad();
        (0..n)
            .map(|i| {
                // R0 / L_T with L_T = -T / T'; flat or hollow profiles sit
                // below threshold by construction.
                let normalized = -geometry.major_radius * grad[i] / temperature[i].max(1e-300);
                self.chi_floor + self.stiffness * (normalized - self.threshold).max(0.0)
            })
            .collect::<Vec<_>>()
            .into()
    }
}

impl TransportModel for CriticalGradient {
    fn name(&self) -> &str {
        "critical-gradient"
    }

    fn coefficients(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> TransportCoefficients {
        let n = profiles.n_cells();
        TransportCoefficients {
            chi_ion: self.channel(&profiles.ti, geometry),
            chi_electron: self.channel(&profiles.te, geometry),
            d_particle: EvaluatedArray::full(params.particle_diffusivity_or(0.3), n),
            v_conv: EvaluatedArray::full(params.convection_velocity_or(0.0), n),
        }
    }
}
