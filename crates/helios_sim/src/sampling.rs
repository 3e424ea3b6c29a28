//! Time-series capture.

use serde::{Deserialize, Serialize};

use helios_core::array::Algebra;
use helios_core::diagnostics::StepHealth;
use helios_core::geometry::Geometry;
use helios_core::physics::{fusion, SourceTerms, ELEMENTARY_CHARGE};
use helios_core::profiles::{CoreProfiles, SerializedProfiles};

/// Volume-averaged / integrated quantities derived from one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedQuantities {
    pub avg_ti_ev: f64,
    pub avg_te_ev: f64,
    /// Total particle count.
    pub total_particles: f64,
    /// Stored thermal energy, J.
    pub stored_energy_j: f64,
    /// Total auxiliary + ohmic heating, MW.
    pub total_heating_mw: f64,
    /// D-T fusion power of the snapshot, MW.
    pub fusion_power_mw: f64,
    /// `P_fusion / P_heating`, when heating is being applied.
    pub q_gain: Option<f64>,
}

impl DerivedQuantities {
    pub fn compute(
        profiles: &CoreProfiles,
        geometry: &Geometry,
        sources: Option<&SourceTerms>,
    ) -> Self {
        let volume = geometry.total_volume();
        let t_sum = Algebra::add(&profiles.ti, &profiles.te);
        let energy_density = Algebra::mul(&profiles.ne, &t_sum).scale(1.5 * ELEMENTARY_CHARGE);
        let total_heating_mw = sources.map(|s| s.total_heating_mw()).unwrap_or(0.0);
        let fusion_power_mw = fusion::fusion_power_mw(profiles, geometry);
        Self {
            avg_ti_ev: geometry.volume_integral(&profiles.ti) / volume,
            avg_te_ev: geometry.volume_integral(&profiles.te) / volume,
            total_particles: geometry.volume_integral(&profiles.ne),
            stored_energy_j: geometry.volume_integral(&energy_density),
            total_heating_mw,
            fusion_power_mw,
            q_gain: (total_heating_mw > 0.0).then(|| fusion_power_mw / total_heating_mw),
        }
    }
}

/// One captured point of the run's time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub time: f64,
    pub step: u64,
    pub dt: f64,
    pub profiles: SerializedProfiles,
    pub derived: Option<DerivedQuantities>,
    pub health: Option<StepHealth>,
}

#[cfg(test)]
mod tests {
    use super::DerivedQuantities;
    use helios_core::array::EvaluatedArray;
    use helios_core::geometry::Geometry;
    use helios_core::profiles::CoreProfiles;
    use approx::assert_relative_eq;

    #[test]
    fn derived_quantities_of_a_uniform_state() {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let profiles = CoreProfiles::new(
            EvaluatedArray::full(1.0e4, 25),
            EvaluatedArray::full(2.0e4, 25),
            EvaluatedArray::full(1.0e20, 25),
            EvaluatedArray::zeros(25),
        );
        let derived = DerivedQuantities::compute(&profiles, &geometry, None);
        assert_relative_eq!(derived.avg_ti_ev, 1.0e4, max_relative = 1e-12);
        assert_relative_eq!(derived.avg_te_ev, 2.0e4, max_relative = 1e-12);
        assert_relative_eq!(
            derived.total_particles,
            1.0e20 * geometry.total_volume(),
            max_relative = 1e-12
        );
        assert!(derived.stored_energy_j > 0.0);
    }
}
