//! Pedestal prescriptions.

use crate::geometry::Geometry;
use crate::physics::{ModelParams, PedestalModel, PedestalOutput};
use crate::profiles::CoreProfiles;

/// Fixed pedestal: prescribed edge temperature, density and width,
/// independent of the core state.
#[derive(Debug, Clone)]
pub struct FixedPedestal {
    pub temperature_ev: f64,
    pub density_m3: f64,
    pub width_norm: f64,
}

impl Default for FixedPedestal {
    fn default() -> Self {
        Self {
            temperature_ev: 100.0,
            density_m3: 5.0e19,
            width_norm: 0.05,
        }
    }
}

impl PedestalModel for FixedPedestal {
    fn name(&self) -> &str {
        "fixed-pedestal"
    }

    fn pedestal(
        &self,
        _profiles: &CoreProfiles,
        geometry: &Geometry,
        _params: &ModelParams,
    ) -> PedestalOutput {
        PedestalOutput {
            temperature_ev: self.temperature_ev,
            density_m3: self.density_m3,
            width_m: self.width_norm * geometry.minor_radius,
        }
    }
}
