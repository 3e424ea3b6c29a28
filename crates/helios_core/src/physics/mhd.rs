//! Instantaneous MHD profile-rewrite events.

use crate::array::{Algebra, EvaluatedArray};
use crate::geometry::Geometry;
use crate::physics::MhdModel;
use crate::profiles::CoreProfiles;

/// Periodic sawtooth crash: every `period_s` the core temperatures and
/// density are flattened inside the mixing radius, conserving the volume
/// integral of each flattened quantity over the mixing region.
#[derive(Debug, Clone)]
pub struct SawtoothCrash {
    pub period_s: f64,
    /// Mixing radius, in units of r/a.
    pub mixing_norm: f64,
    pub crash_duration_s: f64,
    last_crash: f64,
}

impl SawtoothCrash {
    pub fn new(period_s: f64, mixing_norm: f64, crash_duration_s: f64) -> Self {
        Self {
            period_s,
            mixing_norm,
            crash_duration_s,
            last_crash: 0.0,
        }
    }

    fn flatten(values: &EvaluatedArray, volumes: &EvaluatedArray, mixing_cells: usize) -> EvaluatedArray {
        let mut out = values.to_values();
        let vol: f64 = volumes.iter().take(mixing_cells).sum();
        let content: f64 = out
            .iter()
            .zip(volumes.iter())
            .take(mixing_cells)
            .map(|(x, v)| x * v)
            .sum();
        let mean = content / vol;
        for value in out.iter_mut().take(mixing_cells) {
            *value = mean;
        }
        out.into()
    }
}

impl MhdModel for SawtoothCrash {
    fn name(&self) -> &str {
        "sawtooth"
    }

    fn apply(
        &mut self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        time: f64,
        _dt: f64,
    ) -> CoreProfiles {
        if time - self.last_crash < self.period_s {
            return profiles.clone();
        }
        let mixing_cells = ((self.mixing_norm * geometry.n_cells as f64).round() as usize)
            .clamp(2, geometry.n_cells);
        self.last_crash = time;
        CoreProfiles::new(
            Self::flatten(&profiles.ti, &geometry.volume_cell, mixing_cells),
            Self::flatten(&profiles.te, &geometry.volume_cell, mixing_cells),
            Self::flatten(&profiles.ne, &geometry.volume_cell, mixing_cells),
            profiles.psi.clone(),
        )
    }

    fn crash_step_duration(&self) -> Option<f64> {
        Some(self.crash_duration_s)
    }
}
