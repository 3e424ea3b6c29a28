//! D-T fusion heating and gain.

use crate::array::{Algebra, EvaluatedArray};
use crate::geometry::Geometry;
use crate::physics::{ModelParams, SourceContribution, SourceModel, SourceTerms};
use crate::profiles::CoreProfiles;
use crate::tape::Traced;

/// Alpha particle birth energy, MeV share of the 17.6 MeV per reaction.
pub const ALPHA_ENERGY_J: f64 = 3.52e6 * 1.602176634e-19;
/// Total fusion energy per reaction, J.
pub const FUSION_ENERGY_J: f64 = 17.6e6 * 1.602176634e-19;

/// Power-law fit of the D-T reactivity `<sigma v>` around the 8–25 keV
/// burn window: `1.1e-24 * Ti_keV^2` m^3/s. Good to a few tens of percent
/// there, which is all the gain estimate needs.
pub fn d_t_reactivity(ti_ev: f64) -> f64 {
    let ti_kev = (ti_ev / 1000.0).max(0.0);
    1.1e-24 * ti_kev * ti_kev
}

/// Volumetric fusion reaction rate for a 50:50 D-T mix, 1/(m^3 s):
/// `0.25 * ne^2 * <sigma v>`.
fn reaction_rate(ne: f64, ti_ev: f64) -> f64 {
    0.25 * ne * ne * d_t_reactivity(ti_ev)
}

/// Total fusion power of a state, MW.
pub fn fusion_power_mw(profiles: &CoreProfiles, geometry: &Geometry) -> f64 {
    let density: EvaluatedArray = (0..profiles.n_cells())
        .map(|i| reaction_rate(profiles.ne[i], profiles.ti[i]) * FUSION_ENERGY_J * 1.0e-6)
        .collect::<Vec<_>>()
        .into();
    geometry.volume_integral(&density)
}

/// Tape-linked fusion power in MW, for gain-based objectives. Uses the
/// same reactivity fit as the plain path so gradients and values agree.
pub fn traced_fusion_power_mw(ti: &Traced, ne: &Traced, geometry: &Geometry) -> Traced {
    let ti_kev = ti.scale(1.0e-3);
    let reactivity = ti_kev.mul(&ti_kev).scale(1.1e-24);
    let rate = ne.mul(ne).scale(0.25).mul(&reactivity);
    let density = rate.scale(FUSION_ENERGY_J * 1.0e-6);
    let volumes = ti.lift(geometry.volume_cell.as_slice());
    density.mul(&volumes).sum()
}

/// Self-heating by fusion alphas. The alphas slow down mostly on the
/// electrons at burn temperatures; the split is fixed rather than
/// collisionality-resolved.
#[derive(Debug, Clone)]
pub struct FusionHeating {
    pub electron_fraction: f64,
}

impl Default for FusionHeating {
    fn default() -> Self {
        Self {
            electron_fraction: 0.7,
        }
    }
}

impl SourceModel for FusionHeating {
    fn name(&self) -> &str {
        "fusion-alpha"
    }

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        _params: &ModelParams,
    ) -> SourceTerms {
        let n = profiles.n_cells();
        let alpha_density: EvaluatedArray = (0..n)
            .map(|i| reaction_rate(profiles.ne[i], profiles.ti[i]) * ALPHA_ENERGY_J * 1.0e-6)
            .collect::<Vec<_>>()
            .into();
        let total = geometry.volume_integral(&alpha_density);

        let mut terms = SourceTerms::zero(n);
        if total > 0.0 {
            terms.ion_heating = alpha_density.scale(1.0 - self.electron_fraction);
            terms.electron_heating = alpha_density.scale(self.electron_fraction);
            terms.contributions.push(SourceContribution {
                model: self.name().to_string(),
                ion_power_mw: total * (1.0 - self.electron_fraction),
                electron_power_mw: total * self.electron_fraction,
                particle_rate: 0.0,
                driven_current_a: 0.0,
            });
        }
        terms
    }
}

#[cfg(test)]
mod tests {
    use super::{
        d_t_reactivity, fusion_power_mw, traced_fusion_power_mw, FusionHeating,
    };
    use crate::array::{Algebra, EvaluatedArray};
    use crate::geometry::Geometry;
    use crate::physics::{ModelParams, SourceModel};
    use crate::profiles::CoreProfiles;
    use crate::tape::Tape;
    use approx::assert_relative_eq;

    fn burning_plasma(ti_ev: f64, n: usize) -> CoreProfiles {
        CoreProfiles::new(
            EvaluatedArray::full(ti_ev, n),
            EvaluatedArray::full(ti_ev, n),
            EvaluatedArray::full(1.0e20, n),
            EvaluatedArray::zeros(n),
        )
    }

    #[test]
    fn reactivity_scales_quadratically_in_the_burn_window() {
        let low = d_t_reactivity(1.0e4);
        let high = d_t_reactivity(2.0e4);
        assert_relative_eq!(high / low, 4.0, max_relative = 1e-12);
    }

    #[test]
    fn iter_like_plasma_produces_hundreds_of_megawatts() {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let power = fusion_power_mw(&burning_plasma(1.5e4, 25), &geometry);
        // 10^20 m^-3 at 15 keV over ~500 m^3 burns in the 100 MW range.
        assert!(power > 50.0 && power < 2000.0, "fusion power {power} MW");
    }

    #[test]
    fn alpha_heating_carries_one_fifth_of_the_fusion_power() {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let profiles = burning_plasma(1.5e4, 25);
        let terms = FusionHeating::default().terms(&profiles, &geometry, &ModelParams::default());
        let alpha = geometry.volume_integral(&terms.ion_heating)
            + geometry.volume_integral(&terms.electron_heating);
        let fusion = fusion_power_mw(&profiles, &geometry);
        assert_relative_eq!(alpha / fusion, 3.52 / 17.6, max_relative = 1e-9);
        assert_eq!(terms.contributions.len(), 1);
    }

    #[test]
    fn traced_power_matches_the_plain_path() {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let profiles = burning_plasma(1.2e4, 25);
        let tape = Tape::new();
        let ti = tape.leaf(profiles.ti.as_slice());
        let ne = tape.leaf(profiles.ne.as_slice());
        let traced = traced_fusion_power_mw(&ti, &ne, &geometry);
        assert_relative_eq!(
            traced.scalar(),
            fusion_power_mw(&profiles, &geometry),
            max_relative = 1e-12
        );
    }

    #[test]
    fn traced_power_gradient_prefers_hotter_ions() {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let profiles = burning_plasma(1.2e4, 25);
        let tape = Tape::new();
        let ti = tape.leaf(profiles.ti.as_slice());
        let ne = tape.leaf(profiles.ne.as_slice());
        let power = traced_fusion_power_mw(&ti, &ne, &geometry);
        let grads = tape.backward(&power).wrt(&ti);
        assert!(grads.iter().all(|g| *g > 0.0));
    }
}
