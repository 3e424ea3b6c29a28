//! Heating and fueling sources.

use crate::array::{Algebra, EvaluatedArray};
use crate::geometry::Geometry;
use crate::physics::neoclassical::{gaussian_current_profile, SpitzerResistivity};
use crate::physics::{ModelParams, SourceContribution, SourceModel, SourceTerms};
use crate::profiles::CoreProfiles;
use crate::tape::Traced;

/// Which actuator channel feeds a deposition source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerChannel {
    Ecrh,
    Icrh,
}

/// Gaussian power deposition, the usual shape for RF heating.
///
/// The radial shape is normalized so its volume integral is one; the
/// deposited density is `shape * P` with `P` in MW. This is the
/// gradient-aware source: the differentiable pipeline installs a
/// tape-linked power handle and reads traced heating densities back.
#[derive(Debug, Clone)]
pub struct GaussianDeposition {
    channel: PowerChannel,
    /// Fraction of power deposited on ions; the rest heats electrons.
    ion_fraction: f64,
    /// Deposition center, in units of r/a.
    center_norm: f64,
    /// Deposition width, in units of r/a.
    width_norm: f64,
    power_handle: Option<Traced>,
}

impl GaussianDeposition {
    pub fn ecrh() -> Self {
        Self {
            channel: PowerChannel::Ecrh,
            ion_fraction: 0.0,
            center_norm: 0.0,
            width_norm: 0.25,
            power_handle: None,
        }
    }

    pub fn icrh() -> Self {
        Self {
            channel: PowerChannel::Icrh,
            ion_fraction: 0.5,
            center_norm: 0.3,
            width_norm: 0.3,
            power_handle: None,
        }
    }

    /// Unit-integral radial shape, 1/m^3.
    fn shape(&self, geometry: &Geometry) -> EvaluatedArray {
        let a = geometry.minor_radius;
        let center = self.center_norm * a;
        let width = self.width_norm * a;
        let raw: EvaluatedArray = geometry
            .r_cell
            .iter()
            .map(|r| {
                let x = (r - center) / width;
                (-x * x).exp()
            })
            .collect::<Vec<_>>()
            .into();
        let integral = geometry.volume_integral(&raw);
        raw.scale(1.0 / integral)
    }

    fn power_mw(&self, params: &ModelParams) -> f64 {
        match self.channel {
            PowerChannel::Ecrh => params.p_ecrh_mw.unwrap_or(0.0),
            PowerChannel::Icrh => params.p_icrh_mw.unwrap_or(0.0),
        }
    }
}

impl SourceModel for GaussianDeposition {
    fn name(&self) -> &str {
        match self.channel {
            PowerChannel::Ecrh => "ecrh",
            PowerChannel::Icrh => "icrh",
        }
    }

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> SourceTerms {
        let n = profiles.n_cells();
        let mut terms = SourceTerms::zero(n);
        let power = self.power_mw(params);
        if power == 0.0 {
            return terms;
        }
        let density = self.shape(geometry).scale(power);
        terms.ion_heating = density.scale(self.ion_fraction);
        terms.electron_heating = density.scale(1.0 - self.ion_fraction);
        terms.contributions.push(SourceContribution {
            model: self.name().to_string(),
            ion_power_mw: power * self.ion_fraction,
            electron_power_mw: power * (1.0 - self.ion_fraction),
            particle_rate: 0.0,
            driven_current_a: 0.0,
        });
        terms
    }

    fn set_power_handle(&mut self, handle: Traced) {
        self.power_handle = Some(handle);
    }

    fn traced_heating(&self, geometry: &Geometry) -> Option<(Traced, Traced)> {
        let handle = self.power_handle.as_ref()?;
        let shape = handle.lift(self.shape(geometry).as_slice());
        let density = shape.mul_scalar_node(handle);
        Some((
            density.scale(self.ion_fraction),
            density.scale(1.0 - self.ion_fraction),
        ))
    }
}

/// Edge-localized gas puff fueling with an exponential penetration depth.
#[derive(Debug, Clone)]
pub struct GasPuff {
    /// Penetration depth in units of r/a.
    decay_norm: f64,
    rate_handle: Option<Traced>,
}

impl Default for GasPuff {
    fn default() -> Self {
        Self {
            decay_norm: 0.15,
            rate_handle: None,
        }
    }
}

impl GasPuff {
    fn shape(&self, geometry: &Geometry) -> EvaluatedArray {
        let a = geometry.minor_radius;
        let lambda = self.decay_norm * a;
        let raw: EvaluatedArray = geometry
            .r_cell
            .iter()
            .map(|r| (-(a - r) / lambda).exp())
            .collect::<Vec<_>>()
            .into();
        let integral = geometry.volume_integral(&raw);
        raw.scale(1.0 / integral)
    }
}

impl SourceModel for GasPuff {
    fn name(&self) -> &str {
        "gas-puff"
    }

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> SourceTerms {
        let n = profiles.n_cells();
        let mut terms = SourceTerms::zero(n);
        let rate = params.gas_puff_rate.unwrap_or(0.0);
        if rate == 0.0 {
            return terms;
        }
        terms.particle = self.shape(geometry).scale(rate);
        terms.contributions.push(SourceContribution {
            model: self.name().to_string(),
            ion_power_mw: 0.0,
            electron_power_mw: 0.0,
            particle_rate: rate,
            driven_current_a: 0.0,
        });
        terms
    }

    fn set_power_handle(&mut self, handle: Traced) {
        self.rate_handle = Some(handle);
    }

    fn traced_particle(&self, geometry: &Geometry) -> Option<Traced> {
        let handle = self.rate_handle.as_ref()?;
        let shape = handle.lift(self.shape(geometry).as_slice());
        Some(shape.mul_scalar_node(handle))
    }
}

/// Resistive heating from the driven current profile, all to electrons.
#[derive(Debug, Clone, Default)]
pub struct OhmicHeating {
    resistivity: SpitzerResistivity,
}

impl SourceModel for OhmicHeating {
    fn name(&self) -> &str {
        "ohmic"
    }

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> SourceTerms {
        let n = profiles.n_cells();
        let eta = self.resistivity.eta_cell(profiles, geometry, params);
        let current = gaussian_current_profile(geometry, params.plasma_current_a(15.0), 0.5);
        // eta * j^2 in W/m^3, stored as MW/m^3.
        let heating = Algebra::mul(&eta, &Algebra::mul(&current, &current)).scale(1.0e-6);
        let power = geometry.volume_integral(&heating);

        let mut terms = SourceTerms::zero(n);
        if power > 0.0 {
            terms.electron_heating = heating;
            terms.contributions.push(SourceContribution {
                model: self.name().to_string(),
                ion_power_mw: 0.0,
                electron_power_mw: power,
                particle_rate: 0.0,
                driven_current_a: 0.0,
            });
        }
        terms
    }
}

/// Collisional ion-electron temperature equilibration.
///
/// Heat flows from the hotter to the colder species at the classical
/// electron-ion exchange rate; the two heating arrays are equal and
/// opposite, so the net plasma heating is zero.
#[derive(Debug, Clone)]
pub struct CollisionalExchange {
    pub ln_lambda: f64,
}

impl Default for CollisionalExchange {
    fn default() -> Self {
        Self { ln_lambda: 17.0 }
    }
}

impl CollisionalExchange {
    /// `q_ei = 3 (m_e/m_i) ne^2 lnLambda e (Te - Ti) / (3.44e11 Te^(3/2))`
    /// in W/m^3, positive when the electrons are hotter.
    fn exchange_density(&self, profiles: &CoreProfiles) -> Vec<f64> {
        const MASS_RATIO: f64 = 2.72e-4; // m_e / m_D
        (0..profiles.n_cells())
            .map(|i| {
                let te = profiles.te[i];
                let ti = profiles.ti[i];
                let ne = profiles.ne[i];
                3.0 * MASS_RATIO * ne * ne * self.ln_lambda
                    * crate::physics::ELEMENTARY_CHARGE
                    * (te - ti)
                    / (3.44e11 * te.powf(1.5))
            })
            .collect()
    }
}

impl SourceModel for CollisionalExchange {
    fn name(&self) -> &str {
        "ei-exchange"
    }

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        _params: &ModelParams,
    ) -> SourceTerms {
        let n = profiles.n_cells();
        let exchange: EvaluatedArray = self
            .exchange_density(profiles)
            .into_iter()
            .map(|q| q * 1.0e-6)
            .collect::<Vec<_>>()
            .into();

        let mut terms = SourceTerms::zero(n);
        if exchange.iter().any(|q| *q != 0.0) {
            let transferred = geometry.volume_integral(&exchange);
            terms.ion_heating = exchange.clone();
            terms.electron_heating = exchange.neg();
            terms.contributions.push(SourceContribution {
                model: self.name().to_string(),
                ion_power_mw: transferred,
                electron_power_mw: -transferred,
                particle_rate: 0.0,
                driven_current_a: 0.0,
            });
        }
        terms
    }
}

/// Bremsstrahlung radiation sink on the electrons.
#[derive(Debug, Clone)]
pub struct Bremsstrahlung {
    pub zeff: f64,
}

impl Default for Bremsstrahlung {
    fn default() -> Self {
        Self { zeff: 1.5 }
    }
}

impl SourceModel for Bremsstrahlung {
    fn name(&self) -> &str {
        "bremsstrahlung"
    }

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> SourceTerms {
        let n = profiles.n_cells();
        let zeff = params.zeff.unwrap_or(self.zeff);
        // 5.35e-37 Zeff ne^2 sqrt(Te_keV), W/m^3.
        let radiated: EvaluatedArray = (0..n)
            .map(|i| {
                let te_kev = (profiles.te[i] / 1000.0).max(0.0);
                5.35e-37 * zeff * profiles.ne[i] * profiles.ne[i] * te_kev.sqrt() * 1.0e-6
            })
            .collect::<Vec<_>>()
            .into();
        let total = geometry.volume_integral(&radiated);

        let mut terms = SourceTerms::zero(n);
        if total > 0.0 {
            terms.electron_heating = radiated.neg();
            terms.contributions.push(SourceContribution {
                model: self.name().to_string(),
                ion_power_mw: 0.0,
                electron_power_mw: -total,
                particle_rate: 0.0,
                driven_current_a: 0.0,
            });
        }
        terms
    }
}
