//! Interfaces to the physical models and the value types they exchange.
//!
//! Transport, sources, pedestal and MHD events are open sets: new models
//! plug in behind trait objects. The numerics consume them only through
//! the narrow protocols defined here; everything a model returns is in SI
//! units except temperatures (eV) and heating power densities (MW/m^3),
//! which are converted once at the coefficient-assembly boundary.

pub mod fusion;
pub mod mhd;
pub mod neoclassical;
pub mod pedestal;
pub mod sources;
pub mod transport;

use serde::{Deserialize, Serialize};

use crate::array::{Algebra, EvaluatedArray};
use crate::geometry::Geometry;
use crate::profiles::CoreProfiles;
use crate::tape::Traced;

/// Elementary charge, C.
pub const ELEMENTARY_CHARGE: f64 = 1.602176634e-19;
/// Vacuum permeability, H/m.
pub const MU_0: f64 = 1.25663706212e-6;
/// Deuterium mass, kg.
pub const DEUTERIUM_MASS: f64 = 3.3435837724e-27;

/// Parameter bag passed to every model invocation. Entries are optional;
/// models fall back to their own defaults for anything unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub chi_ion: Option<f64>,
    pub chi_electron: Option<f64>,
    pub particle_diffusivity: Option<f64>,
    pub convection_velocity: Option<f64>,
    pub bohm_coefficient: Option<f64>,
    pub gyrobohm_coefficient: Option<f64>,
    /// ECRH channel power, MW.
    pub p_ecrh_mw: Option<f64>,
    /// ICRH channel power, MW.
    pub p_icrh_mw: Option<f64>,
    /// Gas puff rate, particles/s.
    pub gas_puff_rate: Option<f64>,
    /// Total plasma current, MA.
    pub plasma_current_ma: Option<f64>,
    /// Effective charge.
    pub zeff: Option<f64>,
}

impl ModelParams {
    pub fn chi_ion_or(&self, default: f64) -> f64 {
        self.chi_ion.unwrap_or(default)
    }

    pub fn chi_electron_or(&self, default: f64) -> f64 {
        self.chi_electron.unwrap_or(default)
    }

    pub fn particle_diffusivity_or(&self, default: f64) -> f64 {
        self.particle_diffusivity.unwrap_or(default)
    }

    pub fn convection_velocity_or(&self, default: f64) -> f64 {
        self.convection_velocity.unwrap_or(default)
    }

    pub fn plasma_current_a(&self, default_ma: f64) -> f64 {
        self.plasma_current_ma.unwrap_or(default_ma) * 1.0e6
    }
}

/// Per-cell transport coefficients produced by a [`TransportModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportCoefficients {
    /// Ion thermal diffusivity, m^2/s.
    pub chi_ion: EvaluatedArray,
    /// Electron thermal diffusivity, m^2/s.
    pub chi_electron: EvaluatedArray,
    /// Particle diffusivity, m^2/s.
    pub d_particle: EvaluatedArray,
    /// Convection velocity, m/s (positive outward).
    pub v_conv: EvaluatedArray,
}

impl TransportCoefficients {
    /// Non-negative diffusivities bounded to `chi_max`; applied before any
    /// coefficient assembly.
    pub fn bounded(&self, chi_max: f64) -> Self {
        Self {
            chi_ion: self.chi_ion.clamp_min(0.0).clamp_max(chi_max),
            chi_electron: self.chi_electron.clamp_min(0.0).clamp_max(chi_max),
            d_particle: self.d_particle.clamp_min(0.0).clamp_max(chi_max),
            v_conv: self.v_conv.clone(),
        }
    }

    /// Largest thermal diffusivity anywhere on the mesh; drives the CFL
    /// time-step estimate.
    pub fn max_chi(&self) -> f64 {
        self.chi_ion
            .max_value()
            .max(self.chi_electron.max_value())
            .max(self.d_particle.max_value())
    }
}

/// One model's integrated contribution, kept alongside the merged arrays
/// so per-model power balances survive source merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub model: String,
    /// Volume-integrated ion heating, MW.
    pub ion_power_mw: f64,
    /// Volume-integrated electron heating, MW.
    pub electron_power_mw: f64,
    /// Volume-integrated particle fueling, 1/s.
    pub particle_rate: f64,
    /// Volume-integrated driven current, A.
    pub driven_current_a: f64,
}

/// Merged source terms for one step.
///
/// Addition is associative with [`SourceTerms::zero`] as the identity, in
/// both the arrays and the contribution list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTerms {
    /// Ion heating, MW/m^3.
    pub ion_heating: EvaluatedArray,
    /// Electron heating, MW/m^3.
    pub electron_heating: EvaluatedArray,
    /// Particle source, 1/(m^3 s).
    pub particle: EvaluatedArray,
    /// Driven current density, A/m^2.
    pub current: EvaluatedArray,
    pub contributions: Vec<SourceContribution>,
}

impl SourceTerms {
    pub fn zero(n_cells: usize) -> Self {
        Self {
            ion_heating: EvaluatedArray::zeros(n_cells),
            electron_heating: EvaluatedArray::zeros(n_cells),
            particle: EvaluatedArray::zeros(n_cells),
            current: EvaluatedArray::zeros(n_cells),
            contributions: Vec::new(),
        }
    }

    pub fn merge(mut self, other: SourceTerms) -> SourceTerms {
        self.ion_heating = Algebra::add(&self.ion_heating, &other.ion_heating);
        self.electron_heating = Algebra::add(&self.electron_heating, &other.electron_heating);
        self.particle = Algebra::add(&self.particle, &other.particle);
        self.current = Algebra::add(&self.current, &other.current);
        self.contributions.extend(other.contributions);
        self
    }

    /// Total heating power deposited in the plasma, MW.
    pub fn total_heating_mw(&self) -> f64 {
        self.contributions
            .iter()
            .map(|c| c.ion_power_mw + c.electron_power_mw)
            .sum()
    }
}

impl std::ops::Add for SourceTerms {
    type Output = SourceTerms;

    fn add(self, other: SourceTerms) -> SourceTerms {
        self.merge(other)
    }
}

/// Pedestal prescription at the plasma edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PedestalOutput {
    pub temperature_ev: f64,
    pub density_m3: f64,
    pub width_m: f64,
}

/// Turbulent/neoclassical transport closure.
pub trait TransportModel: Send {
    fn name(&self) -> &str;

    fn coefficients(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> TransportCoefficients;
}

/// Heating, fueling and current-drive source.
pub trait SourceModel: Send {
    fn name(&self) -> &str;

    fn terms(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> SourceTerms;

    /// Opt-in capability for the differentiable pipeline: take a
    /// tape-linked power handle (MW) instead of the plain value in
    /// [`ModelParams`]. Most sources are not actuated and ignore it.
    fn set_power_handle(&mut self, _handle: Traced) {}

    /// Tape-linked heating densities `(ion, electron)` in MW/m^3, when the
    /// model is gradient-aware and a handle has been installed.
    fn traced_heating(&self, _geometry: &Geometry) -> Option<(Traced, Traced)> {
        None
    }

    /// Tape-linked particle source in 1/(m^3 s), when gradient-aware.
    fn traced_particle(&self, _geometry: &Geometry) -> Option<Traced> {
        None
    }
}

/// Pedestal model.
pub trait PedestalModel: Send {
    fn name(&self) -> &str;

    fn pedestal(
        &self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        params: &ModelParams,
    ) -> PedestalOutput;
}

/// Instantaneous MHD profile-rewrite event.
///
/// Returning profiles equal to the input signals "no event"; a rewrite
/// makes the orchestrator skip the PDE solve for the step and advance time
/// by [`MhdModel::crash_step_duration`] when one is advertised.
pub trait MhdModel: Send {
    fn name(&self) -> &str;

    fn apply(
        &mut self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        time: f64,
        dt: f64,
    ) -> CoreProfiles;

    fn crash_step_duration(&self) -> Option<f64> {
        None
    }
}
