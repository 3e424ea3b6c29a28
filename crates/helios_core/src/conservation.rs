//! Conservation enforcement.
//!
//! Transport discretization and source bookkeeping leak particles and
//! energy slowly; the enforcer projects the state back onto the conserved
//! integrals by bounded uniform rescaling. Drift never aborts a run: every
//! invocation returns records and the orchestrator decides what to log.

use serde::{Deserialize, Serialize};

use crate::array::Algebra;
use crate::geometry::Geometry;
use crate::physics::ELEMENTARY_CHARGE;
use crate::profiles::CoreProfiles;

/// Correction factors are confined to this band; a drift large enough to
/// escape it is corrected incrementally over subsequent enforcements.
pub const FACTOR_BOUNDS: (f64, f64) = (0.8, 1.2);

/// A conserved integral with its restoration rule.
pub trait ConservationLaw: Send {
    fn name(&self) -> &str;

    /// The conserved scalar for the given state.
    fn compute(&self, profiles: &CoreProfiles, geometry: &Geometry) -> f64;

    /// Rescaling factor that maps `current` back to `reference`, clamped
    /// to [`FACTOR_BOUNDS`].
    fn correction_factor(&self, current: f64, reference: f64) -> f64 {
        (reference / current).clamp(FACTOR_BOUNDS.0, FACTOR_BOUNDS.1)
    }

    /// Applies the factor, returning corrected profiles.
    fn apply(&self, profiles: &CoreProfiles, factor: f64) -> CoreProfiles;

    /// Relative drift below which the law abstains.
    fn drift_tolerance(&self) -> f64;
}

/// Total particle count `N = integral(ne dV)`; restored by rescaling the
/// density uniformly.
#[derive(Debug, Clone)]
pub struct ParticleConservation {
    pub drift_tolerance: f64,
}

impl Default for ParticleConservation {
    fn default() -> Self {
        Self {
            drift_tolerance: 0.005,
        }
    }
}

impl ConservationLaw for ParticleConservation {
    fn name(&self) -> &str {
        "particle"
    }

    fn compute(&self, profiles: &CoreProfiles, geometry: &Geometry) -> f64 {
        geometry.volume_integral(&profiles.ne)
    }

    fn apply(&self, profiles: &CoreProfiles, factor: f64) -> CoreProfiles {
        let mut corrected = profiles.clone();
        corrected.ne = profiles.ne.scale(factor);
        corrected
    }

    fn drift_tolerance(&self) -> f64 {
        self.drift_tolerance
    }
}

/// Total thermal energy `W = 3/2 integral(ne (Te + Ti) e dV)` in joules.
///
/// The correction is linear in the factor (not a square root): at fixed
/// density `W` is proportional to temperature, so rescaling both species
/// temperatures by `reference / current` restores the integral exactly.
#[derive(Debug, Clone)]
pub struct EnergyConservation {
    pub drift_tolerance: f64,
}

impl Default for EnergyConservation {
    fn default() -> Self {
        Self {
            drift_tolerance: 0.01,
        }
    }
}

impl ConservationLaw for EnergyConservation {
    fn name(&self) -> &str {
        "energy"
    }

    fn compute(&self, profiles: &CoreProfiles, geometry: &Geometry) -> f64 {
        let t_sum = Algebra::add(&profiles.ti, &profiles.te);
        let energy_density = Algebra::mul(&profiles.ne, &t_sum).scale(1.5 * ELEMENTARY_CHARGE);
        geometry.volume_integral(&energy_density)
    }

    fn apply(&self, profiles: &CoreProfiles, factor: f64) -> CoreProfiles {
        let mut corrected = profiles.clone();
        corrected.ti = profiles.ti.scale(factor);
        corrected.te = profiles.te.scale(factor);
        corrected
    }

    fn drift_tolerance(&self) -> f64 {
        self.drift_tolerance
    }
}

/// Outcome of one law at one enforcement point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConservationRecord {
    pub law: String,
    pub reference: f64,
    pub current: f64,
    pub drift: f64,
    pub factor: f64,
    pub corrected: bool,
    pub step: u64,
    pub time: f64,
}

/// Applies a list of laws in order, each on the previous law's output, so
/// particle conservation is restored before the energy rescaling reads the
/// density.
pub struct ConservationEnforcer {
    laws: Vec<Box<dyn ConservationLaw>>,
    references: Option<Vec<f64>>,
}

impl ConservationEnforcer {
    pub fn new(laws: Vec<Box<dyn ConservationLaw>>) -> Self {
        Self {
            laws,
            references: None,
        }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ParticleConservation::default()),
            Box::new(EnergyConservation::default()),
        ])
    }

    /// Captures the reference integrals from the given state; called once
    /// with the initial profiles.
    pub fn capture_reference(&mut self, profiles: &CoreProfiles, geometry: &Geometry) {
        self.references = Some(
            self.laws
                .iter()
                .map(|law| law.compute(profiles, geometry))
                .collect(),
        );
    }

    pub fn has_reference(&self) -> bool {
        self.references.is_some()
    }

    /// Current relative drifts against the captured references, one entry
    /// per law; used by the diagnostics cadence without correcting.
    pub fn drifts(&self, profiles: &CoreProfiles, geometry: &Geometry) -> Vec<(String, f64)> {
        let Some(references) = &self.references else {
            return Vec::new();
        };
        self.laws
            .iter()
            .zip(references.iter())
            .map(|(law, reference)| {
                let current = law.compute(profiles, geometry);
                (law.name().to_string(), (current - reference) / reference)
            })
            .collect()
    }

    /// Enforces all laws in order. Laws whose drift is inside their
    /// tolerance abstain but still report.
    pub fn enforce(
        &mut self,
        profiles: &CoreProfiles,
        geometry: &Geometry,
        step: u64,
        time: f64,
    ) -> (CoreProfiles, Vec<ConservationRecord>) {
        if self.references.is_none() {
            self.capture_reference(profiles, geometry);
        }
        let references = self.references.as_ref().expect("reference just captured");

        let mut working = profiles.clone();
        let mut records = Vec::with_capacity(self.laws.len());
        for (law, reference) in self.laws.iter().zip(references.iter()) {
            let current = law.compute(&working, geometry);
            let drift = (current - reference) / reference;
            if drift.abs() < law.drift_tolerance() {
                records.push(ConservationRecord {
                    law: law.name().to_string(),
                    reference: *reference,
                    current,
                    drift,
                    factor: 1.0,
                    corrected: false,
                    step,
                    time,
                });
                continue;
            }
            let factor = law.correction_factor(current, *reference);
            working = law.apply(&working, factor);
            tracing::debug!(
                law = law.name(),
                drift,
                factor,
                step,
                "conservation correction applied"
            );
            records.push(ConservationRecord {
                law: law.name().to_string(),
                reference: *reference,
                current,
                drift,
                factor,
                corrected: true,
                step,
                time,
            });
        }
        (working, records)
    }
}
