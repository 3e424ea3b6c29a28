//! Run state and the values exposed to external callers.

use serde::{Deserialize, Serialize};

use helios_core::coeffs::ProfileBoundaries;
use helios_core::physics::{ModelParams, SourceTerms, TransportCoefficients};
use helios_core::profiles::{CoreProfiles, SerializedProfiles};
use helios_core::util::KahanSum;

/// Totals accumulated over a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub steps: u64,
    pub total_iterations: u64,
    pub wall_time_s: f64,
    pub max_residual: f64,
    pub converged: bool,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            steps: 0,
            total_iterations: 0,
            wall_time_s: 0.0,
            max_residual: 0.0,
            converged: true,
        }
    }
}

/// Snapshot returned by a progress query; consistent with some step
/// boundary of the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub time: f64,
    pub step: u64,
    pub last_dt: f64,
    pub converged: bool,
    pub profiles: Option<SerializedProfiles>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            time: 0.0,
            step: 0,
            last_dt: 0.0,
            converged: true,
            profiles: None,
        }
    }
}

/// Time-dependent inputs at one instant: boundary constraints plus the
/// parameter bag handed to every model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicParams {
    pub boundaries: ProfileBoundaries,
    pub params: ModelParams,
}

/// Provider of dynamic parameters as a function of simulated time.
pub type DynamicsProvider = Box<dyn Fn(f64) -> DynamicParams + Send>;

/// Piecewise-linear scalar waveform, for programming actuator and
/// boundary trajectories inside a dynamics provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// `(time, value)` knots in strictly increasing time order.
    points: Vec<(f64, f64)>,
}

impl Waveform {
    pub fn constant(value: f64) -> Self {
        Self {
            points: vec![(0.0, value)],
        }
    }

    pub fn new(points: Vec<(f64, f64)>) -> Self {
        assert!(!points.is_empty(), "waveform needs at least one knot");
        assert!(
            points.windows(2).all(|pair| pair[0].0 < pair[1].0),
            "waveform knots must be strictly increasing in time"
        );
        Self { points }
    }

    /// Linear interpolation between knots, clamped to the end values
    /// outside the knot range.
    pub fn at(&self, time: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if time <= first.0 {
            return first.1;
        }
        if time >= last.0 {
            return last.1;
        }
        let upper = self
            .points
            .iter()
            .position(|(t, _)| *t > time)
            .expect("time is inside the knot range");
        let (t0, v0) = self.points[upper - 1];
        let (t1, v1) = self.points[upper];
        v0 + (v1 - v0) * (time - t0) / (t1 - t0)
    }
}

/// Mutable state owned exclusively by the simulation loop.
#[derive(Debug, Clone)]
pub struct SimulationState {
    pub profiles: CoreProfiles,
    /// Compensated accumulator; the derived value is the real time.
    pub time: KahanSum,
    pub dt: f64,
    pub step: u64,
    pub statistics: Statistics,
    /// Snapshot caches from the most recent completed step.
    pub transport_cache: Option<TransportCoefficients>,
    pub sources_cache: Option<SourceTerms>,
    pub derived_cache: Option<crate::sampling::DerivedQuantities>,
}

impl SimulationState {
    pub fn new(profiles: CoreProfiles, start_time: f64, initial_dt: f64) -> Self {
        Self {
            profiles,
            time: KahanSum::new(start_time),
            dt: initial_dt,
            step: 0,
            statistics: Statistics::default(),
            transport_cache: None,
            sources_cache: None,
            derived_cache: None,
        }
    }
}
