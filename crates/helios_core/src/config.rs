//! Run configuration.
//!
//! The structs here are the configuration surface consumed by external
//! harnesses; parsing files or CLI flags is their job, merging and
//! validation is ours. Overlays apply with the priority
//! CLI > environment > file > defaults: later layers win field by field.

use serde::{Deserialize, Serialize};

use crate::coeffs::StaticParams;
use crate::error::SimulationError;
use crate::geometry::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryType {
    Circular,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    pub n_cells: usize,
    pub major_radius: f64,
    pub minor_radius: f64,
    pub toroidal_field: f64,
    pub geometry_type: GeometryType,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            n_cells: 25,
            major_radius: 6.2,
            minor_radius: 2.0,
            toroidal_field: 5.3,
            geometry_type: GeometryType::Circular,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvolutionConfig {
    pub ion_heat: bool,
    pub electron_heat: bool,
    pub density: bool,
    pub current: bool,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            ion_heat: true,
            electron_heat: true,
            density: false,
            current: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverKind {
    Linear,
    NewtonRaphson,
    /// Declared but not promoted; validation rejects it.
    Optimizer,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub kind: SolverKind,
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            kind: SolverKind::Linear,
            tolerance: 1.0e-5,
            max_iterations: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchemeConfig {
    pub theta: f64,
    pub use_pereverzev: bool,
}

impl Default for SchemeConfig {
    fn default() -> Self {
        Self {
            theta: 1.0,
            use_pereverzev: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveDtConfig {
    pub safety_factor: f64,
    pub min_dt: f64,
    pub max_dt: f64,
}

impl Default for AdaptiveDtConfig {
    fn default() -> Self {
        Self {
            safety_factor: 0.9,
            min_dt: 1.0e-8,
            max_dt: 1.0e-1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeConfig {
    pub start: f64,
    pub end: f64,
    pub initial_dt: f64,
    pub adaptive: AdaptiveDtConfig,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: 1.0,
            initial_dt: 1.0e-4,
            adaptive: AdaptiveDtConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub enable_derived: bool,
    pub enable_diagnostics: bool,
    /// Capture a time-series point every this many steps.
    pub profile_interval: u64,
    pub enable_live_streaming: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            enable_derived: true,
            enable_diagnostics: true,
            profile_interval: 10,
            enable_live_streaming: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub mesh: MeshConfig,
    pub evolution: EvolutionConfig,
    pub solver: SolverConfig,
    pub scheme: SchemeConfig,
    pub time: TimeConfig,
    pub sampling: SamplingConfig,
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |message: String| Err(SimulationError::ConfigurationInvalid(message));

        if self.mesh.n_cells < 4 {
            return invalid(format!(
                "mesh.n_cells must be at least 4, got {}",
                self.mesh.n_cells
            ));
        }
        if self.mesh.minor_radius <= 0.0 || self.mesh.major_radius <= self.mesh.minor_radius {
            return invalid("mesh radii must satisfy 0 < minor < major".to_string());
        }
        if self.mesh.toroidal_field <= 0.0 {
            return invalid("mesh.toroidal_field must be positive".to_string());
        }
        if matches!(self.solver.kind, SolverKind::Optimizer) {
            return invalid(
                "solver.kind 'optimizer' is declared but not promoted; use 'linear' or 'newton_raphson'"
                    .to_string(),
            );
        }
        if self.solver.tolerance <= 0.0 {
            return invalid("solver.tolerance must be positive".to_string());
        }
        if self.solver.max_iterations == 0 {
            return invalid("solver.max_iterations must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.scheme.theta) {
            return invalid(format!(
                "scheme.theta must lie in [0, 1], got {}",
                self.scheme.theta
            ));
        }
        if self.time.end <= self.time.start {
            return invalid("time.end must be after time.start".to_string());
        }
        if self.time.initial_dt <= 0.0 {
            return invalid("time.initial_dt must be positive".to_string());
        }
        let adaptive = &self.time.adaptive;
        if !(adaptive.min_dt > 0.0 && adaptive.min_dt <= adaptive.max_dt) {
            return invalid("time.adaptive requires 0 < min_dt <= max_dt".to_string());
        }
        if !(0.0 < adaptive.safety_factor && adaptive.safety_factor <= 1.0) {
            return invalid("time.adaptive.safety_factor must lie in (0, 1]".to_string());
        }
        if self.time.initial_dt < adaptive.min_dt || self.time.initial_dt > adaptive.max_dt {
            return invalid(
                "time.initial_dt must lie within [adaptive.min_dt, adaptive.max_dt]".to_string(),
            );
        }
        if self.sampling.profile_interval == 0 {
            return invalid("sampling.profile_interval must be positive".to_string());
        }
        Ok(())
    }

    pub fn static_params(&self) -> StaticParams {
        StaticParams {
            evolve_ion_heat: self.evolution.ion_heat,
            evolve_electron_heat: self.evolution.electron_heat,
            evolve_density: self.evolution.density,
            evolve_current: self.evolution.current,
            theta: self.scheme.theta,
            use_pereverzev: self.scheme.use_pereverzev,
            ..StaticParams::default()
        }
    }

    pub fn build_geometry(&self) -> Result<Geometry, SimulationError> {
        match self.mesh.geometry_type {
            GeometryType::Circular => Geometry::circular(
                self.mesh.n_cells,
                self.mesh.major_radius,
                self.mesh.minor_radius,
                self.mesh.toroidal_field,
            ),
        }
    }
}

/// A partial configuration from one source (file, environment or CLI);
/// unset fields leave the lower-priority value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverlay {
    pub n_cells: Option<usize>,
    pub major_radius: Option<f64>,
    pub minor_radius: Option<f64>,
    pub toroidal_field: Option<f64>,
    pub evolve_ion_heat: Option<bool>,
    pub evolve_electron_heat: Option<bool>,
    pub evolve_density: Option<bool>,
    pub evolve_current: Option<bool>,
    pub solver_kind: Option<SolverKind>,
    pub tolerance: Option<f64>,
    pub max_iterations: Option<usize>,
    pub theta: Option<f64>,
    pub use_pereverzev: Option<bool>,
    pub t_start: Option<f64>,
    pub t_end: Option<f64>,
    pub initial_dt: Option<f64>,
    pub safety_factor: Option<f64>,
    pub min_dt: Option<f64>,
    pub max_dt: Option<f64>,
    pub enable_derived: Option<bool>,
    pub enable_diagnostics: Option<bool>,
    pub profile_interval: Option<u64>,
    pub enable_live_streaming: Option<bool>,
}

impl ConfigOverlay {
    pub fn apply(&self, config: &mut SimulationConfig) {
        macro_rules! set {
            ($field:expr, $target:expr) => {
                if let Some(value) = $field {
                    $target = value;
                }
            };
        }
        set!(self.n_cells, config.mesh.n_cells);
        set!(self.major_radius, config.mesh.major_radius);
        set!(self.minor_radius, config.mesh.minor_radius);
        set!(self.toroidal_field, config.mesh.toroidal_field);
        set!(self.evolve_ion_heat, config.evolution.ion_heat);
        set!(self.evolve_electron_heat, config.evolution.electron_heat);
        set!(self.evolve_density, config.evolution.density);
        set!(self.evolve_current, config.evolution.current);
        set!(self.solver_kind, config.solver.kind);
        set!(self.tolerance, config.solver.tolerance);
        set!(self.max_iterations, config.solver.max_iterations);
        set!(self.theta, config.scheme.theta);
        set!(self.use_pereverzev, config.scheme.use_pereverzev);
        set!(self.t_start, config.time.start);
        set!(self.t_end, config.time.end);
        set!(self.initial_dt, config.time.initial_dt);
        set!(self.safety_factor, config.time.adaptive.safety_factor);
        set!(self.min_dt, config.time.adaptive.min_dt);
        set!(self.max_dt, config.time.adaptive.max_dt);
        set!(self.enable_derived, config.sampling.enable_derived);
        set!(self.enable_diagnostics, config.sampling.enable_diagnostics);
        set!(self.profile_interval, config.sampling.profile_interval);
        set!(self.enable_live_streaming, config.sampling.enable_live_streaming);
    }
}

/// Merges overlays in ascending priority: file, then environment, then
/// CLI, on top of the defaults.
pub fn layered_config(
    file: &ConfigOverlay,
    environment: &ConfigOverlay,
    cli: &ConfigOverlay,
) -> SimulationConfig {
    let mut config = SimulationConfig::default();
    file.apply(&mut config);
    environment.apply(&mut config);
    cli.apply(&mut config);
    config
}

#[cfg(test)]
mod tests {
    use super::{layered_config, ConfigOverlay, SimulationConfig, SolverKind};
    use crate::error::SimulationError;

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_theta_and_mesh() {
        let mut config = SimulationConfig::default();
        config.scheme.theta = 1.5;
        assert!(matches!(
            config.validate(),
            Err(SimulationError::ConfigurationInvalid(_))
        ));

        let mut config = SimulationConfig::default();
        config.mesh.n_cells = 2;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.time.end = config.time.start;
        assert!(config.validate().is_err());
    }

    #[test]
    fn optimizer_kind_is_declared_but_rejected() {
        let mut config = SimulationConfig::default();
        config.solver.kind = SolverKind::Optimizer;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not promoted"));
    }

    #[test]
    fn initial_dt_must_lie_within_the_adaptive_band() {
        let mut config = SimulationConfig::default();
        config.time.initial_dt = 1.0; // above max_dt
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_beats_environment_beats_file() {
        let file = ConfigOverlay {
            n_cells: Some(40),
            tolerance: Some(1e-4),
            theta: Some(0.5),
            ..ConfigOverlay::default()
        };
        let environment = ConfigOverlay {
            n_cells: Some(60),
            tolerance: Some(1e-6),
            ..ConfigOverlay::default()
        };
        let cli = ConfigOverlay {
            n_cells: Some(80),
            ..ConfigOverlay::default()
        };
        let config = layered_config(&file, &environment, &cli);
        assert_eq!(config.mesh.n_cells, 80);
        assert_eq!(config.solver.tolerance, 1e-6);
        assert_eq!(config.scheme.theta, 0.5);
    }

    #[test]
    fn overlay_deserializes_from_partial_json() {
        let overlay: ConfigOverlay =
            serde_json::from_str(r#"{"n_cells": 50, "solver_kind": "newton_raphson"}"#).unwrap();
        assert_eq!(overlay.n_cells, Some(50));
        assert_eq!(overlay.solver_kind, Some(SolverKind::NewtonRaphson));
        assert_eq!(overlay.theta, None);
    }

    #[test]
    fn config_serializes_roundtrip() {
        let config = SimulationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
