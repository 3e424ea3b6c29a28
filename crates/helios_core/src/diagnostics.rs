//! Numerical health monitoring.
//!
//! Diagnostics never abort a run; even "diagnostics unavailable" is just
//! another entry. Level-1 warnings are throttled per metric so a slowly
//! drifting run does not flood the log, level-2 warnings always emit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-step numerical health snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepHealth {
    pub step: u64,
    pub time: f64,
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
    pub wall_time_s: f64,
    /// `chi_max * dt / dr^2`; above 0.5 the explicit part of the scheme
    /// would be unstable.
    pub cfl: f64,
    /// Relative conservation drifts against the initial state, by metric
    /// name; empty when drift tracking is disabled.
    pub drifts: Vec<(String, f64)>,
    /// Min/max thermal diffusivity seen this step, m^2/s.
    pub transport_range: Option<(f64, f64)>,
    /// Jacobian condition estimate, when the solver produced one.
    pub condition_estimate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WarningLevel {
    /// All drifts below 1% and the solver converged.
    Nominal,
    /// Some drift in the 1–5% band.
    Elevated,
    /// Drift above 5% or a convergence failure.
    Critical,
}

impl WarningLevel {
    pub fn classify(health: &StepHealth) -> WarningLevel {
        let worst_drift = health
            .drifts
            .iter()
            .fold(0.0_f64, |acc, (_, d)| acc.max(d.abs()));
        if !health.converged || worst_drift > 0.05 {
            WarningLevel::Critical
        } else if worst_drift >= 0.01 {
            WarningLevel::Elevated
        } else {
            WarningLevel::Nominal
        }
    }
}

/// One recorded diagnostics event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiagnosticsEntry {
    Health {
        health: StepHealth,
        level: WarningLevel,
    },
    /// Diagnostics could not be computed at this step.
    Unavailable { step: u64, reason: String },
}

/// Collected diagnostics of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub entries: Vec<DiagnosticsEntry>,
}

impl DiagnosticsReport {
    pub fn worst_level(&self) -> WarningLevel {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                DiagnosticsEntry::Health { level, .. } => Some(*level),
                DiagnosticsEntry::Unavailable { .. } => None,
            })
            .max()
            .unwrap_or(WarningLevel::Nominal)
    }
}

/// Accumulates health entries and owns the warning-emission policy.
pub struct DiagnosticsMonitor {
    report: DiagnosticsReport,
    /// Minimum steps between level-1 emissions, per metric.
    throttle_steps: u64,
    last_emission: HashMap<String, u64>,
}

impl DiagnosticsMonitor {
    pub fn new() -> Self {
        Self::with_throttle(1000)
    }

    pub fn with_throttle(throttle_steps: u64) -> Self {
        Self {
            report: DiagnosticsReport::default(),
            throttle_steps,
            last_emission: HashMap::new(),
        }
    }

    pub fn report(&self) -> &DiagnosticsReport {
        &self.report
    }

    pub fn into_report(self) -> DiagnosticsReport {
        self.report
    }

    /// Records one health snapshot, emitting warnings per policy, and
    /// returns the classification.
    pub fn record(&mut self, health: StepHealth) -> WarningLevel {
        let level = WarningLevel::classify(&health);
        match level {
            WarningLevel::Critical => {
                tracing::warn!(
                    step = health.step,
                    residual = health.residual_norm,
                    converged = health.converged,
                    "critical numerical health"
                );
            }
            WarningLevel::Elevated => {
                for (metric, drift) in &health.drifts {
                    if drift.abs() < 0.01 {
                        continue;
                    }
                    if self.should_emit(metric, health.step) {
                        tracing::warn!(
                            step = health.step,
                            metric = metric.as_str(),
                            drift,
                            "conservation drift elevated"
                        );
                    }
                }
            }
            WarningLevel::Nominal => {}
        }
        self.report.entries.push(DiagnosticsEntry::Health { health, level });
        level
    }

    /// Records that diagnostics were unavailable for a step.
    pub fn record_unavailable(&mut self, step: u64, reason: impl Into<String>) {
        self.report.entries.push(DiagnosticsEntry::Unavailable {
            step,
            reason: reason.into(),
        });
    }

    /// True when a level-1 warning for `metric` may emit at `step`,
    /// updating the throttle bookkeeping.
    fn should_emit(&mut self, metric: &str, step: u64) -> bool {
        match self.last_emission.get(metric) {
            Some(last) if step.saturating_sub(*last) < self.throttle_steps => false,
            _ => {
                self.last_emission.insert(metric.to_string(), step);
                true
            }
        }
    }
}

impl Default for DiagnosticsMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{DiagnosticsMonitor, StepHealth, WarningLevel};

    fn health(step: u64, converged: bool, drift: f64) -> StepHealth {
        StepHealth {
            step,
            time: step as f64 * 1e-4,
            iterations: 3,
            residual_norm: 1e-8,
            converged,
            wall_time_s: 1e-3,
            cfl: 0.1,
            drifts: vec![("particle".to_string(), drift)],
            transport_range: Some((0.5, 1.5)),
            condition_estimate: None,
        }
    }

    #[test]
    fn classification_thresholds() {
        assert_eq!(
            WarningLevel::classify(&health(0, true, 0.001)),
            WarningLevel::Nominal
        );
        assert_eq!(
            WarningLevel::classify(&health(0, true, 0.02)),
            WarningLevel::Elevated
        );
        assert_eq!(
            WarningLevel::classify(&health(0, true, 0.1)),
            WarningLevel::Critical
        );
        assert_eq!(
            WarningLevel::classify(&health(0, false, 0.0)),
            WarningLevel::Critical
        );
    }

    #[test]
    fn level_one_emissions_are_throttled_per_metric() {
        let mut monitor = DiagnosticsMonitor::with_throttle(1000);
        assert!(monitor.should_emit("particle", 100));
        assert!(!monitor.should_emit("particle", 500));
        assert!(monitor.should_emit("energy", 500));
        assert!(monitor.should_emit("particle", 1100));
    }

    #[test]
    fn report_accumulates_and_tracks_worst_level() {
        let mut monitor = DiagnosticsMonitor::new();
        monitor.record(health(0, true, 0.0));
        monitor.record(health(100, true, 0.02));
        monitor.record_unavailable(200, "solver metadata missing");
        assert_eq!(monitor.report().entries.len(), 3);
        assert_eq!(monitor.report().worst_level(), WarningLevel::Elevated);

        monitor.record(health(300, false, 0.0));
        assert_eq!(monitor.report().worst_level(), WarningLevel::Critical);
    }
}
