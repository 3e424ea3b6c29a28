//! The simulation time loop.
//!
//! One `Simulation` owns its state exclusively; external callers interact
//! through [`crate::handle::SimulationControl`], and the loop honors pause
//! and cancellation at a single cooperative checkpoint at the start of
//! each step. Nothing suspends inside the coefficient builder or the
//! solver iterations.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use helios_core::array::{Algebra, EvaluatedArray};
use helios_core::coeffs::{build_coeffs, BuilderInputs, ProfileBoundaries, StaticParams};
use helios_core::cell::FaceConstraint;
use helios_core::config::{SimulationConfig, SolverKind};
use helios_core::conservation::{ConservationEnforcer, ConservationRecord};
use helios_core::diagnostics::{DiagnosticsMonitor, DiagnosticsReport, StepHealth};
use helios_core::error::SimulationError;
use helios_core::geometry::Geometry;
use helios_core::physics::neoclassical::SpitzerResistivity;
use helios_core::physics::transport::ConstantTransport;
use helios_core::physics::{
    MhdModel, ModelParams, PedestalModel, SourceModel, SourceTerms, TransportModel,
};
use helios_core::profiles::{CoreProfiles, SerializedProfiles};
use helios_core::solver::linear::{LinearOptions, LinearSolver};
use helios_core::solver::newton::{NewtonOptions, NewtonSolver};
use helios_core::solver::{CoeffsCallback, SolverResult, StepInputs, TransportSolver};

use crate::handle::SimulationControl;
use crate::sampling::{DerivedQuantities, TimeSeriesPoint};
use crate::state::{DynamicParams, DynamicsProvider, Progress, SimulationState, Statistics};

/// Time-step halvings attempted before a step is declared failed.
pub const MAX_SOLVER_RETRIES: usize = 5;
/// Steps between progress publications (the cooperative yield cadence).
const PROGRESS_CADENCE: u64 = 10;
/// Steps between diagnostics captures.
const DIAGNOSTICS_CADENCE: u64 = 100;

/// The physics models a run consumes, all behind their protocols.
pub struct ModelSet {
    pub transport: Box<dyn TransportModel>,
    pub sources: Vec<Box<dyn SourceModel>>,
    pub pedestal: Option<Box<dyn PedestalModel>>,
    pub mhd: Vec<Box<dyn MhdModel>>,
    pub resistivity: SpitzerResistivity,
}

impl Default for ModelSet {
    fn default() -> Self {
        Self {
            transport: Box::new(ConstantTransport),
            sources: Vec::new(),
            pedestal: None,
            mhd: Vec::new(),
            resistivity: SpitzerResistivity::default(),
        }
    }
}

enum SolverChoice {
    Linear(LinearSolver),
    Newton(NewtonSolver),
}

impl SolverChoice {
    fn solve(&self, inputs: &StepInputs, coeffs: &mut CoeffsCallback) -> SolverResult {
        match self {
            SolverChoice::Linear(solver) => solver.solve(inputs, coeffs),
            SolverChoice::Newton(solver) => solver.solve(inputs, coeffs),
        }
    }
}

/// Everything a finished run reports back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub statistics: Statistics,
    pub final_time: f64,
    pub final_profiles: SerializedProfiles,
    pub conservation: Vec<ConservationRecord>,
    pub diagnostics: DiagnosticsReport,
    pub samples: Vec<TimeSeriesPoint>,
}

pub struct Simulation {
    config: SimulationConfig,
    statics: StaticParams,
    geometry: Geometry,
    models: ModelSet,
    dynamics: DynamicsProvider,
    solver: SolverChoice,
    state: SimulationState,
    conservation: Option<(ConservationEnforcer, u64)>,
    monitor: DiagnosticsMonitor,
    conservation_log: Vec<ConservationRecord>,
    samples: Vec<TimeSeriesPoint>,
    initialized: bool,
}

impl Simulation {
    pub fn new(
        config: SimulationConfig,
        initial_profiles: CoreProfiles,
        models: ModelSet,
        dynamics: DynamicsProvider,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let geometry = config.build_geometry()?;
        if initial_profiles.n_cells() != geometry.n_cells {
            return Err(SimulationError::InitializationFailed(format!(
                "profiles have {} cells but the mesh has {}",
                initial_profiles.n_cells(),
                geometry.n_cells
            )));
        }
        let solver = match config.solver.kind {
            SolverKind::Linear => SolverChoice::Linear(LinearSolver::new(LinearOptions {
                tolerance: config.solver.tolerance,
                ..LinearOptions::default()
            })),
            SolverKind::NewtonRaphson => SolverChoice::Newton(NewtonSolver::new(NewtonOptions {
                tolerance: config.solver.tolerance,
                max_iterations: config.solver.max_iterations,
                estimate_condition: config.sampling.enable_diagnostics,
                ..NewtonOptions::default()
            })),
            SolverKind::Optimizer => unreachable!("rejected by config validation"),
        };
        let statics = config.static_params();
        let state = SimulationState::new(initial_profiles, config.time.start, config.time.initial_dt);
        Ok(Self {
            config,
            statics,
            geometry,
            models,
            dynamics,
            solver,
            state,
            conservation: None,
            monitor: DiagnosticsMonitor::new(),
            conservation_log: Vec::new(),
            samples: Vec::new(),
            initialized: false,
        })
    }

    /// Installs conservation enforcement at the given step cadence; must
    /// happen before [`Simulation::initialize`] so references come from
    /// the initial state.
    pub fn enable_conservation(&mut self, enforcer: ConservationEnforcer, interval_steps: u64) {
        assert!(interval_steps > 0, "conservation interval must be positive");
        self.conservation = Some((enforcer, interval_steps));
    }

    /// Validates the initial state and captures conservation references.
    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        self.state.profiles.validate()?;
        if let Some((enforcer, _)) = &mut self.conservation {
            enforcer.capture_reference(&self.state.profiles, &self.geometry);
        }
        self.initialized = true;
        Ok(())
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    fn progress_snapshot(&self) -> Progress {
        Progress {
            time: self.state.time.value(),
            step: self.state.step,
            last_dt: self.state.dt,
            converged: self.state.statistics.converged,
            profiles: Some(SerializedProfiles::from(&self.state.profiles)),
        }
    }

    /// Pedestal override of the edge constraints, when a model is present.
    fn boundaries_at(&self, dynamics: &DynamicParams) -> ProfileBoundaries {
        let mut boundaries = dynamics.boundaries;
        if let Some(pedestal) = &self.models.pedestal {
            let output =
                pedestal.pedestal(&self.state.profiles, &self.geometry, &dynamics.params);
            boundaries.ti.1 = FaceConstraint::Value(output.temperature_ev);
            boundaries.te.1 = FaceConstraint::Value(output.temperature_ev);
            boundaries.ne.1 = FaceConstraint::Value(output.density_m3);
        }
        boundaries
    }

    fn merged_sources(&self, profiles: &CoreProfiles, params: &ModelParams) -> SourceTerms {
        self.models.sources.iter().fold(
            SourceTerms::zero(profiles.n_cells()),
            |acc, model| acc + model.terms(profiles, &self.geometry, params),
        )
    }

    fn capture_sample(
        &self,
        result_iterations: usize,
        residual_norm: f64,
        converged: bool,
        wall_time_s: f64,
        cfl: f64,
    ) -> TimeSeriesPoint {
        let derived = self.config.sampling.enable_derived.then(|| {
            DerivedQuantities::compute(
                &self.state.profiles,
                &self.geometry,
                self.state.sources_cache.as_ref(),
            )
        });
        let health = self.config.sampling.enable_diagnostics.then(|| StepHealth {
            step: self.state.step,
            time: self.state.time.value(),
            iterations: result_iterations,
            residual_norm,
            converged,
            wall_time_s,
            cfl,
            drifts: self
                .conservation
                .as_ref()
                .map(|(enforcer, _)| enforcer.drifts(&self.state.profiles, &self.geometry))
                .unwrap_or_default(),
            transport_range: self
                .state
                .transport_cache
                .as_ref()
                .map(|t| (t.chi_ion.min_value().min(t.chi_electron.min_value()), t.max_chi())),
            condition_estimate: None,
        });
        TimeSeriesPoint {
            time: self.state.time.value(),
            step: self.state.step,
            dt: self.state.dt,
            profiles: SerializedProfiles::from(&self.state.profiles),
            derived,
            health,
        }
    }

    /// Runs the loop to the configured end time.
    ///
    /// `samples_tx`, when present, receives every captured time-series
    /// point; a full channel suspends the loop at the sampling point until
    /// the consumer catches up.
    pub fn run(
        &mut self,
        control: &SimulationControl,
        samples_tx: Option<&crossbeam_channel::Sender<TimeSeriesPoint>>,
    ) -> Result<RunSummary, SimulationError> {
        if !self.initialized {
            return Err(SimulationError::NotInitialized);
        }
        let run_start = Instant::now();
        let end = self.config.time.end;
        let adaptive = self.config.time.adaptive;
        let dr = self.geometry.dr;

        while self.state.time.value() < end - 0.5 * adaptive.min_dt {
            // Single cooperative checkpoint: pause parks here, cancel
            // unwinds from here with no further state mutation. Progress
            // is published at the yield cadence and whenever a pause is
            // about to park, so pollers always see a step-boundary state.
            if self.state.step % PROGRESS_CADENCE == 0 || control.is_pause_requested() {
                control.publish(self.progress_snapshot());
            }
            if !control.checkpoint() {
                return Err(SimulationError::Cancelled);
            }

            let time = self.state.time.value();
            let dyn_now = (self.dynamics)(time);

            // Transport at the current state drives the CFL estimate.
            let transport = self
                .models
                .transport
                .coefficients(&self.state.profiles, &self.geometry, &dyn_now.params)
                .bounded(self.statics.chi_max);
            let mut dt = if self.state.step == 0 {
                self.config.time.initial_dt
            } else {
                let chi_max = transport.max_chi().max(1e-12);
                (adaptive.safety_factor * dr * dr / chi_max).clamp(adaptive.min_dt, adaptive.max_dt)
            };
            dt = dt.min(end - time);

            // MHD hook: a rewrite replaces the PDE solve for this step.
            // The crash duration stays out of the adaptive history; the
            // next step re-derives dt from the transport state.
            let mut mhd_event = false;
            let mut event_dt = dt;
            for model in &mut self.models.mhd {
                let rewritten = model.apply(&self.state.profiles, &self.geometry, time, dt);
                if rewritten != self.state.profiles {
                    self.state.profiles = rewritten;
                    if let Some(crash) = model.crash_step_duration() {
                        event_dt = crash;
                    }
                    mhd_event = true;
                    tracing::info!(model = model.name(), time, "mhd event rewrote profiles");
                }
            }
            if mhd_event {
                self.state.time.add(event_dt);
                self.state.dt = event_dt;
                self.state.step += 1;
                self.state.statistics.steps += 1;
                continue;
            }

            // Pre-step sources, captured for logging and snapshots; the
            // solver callback recomputes them at every iterate.
            let sources_pre = self.merged_sources(&self.state.profiles, &dyn_now.params);
            tracing::debug!(
                step = self.state.step,
                time,
                heating_mw = sources_pre.total_heating_mw(),
                "step begin"
            );

            let boundaries_old = self.boundaries_at(&dyn_now);
            let step_start = Instant::now();
            let mut dt_try = dt;
            let mut attempt = 0usize;
            let result = loop {
                let dyn_new = (self.dynamics)(time + dt_try);
                let boundaries_new = self.boundaries_at(&dyn_new);
                let inputs = StepInputs {
                    dt: dt_try,
                    statics: &self.statics,
                    boundaries_old: &boundaries_old,
                    boundaries_new: &boundaries_new,
                    geometry_old: &self.geometry,
                    geometry_new: &self.geometry,
                    profiles_old: &self.state.profiles,
                    guess: &self.state.profiles,
                };
                let models = &self.models;
                let geometry = &self.geometry;
                let statics = &self.statics;
                let params = &dyn_new.params;
                let mut callback = |iterate: &CoreProfiles| {
                    let transport = models
                        .transport
                        .coefficients(iterate, geometry, params)
                        .bounded(statics.chi_max);
                    let sources = models.sources.iter().fold(
                        SourceTerms::zero(iterate.n_cells()),
                        |acc, model| acc + model.terms(iterate, geometry, params),
                    );
                    let eta: Option<EvaluatedArray> = statics
                        .evolve_current
                        .then(|| models.resistivity.eta_cell(iterate, geometry, params));
                    build_coeffs(
                        iterate,
                        geometry,
                        &BuilderInputs {
                            transport: &transport,
                            sources: &sources,
                            eta_cell: eta.as_ref(),
                        },
                        statics,
                    )
                };
                let result = self.solver.solve(&inputs, &mut callback);
                if result.converged {
                    break result;
                }
                attempt += 1;
                if attempt > MAX_SOLVER_RETRIES || dt_try * 0.5 < adaptive.min_dt {
                    return Err(SimulationError::ConvergenceFailure {
                        iterations: result.iterations,
                        residual: result.residual_norm,
                    });
                }
                dt_try *= 0.5;
                tracing::warn!(
                    attempt,
                    dt = dt_try,
                    residual = result.residual_norm,
                    "solver did not converge, halving the time step"
                );
            };

            if let Some((variable, value)) = result.profiles.first_violation() {
                return Err(SimulationError::NumericalInstability {
                    time: time + dt_try,
                    variable: variable.to_string(),
                    value,
                });
            }

            let wall_time_s = step_start.elapsed().as_secs_f64();
            let SolverResult {
                profiles,
                iterations,
                residual_norm,
                converged,
                metadata,
            } = result;

            self.state.profiles = profiles;
            self.state.time.add(dt_try);
            self.state.dt = dt_try;
            self.state.step += 1;
            self.state.statistics.steps += 1;
            self.state.statistics.total_iterations += iterations as u64;
            self.state.statistics.max_residual =
                self.state.statistics.max_residual.max(residual_norm);
            self.state.statistics.converged &= converged;
            self.state.transport_cache = Some(transport.clone());
            self.state.sources_cache = Some(sources_pre);

            if let Some((enforcer, interval)) = &mut self.conservation {
                if self.state.step % *interval == 0 {
                    let (corrected, records) = enforcer.enforce(
                        &self.state.profiles,
                        &self.geometry,
                        self.state.step,
                        self.state.time.value(),
                    );
                    self.state.profiles = corrected;
                    self.conservation_log.extend(records);
                }
            }

            let cfl = transport.max_chi() * dt_try / (dr * dr);
            if self.config.sampling.enable_diagnostics
                && self.state.step % DIAGNOSTICS_CADENCE == 0
            {
                let drifts = self
                    .conservation
                    .as_ref()
                    .map(|(enforcer, _)| enforcer.drifts(&self.state.profiles, &self.geometry))
                    .unwrap_or_default();
                self.monitor.record(StepHealth {
                    step: self.state.step,
                    time: self.state.time.value(),
                    iterations,
                    residual_norm,
                    converged,
                    wall_time_s,
                    cfl,
                    drifts,
                    transport_range: Some((
                        transport.chi_ion.min_value().min(transport.chi_electron.min_value()),
                        transport.max_chi(),
                    )),
                    condition_estimate: metadata.condition_estimate,
                });
            }

            if self.state.step % self.config.sampling.profile_interval == 0 {
                let point = self.capture_sample(iterations, residual_norm, converged, wall_time_s, cfl);
                self.state.derived_cache = point.derived;
                if self.config.sampling.enable_live_streaming {
                    if let Some(tx) = samples_tx {
                        // Blocking send: a slow consumer suspends the loop
                        // here, never inside the solver.
                        let _ = tx.send(point.clone());
                    }
                }
                self.samples.push(point);
            }
        }

        self.state.statistics.wall_time_s = run_start.elapsed().as_secs_f64();
        control.publish(self.progress_snapshot());
        tracing::info!(
            steps = self.state.statistics.steps,
            time = self.state.time.value(),
            "run complete"
        );

        Ok(RunSummary {
            statistics: self.state.statistics,
            final_time: self.state.time.value(),
            final_profiles: SerializedProfiles::from(&self.state.profiles),
            conservation: std::mem::take(&mut self.conservation_log),
            diagnostics: self.monitor.report().clone(),
            samples: std::mem::take(&mut self.samples),
        })
    }
}
