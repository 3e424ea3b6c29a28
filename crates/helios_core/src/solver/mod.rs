//! Theta-implicit transport solvers.
//!
//! Both variants advance the same theta-weighted update and share the
//! assembly workspace below; they differ in how they chase the nonlinear
//! coupling. A solver invocation walks
//! `Init -> (Assemble -> LinSolve -> Check)* -> {Converged | NotConverged}`
//! and never raises: non-convergence is a structured result the
//! orchestrator turns into time-step retries.

pub mod linear;
pub mod newton;
pub mod tridiag;

use serde::Serialize;

use crate::array::{Algebra, EvaluatedArray};
use crate::coeffs::{EquationCoeffsSet, EvolvedVar, ProfileBoundaries, StaticParams};
use crate::fvm::{flux_operator, residual, FluxOperator};
use crate::geometry::Geometry;
use crate::profiles::CoreProfiles;
use crate::util::{l2_norm, linf_norm};

/// Inputs of one solver invocation, all referring to the step from `t` to
/// `t + dt`.
pub struct StepInputs<'a> {
    pub dt: f64,
    pub statics: &'a StaticParams,
    pub boundaries_old: &'a ProfileBoundaries,
    pub boundaries_new: &'a ProfileBoundaries,
    pub geometry_old: &'a Geometry,
    pub geometry_new: &'a Geometry,
    pub profiles_old: &'a CoreProfiles,
    /// Initial guess for the `t + dt` state.
    pub guess: &'a CoreProfiles,
}

/// Rebuilds the equation coefficients at an arbitrary iterate; invoked at
/// least once per solver iteration.
pub type CoeffsCallback<'a> = dyn FnMut(&CoreProfiles) -> EquationCoeffsSet + 'a;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SolverMetadata {
    pub linesearch_retries: usize,
    pub condition_estimate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SolverResult {
    pub profiles: CoreProfiles,
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
    pub metadata: SolverMetadata,
}

pub trait TransportSolver {
    fn solve(&self, inputs: &StepInputs, coeffs: &mut CoeffsCallback) -> SolverResult;
}

pub(crate) fn profile_array(profiles: &CoreProfiles, var: EvolvedVar) -> &EvaluatedArray {
    match var {
        EvolvedVar::IonHeat => &profiles.ti,
        EvolvedVar::ElectronHeat => &profiles.te,
        EvolvedVar::Density => &profiles.ne,
        EvolvedVar::Current => &profiles.psi,
    }
}

pub(crate) fn set_profile_array(
    profiles: &mut CoreProfiles,
    var: EvolvedVar,
    values: EvaluatedArray,
) {
    match var {
        EvolvedVar::IonHeat => profiles.ti = values,
        EvolvedVar::ElectronHeat => profiles.te = values,
        EvolvedVar::Density => profiles.ne = values,
        EvolvedVar::Current => profiles.psi = values,
    }
}

/// One evolved equation with its operators assembled at the current
/// iterate (`op_new`) and at the old time level (`op_old`).
pub(crate) struct EquationWorkspace {
    pub var: EvolvedVar,
    pub op_new: FluxOperator<EvaluatedArray>,
    pub op_old: FluxOperator<EvaluatedArray>,
    pub transient: EvaluatedArray,
    pub source: EvaluatedArray,
    pub x_old: EvaluatedArray,
    /// Normalization used for dimensionless residuals: the L-inf of the
    /// transient plus source right-hand side.
    pub scale: f64,
}

pub(crate) fn assemble_equations(
    inputs: &StepInputs,
    coeffs_new: &EquationCoeffsSet,
    coeffs_old: &EquationCoeffsSet,
) -> Vec<EquationWorkspace> {
    let mut equations = Vec::new();
    for var in inputs.statics.evolved_vars() {
        let new = coeffs_new
            .get(var)
            .expect("coefficient builder skipped an evolved equation");
        let old = coeffs_old
            .get(var)
            .expect("coefficient builder skipped an evolved equation");
        let (left_new, right_new) = inputs.boundaries_new.for_var(var);
        let (left_old, right_old) = inputs.boundaries_old.for_var(var);

        let op_new = flux_operator(
            &new.d_face,
            &new.v_face,
            inputs.geometry_new,
            left_new,
            right_new,
        );
        let op_old = flux_operator(
            &old.d_face,
            &old.v_face,
            inputs.geometry_old,
            left_old,
            right_old,
        );

        let x_old = profile_array(inputs.profiles_old, var).clone();
        let rhs_ref = new
            .transient_cell
            .mul(&x_old)
            .scale(1.0 / inputs.dt)
            .add(&new.source_cell);
        let scale = linf_norm(rhs_ref.as_slice()).max(1e-30);

        equations.push(EquationWorkspace {
            var,
            op_new,
            op_old,
            transient: new.transient_cell.clone(),
            source: new.source_cell.clone(),
            x_old,
            scale,
        });
    }
    equations
}

/// Dimensionless residual norm of a candidate state: per equation the L2
/// residual over `scale * sqrt(n)`, reduced with max across equations.
pub(crate) fn residual_norm(
    equations: &[EquationWorkspace],
    candidate: &CoreProfiles,
    dt: f64,
    theta: f64,
) -> f64 {
    let mut worst = 0.0_f64;
    for eq in equations {
        let x_new = profile_array(candidate, eq.var);
        let r = residual(
            &eq.op_new,
            &eq.op_old,
            &eq.transient,
            x_new,
            &eq.x_old,
            &eq.source,
            dt,
            theta,
        );
        let n = r.len() as f64;
        let norm = l2_norm(r.as_slice()) / (eq.scale * n.sqrt());
        worst = worst.max(norm);
    }
    worst
}
