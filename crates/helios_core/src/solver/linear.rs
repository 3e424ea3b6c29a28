//! Linearly-implicit predictor–corrector solver.
//!
//! Each corrector sweep rebuilds the coefficients at the current iterate
//! and solves every evolved equation's tridiagonal system once. This is
//! the solver the differentiable pipeline mirrors (with a single corrector
//! and the tape attached), so nothing in here may depend on state that the
//! traced kernels cannot reproduce.

use serde::{Deserialize, Serialize};

use crate::array::{Algebra, EvaluatedArray};
use crate::cell::FaceConstraint;
use crate::coeffs::EvolvedVar;
use crate::fvm::{average_to_faces, flux_operator, theta_system, FluxOperator};
use crate::profiles::NE_FLOOR;
use crate::solver::{
    assemble_equations, residual_norm, set_profile_array, CoeffsCallback, EquationWorkspace,
    SolverMetadata, SolverResult, StepInputs, TransportSolver,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinearOptions {
    /// Corrector sweeps per step; the differentiable path pins this to 1.
    pub n_corrector: usize,
    pub tolerance: f64,
}

impl Default for LinearOptions {
    fn default() -> Self {
        Self {
            n_corrector: 3,
            tolerance: 1.0e-5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinearSolver {
    pub options: LinearOptions,
}

impl LinearSolver {
    pub fn new(options: LinearOptions) -> Self {
        Self { options }
    }

    /// Stabilizing operator of the Pereverzev corrector: artificial
    /// diffusion added implicitly and compensated explicitly at the old
    /// iterate, so it cancels at convergence while stiffening the system.
    fn pereverzev_operator(
        inputs: &StepInputs,
        eq: &EquationWorkspace,
    ) -> Option<FluxOperator<EvaluatedArray>> {
        if !inputs.statics.use_pereverzev || eq.var == EvolvedVar::Current {
            return None;
        }
        let chi_per = inputs.statics.pereverzev_chi;
        let d_face = match eq.var {
            EvolvedVar::Density => {
                EvaluatedArray::full(chi_per, inputs.geometry_new.n_cells + 1)
            }
            // Temperature equations carry the density weighting in D.
            _ => average_to_faces(&inputs.profiles_old.ne.clamp_min(NE_FLOOR)).scale(chi_per),
        };
        let v_face = EvaluatedArray::zeros(inputs.geometry_new.n_cells + 1);
        Some(flux_operator(
            &d_face,
            &v_face,
            inputs.geometry_new,
            FaceConstraint::Gradient(0.0),
            FaceConstraint::Gradient(0.0),
        ))
    }

    fn sweep(inputs: &StepInputs, equations: &[EquationWorkspace]) -> Vec<(EvolvedVar, EvaluatedArray)> {
        let theta = inputs.statics.theta;
        let mut updates = Vec::with_capacity(equations.len());
        for eq in equations {
            let (implicit_op, explicit_extra) = match Self::pereverzev_operator(inputs, eq) {
                Some(per) => {
                    let stiffened = eq.op_new.add(&per);
                    let compensation = per.apply(&eq.x_old).scale(theta);
                    (stiffened, Some(compensation))
                }
                None => (eq.op_new.clone(), None),
            };
            let mut system = theta_system(
                &implicit_op,
                &eq.op_old,
                &eq.transient,
                &eq.x_old,
                &eq.source,
                inputs.dt,
                theta,
            );
            if let Some(extra) = explicit_extra {
                system.rhs = system.rhs.add(&extra);
            }
            updates.push((eq.var, system.solve()));
        }
        updates
    }
}

impl TransportSolver for LinearSolver {
    fn solve(&self, inputs: &StepInputs, coeffs: &mut CoeffsCallback) -> SolverResult {
        let coeffs_old = coeffs(inputs.profiles_old);
        let mut state = inputs.guess.clone();
        let mut iterations = 0;
        let mut residual = f64::INFINITY;

        for _ in 0..self.options.n_corrector.max(1) {
            let coeffs_new = coeffs(&state);
            let equations = assemble_equations(inputs, &coeffs_new, &coeffs_old);

            let mut next = state.clone();
            for (var, values) in Self::sweep(inputs, &equations) {
                set_profile_array(&mut next, var, values);
            }
            iterations += 1;

            // Check against coefficients refreshed at the new iterate, so
            // the reported residual reflects the nonlinear equation rather
            // than the linearization just solved.
            let coeffs_check = coeffs(&next);
            let equations_check = assemble_equations(inputs, &coeffs_check, &coeffs_old);
            residual = residual_norm(&equations_check, &next, inputs.dt, inputs.statics.theta);

            state = next;
            if residual <= self.options.tolerance {
                break;
            }
        }

        SolverResult {
            profiles: state,
            iterations,
            residual_norm: residual,
            converged: residual <= self.options.tolerance,
            metadata: SolverMetadata::default(),
        }
    }
}
