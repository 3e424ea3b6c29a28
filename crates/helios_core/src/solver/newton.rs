//! Damped Newton–Raphson solver for the coupled implicit update.
//!
//! The Jacobian is assembled analytically from the linearized coefficients:
//! each equation contributes its tridiagonal flux block plus the transient
//! derivative, and the temperature equations pick up the cross-coupling of
//! their density-weighted transient when the density is evolved together
//! with them. Coefficient nonlinearity (chi depending on the state) is
//! handled by refreshing the coefficients every iteration through the
//! callback rather than by differentiating the models.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::coeffs::EvolvedVar;
use crate::fvm::residual;
use crate::profiles::{CoreProfiles, NE_FLOOR};
use crate::solver::{
    assemble_equations, profile_array, residual_norm, set_profile_array, CoeffsCallback,
    EquationWorkspace, SolverMetadata, SolverResult, StepInputs, TransportSolver,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NewtonOptions {
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Initial Newton step length before backtracking.
    pub damping: f64,
    pub max_linesearch_retries: usize,
    /// Attach an SVD condition-number estimate of the last Jacobian to the
    /// solver metadata.
    pub estimate_condition: bool,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            tolerance: 1.0e-6,
            max_iterations: 30,
            damping: 1.0,
            max_linesearch_retries: 5,
            estimate_condition: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewtonSolver {
    pub options: NewtonOptions,
}

impl NewtonSolver {
    pub fn new(options: NewtonOptions) -> Self {
        Self { options }
    }

    /// Residual of every evolved equation stacked into one vector, each
    /// block scaled to be dimensionless.
    fn stacked_residual(
        equations: &[EquationWorkspace],
        candidate: &CoreProfiles,
        dt: f64,
        theta: f64,
    ) -> DVector<f64> {
        let n = candidate.n_cells();
        let mut out = DVector::zeros(equations.len() * n);
        for (k, eq) in equations.iter().enumerate() {
            let r = residual(
                &eq.op_new,
                &eq.op_old,
                &eq.transient,
                profile_array(candidate, eq.var),
                &eq.x_old,
                &eq.source,
                dt,
                theta,
            );
            for i in 0..n {
                out[k * n + i] = r[i] / eq.scale;
            }
        }
        out
    }

    fn jacobian(
        equations: &[EquationWorkspace],
        candidate: &CoreProfiles,
        dt: f64,
        theta: f64,
    ) -> DMatrix<f64> {
        let n = candidate.n_cells();
        let vars: Vec<EvolvedVar> = equations.iter().map(|eq| eq.var).collect();
        let dim = vars.len() * n;
        let mut jac = DMatrix::zeros(dim, dim);

        for (k, eq) in equations.iter().enumerate() {
            let row0 = k * n;
            for i in 0..n {
                jac[(row0 + i, row0 + i)] =
                    (eq.transient[i] / dt + theta * eq.op_new.diag[i]) / eq.scale;
                if i > 0 {
                    jac[(row0 + i, row0 + i - 1)] = theta * eq.op_new.sub[i - 1] / eq.scale;
                }
                if i + 1 < n {
                    jac[(row0 + i, row0 + i + 1)] = theta * eq.op_new.sup[i] / eq.scale;
                }
            }

            // The temperature transient is the floored density: when the
            // density is solved in the same system its perturbation feeds
            // back into the temperature rows.
            let is_temperature =
                matches!(eq.var, EvolvedVar::IonHeat | EvolvedVar::ElectronHeat);
            if is_temperature {
                if let Some(density_block) =
                    vars.iter().position(|v| *v == EvolvedVar::Density)
                {
                    let col0 = density_block * n;
                    let x_new = profile_array(candidate, eq.var);
                    for i in 0..n {
                        if candidate.ne[i] > NE_FLOOR {
                            jac[(row0 + i, col0 + i)] +=
                                (x_new[i] - eq.x_old[i]) / dt / eq.scale;
                        }
                    }
                }
            }
        }
        jac
    }

    fn apply_step(
        state: &CoreProfiles,
        vars: &[EvolvedVar],
        delta: &DVector<f64>,
        alpha: f64,
    ) -> CoreProfiles {
        let n = state.n_cells();
        let mut next = state.clone();
        for (k, var) in vars.iter().enumerate() {
            let current = profile_array(state, *var);
            let updated: Vec<f64> = (0..n)
                .map(|i| current[i] + alpha * delta[k * n + i])
                .collect();
            set_profile_array(&mut next, *var, updated.into());
        }
        next
    }

    fn condition_estimate(jacobian: &DMatrix<f64>) -> Option<f64> {
        let svd = jacobian.clone().svd(false, false);
        let max = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
        let min = svd
            .singular_values
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        if min > 0.0 && min.is_finite() {
            Some(max / min)
        } else {
            None
        }
    }
}

impl TransportSolver for NewtonSolver {
    fn solve(&self, inputs: &StepInputs, coeffs: &mut CoeffsCallback) -> SolverResult {
        let theta = inputs.statics.theta;
        let dt = inputs.dt;
        let vars = inputs.statics.evolved_vars();
        if vars.is_empty() {
            return SolverResult {
                profiles: inputs.profiles_old.clone(),
                iterations: 0,
                residual_norm: 0.0,
                converged: true,
                metadata: SolverMetadata::default(),
            };
        }

        let coeffs_old = coeffs(inputs.profiles_old);
        let mut state = inputs.guess.clone();
        let coeffs_new = coeffs(&state);
        let mut equations = assemble_equations(inputs, &coeffs_new, &coeffs_old);
        let mut norm = residual_norm(&equations, &state, dt, theta);

        let mut iterations = 0;
        let mut metadata = SolverMetadata::default();
        let mut last_jacobian = None;

        while norm > self.options.tolerance && iterations < self.options.max_iterations {
            let jacobian = Self::jacobian(&equations, &state, dt, theta);
            let r = Self::stacked_residual(&equations, &state, dt, theta);
            let Some(delta) = jacobian.clone().lu().solve(&(-&r)) else {
                // Singular linearization: report non-convergence, the
                // orchestrator owns the retry policy.
                last_jacobian = Some(jacobian);
                break;
            };

            let mut alpha = self.options.damping;
            let mut retries = 0;
            loop {
                let trial = Self::apply_step(&state, &vars, &delta, alpha);
                let coeffs_trial = coeffs(&trial);
                let equations_trial = assemble_equations(inputs, &coeffs_trial, &coeffs_old);
                let trial_norm = residual_norm(&equations_trial, &trial, dt, theta);
                if trial_norm < norm || retries >= self.options.max_linesearch_retries {
                    state = trial;
                    equations = equations_trial;
                    norm = trial_norm;
                    break;
                }
                alpha *= 0.5;
                retries += 1;
            }
            metadata.linesearch_retries += retries;
            iterations += 1;
            last_jacobian = Some(jacobian);
        }

        if self.options.estimate_condition {
            metadata.condition_estimate =
                last_jacobian.as_ref().and_then(Self::condition_estimate);
        }

        SolverResult {
            profiles: state,
            iterations,
            residual_norm: norm,
            converged: norm <= self.options.tolerance,
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NewtonOptions, NewtonSolver};
    use crate::array::{Algebra, EvaluatedArray};
    use crate::cell::FaceConstraint;
    use crate::coeffs::{build_coeffs, BuilderInputs, ProfileBoundaries, StaticParams};
    use crate::geometry::Geometry;
    use crate::physics::{SourceTerms, TransportCoefficients};
    use crate::profiles::CoreProfiles;
    use crate::solver::linear::{LinearOptions, LinearSolver};
    use crate::solver::{StepInputs, TransportSolver};
    use approx::assert_relative_eq;

    fn uniform_profiles(n: usize) -> CoreProfiles {
        CoreProfiles::new(
            EvaluatedArray::full(1.0e4, n),
            EvaluatedArray::full(1.0e4, n),
            EvaluatedArray::full(1.0e20, n),
            EvaluatedArray::zeros(n),
        )
    }

    fn cold_edge_boundaries() -> ProfileBoundaries {
        ProfileBoundaries {
            ti: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(100.0)),
            te: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(100.0)),
            ne: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(1.0e20)),
            psi: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(0.0)),
        }
    }

    fn constant_chi_callback<'a>(
        geometry: &'a Geometry,
        statics: &'a StaticParams,
        chi: f64,
    ) -> impl FnMut(&CoreProfiles) -> crate::coeffs::EquationCoeffsSet + 'a {
        move |state: &CoreProfiles| {
            let n = state.n_cells();
            let transport = TransportCoefficients {
                chi_ion: EvaluatedArray::full(chi, n),
                chi_electron: EvaluatedArray::full(chi, n),
                d_particle: EvaluatedArray::full(0.3, n),
                v_conv: EvaluatedArray::zeros(n),
            };
            let sources = SourceTerms::zero(n);
            build_coeffs(
                state,
                geometry,
                &BuilderInputs {
                    transport: &transport,
                    sources: &sources,
                    eta_cell: None,
                },
                statics,
            )
        }
    }

    #[test]
    fn agrees_with_the_linear_solver_on_a_linear_problem() {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let statics = StaticParams::default();
        let profiles = uniform_profiles(25);
        let boundaries = cold_edge_boundaries();
        let inputs = StepInputs {
            dt: 1e-3,
            statics: &statics,
            boundaries_old: &boundaries,
            boundaries_new: &boundaries,
            geometry_old: &geometry,
            geometry_new: &geometry,
            profiles_old: &profiles,
            guess: &profiles,
        };

        let newton = NewtonSolver::default();
        let mut cb = constant_chi_callback(&geometry, &statics, 1.0);
        let newton_result = newton.solve(&inputs, &mut cb);

        let linear = LinearSolver::new(LinearOptions::default());
        let mut cb = constant_chi_callback(&geometry, &statics, 1.0);
        let linear_result = linear.solve(&inputs, &mut cb);

        assert!(newton_result.converged);
        assert!(linear_result.converged);
        for i in 0..25 {
            assert_relative_eq!(
                newton_result.profiles.ti[i],
                linear_result.profiles.ti[i],
                max_relative = 1e-8
            );
        }
    }

    #[test]
    fn converges_on_temperature_dependent_transport() {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let statics = StaticParams::default();
        let profiles = uniform_profiles(25);
        let boundaries = cold_edge_boundaries();
        let inputs = StepInputs {
            dt: 1e-3,
            statics: &statics,
            boundaries_old: &boundaries,
            boundaries_new: &boundaries,
            geometry_old: &geometry,
            geometry_new: &geometry,
            profiles_old: &profiles,
            guess: &profiles,
        };

        // chi rising with temperature makes the system genuinely
        // nonlinear; the coefficient refresh has to do the work.
        let mut callback = |state: &CoreProfiles| {
            let n = state.n_cells();
            let chi = state
                .te
                .scale(1.0 / 1.0e4)
                .powf(2.0)
                .scale(0.5)
                .shift(1.0);
            let transport = TransportCoefficients {
                chi_ion: chi.clone(),
                chi_electron: chi,
                d_particle: EvaluatedArray::full(0.3, n),
                v_conv: EvaluatedArray::zeros(n),
            };
            let sources = SourceTerms::zero(n);
            build_coeffs(
                state,
                &geometry,
                &BuilderInputs {
                    transport: &transport,
                    sources: &sources,
                    eta_cell: None,
                },
                &statics,
            )
        };

        let solver = NewtonSolver::new(NewtonOptions {
            estimate_condition: true,
            ..NewtonOptions::default()
        });
        let result = solver.solve(&inputs, &mut callback);
        assert!(result.converged, "residual {}", result.residual_norm);
        assert!(result.iterations >= 1);
        let cond = result.metadata.condition_estimate.expect("condition requested");
        assert!(cond >= 1.0 && cond.is_finite());
        assert!(result.profiles.ti.all_finite());
    }

    #[test]
    fn exhausting_iterations_reports_nonconvergence() {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let statics = StaticParams::default();
        let profiles = uniform_profiles(25);
        let boundaries = cold_edge_boundaries();
        let inputs = StepInputs {
            dt: 1e-3,
            statics: &statics,
            boundaries_old: &boundaries,
            boundaries_new: &boundaries,
            geometry_old: &geometry,
            geometry_new: &geometry,
            profiles_old: &profiles,
            guess: &profiles,
        };
        let solver = NewtonSolver::new(NewtonOptions {
            tolerance: 1e-300,
            max_iterations: 2,
            ..NewtonOptions::default()
        });
        let mut cb = constant_chi_callback(&geometry, &statics, 1.0);
        let result = solver.solve(&inputs, &mut cb);
        assert!(!result.converged);
        assert_eq!(result.iterations, 2);
        assert!(result.residual_norm.is_finite());
    }
}
