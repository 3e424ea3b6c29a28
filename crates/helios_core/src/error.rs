use thiserror::Error;

/// Error taxonomy for the transport core.
///
/// The coefficient builder and the solvers never produce these directly;
/// they return structured results (including non-convergence) and leave it
/// to the orchestrator to decide when a condition is terminal.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    /// Configuration values out of range or contradictory. Fatal before a
    /// run starts.
    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    /// Initial profiles violate invariants or a model could not be built.
    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    /// The solver could not converge even after time-step halving down to
    /// the configured minimum.
    #[error("solver failed to converge after {iterations} iterations (residual {residual:.3e}); reduce the initial time step or increase mesh resolution")]
    ConvergenceFailure { iterations: usize, residual: f64 },

    /// NaN or infinity detected in the state during or after a step.
    #[error("numerical instability at t = {time:.6e} s: {variable} became {value}; reduce the time step")]
    NumericalInstability {
        time: f64,
        variable: String,
        value: f64,
    },

    /// Cooperative cancellation was honored.
    #[error("simulation cancelled")]
    Cancelled,

    /// A run was requested before initialization.
    #[error("simulation has not been initialized")]
    NotInitialized,
}

#[cfg(test)]
mod tests {
    use super::SimulationError;

    #[test]
    fn convergence_failure_carries_recovery_hint() {
        let err = SimulationError::ConvergenceFailure {
            iterations: 30,
            residual: 4.2e-3,
        };
        let message = err.to_string();
        assert!(message.contains("30 iterations"));
        assert!(message.contains("reduce the initial time step"));
    }

    #[test]
    fn instability_reports_variable_and_time() {
        let err = SimulationError::NumericalInstability {
            time: 1.5e-2,
            variable: "Te".to_string(),
            value: f64::NAN,
        };
        let message = err.to_string();
        assert!(message.contains("Te"));
        assert!(message.contains("1.5"));
    }
}
