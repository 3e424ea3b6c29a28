//! Gradient-based scenario optimization.
//!
//! Adam over the actuator waveforms, with every iterate projected into the
//! machine's box constraints before the next forward pass. The loop guards
//! against non-finite losses and gradients instead of letting them
//! propagate into the moment estimates.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use helios_core::profiles::CoreProfiles;

use crate::differentiable::{
    ActuatorChannel, ActuatorTimeSeries, DifferentiableSimulation, ACTUATOR_CHANNELS,
};
use crate::sensitivity::ForwardSensitivity;

/// Box constraints per actuator channel, `(lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActuatorBounds {
    pub p_ecrh_mw: (f64, f64),
    pub p_icrh_mw: (f64, f64),
    pub gas_puff_rate: (f64, f64),
    pub i_plasma_ma: (f64, f64),
}

impl ActuatorBounds {
    /// ITER-like operating envelope.
    pub fn iter_envelope() -> Self {
        Self {
            p_ecrh_mw: (0.0, 30.0),
            p_icrh_mw: (0.0, 20.0),
            gas_puff_rate: (0.0, 1.0e21),
            i_plasma_ma: (5.0, 20.0),
        }
    }

    fn for_channel(&self, channel: ActuatorChannel) -> (f64, f64) {
        match channel {
            ActuatorChannel::PEcrh => self.p_ecrh_mw,
            ActuatorChannel::PIcrh => self.p_icrh_mw,
            ActuatorChannel::GasPuff => self.gas_puff_rate,
            ActuatorChannel::IPlasma => self.i_plasma_ma,
        }
    }

    /// Clamps every waveform entry into its channel's box.
    pub fn project(&self, actuators: &mut ActuatorTimeSeries) {
        for step in 0..actuators.n_steps() {
            for channel in ActuatorChannel::ALL {
                let (lower, upper) = self.for_channel(channel);
                let value = actuators.get(step, channel).clamp(lower, upper);
                actuators.set(step, channel, value);
            }
        }
    }
}

impl Default for ActuatorBounds {
    fn default() -> Self {
        Self::iter_envelope()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamOptions {
    pub learning_rate: f64,
    pub max_iterations: usize,
    /// Converged when the loss improvement falls below this.
    pub tolerance: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamOptions {
    fn default() -> Self {
        Self {
            learning_rate: 1.0e-3,
            max_iterations: 100,
            tolerance: 1.0e-4,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1.0e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub actuators: ActuatorTimeSeries,
    pub loss_trace: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Adam driver around the differentiable forward model.
#[derive(Debug, Clone, Default)]
pub struct ScenarioOptimizer {
    pub options: AdamOptions,
    pub bounds: ActuatorBounds,
}

impl ScenarioOptimizer {
    pub fn new(options: AdamOptions, bounds: ActuatorBounds) -> Self {
        Self { options, bounds }
    }

    pub fn optimize(
        &self,
        simulation: &DifferentiableSimulation,
        initial_profiles: &CoreProfiles,
        start: ActuatorTimeSeries,
    ) -> Result<OptimizationOutcome> {
        let sensitivity = ForwardSensitivity::new(simulation, initial_profiles);
        let dim = start.n_steps() * ACTUATOR_CHANNELS;

        let mut actuators = start;
        self.bounds.project(&mut actuators);

        let mut first_moment = vec![0.0; dim];
        let mut second_moment = vec![0.0; dim];
        let mut loss_trace = Vec::new();
        let mut previous_loss = f64::INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 1..=self.options.max_iterations {
            iterations = iteration;
            let result = sensitivity.gradient(&actuators);
            ensure!(
                result.loss.is_finite(),
                "loss became non-finite at iteration {iteration}"
            );
            let gradient = result.gradient.as_flat();
            ensure!(
                gradient.iter().all(|g| g.is_finite()),
                "gradient became non-finite at iteration {iteration}"
            );
            loss_trace.push(result.loss);
            tracing::debug!(iteration, loss = result.loss, "optimizer step");

            if (previous_loss - result.loss).abs() < self.options.tolerance {
                converged = true;
                break;
            }
            previous_loss = result.loss;

            let bias1 = 1.0 - self.options.beta1.powi(iteration as i32);
            let bias2 = 1.0 - self.options.beta2.powi(iteration as i32);
            let values = actuators.as_flat_mut();
            for i in 0..dim {
                first_moment[i] =
                    self.options.beta1 * first_moment[i] + (1.0 - self.options.beta1) * gradient[i];
                second_moment[i] = self.options.beta2 * second_moment[i]
                    + (1.0 - self.options.beta2) * gradient[i] * gradient[i];
                let m_hat = first_moment[i] / bias1;
                let v_hat = second_moment[i] / bias2;
                values[i] -= self.options.learning_rate * m_hat / (v_hat.sqrt() + self.options.epsilon);
            }
            self.bounds.project(&mut actuators);
        }

        Ok(OptimizationOutcome {
            actuators,
            loss_trace,
            iterations,
            converged,
        })
    }
}
