//! Reverse-mode sensitivity of the scenario loss to the actuators.

use helios_core::array::Algebra;
use helios_core::profiles::CoreProfiles;
use helios_core::tape::Tape;
use helios_core::util::l2_norm;

use crate::differentiable::{
    ActuatorTimeSeries, DifferentiableSimulation, ACTUATOR_CHANNELS,
};

/// Loss and its gradient in the actuators' own `[n_steps x 4]` layout.
#[derive(Debug, Clone)]
pub struct GradientResult {
    pub loss: f64,
    pub gradient: ActuatorTimeSeries,
}

/// Outcome of comparing analytic and finite-difference gradients on a
/// subset of actuator indices.
#[derive(Debug, Clone)]
pub struct FiniteDifferenceReport {
    pub indices: Vec<usize>,
    pub analytic: Vec<f64>,
    pub numeric: Vec<f64>,
    pub l2_relative_error: f64,
}

impl FiniteDifferenceReport {
    pub fn passes(&self, threshold: f64) -> bool {
        self.l2_relative_error <= threshold
    }
}

/// Computes `d loss / d actuators` by reverse-mode differentiation of the
/// forward model.
pub struct ForwardSensitivity<'a> {
    simulation: &'a DifferentiableSimulation,
    initial: &'a CoreProfiles,
}

impl<'a> ForwardSensitivity<'a> {
    pub fn new(simulation: &'a DifferentiableSimulation, initial: &'a CoreProfiles) -> Self {
        Self {
            simulation,
            initial,
        }
    }

    pub fn loss(&self, actuators: &ActuatorTimeSeries) -> f64 {
        self.simulation.run(self.initial, actuators).1
    }

    /// One forward pass with the tape attached, then a reverse sweep.
    pub fn gradient(&self, actuators: &ActuatorTimeSeries) -> GradientResult {
        let tape = Tape::new();
        let forward = self
            .simulation
            .forward_traced(&tape, self.initial, actuators);
        let grads = tape.backward(&forward.loss);

        let n_steps = actuators.n_steps();
        let mut flat = vec![0.0; n_steps * ACTUATOR_CHANNELS];
        for (channel, leaf) in forward.leaves.iter().enumerate() {
            let channel_grad = grads.wrt(leaf);
            for (step, value) in channel_grad.iter().enumerate() {
                flat[step * ACTUATOR_CHANNELS + channel] = *value;
            }
        }
        GradientResult {
            loss: forward.loss.scalar(),
            gradient: ActuatorTimeSeries::from_flat(n_steps, flat),
        }
    }

    /// Central finite differences on the given flat indices, compared to
    /// the analytic gradient by L2 relative error over the subset.
    pub fn finite_difference_check(
        &self,
        actuators: &ActuatorTimeSeries,
        indices: &[usize],
        epsilon: f64,
    ) -> FiniteDifferenceReport {
        let analytic_full = self.gradient(actuators);
        let mut analytic = Vec::with_capacity(indices.len());
        let mut numeric = Vec::with_capacity(indices.len());
        for &index in indices {
            analytic.push(analytic_full.gradient.as_flat()[index]);

            let mut plus = actuators.clone();
            plus.as_flat_mut()[index] += epsilon;
            let mut minus = actuators.clone();
            minus.as_flat_mut()[index] -= epsilon;
            numeric.push((self.loss(&plus) - self.loss(&minus)) / (2.0 * epsilon));
        }

        let difference: Vec<f64> = analytic
            .iter()
            .zip(numeric.iter())
            .map(|(a, n)| a - n)
            .collect();
        let denominator = l2_norm(&numeric).max(1e-300);
        FiniteDifferenceReport {
            indices: indices.to_vec(),
            analytic,
            numeric,
            l2_relative_error: l2_norm(&difference) / denominator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ForwardSensitivity;
    use crate::differentiable::{
        ActuatorChannel, ActuatorTimeSeries, DifferentiableSimulation,
    };
    use helios_core::array::EvaluatedArray;
    use helios_core::cell::FaceConstraint;
    use helios_core::coeffs::ProfileBoundaries;
    use helios_core::geometry::Geometry;
    use helios_core::profiles::CoreProfiles;

    fn setup() -> (DifferentiableSimulation, CoreProfiles) {
        let geometry = Geometry::circular(25, 6.2, 2.0, 5.3).unwrap();
        let mut simulation = DifferentiableSimulation::new(geometry, 1.0e-3, 1.0e-4);
        simulation.boundaries = ProfileBoundaries {
            ti: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(1.0e4)),
            te: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(1.0e4)),
            ne: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(1.0e20)),
            psi: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(0.0)),
        };
        let profiles = CoreProfiles::new(
            EvaluatedArray::full(1.0e4, 25),
            EvaluatedArray::full(1.0e4, 25),
            EvaluatedArray::full(1.0e20, 25),
            EvaluatedArray::zeros(25),
        );
        (simulation, profiles)
    }

    #[test]
    fn heating_gradient_is_negative_for_the_heating_objective() {
        let (simulation, profiles) = setup();
        let sensitivity = ForwardSensitivity::new(&simulation, &profiles);
        let actuators = ActuatorTimeSeries::constant(simulation.n_steps(), 10.0, 5.0, 0.0, 15.0);
        let result = sensitivity.gradient(&actuators);
        // More power raises the mean temperature, lowering the loss.
        for step in 0..actuators.n_steps() {
            assert!(result.gradient.get(step, ActuatorChannel::PEcrh) < 0.0);
            assert!(result.gradient.get(step, ActuatorChannel::PIcrh) < 0.0);
        }
    }

    #[test]
    fn unused_channels_have_zero_gradient() {
        let (simulation, profiles) = setup();
        let sensitivity = ForwardSensitivity::new(&simulation, &profiles);
        let actuators = ActuatorTimeSeries::constant(simulation.n_steps(), 10.0, 5.0, 0.0, 15.0);
        let result = sensitivity.gradient(&actuators);
        for step in 0..actuators.n_steps() {
            // No current equation on the tape, and density is frozen.
            assert_eq!(result.gradient.get(step, ActuatorChannel::IPlasma), 0.0);
            assert_eq!(result.gradient.get(step, ActuatorChannel::GasPuff), 0.0);
        }
    }

    #[test]
    fn analytic_gradient_matches_finite_differences() {
        let (simulation, profiles) = setup();
        let sensitivity = ForwardSensitivity::new(&simulation, &profiles);
        let actuators = ActuatorTimeSeries::constant(simulation.n_steps(), 10.0, 5.0, 0.0, 15.0);
        // A handful of heating-channel indices across the horizon.
        let indices = vec![0, 1, 4 * 3, 4 * 5 + 1, 4 * 9];
        let report = sensitivity.finite_difference_check(&actuators, &indices, 1.0e-4);
        assert!(
            report.passes(0.01),
            "relative error {}",
            report.l2_relative_error
        );
    }
}
