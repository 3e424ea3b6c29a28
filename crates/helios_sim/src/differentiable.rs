//! Tape-preserving forward model.
//!
//! `DifferentiableSimulation` is a pure function from initial profiles and
//! actuator waveforms to final profiles and a scalar loss. It advances the
//! same theta-implicit update as the plain linear solver with a single
//! corrector and a fixed time step, but runs every kernel on [`Traced`]
//! arrays so the reverse sweep can reach the actuators. No element is
//! materialized inside the loop and nothing detaches the tape.

use serde::{Deserialize, Serialize};

use helios_core::array::Algebra;
use helios_core::coeffs::{ProfileBoundaries, EV_PER_MW_PER_SEC};
use helios_core::fvm::{flux_operator, harmonic_mean_to_faces, theta_system};
use helios_core::geometry::Geometry;
use helios_core::physics::fusion::traced_fusion_power_mw;
use helios_core::physics::sources::{GasPuff, GaussianDeposition};
use helios_core::physics::SourceModel;
use helios_core::profiles::{CoreProfiles, SerializedProfiles, NE_FLOOR};
use helios_core::tape::{Tape, Traced};

pub const ACTUATOR_CHANNELS: usize = 4;

/// The externally controllable inputs, in channel order of the flattened
/// `[n_steps x 4]` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorChannel {
    /// ECRH power, MW.
    PEcrh = 0,
    /// ICRH power, MW.
    PIcrh = 1,
    /// Gas puff rate, particles/s.
    GasPuff = 2,
    /// Plasma current, MA.
    IPlasma = 3,
}

impl ActuatorChannel {
    pub const ALL: [ActuatorChannel; ACTUATOR_CHANNELS] = [
        ActuatorChannel::PEcrh,
        ActuatorChannel::PIcrh,
        ActuatorChannel::GasPuff,
        ActuatorChannel::IPlasma,
    ];
}

/// Flattened `[n_steps x 4]` actuator waveforms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActuatorTimeSeries {
    n_steps: usize,
    values: Vec<f64>,
}

impl ActuatorTimeSeries {
    pub fn constant(
        n_steps: usize,
        p_ecrh: f64,
        p_icrh: f64,
        gas_puff: f64,
        i_plasma: f64,
    ) -> Self {
        let mut series = Self {
            n_steps,
            values: vec![0.0; n_steps * ACTUATOR_CHANNELS],
        };
        for step in 0..n_steps {
            series.set(step, ActuatorChannel::PEcrh, p_ecrh);
            series.set(step, ActuatorChannel::PIcrh, p_icrh);
            series.set(step, ActuatorChannel::GasPuff, gas_puff);
            series.set(step, ActuatorChannel::IPlasma, i_plasma);
        }
        series
    }

    pub fn from_flat(n_steps: usize, values: Vec<f64>) -> Self {
        assert_eq!(
            values.len(),
            n_steps * ACTUATOR_CHANNELS,
            "flattened actuator array has the wrong length"
        );
        Self { n_steps, values }
    }

    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    pub fn as_flat(&self) -> &[f64] {
        &self.values
    }

    pub fn as_flat_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn flat_index(step: usize, channel: ActuatorChannel) -> usize {
        step * ACTUATOR_CHANNELS + channel as usize
    }

    pub fn get(&self, step: usize, channel: ActuatorChannel) -> f64 {
        self.values[Self::flat_index(step, channel)]
    }

    pub fn set(&mut self, step: usize, channel: ActuatorChannel, value: f64) {
        self.values[Self::flat_index(step, channel)] = value;
    }

    pub fn channel_values(&self, channel: ActuatorChannel) -> Vec<f64> {
        (0..self.n_steps)
            .map(|step| self.get(step, channel))
            .collect()
    }
}

/// Scalar objective over the final state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LossFn {
    /// Negated volume-average of `(Ti + Te) / 2`; the default "heat the
    /// plasma" objective.
    NegMeanTemperature,
    /// L2 distance to target profiles, normalized by cell count.
    ProfileMatch {
        target_ti: Vec<f64>,
        target_te: Vec<f64>,
    },
    /// Negated fusion gain `Q = P_fusion / P_aux` of the final state.
    NegFusionGain { auxiliary_power_mw: f64 },
}

/// The tape-linked outputs of one forward pass.
pub struct TracedForward {
    pub loss: Traced,
    pub final_ti: Traced,
    pub final_te: Traced,
    pub final_ne: Traced,
    /// Actuator leaves in [`ActuatorChannel`] order; gradients are read
    /// against these.
    pub leaves: [Traced; ACTUATOR_CHANNELS],
}

/// Differentiable forward model: fixed time step, single corrector,
/// constant transport, gradient-aware deposition sources.
#[derive(Debug, Clone)]
pub struct DifferentiableSimulation {
    pub geometry: Geometry,
    pub boundaries: ProfileBoundaries,
    pub chi_ion: f64,
    pub chi_electron: f64,
    pub d_particle: f64,
    pub evolve_density: bool,
    pub horizon: f64,
    pub dt: f64,
    pub loss: LossFn,
}

impl DifferentiableSimulation {
    pub fn new(geometry: Geometry, horizon: f64, dt: f64) -> Self {
        assert!(dt > 0.0 && horizon > 0.0);
        Self {
            geometry,
            boundaries: ProfileBoundaries::default(),
            chi_ion: 1.0,
            chi_electron: 1.0,
            d_particle: 0.3,
            evolve_density: false,
            horizon,
            dt,
            loss: LossFn::NegMeanTemperature,
        }
    }

    pub fn n_steps(&self) -> usize {
        // Nudge before flooring so an exact multiple of dt is not lost to
        // the division rounding down by one ulp.
        (self.horizon / self.dt + 1.0e-9).floor() as usize
    }

    /// Records the full forward pass on `tape`.
    pub fn forward_traced(
        &self,
        tape: &Tape,
        initial: &CoreProfiles,
        actuators: &ActuatorTimeSeries,
    ) -> TracedForward {
        let n = self.geometry.n_cells;
        assert_eq!(initial.n_cells(), n, "initial profiles do not fit the mesh");
        assert_eq!(
            actuators.n_steps(),
            self.n_steps(),
            "actuator waveform length must equal the step count"
        );

        // One leaf per channel; the per-channel mean is the power handle
        // the gradient-aware sources consume.
        let ecrh_leaf = tape.leaf(&actuators.channel_values(ActuatorChannel::PEcrh));
        let icrh_leaf = tape.leaf(&actuators.channel_values(ActuatorChannel::PIcrh));
        let gas_leaf = tape.leaf(&actuators.channel_values(ActuatorChannel::GasPuff));
        let ip_leaf = tape.leaf(&actuators.channel_values(ActuatorChannel::IPlasma));

        let mut ecrh = GaussianDeposition::ecrh();
        ecrh.set_power_handle(ecrh_leaf.mean());
        let mut icrh = GaussianDeposition::icrh();
        icrh.set_power_handle(icrh_leaf.mean());
        let mut gas = GasPuff::default();
        gas.set_power_handle(gas_leaf.mean());

        let (ecrh_ion, ecrh_electron) = ecrh
            .traced_heating(&self.geometry)
            .expect("handle just installed");
        let (icrh_ion, icrh_electron) = icrh
            .traced_heating(&self.geometry)
            .expect("handle just installed");
        let source_ti = ecrh_ion.add(&icrh_ion).scale(EV_PER_MW_PER_SEC);
        let source_te = ecrh_electron.add(&icrh_electron).scale(EV_PER_MW_PER_SEC);
        let source_ne = gas
            .traced_particle(&self.geometry)
            .expect("handle just installed");

        let mut ti = tape.leaf(initial.ti.as_slice());
        let mut te = tape.leaf(initial.te.as_slice());
        let mut ne = tape.leaf(initial.ne.as_slice());
        let v_zero = ti.full_like(0.0, n + 1);
        let ones = ti.full_like(1.0, n);
        let d_face_ne = ti.full_like(self.d_particle, n + 1);

        for _ in 0..self.n_steps() {
            let ne_floored = ne.clamp_min(NE_FLOOR);

            let d_face_ti = harmonic_mean_to_faces(&ne_floored.scale(self.chi_ion));
            let op_ti = flux_operator(
                &d_face_ti,
                &v_zero,
                &self.geometry,
                self.boundaries.ti.0,
                self.boundaries.ti.1,
            );
            let ti_new =
                theta_system(&op_ti, &op_ti, &ne_floored, &ti, &source_ti, self.dt, 1.0).solve();

            let d_face_te = harmonic_mean_to_faces(&ne_floored.scale(self.chi_electron));
            let op_te = flux_operator(
                &d_face_te,
                &v_zero,
                &self.geometry,
                self.boundaries.te.0,
                self.boundaries.te.1,
            );
            let te_new =
                theta_system(&op_te, &op_te, &ne_floored, &te, &source_te, self.dt, 1.0).solve();

            if self.evolve_density {
                let op_ne = flux_operator(
                    &d_face_ne,
                    &v_zero,
                    &self.geometry,
                    self.boundaries.ne.0,
                    self.boundaries.ne.1,
                );
                ne = theta_system(&op_ne, &op_ne, &ones, &ne, &source_ne, self.dt, 1.0).solve();
            }
            ti = ti_new;
            te = te_new;
        }

        let loss = match &self.loss {
            LossFn::NegMeanTemperature => ti.add(&te).scale(0.5).mean().neg(),
            LossFn::ProfileMatch {
                target_ti,
                target_te,
            } => {
                let dti = ti.sub(&ti.lift(target_ti));
                let dte = te.sub(&te.lift(target_te));
                dti.mul(&dti)
                    .sum()
                    .add(&dte.mul(&dte).sum())
                    .scale(1.0 / n as f64)
            }
            LossFn::NegFusionGain { auxiliary_power_mw } => {
                traced_fusion_power_mw(&ti, &ne, &self.geometry)
                    .scale(1.0 / auxiliary_power_mw.max(1e-12))
                    .neg()
            }
        };

        TracedForward {
            loss,
            final_ti: ti,
            final_te: te,
            final_ne: ne,
            leaves: [ecrh_leaf, icrh_leaf, gas_leaf, ip_leaf],
        }
    }

    /// Convenience eager evaluation: `(final profiles, loss)`.
    pub fn run(
        &self,
        initial: &CoreProfiles,
        actuators: &ActuatorTimeSeries,
    ) -> (SerializedProfiles, f64) {
        let tape = Tape::new();
        let forward = self.forward_traced(&tape, initial, actuators);
        let profiles = SerializedProfiles {
            ti: forward.final_ti.to_values(),
            te: forward.final_te.to_values(),
            ne: forward.final_ne.to_values(),
            psi: initial.psi.to_values(),
        };
        (profiles, forward.loss.scalar())
    }
}

#[cfg(test)]
mod tests {
    use super::{ActuatorChannel, ActuatorTimeSeries, DifferentiableSimulation, LossFn};
    use helios_core::array::EvaluatedArray;
    use helios_core::cell::FaceConstraint;
    use helios_core::coeffs::ProfileBoundaries;
    use helios_core::geometry::Geometry;
    use helios_core::profiles::CoreProfiles;
    use approx::assert_relative_eq;

    fn geometry() -> Geometry {
        Geometry::circular(25, 6.2, 2.0, 5.3).unwrap()
    }

    fn uniform_profiles() -> CoreProfiles {
        CoreProfiles::new(
            EvaluatedArray::full(1.0e4, 25),
            EvaluatedArray::full(1.0e4, 25),
            EvaluatedArray::full(1.0e20, 25),
            EvaluatedArray::zeros(25),
        )
    }

    fn matching_boundaries() -> ProfileBoundaries {
        ProfileBoundaries {
            ti: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(1.0e4)),
            te: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(1.0e4)),
            ne: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(1.0e20)),
            psi: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(0.0)),
        }
    }

    #[test]
    fn actuator_layout_roundtrips() {
        let mut series = ActuatorTimeSeries::constant(3, 10.0, 5.0, 1.0e20, 15.0);
        assert_eq!(series.get(1, ActuatorChannel::PIcrh), 5.0);
        series.set(2, ActuatorChannel::GasPuff, 2.0e20);
        assert_eq!(series.as_flat()[2 * 4 + 2], 2.0e20);
        assert_eq!(series.channel_values(ActuatorChannel::IPlasma), vec![15.0; 3]);
    }

    #[test]
    fn zero_power_uniform_state_is_stationary() {
        let mut simulation = DifferentiableSimulation::new(geometry(), 2.0e-3, 1.0e-4);
        simulation.boundaries = matching_boundaries();
        let actuators = ActuatorTimeSeries::constant(simulation.n_steps(), 0.0, 0.0, 0.0, 15.0);
        let (finals, loss) = simulation.run(&uniform_profiles(), &actuators);
        for value in &finals.ti {
            assert_relative_eq!(*value, 1.0e4, max_relative = 1e-9);
        }
        assert_relative_eq!(loss, -1.0e4, max_relative = 1e-9);
    }

    #[test]
    fn heating_raises_the_mean_temperature() {
        let mut simulation = DifferentiableSimulation::new(geometry(), 2.0e-3, 1.0e-4);
        simulation.boundaries = matching_boundaries();
        let cold = ActuatorTimeSeries::constant(simulation.n_steps(), 0.0, 0.0, 0.0, 15.0);
        let hot = ActuatorTimeSeries::constant(simulation.n_steps(), 20.0, 10.0, 0.0, 15.0);
        let (_, loss_cold) = simulation.run(&uniform_profiles(), &cold);
        let (_, loss_hot) = simulation.run(&uniform_profiles(), &hot);
        assert!(loss_hot < loss_cold, "heating must lower the loss");
    }

    #[test]
    fn gas_puff_raises_density_when_density_evolves() {
        let mut simulation = DifferentiableSimulation::new(geometry(), 2.0e-3, 1.0e-4);
        simulation.boundaries = matching_boundaries();
        simulation.evolve_density = true;
        let actuators =
            ActuatorTimeSeries::constant(simulation.n_steps(), 0.0, 0.0, 5.0e22, 15.0);
        let (finals, _) = simulation.run(&uniform_profiles(), &actuators);
        let mean_ne: f64 = finals.ne.iter().sum::<f64>() / finals.ne.len() as f64;
        assert!(mean_ne > 1.0e20);
    }

    #[test]
    fn fusion_gain_objective_rewards_heating() {
        let mut simulation = DifferentiableSimulation::new(geometry(), 1.0e-3, 1.0e-4);
        simulation.boundaries = matching_boundaries();
        simulation.loss = LossFn::NegFusionGain {
            auxiliary_power_mw: 50.0,
        };
        let cold = ActuatorTimeSeries::constant(simulation.n_steps(), 0.0, 0.0, 0.0, 15.0);
        let hot = ActuatorTimeSeries::constant(simulation.n_steps(), 30.0, 20.0, 0.0, 15.0);
        let (_, loss_cold) = simulation.run(&uniform_profiles(), &cold);
        let (_, loss_hot) = simulation.run(&uniform_profiles(), &hot);
        // A 10 keV, 1e20 plasma burns, so -Q is strictly negative, and
        // hotter ions burn harder.
        assert!(loss_cold < 0.0);
        assert!(loss_hot < loss_cold);
    }

    #[test]
    fn profile_match_loss_is_zero_at_the_target() {
        let mut simulation = DifferentiableSimulation::new(geometry(), 1.0e-4, 1.0e-4);
        simulation.boundaries = matching_boundaries();
        let actuators = ActuatorTimeSeries::constant(simulation.n_steps(), 0.0, 0.0, 0.0, 15.0);
        let (finals, _) = simulation.run(&uniform_profiles(), &actuators);
        simulation.loss = LossFn::ProfileMatch {
            target_ti: finals.ti.clone(),
            target_te: finals.te.clone(),
        };
        let (_, loss) = simulation.run(&uniform_profiles(), &actuators);
        assert!(loss.abs() < 1e-12);
    }
}
