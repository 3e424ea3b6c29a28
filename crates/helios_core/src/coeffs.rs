//! Per-equation coefficient assembly.
//!
//! The builder is a pure function of the current iterate: given profiles,
//! geometry, bounded transport coefficients and merged sources it produces
//! the [`Block1DCoeffs`] of every evolved equation. Solvers call it once
//! per iteration (through their coefficients callback) so that iterative
//! schemes always see coefficients consistent with the state they are
//! solving for.

use serde::{Deserialize, Serialize};

use crate::array::{Algebra, EvaluatedArray};
use crate::cell::FaceConstraint;
use crate::fvm::{average_to_faces, harmonic_mean_to_faces};
use crate::geometry::Geometry;
use crate::physics::neoclassical::CURRENT_DENSITY_CAP;
use crate::physics::{SourceTerms, TransportCoefficients, MU_0};
use crate::profiles::{CoreProfiles, NE_FLOOR};

/// Conversion from MW/m^3 to eV/(m^3 s); the single authoritative unit
/// constant, applied only at this assembly boundary.
pub const EV_PER_MW_PER_SEC: f64 = 6.2415090744e24;

/// The four equations the simulator can evolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvolvedVar {
    IonHeat,
    ElectronHeat,
    Density,
    Current,
}

impl EvolvedVar {
    pub const ALL: [EvolvedVar; 4] = [
        EvolvedVar::IonHeat,
        EvolvedVar::ElectronHeat,
        EvolvedVar::Density,
        EvolvedVar::Current,
    ];
}

/// Boundary constraints for all four profiles at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileBoundaries {
    pub ti: (FaceConstraint, FaceConstraint),
    pub te: (FaceConstraint, FaceConstraint),
    pub ne: (FaceConstraint, FaceConstraint),
    pub psi: (FaceConstraint, FaceConstraint),
}

impl Default for ProfileBoundaries {
    fn default() -> Self {
        Self {
            ti: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(100.0)),
            te: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(100.0)),
            ne: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(5.0e19)),
            psi: (FaceConstraint::Gradient(0.0), FaceConstraint::Value(0.0)),
        }
    }
}

impl ProfileBoundaries {
    pub fn for_var(&self, var: EvolvedVar) -> (FaceConstraint, FaceConstraint) {
        match var {
            EvolvedVar::IonHeat => self.ti,
            EvolvedVar::ElectronHeat => self.te,
            EvolvedVar::Density => self.ne,
            EvolvedVar::Current => self.psi,
        }
    }
}

/// Static (per-run) parameters shared by the builder and the solvers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StaticParams {
    pub evolve_ion_heat: bool,
    pub evolve_electron_heat: bool,
    pub evolve_density: bool,
    pub evolve_current: bool,
    /// Time-weighting of the implicit update; 1 is backward Euler.
    pub theta: f64,
    pub use_pereverzev: bool,
    /// Artificial diffusivity of the Pereverzev corrector, m^2/s.
    pub pereverzev_chi: f64,
    /// Upper bound applied to every diffusivity before assembly, m^2/s.
    pub chi_max: f64,
}

impl Default for StaticParams {
    fn default() -> Self {
        Self {
            evolve_ion_heat: true,
            evolve_electron_heat: true,
            evolve_density: false,
            evolve_current: false,
            theta: 1.0,
            use_pereverzev: false,
            pereverzev_chi: 30.0,
            chi_max: 100.0,
        }
    }
}

impl StaticParams {
    pub fn is_evolved(&self, var: EvolvedVar) -> bool {
        match var {
            EvolvedVar::IonHeat => self.evolve_ion_heat,
            EvolvedVar::ElectronHeat => self.evolve_electron_heat,
            EvolvedVar::Density => self.evolve_density,
            EvolvedVar::Current => self.evolve_current,
        }
    }

    pub fn evolved_vars(&self) -> Vec<EvolvedVar> {
        EvolvedVar::ALL
            .into_iter()
            .filter(|var| self.is_evolved(*var))
            .collect()
    }
}

/// Transport and source coefficients of one equation on the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block1DCoeffs {
    /// Face diffusivity (already carries the density weighting for the
    /// temperature equations).
    pub d_face: EvaluatedArray,
    /// Face convection velocity.
    pub v_face: EvaluatedArray,
    /// Transient coefficient per cell.
    pub transient_cell: EvaluatedArray,
    /// Source per cell, in the equation's own units per second.
    pub source_cell: EvaluatedArray,
}

/// Coefficients of all evolved equations at one iterate.
#[derive(Debug, Clone, Default)]
pub struct EquationCoeffsSet {
    pub ion_heat: Option<Block1DCoeffs>,
    pub electron_heat: Option<Block1DCoeffs>,
    pub density: Option<Block1DCoeffs>,
    pub current: Option<Block1DCoeffs>,
}

impl EquationCoeffsSet {
    pub fn get(&self, var: EvolvedVar) -> Option<&Block1DCoeffs> {
        match var {
            EvolvedVar::IonHeat => self.ion_heat.as_ref(),
            EvolvedVar::ElectronHeat => self.electron_heat.as_ref(),
            EvolvedVar::Density => self.density.as_ref(),
            EvolvedVar::Current => self.current.as_ref(),
        }
    }
}

/// Everything the builder consumes besides the profiles and the mesh.
pub struct BuilderInputs<'a> {
    pub transport: &'a TransportCoefficients,
    pub sources: &'a SourceTerms,
    /// Parallel resistivity on cell centers; required when the current
    /// equation is evolved.
    pub eta_cell: Option<&'a EvaluatedArray>,
}

/// Assembles the per-equation [`Block1DCoeffs`].
pub fn build_coeffs(
    profiles: &CoreProfiles,
    geometry: &Geometry,
    inputs: &BuilderInputs,
    statics: &StaticParams,
) -> EquationCoeffsSet {
    let ne_floored = profiles.ne.clamp_min(NE_FLOOR);
    let transport = inputs.transport.bounded(statics.chi_max);

    // Heat convection rides on the particle pinch: 3/2 n v.
    let heat_convection = Algebra::mul(&ne_floored, &transport.v_conv).scale(1.5);

    let mut set = EquationCoeffsSet::default();

    if statics.evolve_ion_heat {
        set.ion_heat = Some(Block1DCoeffs {
            d_face: harmonic_mean_to_faces(&Algebra::mul(&ne_floored, &transport.chi_ion)),
            v_face: average_to_faces(&heat_convection),
            transient_cell: ne_floored.clone(),
            source_cell: inputs.sources.ion_heating.scale(EV_PER_MW_PER_SEC),
        });
    }

    if statics.evolve_electron_heat {
        set.electron_heat = Some(Block1DCoeffs {
            d_face: harmonic_mean_to_faces(&Algebra::mul(&ne_floored, &transport.chi_electron)),
            v_face: average_to_faces(&heat_convection),
            transient_cell: ne_floored.clone(),
            source_cell: inputs.sources.electron_heating.scale(EV_PER_MW_PER_SEC),
        });
    }

    if statics.evolve_density {
        set.density = Some(Block1DCoeffs {
            d_face: harmonic_mean_to_faces(&transport.d_particle),
            v_face: average_to_faces(&transport.v_conv),
            transient_cell: EvaluatedArray::full(1.0, profiles.n_cells()),
            source_cell: inputs.sources.particle.clone(),
        });
    }

    if statics.evolve_current {
        let eta = inputs
            .eta_cell
            .expect("resistivity is required when the current equation is evolved");
        let j_total = inputs
            .sources
            .current
            .clamp_min(-CURRENT_DENSITY_CAP)
            .clamp_max(CURRENT_DENSITY_CAP);
        // Loop voltage drive: eta * j_ni * 2 pi R0, in V (Wb/s).
        let loop_voltage = Algebra::mul(eta, &j_total)
            .scale(2.0 * std::f64::consts::PI * geometry.major_radius);
        set.current = Some(Block1DCoeffs {
            // Resistive flux diffusion, eta / mu0.
            d_face: average_to_faces(&eta.scale(1.0 / MU_0)),
            v_face: EvaluatedArray::zeros(profiles.n_cells() + 1),
            transient_cell: geometry.psi_transient.clone(),
            source_cell: loop_voltage,
        });
    }

    set
}
