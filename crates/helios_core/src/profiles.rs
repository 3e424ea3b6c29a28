//! Core plasma profiles evolved by the transport equations.

use serde::{Deserialize, Serialize};

use crate::array::{Algebra, EvaluatedArray};
use crate::error::SimulationError;

/// Density floor in m^-3. Applied at coefficient assembly, never to the
/// boundary conditions, so harmonic-mean interpolation cannot divide by
/// zero while the physical boundary contract stays intact.
pub const NE_FLOOR: f64 = 1.0e18;

/// The ordered profile tuple `(Ti, Te, ne, psi)` on cell centers.
///
/// All four arrays share the same length and are read element-wise by the
/// coefficient builder; the differentiable pipeline mirrors them with
/// traced handles and never goes through this type inside the tape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreProfiles {
    /// Ion temperature, eV.
    pub ti: EvaluatedArray,
    /// Electron temperature, eV.
    pub te: EvaluatedArray,
    /// Electron density, m^-3.
    pub ne: EvaluatedArray,
    /// Poloidal flux, Wb.
    pub psi: EvaluatedArray,
}

impl CoreProfiles {
    pub fn new(
        ti: EvaluatedArray,
        te: EvaluatedArray,
        ne: EvaluatedArray,
        psi: EvaluatedArray,
    ) -> Self {
        assert_eq!(ti.len(), te.len(), "profile lengths must agree");
        assert_eq!(ti.len(), ne.len(), "profile lengths must agree");
        assert_eq!(ti.len(), psi.len(), "profile lengths must agree");
        Self { ti, te, ne, psi }
    }

    pub fn n_cells(&self) -> usize {
        self.ti.len()
    }

    /// Rejects initial profiles that violate the state invariants.
    pub fn validate(&self) -> Result<(), SimulationError> {
        if let Some((variable, value)) = self.first_violation() {
            return Err(SimulationError::InitializationFailed(format!(
                "profile {variable} violates invariants (offending value {value})"
            )));
        }
        Ok(())
    }

    /// First invariant violation, if any: NaN/Inf anywhere, non-positive
    /// temperatures, or density below [`NE_FLOOR`]. `psi` is only required
    /// to be finite.
    pub fn first_violation(&self) -> Option<(&'static str, f64)> {
        for i in 0..self.n_cells() {
            let ti = self.ti[i];
            if !ti.is_finite() || ti <= 0.0 {
                return Some(("Ti", ti));
            }
            let te = self.te[i];
            if !te.is_finite() || te <= 0.0 {
                return Some(("Te", te));
            }
            let ne = self.ne[i];
            if !ne.is_finite() || ne < NE_FLOOR {
                return Some(("ne", ne));
            }
            let psi = self.psi[i];
            if !psi.is_finite() {
                return Some(("psi", psi));
            }
        }
        None
    }

    /// Total plasma pressure `ne * (Ti + Te) * e` in Pa, cell-centered.
    pub fn pressure(&self) -> EvaluatedArray {
        let t_sum = Algebra::add(&self.ti, &self.te);
        Algebra::mul(&self.ne, &t_sum).scale(crate::physics::ELEMENTARY_CHARGE)
    }
}

/// Wire form of the profiles: four aligned flat arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedProfiles {
    pub ti: Vec<f64>,
    pub te: Vec<f64>,
    pub ne: Vec<f64>,
    pub psi: Vec<f64>,
}

impl From<&CoreProfiles> for SerializedProfiles {
    fn from(profiles: &CoreProfiles) -> Self {
        Self {
            ti: profiles.ti.to_values(),
            te: profiles.te.to_values(),
            ne: profiles.ne.to_values(),
            psi: profiles.psi.to_values(),
        }
    }
}

impl From<SerializedProfiles> for CoreProfiles {
    fn from(serialized: SerializedProfiles) -> Self {
        CoreProfiles::new(
            serialized.ti.into(),
            serialized.te.into(),
            serialized.ne.into(),
            serialized.psi.into(),
        )
    }
}
