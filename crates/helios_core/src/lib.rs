pub mod array;
pub mod cell;
pub mod coeffs;
pub mod config;
pub mod conservation;
pub mod diagnostics;
/// The `helios_core` crate is the numerical engine of the Helios 1-D
/// tokamak transport simulator. It is deliberately free of any run
/// orchestration: everything here is a pure function of its inputs.
///
/// Key components:
/// - **Arrays**: evaluated dense arrays plus a reverse-mode tape, unified
///   behind the `Algebra` trait so the finite-volume kernels run both plain
///   and differentiable.
/// - **FVM**: flux-divergence operators and theta-implicit systems on the
///   toroidal mesh.
/// - **Solvers**: linearly-implicit predictor–corrector and damped
///   Newton–Raphson variants over the same assembly.
/// - **Physics seams**: transport/source/pedestal/MHD protocols with
///   reference models, consumed only through traits.
/// - **Conservation & diagnostics**: invariant enforcement and numerical
///   health tracking that report rather than abort.
pub mod error;
pub mod fvm;
pub mod geometry;
pub mod physics;
pub mod profiles;
pub mod solver;
pub mod tape;
pub mod util;
