pub mod differentiable;
pub mod handle;
/// The `helios_sim` crate orchestrates runs of the `helios_core` transport
/// engine: the time-loop state machine with adaptive stepping and MHD
/// events, the actor-like control boundary (pause/resume/cancel/progress),
/// time-series sampling, and the differentiable scenario pipeline with its
/// Adam optimizer.
pub mod optimizer;
pub mod orchestrator;
pub mod sampling;
pub mod sensitivity;
pub mod state;
