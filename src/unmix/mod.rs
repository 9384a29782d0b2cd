//! Solve drivers over an assembled [`MixingProblem`](crate::problem::MixingProblem):
//! single solves, Monte-Carlo repeats and batch sweeps.

pub mod monte_carlo;
mod solve;
pub mod sweep;

pub use monte_carlo::{MonteCarloSamples, MonteCarloSettings, SampleSummary, UpstreamSamples};
pub use solve::{UnmixSolution, UpstreamPrediction};
pub use sweep::{
    log_spaced, sweep_elements, sweep_regularization, ElementResult, RegularizationTrial,
};
