//! Convex inversion of tracer concentrations sampled along a drainage
//! network.
//!
//! Downstream observations at each sample site are explained as the
//! flux-weighted mixture of source concentrations from every sub-catchment
//! upstream. [`problem::MixingProblem`] turns that bilinear relation into a
//! convex program solved by a [`solver::ConvexSolver`]; [`unmix`] drives
//! single solves, Monte-Carlo repeats and batch sweeps on top of it.

pub mod config;
pub mod error;
pub mod grid;
pub mod input;
pub mod network;
pub mod problem;
pub mod solver;
pub mod telemetry;
pub mod unmix;

use std::collections::BTreeMap;

/// Per-site values of one tracer, keyed by site name.
pub type ElementData = BTreeMap<String, f64>;

pub use error::{ConfigError, GridError, SolverError, TopologyError, UnmixError, UnmixResult};
pub use grid::InverseGrid;
pub use network::{SampleNetwork, SampleNode};
pub use problem::MixingProblem;
pub use solver::{ConvexSolver, SolverChoice, SolverSettings};
pub use unmix::{MonteCarloSamples, MonteCarloSettings, UnmixSolution, UpstreamPrediction};
