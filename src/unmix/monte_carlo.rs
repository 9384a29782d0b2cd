//! Monte-Carlo uncertainty propagation.
//!
//! Observations are perturbed by multiplicative Gaussian noise with mean 1
//! and standard deviation `relative_error_pct / 100`, and the problem is
//! re-solved for every draw. All draws are taken up front from one seeded
//! generator, so a fixed seed gives the same samples no matter how the
//! repeats are scheduled across threads.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::solve::{UnmixSolution, UpstreamPrediction};
use crate::error::{ConfigError, UnmixError, UnmixResult};
use crate::problem::MixingProblem;
use crate::solver::{ConvexSolver, SolverSettings};
use crate::ElementData;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloSettings {
    pub relative_error_pct: f64,
    pub repeats: usize,
    /// Fixed seed for reproducible draws; entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for MonteCarloSettings {
    fn default() -> Self {
        Self {
            relative_error_pct: 5.0,
            repeats: 50,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamSamples {
    Sites(BTreeMap<String, Vec<f64>>),
    Maps(Vec<Array2<f64>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonteCarloSamples {
    /// Per-site downstream predictions, one entry per successful repeat.
    pub downstream: BTreeMap<String, Vec<f64>>,
    pub upstream: UpstreamSamples,
    /// Repeats skipped because their solve failed.
    pub failed_repeats: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSummary {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub p05: f64,
    pub p95: f64,
}

impl SampleSummary {
    pub fn from_samples(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut data = Data::new(values.to_vec());
        Some(Self {
            count: values.len(),
            mean: values.iter().mean(),
            std_dev: values.iter().std_dev(),
            median: data.median(),
            p05: data.percentile(5),
            p95: data.percentile(95),
        })
    }
}

impl MonteCarloSamples {
    pub fn successful_repeats(&self) -> usize {
        match &self.upstream {
            UpstreamSamples::Sites(sites) => sites.values().next().map_or(0, Vec::len),
            UpstreamSamples::Maps(maps) => maps.len(),
        }
    }

    pub fn downstream_summary(&self) -> BTreeMap<String, SampleSummary> {
        summarize(&self.downstream)
    }

    /// Per-site upstream summary; `None` for map samples.
    pub fn upstream_summary(&self) -> Option<BTreeMap<String, SampleSummary>> {
        match &self.upstream {
            UpstreamSamples::Sites(sites) => Some(summarize(sites)),
            UpstreamSamples::Maps(_) => None,
        }
    }
}

fn summarize(samples: &BTreeMap<String, Vec<f64>>) -> BTreeMap<String, SampleSummary> {
    samples
        .iter()
        .filter_map(|(site, values)| Some((site.clone(), SampleSummary::from_samples(values)?)))
        .collect()
}

impl MixingProblem {
    pub fn solve_monte_carlo(
        &self,
        observations: &ElementData,
        export_rates: Option<&ElementData>,
        regularization_strength: Option<f64>,
        monte_carlo: &MonteCarloSettings,
        settings: &SolverSettings,
    ) -> UnmixResult<MonteCarloSamples> {
        let backend = settings.backend();
        self.solve_monte_carlo_with(
            observations,
            export_rates,
            regularization_strength,
            monte_carlo,
            backend.as_ref(),
        )
    }

    /// Re-solve under perturbed observations.
    ///
    /// Inputs are validated once before any repeat runs. Repeats whose solve
    /// fails (or whose perturbed observations are no longer positive) are
    /// skipped and counted in `failed_repeats`.
    pub fn solve_monte_carlo_with(
        &self,
        observations: &ElementData,
        export_rates: Option<&ElementData>,
        regularization_strength: Option<f64>,
        monte_carlo: &MonteCarloSettings,
        solver: &dyn ConvexSolver,
    ) -> UnmixResult<MonteCarloSamples> {
        self.bind_inputs(observations, export_rates, regularization_strength)?;

        let pct = monte_carlo.relative_error_pct;
        if !pct.is_finite() || pct < 0.0 {
            return Err(ConfigError::InvalidRelativeError(pct).into());
        }
        let noise =
            Normal::new(1.0, pct / 100.0).map_err(|_| ConfigError::InvalidRelativeError(pct))?;
        let mut rng = match monte_carlo.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let draws: Vec<ElementData> = (0..monte_carlo.repeats)
            .map(|_| {
                observations
                    .iter()
                    .map(|(site, &value)| (site.clone(), value * noise.sample(&mut rng)))
                    .collect()
            })
            .collect();

        let outcomes: Vec<UnmixResult<UnmixSolution>> = draws
            .par_iter()
            .map(|perturbed| {
                self.solve_with(perturbed, export_rates, regularization_strength, solver)
            })
            .collect();

        let mut downstream: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut upstream_sites: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut upstream_maps = Vec::new();
        let mut failed_repeats = 0;

        for (repeat, outcome) in outcomes.into_iter().enumerate() {
            let solution = match outcome {
                Ok(solution) => solution,
                Err(err) if skippable(&err) => {
                    warn!(repeat, error = %err, "skipping Monte-Carlo repeat");
                    failed_repeats += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            for (site, value) in solution.downstream {
                downstream.entry(site).or_default().push(value);
            }
            match solution.upstream {
                UpstreamPrediction::Sites(sites) => {
                    for (site, value) in sites {
                        upstream_sites.entry(site).or_default().push(value);
                    }
                }
                UpstreamPrediction::Map(map) => upstream_maps.push(map),
            }
        }

        info!(
            repeats = monte_carlo.repeats,
            failed_repeats, "Monte-Carlo run finished"
        );

        let upstream = if self.is_continuous() {
            UpstreamSamples::Maps(upstream_maps)
        } else {
            UpstreamSamples::Sites(upstream_sites)
        };
        Ok(MonteCarloSamples {
            downstream,
            upstream,
            failed_repeats,
        })
    }
}

/// A single noisy draw can push an observation non-positive; that repeat is
/// lost but the run goes on.
fn skippable(err: &UnmixError) -> bool {
    err.is_solver_failure()
        || matches!(
            err,
            UnmixError::Config(ConfigError::InvalidObservation { .. })
        )
}
