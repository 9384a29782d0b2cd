//! Batch drivers: one solve per element, or one solve per regularization
//! strength.

use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use super::solve::UnmixSolution;
use crate::error::UnmixResult;
use crate::input::ObservationTable;
use crate::problem::MixingProblem;
use crate::solver::SolverSettings;
use crate::ElementData;

#[derive(Debug, Clone, PartialEq)]
pub struct ElementResult {
    pub element: String,
    pub observed: ElementData,
    pub solution: UnmixSolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegularizationTrial {
    pub strength: f64,
    pub roughness: f64,
    pub misfit: f64,
}

/// Solve every element column of `table`.
///
/// Columns without a single numeric cell (sample notes and the like) are
/// skipped with a warning. Elements whose solve fails are logged and left
/// out of the result. Configuration errors abort the sweep.
pub fn sweep_elements(
    problem: &MixingProblem,
    table: &ObservationTable,
    export_rates: Option<&ElementData>,
    regularization_strength: Option<f64>,
    settings: &SolverSettings,
) -> UnmixResult<Vec<ElementResult>> {
    let (elements, text_columns): (Vec<_>, Vec<_>) = table
        .elements()
        .map(|element| (element, table.element(element).unwrap_or_default()))
        .partition(|(_, observed)| !observed.is_empty());
    if !text_columns.is_empty() {
        warn!(
            columns = %text_columns.iter().map(|(element, _)| element).join(", "),
            "skipping columns without numeric observations"
        );
    }
    info!(count = elements.len(), "sweeping elements");

    let outcomes: Vec<(String, ElementData, UnmixResult<UnmixSolution>)> = elements
        .into_par_iter()
        .map(|(element, observed)| {
            let outcome = problem.solve(&observed, export_rates, regularization_strength, settings);
            (element.to_string(), observed, outcome)
        })
        .collect();

    let mut results = Vec::with_capacity(outcomes.len());
    let mut skipped = Vec::new();
    for (element, observed, outcome) in outcomes {
        match outcome {
            Ok(solution) => results.push(ElementResult {
                element,
                observed,
                solution,
            }),
            Err(err) if err.is_solver_failure() => {
                warn!(%element, error = %err, "solve failed, skipping element");
                skipped.push(element);
            }
            Err(err) => return Err(err),
        }
    }
    if !skipped.is_empty() {
        warn!(skipped = %skipped.iter().join(", "), "elements without a solution");
    }
    Ok(results)
}

/// `count` strengths evenly spaced in log10 between the two exponents.
pub fn log_spaced(min_exponent: f64, max_exponent: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![10f64.powf(min_exponent)],
        _ => {
            let step = (max_exponent - min_exponent) / (count - 1) as f64;
            (0..count)
                .map(|k| 10f64.powf(min_exponent + step * k as f64))
                .collect()
        }
    }
}

/// Solve across a range of regularization strengths, recording the
/// misfit/roughness trade-off. Failed solves are skipped.
pub fn sweep_regularization(
    problem: &MixingProblem,
    observations: &ElementData,
    export_rates: Option<&ElementData>,
    strengths: &[f64],
    settings: &SolverSettings,
) -> UnmixResult<Vec<RegularizationTrial>> {
    let Some(&first) = strengths.first() else {
        return Ok(Vec::new());
    };
    // Surface configuration problems once instead of per trial
    problem.bind_inputs(observations, export_rates, Some(first))?;

    let outcomes: Vec<(f64, UnmixResult<UnmixSolution>)> = strengths
        .par_iter()
        .map(|&strength| {
            let outcome = problem.solve(observations, export_rates, Some(strength), settings);
            (strength, outcome)
        })
        .collect();

    let mut trials = Vec::with_capacity(outcomes.len());
    for (strength, outcome) in outcomes {
        match outcome {
            Ok(solution) => {
                info!(
                    strength,
                    misfit = solution.misfit,
                    roughness = solution.roughness,
                    "regularization trial"
                );
                trials.push(RegularizationTrial {
                    strength,
                    roughness: solution.roughness.unwrap_or(0.0),
                    misfit: solution.misfit,
                });
            }
            Err(err) if err.is_solver_failure() => {
                warn!(strength, error = %err, "skipping regularization trial");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(trials)
}
