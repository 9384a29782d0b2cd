//! Kelley cutting-plane backend on top of `good_lp`.
//!
//! Each iteration evaluates the objective and a subgradient at the current
//! point and adds the supporting hyperplane to a piecewise-linear model. The
//! model's minimum over the search box, found by linear programming, is the
//! next point and a certified lower bound on the optimum.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::presolve::{ReducedProgram, SparseRow};
use super::{ConicProgram, ConvexSolver, SolverOutput};
use crate::error::SolverError;

#[cfg(feature = "lp")]
use good_lp::{
    constraint, solvers::minilp::minilp, variable, Expression, ProblemVariables, Solution,
    SolverModel, Variable,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuttingPlaneSettings {
    /// Relative gap between best value and model bound.
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Search box for every free variable.
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl CuttingPlaneSettings {
    fn on_boundary(&self, z: f64) -> bool {
        const SLACK: f64 = 1e-9;
        z <= self.lower_bound * (1.0 + SLACK) || z >= self.upper_bound * (1.0 - SLACK)
    }
}

impl Default for CuttingPlaneSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 500,
            lower_bound: 1e-4,
            upper_bound: 1e4,
        }
    }
}

/// `θ ≥ value + gradient · (z - point)`, stored as `gradient · z - θ ≤ rhs`.
#[derive(Debug, Clone)]
struct Cut {
    gradient: Vec<f64>,
    rhs: f64,
}

impl Cut {
    fn new(value: f64, gradient: Vec<f64>, point: &[f64]) -> Self {
        let shift: f64 = gradient.iter().zip(point).map(|(g, z)| g * z).sum();
        Self {
            rhs: shift - value,
            gradient,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CuttingPlaneSolver {
    settings: CuttingPlaneSettings,
}

impl CuttingPlaneSolver {
    pub fn new(settings: CuttingPlaneSettings) -> Self {
        Self { settings }
    }

    fn minimize(&self, reduced: &ReducedProgram) -> Result<(Vec<f64>, f64, usize), SolverError> {
        let s = &self.settings;
        let mut point = vec![1.0_f64.clamp(s.lower_bound, s.upper_bound); reduced.dimension()];
        if !reduced.is_interior(&point) {
            return Err(SolverError::Infeasible(
                "no strictly positive starting point".into(),
            ));
        }

        let mut cuts = Vec::new();
        let mut best = (f64::INFINITY, point.clone());
        for iteration in 1..=s.max_iterations {
            let (value, gradient) = reduced.objective_and_subgradient(&point);
            if !value.is_finite() {
                return Err(SolverError::Numerical(format!(
                    "objective not finite at iteration {iteration}"
                )));
            }
            if value < best.0 {
                best = (value, point.clone());
            }
            cuts.push(Cut::new(value, gradient, &point));

            let (next, lower) = solve_master(&cuts, &reduced.extra_positive, s)?;
            let gap = best.0 - lower;
            debug!(iteration, upper = best.0, lower, gap, "cutting-plane iteration");
            if gap <= s.tolerance * best.0.abs().max(1.0) {
                let (value, point) = best;
                // The box is not part of the program; a minimiser pinned to it
                // is an artefact of the search range
                if let Some(slot) = point.iter().position(|&z| s.on_boundary(z)) {
                    warn!(slot, value = point[slot], "cutting-plane minimiser on the search box");
                    return Err(SolverError::NotConverged {
                        iterations: iteration,
                    });
                }
                return Ok((point, value, iteration));
            }
            point = next;
        }

        warn!(
            iterations = s.max_iterations,
            best = best.0,
            "cutting-plane method hit the iteration cap"
        );
        Err(SolverError::NotConverged {
            iterations: s.max_iterations,
        })
    }
}

/// Minimise the cut model over the box. Returns the minimiser and the model
/// value there.
#[cfg(feature = "lp")]
fn solve_master(
    cuts: &[Cut],
    positive: &[SparseRow],
    settings: &CuttingPlaneSettings,
) -> Result<(Vec<f64>, f64), SolverError> {
    let dimension = cuts.first().map(|c| c.gradient.len()).unwrap_or(0);
    let mut vars = ProblemVariables::new();
    let z: Vec<Variable> = (0..dimension)
        .map(|_| vars.add(variable().min(settings.lower_bound).max(settings.upper_bound)))
        .collect();
    let theta = vars.add(variable());

    let mut model = vars.minimise(theta).using(minilp);
    for cut in cuts {
        let lhs: Expression = cut
            .gradient
            .iter()
            .zip(&z)
            .filter(|(g, _)| **g != 0.0)
            .map(|(&g, &v)| g * v)
            .sum();
        let rhs = cut.rhs;
        model = model.with(constraint!(lhs - theta <= rhs));
    }
    let floor = settings.lower_bound;
    for row in positive {
        let expr: Expression = row.iter().map(|&(i, a)| a * z[i]).sum();
        model = model.with(constraint!(expr >= floor));
    }

    let solution = model
        .solve()
        .map_err(|e| SolverError::Backend(e.to_string()))?;
    let point = z.iter().map(|&v| solution.value(v)).collect();
    Ok((point, solution.value(theta)))
}

#[cfg(not(feature = "lp"))]
fn solve_master(
    _cuts: &[Cut],
    _positive: &[SparseRow],
    _settings: &CuttingPlaneSettings,
) -> Result<(Vec<f64>, f64), SolverError> {
    Err(SolverError::Unavailable(
        "cutting-plane backend requires the `lp` feature",
    ))
}

impl ConvexSolver for CuttingPlaneSolver {
    fn name(&self) -> &'static str {
        "cutting_plane"
    }

    fn solve(&self, program: &ConicProgram) -> Result<SolverOutput, SolverError> {
        let reduced = ReducedProgram::new(program)?;
        let (z, _, iterations) = self.minimize(&reduced)?;
        let values = reduced.lift(&z);
        let objective = program.objective(&values);
        debug!(objective, iterations, "cutting-plane solve finished");

        Ok(SolverOutput {
            values,
            objective,
            iterations,
        })
    }
}
