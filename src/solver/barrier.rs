//! Primal log-barrier interior-point backend.
//!
//! After equality elimination the program lives over the free variables `z`.
//! Each norm gets an epigraph variable `t`, each ratio term an epigraph
//! variable `s`, giving
//!
//! ```text
//! minimise   t_p + λ · t_r
//! subject to s_j ≥ scale_j · x_j,  s_j · x_j ≥ reciprocal_scale_j
//!            t ≥ ‖(s, linear terms)‖₂
//!            z > 0
//! ```
//!
//! Every constraint is written `φ(y) > 0` for a quadratic `φ` and enforced by
//! the barrier `-log φ`. Centering uses damped Newton steps on a dense
//! Hessian; the barrier weight grows geometrically until the duality gap
//! bound falls below the tolerance.
//!
//! The regularizer cone couples every cell, so the Hessian is dense. This
//! backend is meant for discrete problems of a few hundred variables; larger
//! programs are refused and belong to the conic backend.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::presolve::{dot, ReducedProgram, ReducedTerm};
use super::{ConicProgram, ConvexSolver, SolverOutput};
use crate::error::SolverError;

const MIN_STEP: f64 = 1e-16;
const PURE_NEWTON_DECREMENT: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierSettings {
    /// Stop once the duality gap bound drops below this.
    pub tolerance: f64,
    /// Total Newton steps across all centering passes.
    pub max_iterations: usize,
    pub initial_barrier: f64,
    pub barrier_growth: f64,
    /// Centering ends when half the squared Newton decrement is below this.
    pub newton_tolerance: f64,
    /// Newton steps allowed within one centering pass.
    pub max_centering_steps: usize,
    /// Largest epigraph program (variables plus slacks) accepted.
    pub max_dimension: usize,
    pub line_search_alpha: f64,
    pub line_search_beta: f64,
}

impl Default for BarrierSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-7,
            max_iterations: 2000,
            initial_barrier: 1.0,
            barrier_growth: 16.0,
            newton_tolerance: 1e-9,
            max_centering_steps: 60,
            max_dimension: 400,
            line_search_alpha: 0.01,
            line_search_beta: 0.5,
        }
    }
}

/// `constant + Σ a_i y_i + Σ q_ij y_i y_j`
#[derive(Debug, Clone, Default)]
struct Quadratic {
    constant: f64,
    linear: Vec<(usize, f64)>,
    quadratic: Vec<(usize, usize, f64)>,
}

impl Quadratic {
    fn linear(linear: Vec<(usize, f64)>) -> Self {
        Self {
            linear,
            ..Self::default()
        }
    }

    fn value(&self, y: &[f64]) -> f64 {
        let linear: f64 = self.linear.iter().map(|&(i, a)| a * y[i]).sum();
        let quadratic: f64 = self.quadratic.iter().map(|&(i, j, q)| q * y[i] * y[j]).sum();
        self.constant + linear + quadratic
    }

    fn gradient(&self, y: &[f64]) -> Vec<(usize, f64)> {
        let mut g: BTreeMap<usize, f64> = BTreeMap::new();
        for &(i, a) in &self.linear {
            *g.entry(i).or_insert(0.0) += a;
        }
        for &(i, j, q) in &self.quadratic {
            *g.entry(i).or_insert(0.0) += q * y[j];
            *g.entry(j).or_insert(0.0) += q * y[i];
        }
        g.into_iter().collect()
    }
}

#[derive(Debug, Clone)]
struct Barrier {
    phi: Quadratic,
    degree: f64,
}

#[derive(Debug, Clone)]
struct BarrierProblem {
    cost: Vec<(usize, f64)>,
    barriers: Vec<Barrier>,
    start: Vec<f64>,
    degree: f64,
}

impl BarrierProblem {
    fn new(reduced: &ReducedProgram) -> Result<Self, SolverError> {
        let k = reduced.dimension();
        let z0 = vec![1.0; k];
        if !reduced.is_interior(&z0) {
            return Err(SolverError::Infeasible(
                "no strictly positive starting point".into(),
            ));
        }

        let mut start = z0.clone();
        let mut barriers: Vec<Barrier> = (0..k)
            .map(|slot| Barrier {
                phi: Quadratic::linear(vec![(slot, 1.0)]),
                degree: 1.0,
            })
            .collect();
        barriers.extend(reduced.extra_positive.iter().map(|row| Barrier {
            phi: Quadratic::linear(row.clone()),
            degree: 1.0,
        }));

        let mut cost = Vec::new();
        for (terms, weight) in [
            (&reduced.primary, 1.0),
            (&reduced.regularizer, reduced.regularization_strength),
        ] {
            if terms.is_empty() || weight <= 0.0 {
                continue;
            }

            let mut cone = Quadratic::default();
            let mut width_sq = 0.0;
            for term in terms {
                match term {
                    ReducedTerm::Ratio {
                        row,
                        scale,
                        reciprocal_scale,
                    } => {
                        let x = dot(row, &z0);
                        let s = start.len();
                        start.push((scale * x).max(reciprocal_scale / x) + 1.0);

                        let mut above_line = vec![(s, 1.0)];
                        above_line.extend(row.iter().map(|&(i, a)| (i, -scale * a)));
                        barriers.push(Barrier {
                            phi: Quadratic::linear(above_line),
                            degree: 1.0,
                        });
                        barriers.push(Barrier {
                            phi: Quadratic {
                                constant: -reciprocal_scale,
                                linear: Vec::new(),
                                quadratic: row.iter().map(|&(i, a)| (s, i, a)).collect(),
                            },
                            degree: 1.0,
                        });

                        cone.quadratic.push((s, s, -1.0));
                        width_sq += start[s] * start[s];
                    }
                    ReducedTerm::Linear { row } => {
                        for &(i, a) in row {
                            for &(j, b) in row {
                                cone.quadratic.push((i, j, -a * b));
                            }
                        }
                        width_sq += dot(row, &z0).powi(2);
                    }
                }
            }

            let t = start.len();
            start.push(width_sq.sqrt() + 1.0);
            cone.quadratic.push((t, t, 1.0));
            barriers.push(Barrier {
                phi: Quadratic::linear(vec![(t, 1.0)]),
                degree: 1.0,
            });
            barriers.push(Barrier {
                phi: cone,
                degree: 2.0,
            });
            cost.push((t, weight));
        }

        let degree = barriers.iter().map(|b| b.degree).sum();
        Ok(Self {
            cost,
            barriers,
            start,
            degree,
        })
    }

    fn is_feasible(&self, y: &[f64]) -> bool {
        self.barriers.iter().all(|b| b.phi.value(y) > 0.0)
    }

    /// `τ · cᵀy - Σ log φ(y)`, or `None` outside the barrier domain.
    fn centering_value(&self, tau: f64, y: &[f64]) -> Option<f64> {
        let mut value: f64 = self.cost.iter().map(|&(i, w)| tau * w * y[i]).sum();
        for barrier in &self.barriers {
            let phi = barrier.phi.value(y);
            if phi <= 0.0 || !phi.is_finite() {
                return None;
            }
            value -= phi.ln();
        }
        Some(value)
    }

    fn newton_system(&self, tau: f64, y: &[f64]) -> (DVector<f64>, DMatrix<f64>) {
        let n = y.len();
        let mut gradient = DVector::zeros(n);
        let mut hessian = DMatrix::zeros(n, n);
        for &(i, w) in &self.cost {
            gradient[i] += tau * w;
        }

        for barrier in &self.barriers {
            let phi = barrier.phi.value(y);
            let grad = barrier.phi.gradient(y);
            for &(i, gi) in &grad {
                gradient[i] -= gi / phi;
                for &(j, gj) in &grad {
                    hessian[(i, j)] += gi * gj / (phi * phi);
                }
            }
            for &(i, j, q) in &barrier.phi.quadratic {
                hessian[(i, j)] -= q / phi;
                hessian[(j, i)] -= q / phi;
            }
        }
        (gradient, hessian)
    }
}

fn newton_direction(
    hessian: DMatrix<f64>,
    gradient: &DVector<f64>,
) -> Result<DVector<f64>, SolverError> {
    let rhs = -gradient;
    let step = match hessian.clone().cholesky() {
        Some(cholesky) => cholesky.solve(&rhs),
        None => hessian
            .lu()
            .solve(&rhs)
            .ok_or_else(|| SolverError::Numerical("singular Newton system".into()))?,
    };
    if step.iter().all(|v| v.is_finite()) {
        Ok(step)
    } else {
        Err(SolverError::Numerical("non-finite Newton step".into()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct BarrierSolver {
    settings: BarrierSettings,
}

impl BarrierSolver {
    pub fn new(settings: BarrierSettings) -> Self {
        Self { settings }
    }

    fn minimize(&self, problem: &BarrierProblem) -> Result<(Vec<f64>, usize), SolverError> {
        let s = &self.settings;
        let mut y = problem.start.clone();
        let mut tau = s.initial_barrier;
        let mut iterations = 0;

        loop {
            let mut previous_sq = f64::INFINITY;
            for _ in 0..s.max_centering_steps {
                if iterations >= s.max_iterations {
                    return Err(SolverError::NotConverged { iterations });
                }
                iterations += 1;

                let (gradient, hessian) = problem.newton_system(tau, &y);
                let step = newton_direction(hessian, &gradient)?;
                let decrement_sq = -gradient.dot(&step);
                if decrement_sq / 2.0 <= s.newton_tolerance {
                    break;
                }
                // Full steps shrink the decrement quadratically; when they no
                // longer do, rounding dominates and the point is as central
                // as it will get at this weight.
                if decrement_sq.sqrt() < PURE_NEWTON_DECREMENT {
                    if decrement_sq > 0.5 * previous_sq {
                        trace!(tau, decrement_sq, "centering stalled");
                        break;
                    }
                    previous_sq = decrement_sq;
                } else {
                    previous_sq = f64::INFINITY;
                }
                match self.line_search(problem, tau, &y, &gradient, &step, decrement_sq) {
                    Some(next) => y = next,
                    None => {
                        trace!(tau, decrement_sq, "line search stalled");
                        break;
                    }
                }
            }

            let gap = problem.degree / tau;
            debug!(tau, gap, iterations, "centered");
            if gap < s.tolerance {
                return Ok((y, iterations));
            }
            tau *= s.barrier_growth;
        }
    }

    fn line_search(
        &self,
        problem: &BarrierProblem,
        tau: f64,
        y: &[f64],
        gradient: &DVector<f64>,
        step: &DVector<f64>,
        decrement_sq: f64,
    ) -> Option<Vec<f64>> {
        let advance =
            |t: f64| -> Vec<f64> { y.iter().zip(step.iter()).map(|(v, d)| v + t * d).collect() };

        // Inside the quadratic convergence region take the full step
        if decrement_sq.sqrt() < PURE_NEWTON_DECREMENT {
            let full = advance(1.0);
            if problem.is_feasible(&full) {
                return Some(full);
            }
        }

        let current = problem.centering_value(tau, y)?;
        let slope = gradient.dot(step);
        let mut t = 1.0;
        while t > MIN_STEP {
            let candidate = advance(t);
            if let Some(value) = problem.centering_value(tau, &candidate) {
                if value <= current + self.settings.line_search_alpha * t * slope {
                    return Some(candidate);
                }
            }
            t *= self.settings.line_search_beta;
        }
        None
    }
}

impl ConvexSolver for BarrierSolver {
    fn name(&self) -> &'static str {
        "barrier"
    }

    fn solve(&self, program: &ConicProgram) -> Result<SolverOutput, SolverError> {
        let reduced = ReducedProgram::new(program)?;
        let problem = BarrierProblem::new(&reduced)?;
        if problem.start.len() > self.settings.max_dimension {
            return Err(SolverError::Unsupported(format!(
                "{} barrier variables exceed the dense limit of {}",
                problem.start.len(),
                self.settings.max_dimension
            )));
        }
        let (y, iterations) = self.minimize(&problem)?;

        let values = reduced.lift(&y[..reduced.dimension()]);
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::Numerical("non-finite solution".into()));
        }
        let objective = program.objective(&values);
        debug!(
            objective,
            iterations,
            residual = program.max_equality_residual(&values),
            "barrier solve finished"
        );

        Ok(SolverOutput {
            values,
            objective,
            iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BoundTerm, LinearEquality};

    #[test]
    fn test_quadratic_gradient_counts_diagonal_twice() {
        let q = Quadratic {
            constant: 1.0,
            linear: vec![(0, 2.0)],
            quadratic: vec![(0, 0, 3.0), (0, 1, 1.0)],
        };
        let y = [2.0, 5.0];
        assert_eq!(q.value(&y), 1.0 + 4.0 + 12.0 + 10.0);
        assert_eq!(q.gradient(&y), vec![(0, 2.0 + 12.0 + 5.0), (1, 2.0)]);
    }

    #[test]
    fn test_single_ratio_minimised_at_observation() {
        // min max(x/4, 4/x) → x = 4
        let program = ConicProgram {
            variable_count: 1,
            equalities: vec![],
            primary: vec![BoundTerm::Ratio { variable: 0, scale: 0.25, reciprocal_scale: 4.0 }],
            regularizer: vec![],
            regularization_strength: 0.0,
        };
        let out = BarrierSolver::default().solve(&program).unwrap();
        assert!((out.values[0] - 4.0).abs() < 1e-5);
        assert!((out.objective - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_linked_ratios_balance() {
        // x1 = 2·x0 with observations 1 and 8 for x0 and x1: the optimum splits
        // the log-misfit evenly, x0 = 2, x1 = 4
        let program = ConicProgram {
            variable_count: 2,
            equalities: vec![LinearEquality { target: 1, terms: vec![(0, 2.0)] }],
            primary: vec![
                BoundTerm::Ratio { variable: 0, scale: 1.0, reciprocal_scale: 1.0 },
                BoundTerm::Ratio { variable: 1, scale: 0.125, reciprocal_scale: 8.0 },
            ],
            regularizer: vec![],
            regularization_strength: 0.0,
        };
        let out = BarrierSolver::default().solve(&program).unwrap();
        assert!((out.values[0] - 2.0).abs() < 1e-5);
        assert!((out.values[1] - 4.0).abs() < 1e-5);
        assert!((out.objective - 8f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_tight_tolerance_still_terminates() {
        // A Newton tolerance below the rounding floor of the decrement;
        // centering has to stop on stall rather than spin to the cap
        let program = ConicProgram {
            variable_count: 2,
            equalities: vec![LinearEquality { target: 1, terms: vec![(0, 2.0)] }],
            primary: vec![
                BoundTerm::Ratio { variable: 0, scale: 1.0, reciprocal_scale: 1.0 },
                BoundTerm::Ratio { variable: 1, scale: 0.125, reciprocal_scale: 8.0 },
            ],
            regularizer: vec![],
            regularization_strength: 0.0,
        };
        let solver = BarrierSolver::new(BarrierSettings {
            tolerance: 1e-9,
            newton_tolerance: 1e-12,
            ..BarrierSettings::default()
        });
        let out = solver.solve(&program).unwrap();
        assert!(out.iterations < 2000);
        assert!((out.values[0] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_large_program_is_refused() {
        let program = ConicProgram {
            variable_count: 3,
            equalities: vec![],
            primary: (0..3)
                .map(|v| BoundTerm::Ratio { variable: v, scale: 1.0, reciprocal_scale: 1.0 })
                .collect(),
            regularizer: vec![],
            regularization_strength: 0.0,
        };
        let solver = BarrierSolver::new(BarrierSettings {
            max_dimension: 4,
            ..BarrierSettings::default()
        });
        assert!(matches!(solver.solve(&program), Err(SolverError::Unsupported(_))));
    }

    #[test]
    fn test_iteration_cap_reports_not_converged() {
        let program = ConicProgram {
            variable_count: 1,
            equalities: vec![],
            primary: vec![BoundTerm::Ratio { variable: 0, scale: 1.0, reciprocal_scale: 1.0 }],
            regularizer: vec![],
            regularization_strength: 0.0,
        };
        let solver = BarrierSolver::new(BarrierSettings {
            max_iterations: 2,
            ..BarrierSettings::default()
        });
        assert!(matches!(
            solver.solve(&program),
            Err(SolverError::NotConverged { iterations: 2 })
        ));
    }
}
