//! Sparse interior-point backend on `clarabel`.
//!
//! The program goes to the solver whole, equalities included, in the
//! standard form `min qᵀy  s.t.  s = b - Ay ∈ K`. Each ratio term gets an
//! epigraph variable `r` and each norm an epigraph variable `t`:
//!
//! ```text
//! zero cone          x_target - Σ a_j x_j = 0
//! nonnegative cone   x ≥ 0,  r - scale · x ≥ 0
//! SOC(3) per ratio   ‖(2√β, r - x)‖ ≤ r + x          (r · x ≥ β)
//! SOC per norm       ‖(r…, linear terms…)‖ ≤ t
//! ```
//!
//! The constraint matrix stays as sparse as the network, so continuous
//! problems with many cells are fine here.

use clarabel::algebra::CscMatrix;
use clarabel::solver::{DefaultSettings, DefaultSolver, IPSolver, SolverStatus, SupportedConeT};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{BoundTerm, ConicProgram, ConvexSolver, SolverOutput};
use crate::error::SolverError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConicSettings {
    /// Absolute and relative duality gap.
    pub tolerance: f64,
    pub feasibility_tolerance: f64,
    pub max_iterations: u32,
}

impl Default for ConicSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-9,
            feasibility_tolerance: 1e-9,
            max_iterations: 200,
        }
    }
}

/// Rows of `s = b - Ay`, written as `s = constant + Σ coefficient · y`.
#[derive(Debug, Default)]
struct ConeRows {
    entries: Vec<(usize, usize, f64)>,
    b: Vec<f64>,
    cones: Vec<SupportedConeT<f64>>,
}

impl ConeRows {
    fn push_slack<I>(&mut self, expression: I, constant: f64)
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let row = self.b.len();
        self.entries.extend(
            expression
                .into_iter()
                .filter(|&(_, a)| a != 0.0)
                .map(|(col, a)| (row, col, -a)),
        );
        self.b.push(constant);
    }
}

/// One weighted norm of the objective and its epigraph columns.
struct NormBlock<'a> {
    terms: &'a [BoundTerm],
    weight: f64,
    /// Epigraph column of each ratio term, `None` for linear terms
    ratio_columns: Vec<Option<usize>>,
    bound: usize,
}

fn norm_blocks(program: &ConicProgram) -> (Vec<NormBlock<'_>>, usize) {
    let mut next = program.variable_count;
    let mut blocks = Vec::new();
    for (terms, weight) in [
        (program.primary.as_slice(), 1.0),
        (program.regularizer.as_slice(), program.regularization_strength),
    ] {
        if terms.is_empty() || weight <= 0.0 {
            continue;
        }
        let ratio_columns = terms
            .iter()
            .map(|term| match term {
                BoundTerm::Ratio { .. } => {
                    next += 1;
                    Some(next - 1)
                }
                BoundTerm::Linear(_) => None,
            })
            .collect();
        blocks.push(NormBlock {
            terms,
            weight,
            ratio_columns,
            bound: next,
        });
        next += 1;
    }
    (blocks, next)
}

fn ratio_terms<'a>(
    blocks: &'a [NormBlock<'a>],
) -> impl Iterator<Item = (usize, f64, f64, usize)> + 'a {
    blocks.iter().flat_map(|block| {
        block
            .terms
            .iter()
            .zip(&block.ratio_columns)
            .filter_map(|(term, column)| match (term, column) {
                (
                    BoundTerm::Ratio {
                        variable,
                        scale,
                        reciprocal_scale,
                    },
                    Some(r),
                ) => Some((*variable, *scale, *reciprocal_scale, *r)),
                _ => None,
            })
    })
}

fn assemble(program: &ConicProgram, blocks: &[NormBlock<'_>]) -> ConeRows {
    let n = program.variable_count;
    let mut rows = ConeRows::default();

    for eq in &program.equalities {
        let expression = std::iter::once((eq.target, 1.0))
            .chain(eq.terms.iter().map(|&(v, a)| (v, -a)));
        rows.push_slack(expression, 0.0);
    }
    if !program.equalities.is_empty() {
        rows.cones.push(SupportedConeT::ZeroConeT(program.equalities.len()));
    }

    let start = rows.b.len();
    for v in 0..n {
        rows.push_slack([(v, 1.0)], 0.0);
    }
    for (x, scale, _, r) in ratio_terms(blocks) {
        rows.push_slack([(r, 1.0), (x, -scale)], 0.0);
    }
    if rows.b.len() > start {
        rows.cones
            .push(SupportedConeT::NonnegativeConeT(rows.b.len() - start));
    }

    for (x, _, reciprocal_scale, r) in ratio_terms(blocks) {
        rows.push_slack([(r, 1.0), (x, 1.0)], 0.0);
        rows.push_slack(std::iter::empty(), 2.0 * reciprocal_scale.sqrt());
        rows.push_slack([(r, 1.0), (x, -1.0)], 0.0);
        rows.cones.push(SupportedConeT::SecondOrderConeT(3));
    }

    for block in blocks {
        rows.push_slack([(block.bound, 1.0)], 0.0);
        for (term, column) in block.terms.iter().zip(&block.ratio_columns) {
            match term {
                BoundTerm::Linear(expression) => rows.push_slack(expression.iter().copied(), 0.0),
                BoundTerm::Ratio { .. } => rows.push_slack(column.map(|r| (r, 1.0)), 0.0),
            }
        }
        rows.cones
            .push(SupportedConeT::SecondOrderConeT(block.terms.len() + 1));
    }

    rows
}

/// Compressed-column matrix from triplets; repeated entries are summed.
fn compressed_columns(
    rows: usize,
    cols: usize,
    mut entries: Vec<(usize, usize, f64)>,
) -> CscMatrix<f64> {
    entries.sort_by_key(|&(r, c, _)| (c, r));
    let mut colptr = vec![0; cols + 1];
    let mut rowval = Vec::with_capacity(entries.len());
    let mut nzval: Vec<f64> = Vec::with_capacity(entries.len());
    let mut last = None;
    for (r, c, v) in entries {
        if last == Some((r, c)) {
            if let Some(tail) = nzval.last_mut() {
                *tail += v;
            }
            continue;
        }
        last = Some((r, c));
        rowval.push(r);
        nzval.push(v);
        colptr[c + 1] += 1;
    }
    for c in 0..cols {
        colptr[c + 1] += colptr[c];
    }
    CscMatrix::new(rows, cols, colptr, rowval, nzval)
}

#[derive(Debug, Clone, Default)]
pub struct ConicSolver {
    settings: ConicSettings,
}

impl ConicSolver {
    pub fn new(settings: ConicSettings) -> Self {
        Self { settings }
    }
}

impl ConvexSolver for ConicSolver {
    fn name(&self) -> &'static str {
        "conic"
    }

    fn solve(&self, program: &ConicProgram) -> Result<SolverOutput, SolverError> {
        let (blocks, columns) = norm_blocks(program);
        let rows = assemble(program, &blocks);

        let mut q = vec![0.0; columns];
        for block in &blocks {
            q[block.bound] = block.weight;
        }
        let p = CscMatrix::new(columns, columns, vec![0; columns + 1], Vec::new(), Vec::new());
        let a = compressed_columns(rows.b.len(), columns, rows.entries);
        let settings = DefaultSettings {
            verbose: false,
            max_iter: self.settings.max_iterations,
            tol_gap_abs: self.settings.tolerance,
            tol_gap_rel: self.settings.tolerance,
            tol_feas: self.settings.feasibility_tolerance,
            ..DefaultSettings::default()
        };
        debug!(
            columns,
            rows = rows.b.len(),
            cones = rows.cones.len(),
            "conic program assembled"
        );

        let mut solver = DefaultSolver::new(&p, &q, &a, &rows.b, &rows.cones, settings);
        solver.solve();
        let solution = &solver.solution;
        let iterations = solution.iterations as usize;

        match solution.status {
            SolverStatus::Solved => {}
            SolverStatus::AlmostSolved => {
                warn!(iterations, "conic solve met only the reduced tolerances");
            }
            SolverStatus::PrimalInfeasible | SolverStatus::AlmostPrimalInfeasible => {
                return Err(SolverError::Infeasible(
                    "no positive point satisfies the equalities".into(),
                ));
            }
            SolverStatus::DualInfeasible | SolverStatus::AlmostDualInfeasible => {
                return Err(SolverError::Unsupported("objective is unbounded below".into()));
            }
            SolverStatus::MaxIterations => {
                return Err(SolverError::NotConverged { iterations });
            }
            other => {
                return Err(SolverError::Numerical(format!("clarabel stopped with {other:?}")));
            }
        }

        let values = solution.x[..program.variable_count].to_vec();
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SolverError::Numerical("non-finite solution".into()));
        }
        let objective = program.objective(&values);
        debug!(
            objective,
            iterations,
            residual = program.max_equality_residual(&values),
            "conic solve finished"
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
    use crate::solver::LinearEquality;

    fn ratio(variable: usize, observed: f64) -> BoundTerm {
        BoundTerm::Ratio {
            variable,
            scale: 1.0 / observed,
            reciprocal_scale: observed,
        }
    }

    #[test]
    fn test_compressed_columns_sums_repeats() {
        let m = compressed_columns(2, 2, vec![(1, 0, 2.0), (0, 1, 1.0), (1, 0, 3.0)]);
        assert_eq!(m.colptr, vec![0, 1, 2]);
        assert_eq!(m.rowval, vec![1, 0]);
        assert_eq!(m.nzval, vec![5.0, 1.0]);
    }

    #[test]
    fn test_single_ratio_minimised_at_observation() {
        let program = ConicProgram {
            variable_count: 1,
            equalities: vec![],
            primary: vec![ratio(0, 4.0)],
            regularizer: vec![],
            regularization_strength: 0.0,
        };
        let out = ConicSolver::default().solve(&program).unwrap();
        assert!((out.values[0] - 4.0).abs() < 1e-6);
        assert!((out.objective - 1.0).abs() < 1e-7);
    }

    #[test]
    fn test_linked_ratios_balance() {
        // x1 = 2·x0 against observations 1 and 8: x0 = 2, x1 = 4
        let program = ConicProgram {
            variable_count: 2,
            equalities: vec![LinearEquality { target: 1, terms: vec![(0, 2.0)] }],
            primary: vec![ratio(0, 1.0), ratio(1, 8.0)],
            regularizer: vec![],
            regularization_strength: 0.0,
        };
        let out = ConicSolver::default().solve(&program).unwrap();
        assert!((out.values[0] - 2.0).abs() < 1e-6);
        assert!((out.values[1] - 4.0).abs() < 1e-6);
        assert!(program.max_equality_residual(&out.values) < 1e-8);
    }

    #[test]
    fn test_linear_regularizer_pulls_values_together() {
        let program = ConicProgram {
            variable_count: 2,
            equalities: vec![],
            primary: vec![ratio(0, 1.0), ratio(1, 4.0)],
            regularizer: vec![BoundTerm::Linear(vec![(0, 1.0), (1, -1.0)])],
            regularization_strength: 10.0,
        };
        let out = ConicSolver::default().solve(&program).unwrap();
        assert!((out.values[0] - out.values[1]).abs() < 1e-5);
        assert!(out.values[0] > 1.0 && out.values[0] < 4.0);
    }
}
