//! Equality elimination.
//!
//! Every equality defines one variable in terms of others. Substituting them
//! recursively leaves a program over the undefined ("free") variables only,
//! with every original variable an explicit linear function of those.

use std::collections::BTreeMap;

use super::program::{BoundTerm, ConicProgram, LinearEquality};
use crate::error::SolverError;

/// Linear function of the free variables, as `(slot, coefficient)` pairs.
pub(crate) type SparseRow = Vec<(usize, f64)>;

pub(crate) fn dot(row: &[(usize, f64)], z: &[f64]) -> f64 {
    row.iter().map(|&(i, a)| a * z[i]).sum()
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReducedTerm {
    Ratio {
        row: SparseRow,
        scale: f64,
        reciprocal_scale: f64,
    },
    Linear {
        row: SparseRow,
    },
}

impl ReducedTerm {
    pub(crate) fn evaluate(&self, z: &[f64]) -> f64 {
        match self {
            ReducedTerm::Ratio {
                row,
                scale,
                reciprocal_scale,
            } => {
                let x = dot(row, z);
                (scale * x).max(reciprocal_scale / x)
            }
            ReducedTerm::Linear { row } => dot(row, z),
        }
    }

    /// A subgradient, accumulated into `out` with weight `weight`.
    fn add_subgradient(&self, z: &[f64], weight: f64, out: &mut [f64]) {
        let (row, slope) = match self {
            ReducedTerm::Ratio {
                row,
                scale,
                reciprocal_scale,
            } => {
                let x = dot(row, z);
                if scale * x >= reciprocal_scale / x {
                    (row, *scale)
                } else {
                    (row, -reciprocal_scale / (x * x))
                }
            }
            ReducedTerm::Linear { row } => (row, 1.0),
        };
        for &(i, a) in row {
            out[i] += weight * slope * a;
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ReducedProgram {
    /// Program variable index of each free slot.
    pub free: Vec<usize>,
    /// Representation of every program variable over the free slots.
    pub rows: Vec<SparseRow>,
    pub primary: Vec<ReducedTerm>,
    pub regularizer: Vec<ReducedTerm>,
    pub regularization_strength: f64,
    /// Derived variables whose positivity does not follow from `z > 0`.
    pub extra_positive: Vec<SparseRow>,
}

impl ReducedProgram {
    pub(crate) fn new(program: &ConicProgram) -> Result<Self, SolverError> {
        let n = program.variable_count;
        let mut definitions: Vec<Option<&LinearEquality>> = vec![None; n];
        for eq in &program.equalities {
            check_index(eq.target, n)?;
            for &(v, _) in &eq.terms {
                check_index(v, n)?;
            }
            if definitions[eq.target].replace(eq).is_some() {
                return Err(SolverError::Unsupported(format!(
                    "variable {} defined by more than one equality",
                    eq.target
                )));
            }
        }

        let free: Vec<usize> = (0..n).filter(|&v| definitions[v].is_none()).collect();
        let mut slot_of = vec![None; n];
        for (slot, &v) in free.iter().enumerate() {
            slot_of[v] = Some(slot);
        }

        let mut resolved: Vec<Option<SparseRow>> = vec![None; n];
        let mut visiting = vec![false; n];
        for v in 0..n {
            resolve(v, &definitions, &slot_of, &mut resolved, &mut visiting)?;
        }
        let rows: Vec<SparseRow> = resolved.into_iter().flatten().collect();

        let mut extra_positive = Vec::new();
        for (v, row) in rows.iter().enumerate() {
            if slot_of[v].is_some() {
                continue;
            }
            if row.is_empty() {
                return Err(SolverError::Infeasible(format!(
                    "variable {v} is fixed at zero but must be positive"
                )));
            }
            if row.iter().any(|&(_, a)| a <= 0.0) {
                extra_positive.push(row.clone());
            }
        }

        let reduce = |terms: &[BoundTerm]| -> Result<Vec<ReducedTerm>, SolverError> {
            terms
                .iter()
                .map(|term| {
                    Ok(match term {
                        BoundTerm::Ratio {
                            variable,
                            scale,
                            reciprocal_scale,
                        } => {
                            check_index(*variable, n)?;
                            ReducedTerm::Ratio {
                                row: rows[*variable].clone(),
                                scale: *scale,
                                reciprocal_scale: *reciprocal_scale,
                            }
                        }
                        BoundTerm::Linear(terms) => {
                            let mut acc = BTreeMap::new();
                            for &(v, c) in terms {
                                check_index(v, n)?;
                                for &(slot, a) in &rows[v] {
                                    *acc.entry(slot).or_insert(0.0) += c * a;
                                }
                            }
                            ReducedTerm::Linear {
                                row: acc.into_iter().filter(|&(_, a)| a != 0.0).collect(),
                            }
                        }
                    })
                })
                .collect()
        };

        let primary = reduce(&program.primary)?;
        let regularizer = if program.regularization_strength > 0.0 {
            reduce(&program.regularizer)?
        } else {
            Vec::new()
        };

        Ok(Self {
            free,
            rows,
            primary,
            regularizer,
            regularization_strength: program.regularization_strength,
            extra_positive,
        })
    }

    pub(crate) fn dimension(&self) -> usize {
        self.free.len()
    }

    /// Program variables for free values `z`.
    pub(crate) fn lift(&self, z: &[f64]) -> Vec<f64> {
        self.rows.iter().map(|row| dot(row, z)).collect()
    }

    pub(crate) fn is_interior(&self, z: &[f64]) -> bool {
        z.iter().all(|&v| v > 0.0) && self.extra_positive.iter().all(|row| dot(row, z) > 0.0)
    }

    /// Objective value and one subgradient at `z`.
    pub(crate) fn objective_and_subgradient(&self, z: &[f64]) -> (f64, Vec<f64>) {
        let mut gradient = vec![0.0; z.len()];
        let mut objective = 0.0;
        for (terms, weight) in [
            (&self.primary, 1.0),
            (&self.regularizer, self.regularization_strength),
        ] {
            if terms.is_empty() || weight == 0.0 {
                continue;
            }
            let values: Vec<f64> = terms.iter().map(|t| t.evaluate(z)).collect();
            let length = values.iter().map(|v| v * v).sum::<f64>().sqrt();
            objective += weight * length;
            if length > 0.0 {
                for (term, value) in terms.iter().zip(&values) {
                    term.add_subgradient(z, weight * value / length, &mut gradient);
                }
            }
        }
        (objective, gradient)
    }
}

fn check_index(v: usize, n: usize) -> Result<(), SolverError> {
    if v < n {
        Ok(())
    } else {
        Err(SolverError::Unsupported(format!(
            "variable index {v} out of range for {n} variables"
        )))
    }
}

fn resolve(
    v: usize,
    definitions: &[Option<&LinearEquality>],
    slot_of: &[Option<usize>],
    resolved: &mut [Option<SparseRow>],
    visiting: &mut [bool],
) -> Result<(), SolverError> {
    if resolved[v].is_some() {
        return Ok(());
    }
    if visiting[v] {
        return Err(SolverError::Unsupported(format!(
            "cyclic equality constraints through variable {v}"
        )));
    }
    visiting[v] = true;

    let row = match (definitions[v], slot_of[v]) {
        (None, Some(slot)) => vec![(slot, 1.0)],
        (Some(eq), _) => {
            let mut acc = BTreeMap::new();
            for &(u, c) in &eq.terms {
                resolve(u, definitions, slot_of, resolved, visiting)?;
                if let Some(row) = &resolved[u] {
                    for &(slot, a) in row {
                        *acc.entry(slot).or_insert(0.0) += c * a;
                    }
                }
            }
            acc.into_iter().filter(|&(_, a)| a != 0.0).collect()
        }
        (None, None) => {
            return Err(SolverError::Unsupported(format!(
                "variable {v} is neither free nor defined"
            )))
        }
    };

    resolved[v] = Some(row);
    visiting[v] = false;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> ConicProgram {
        // x2 = 3·x0 + x1, x3 = 0.5·x2
        ConicProgram {
            variable_count: 4,
            equalities: vec![
                LinearEquality { target: 3, terms: vec![(2, 0.5)] },
                LinearEquality { target: 2, terms: vec![(0, 3.0), (1, 1.0)] },
            ],
            primary: vec![BoundTerm::Ratio { variable: 3, scale: 1.0, reciprocal_scale: 1.0 }],
            regularizer: vec![],
            regularization_strength: 0.0,
        }
    }

    #[test]
    fn test_substitution_through_chain() {
        let reduced = ReducedProgram::new(&chain()).unwrap();
        assert_eq!(reduced.free, vec![0, 1]);
        assert_eq!(reduced.rows[3], vec![(0, 1.5), (1, 0.5)]);
        assert!(reduced.extra_positive.is_empty());

        let x = reduced.lift(&[1.0, 2.0]);
        assert_eq!(x, vec![1.0, 2.0, 5.0, 2.5]);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut program = chain();
        program.equalities.push(LinearEquality { target: 0, terms: vec![(3, 1.0)] });
        assert!(matches!(ReducedProgram::new(&program), Err(SolverError::Unsupported(_))));
    }

    #[test]
    fn test_duplicate_definition_rejected() {
        let mut program = chain();
        program.equalities.push(LinearEquality { target: 3, terms: vec![(0, 1.0)] });
        assert!(matches!(ReducedProgram::new(&program), Err(SolverError::Unsupported(_))));
    }

    #[test]
    fn test_subgradient_of_unit_ratio() {
        let reduced = ReducedProgram::new(&chain()).unwrap();
        // x3 = 1.5·1 + 0.5·1 = 2 → term value 2, slope 1 on x3
        let (value, gradient) = reduced.objective_and_subgradient(&[1.0, 1.0]);
        assert_eq!(value, 2.0);
        assert_eq!(gradient, vec![1.5, 0.5]);
    }

    #[test]
    fn test_negative_coefficient_needs_explicit_positivity() {
        let program = ConicProgram {
            variable_count: 3,
            equalities: vec![LinearEquality { target: 2, terms: vec![(0, 1.0), (1, -1.0)] }],
            primary: vec![BoundTerm::Linear(vec![(2, 1.0)])],
            regularizer: vec![],
            regularization_strength: 0.0,
        };
        let reduced = ReducedProgram::new(&program).unwrap();
        assert_eq!(reduced.extra_positive, vec![vec![(0, 1.0), (1, -1.0)]]);
        assert!(!reduced.is_interior(&[1.0, 2.0]));
    }
}
