//! Numeric program handed to a solver backend.
//!
//! ```text
//! minimise   ‖primary(x)‖₂ + λ · ‖regularizer(x)‖₂
//! subject to x_target = Σ a_j · x_j     (each equality)
//!            x > 0
//! ```

/// One entry of a norm, bound to concrete numbers.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundTerm {
    /// `max(scale · x, reciprocal_scale / x)`, convex for positive `x`.
    Ratio {
        variable: usize,
        scale: f64,
        reciprocal_scale: f64,
    },
    /// `Σ a_j · x_j`
    Linear(Vec<(usize, f64)>),
}

impl BoundTerm {
    pub fn evaluate(&self, values: &[f64]) -> f64 {
        match self {
            BoundTerm::Ratio {
                variable,
                scale,
                reciprocal_scale,
            } => {
                let x = values[*variable];
                (scale * x).max(reciprocal_scale / x)
            }
            BoundTerm::Linear(terms) => terms.iter().map(|&(v, a)| a * values[v]).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearEquality {
    pub target: usize,
    pub terms: Vec<(usize, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConicProgram {
    pub variable_count: usize,
    pub equalities: Vec<LinearEquality>,
    pub primary: Vec<BoundTerm>,
    /// Empty when the strength is 0.
    pub regularizer: Vec<BoundTerm>,
    pub regularization_strength: f64,
}

impl ConicProgram {
    pub fn misfit(&self, values: &[f64]) -> f64 {
        norm(self.primary.iter().map(|t| t.evaluate(values)))
    }

    pub fn roughness(&self, values: &[f64]) -> f64 {
        norm(self.regularizer.iter().map(|t| t.evaluate(values)))
    }

    pub fn objective(&self, values: &[f64]) -> f64 {
        let mut objective = self.misfit(values);
        if self.regularization_strength > 0.0 && !self.regularizer.is_empty() {
            objective += self.regularization_strength * self.roughness(values);
        }
        objective
    }

    /// Largest absolute violation over all equalities.
    pub fn max_equality_residual(&self, values: &[f64]) -> f64 {
        self.equalities
            .iter()
            .map(|eq| {
                let rhs: f64 = eq.terms.iter().map(|&(v, a)| a * values[v]).sum();
                (values[eq.target] - rhs).abs()
            })
            .fold(0.0, f64::max)
    }
}

pub(crate) fn norm(values: impl Iterator<Item = f64>) -> f64 {
    values.map(|v| v * v).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(strength: f64) -> ConicProgram {
        ConicProgram {
            variable_count: 2,
            equalities: vec![LinearEquality {
                target: 1,
                terms: vec![(0, 2.0)],
            }],
            primary: vec![BoundTerm::Ratio {
                variable: 1,
                scale: 0.5,
                reciprocal_scale: 2.0,
            }],
            regularizer: vec![BoundTerm::Linear(vec![(0, 1.0), (1, -1.0)])],
            regularization_strength: strength,
        }
    }

    #[test]
    fn test_objective_combines_norms() {
        let p = program(0.5);
        let x = [1.0, 2.0];
        assert_eq!(p.misfit(&x), 1.0);
        assert_eq!(p.roughness(&x), 1.0);
        assert_eq!(p.objective(&x), 1.5);
        assert_eq!(p.max_equality_residual(&x), 0.0);
    }

    #[test]
    fn test_zero_strength_ignores_regularizer() {
        let p = program(0.0);
        assert_eq!(p.objective(&[1.0, 4.0]), p.misfit(&[1.0, 4.0]));
    }
}
