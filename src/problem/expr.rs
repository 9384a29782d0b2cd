//! Expression building blocks for the mixing program.
//!
//! Every expression is linear in the optimization variables. Parameter-bearing
//! expressions ([`ParamAffine`]) multiply each variable by at most one
//! parameter, so binding parameters always yields a linear expression and the
//! same program structure can be re-solved under new bindings.

use std::ops::AddAssign;

use super::parameters::ParameterBindings;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(pub(crate) usize);

impl ParamId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// `Σ coefficient · variable`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinearExpr {
    terms: Vec<(VarId, f64)>,
}

impl LinearExpr {
    pub fn var(variable: VarId) -> Self {
        Self {
            terms: vec![(variable, 1.0)],
        }
    }

    /// Arithmetic mean of `variables`. Empty input gives the zero expression.
    pub fn mean(variables: &[VarId]) -> Self {
        let weight = 1.0 / variables.len().max(1) as f64;
        Self {
            terms: variables.iter().map(|&v| (v, weight)).collect(),
        }
    }

    /// `a - b`
    pub fn difference(a: VarId, b: VarId) -> Self {
        Self {
            terms: vec![(a, 1.0), (b, -1.0)],
        }
    }

    pub fn terms(&self) -> &[(VarId, f64)] {
        &self.terms
    }

    pub fn evaluate(&self, values: &[f64]) -> f64 {
        self.terms.iter().map(|(v, c)| c * values[v.0]).sum()
    }
}

/// `coefficient · [parameter] · variable`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamProduct {
    pub coefficient: f64,
    pub parameter: Option<ParamId>,
    pub variable: VarId,
}

/// Sum of parameter-times-variable products.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamAffine {
    products: Vec<ParamProduct>,
}

impl ParamAffine {
    pub fn var(variable: VarId) -> Self {
        Self::from_linear(&LinearExpr::var(variable))
    }

    pub fn from_linear(expr: &LinearExpr) -> Self {
        Self {
            products: expr
                .terms
                .iter()
                .map(|&(variable, coefficient)| ParamProduct {
                    coefficient,
                    parameter: None,
                    variable,
                })
                .collect(),
        }
    }

    pub fn scale(mut self, factor: f64) -> Self {
        for p in &mut self.products {
            p.coefficient *= factor;
        }
        self
    }

    /// Multiply by `parameter`. Products must not already carry a parameter:
    /// parameter × parameter terms cannot be re-bound as linear expressions.
    pub fn times_parameter(mut self, parameter: ParamId) -> Self {
        for p in &mut self.products {
            debug_assert!(
                p.parameter.is_none(),
                "parameter {:?} multiplied into product already scaled by {:?}",
                parameter,
                p.parameter
            );
            p.parameter = Some(parameter);
        }
        self
    }

    pub fn products(&self) -> &[ParamProduct] {
        &self.products
    }

    /// Substitute bound parameter values.
    pub fn bind(&self, bindings: &ParameterBindings) -> Result<Vec<(usize, f64)>, ConfigError> {
        self.products
            .iter()
            .map(|p| {
                let factor = match p.parameter {
                    Some(id) => bindings.require(id)?,
                    None => 1.0,
                };
                Ok((p.variable.0, p.coefficient * factor))
            })
            .collect()
    }
}

impl AddAssign for ParamAffine {
    fn add_assign(&mut self, rhs: Self) {
        self.products.extend(rhs.products);
    }
}
