//! Objective terms and equality constraints, before parameter binding.

use super::expr::{LinearExpr, ParamAffine, VarId};
use super::parameters::{ParameterBindings, ReciprocalParameter};
use crate::error::ConfigError;
use crate::solver::{BoundTerm, LinearEquality};

/// Convex stand-in for `|log(a / b)|`: `max(a / b, b / a)`.
///
/// Both share their minimiser (`a == b`) and grow monotonically with the
/// log-ratio, but the surrogate is convex in each argument over the positive
/// reals.
pub fn log_ratio_surrogate(a: f64, b: f64) -> f64 {
    (a / b).max(b / a)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// `max(x / o, o / x)` against an observed ratio `o`, written as
    /// `max(x · (1/o), o · x⁻¹)` so both factors are plain parameters.
    LogRatio {
        variable: VarId,
        observed: ReciprocalParameter,
    },
    /// `max(x, 1/x)`: deviation of `x` from unity.
    UnitRatio { variable: VarId },
    Linear(LinearExpr),
}

impl Term {
    pub fn bind(&self, bindings: &ParameterBindings) -> Result<BoundTerm, ConfigError> {
        Ok(match self {
            Term::LogRatio { variable, observed } => BoundTerm::Ratio {
                variable: variable.index(),
                scale: bindings.require(observed.reciprocal_id())?,
                reciprocal_scale: bindings.require(observed.value_id())?,
            },
            Term::UnitRatio { variable } => BoundTerm::Ratio {
                variable: variable.index(),
                scale: 1.0,
                reciprocal_scale: 1.0,
            },
            Term::Linear(expr) => BoundTerm::Linear(
                expr.terms().iter().map(|&(v, c)| (v.index(), c)).collect(),
            ),
        })
    }
}

/// `target == expression`
#[derive(Debug, Clone, PartialEq)]
pub struct Equality {
    pub target: VarId,
    pub expression: ParamAffine,
}

impl Equality {
    pub fn bind(&self, bindings: &ParameterBindings) -> Result<LinearEquality, ConfigError> {
        Ok(LinearEquality {
            target: self.target.index(),
            terms: self.expression.bind(bindings)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::expr::ParamId;
    use proptest::prelude::*;

    #[test]
    fn test_log_ratio_binds_both_scales() {
        let observed = ReciprocalParameter::new(ParamId(0), ParamId(1));
        let mut bindings = ParameterBindings::new(2);
        observed.set(&mut bindings, Some(4.0));

        let term = Term::LogRatio { variable: VarId(3), observed };
        assert_eq!(
            term.bind(&bindings).unwrap(),
            BoundTerm::Ratio { variable: 3, scale: 0.25, reciprocal_scale: 4.0 }
        );
    }

    #[test]
    fn test_bound_ratio_matches_surrogate() {
        let term = BoundTerm::Ratio { variable: 0, scale: 0.25, reciprocal_scale: 4.0 };
        assert!((term.evaluate(&[2.0]) - log_ratio_surrogate(2.0, 4.0)).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn prop_surrogate_is_symmetric_and_at_least_one(a in 1e-6f64..1e6, b in 1e-6f64..1e6) {
            let forward = log_ratio_surrogate(a, b);
            prop_assert!(forward >= 1.0);
            prop_assert_eq!(forward, log_ratio_surrogate(b, a));
        }

        #[test]
        fn prop_surrogate_is_one_only_on_agreement(a in 1e-6f64..1e6, factor in 1.0001f64..1e3) {
            prop_assert_eq!(log_ratio_surrogate(a, a), 1.0);
            prop_assert!(log_ratio_surrogate(a, a * factor) > 1.0);
            prop_assert!(log_ratio_surrogate(a * factor, a) > 1.0);
        }
    }
}
