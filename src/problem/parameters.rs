use super::expr::ParamId;
use crate::error::ConfigError;

/// Values bound to a problem's parameters for a single solve.
///
/// The problem structure only holds parameter ids; every solve owns its own
/// bindings, so concurrent solves never share mutable state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterBindings {
    values: Vec<Option<f64>>,
}

impl ParameterBindings {
    pub fn new(count: usize) -> Self {
        Self {
            values: vec![None; count],
        }
    }

    pub fn get(&self, id: ParamId) -> Option<f64> {
        self.values.get(id.0).copied().flatten()
    }

    pub fn set(&mut self, id: ParamId, value: Option<f64>) {
        if id.0 >= self.values.len() {
            self.values.resize(id.0 + 1, None);
        }
        self.values[id.0] = value;
    }

    pub fn require(&self, id: ParamId) -> Result<f64, ConfigError> {
        self.get(id).ok_or(ConfigError::UnboundParameter(id.0))
    }
}

/// A parameter and its reciprocal, kept consistent.
///
/// Lets an expression use both `v` and `1/v` while each stays a plain
/// parameter, so no division by a parameter ever reaches the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReciprocalParameter {
    value: ParamId,
    reciprocal: ParamId,
}

impl ReciprocalParameter {
    pub(crate) fn new(value: ParamId, reciprocal: ParamId) -> Self {
        Self { value, reciprocal }
    }

    pub fn value_id(&self) -> ParamId {
        self.value
    }

    pub fn reciprocal_id(&self) -> ParamId {
        self.reciprocal
    }

    /// Bind `v` and `1/v`; `None` clears both slots.
    pub fn set(&self, bindings: &mut ParameterBindings, value: Option<f64>) {
        bindings.set(self.value, value);
        bindings.set(self.reciprocal, value.map(|v| 1.0 / v));
    }

    /// Bind through the reciprocal slot.
    pub fn set_reciprocal(&self, bindings: &mut ParameterBindings, reciprocal: Option<f64>) {
        bindings.set(self.reciprocal, reciprocal);
        bindings.set(self.value, reciprocal.map(|r| 1.0 / r));
    }

    pub fn value(&self, bindings: &ParameterBindings) -> Option<f64> {
        bindings.get(self.value)
    }

    pub fn reciprocal(&self, bindings: &ParameterBindings) -> Option<f64> {
        bindings.get(self.reciprocal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pair() -> (ReciprocalParameter, ParameterBindings) {
        (
            ReciprocalParameter::new(ParamId(0), ParamId(1)),
            ParameterBindings::new(2),
        )
    }

    #[test]
    fn test_unassigned_pair_is_empty() {
        let (p, bindings) = pair();
        assert_eq!(p.value(&bindings), None);
        assert_eq!(p.reciprocal(&bindings), None);
    }

    #[test]
    fn test_clearing_resets_both_slots() {
        let (p, mut bindings) = pair();
        p.set(&mut bindings, Some(4.0));
        p.set(&mut bindings, None);
        assert_eq!(p.value(&bindings), None);
        assert_eq!(p.reciprocal(&bindings), None);
    }

    #[test]
    fn test_setting_reciprocal_determines_value() {
        let (p, mut bindings) = pair();
        p.set_reciprocal(&mut bindings, Some(0.25));
        assert_eq!(p.value(&bindings), Some(4.0));
    }

    proptest! {
        #[test]
        fn prop_reciprocal_is_exact(v in prop::num::f64::NORMAL) {
            let (p, mut bindings) = pair();
            p.set(&mut bindings, Some(v));
            prop_assert_eq!(p.value(&bindings), Some(v));
            prop_assert_eq!(p.reciprocal(&bindings), Some(1.0 / v));
        }
    }
}
