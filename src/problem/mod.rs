//! # Mixing Problem
//!
//! Parameterized convex program for recovering upstream tracer
//! concentrations from downstream observations.
//!
//! The forward model `ĉ = T / F` is non-convex in the unknowns. It is
//! reformulated with two auxiliary variables per node:
//!
//! - `T̂` (tracer flux) tied by equality to the accumulated
//!   `Σ relative_area · export_rate · tracer` over the upstream closure
//! - `ĉ` (normalized concentration) tied by equality to `T̂ · (1/F)`
//!
//! `1/F` is a parameter, so both constraints stay linear. The misfit compares
//! `ĉ` to the observation with the surrogate `max(ĉ/o, o/ĉ)`, which is convex
//! because `o` and `1/o` also enter only as parameters.
//!
//! Parameters (observations, export rates, total fluxes and the
//! regularization strength) are bound per solve through
//! [`ParameterBindings`], leaving the assembled structure immutable.

mod assembler;
pub mod expr;
pub mod parameters;
pub mod terms;

pub use assembler::MixingProblemBuilder;
pub use expr::{LinearExpr, ParamAffine, ParamId, VarId};
pub use parameters::{ParameterBindings, ReciprocalParameter};
pub use terms::{log_ratio_surrogate, Equality, Term};

use crate::error::ConfigError;
use crate::grid::InverseGrid;
use crate::network::{accumulate, SampleNetwork};
use crate::solver::ConicProgram;
use crate::ElementData;

/// How source concentrations are represented.
#[derive(Debug, Clone)]
pub enum Formulation {
    /// One tracer variable per sample site.
    Discrete { tracer: Vec<VarId> },
    /// One tracer variable per inside grid cell. A site's concentration is
    /// the mean over the cells it owns.
    Continuous {
        grid: InverseGrid,
        cell_variables: Vec<Option<VarId>>,
    },
}

#[derive(Debug, Clone)]
pub struct MixingProblem {
    network: SampleNetwork,
    formulation: Formulation,
    variable_count: usize,
    parameter_count: usize,
    export_rates: Vec<ParamId>,
    total_fluxes: Vec<ReciprocalParameter>,
    observations: Vec<ReciprocalParameter>,
    regularization_strength: ParamId,
    tracer_flux: Vec<VarId>,
    normalized_concentration: Vec<VarId>,
    primary_terms: Vec<Term>,
    regularizer_terms: Vec<Term>,
    constraints: Vec<Equality>,
}

/// Parameter values bound for one solve, with the scale that maps the
/// normalized solution back to observation units.
#[derive(Debug, Clone)]
pub struct BoundInputs {
    pub bindings: ParameterBindings,
    pub observation_scale: f64,
}

impl MixingProblem {
    pub fn builder(network: SampleNetwork) -> MixingProblemBuilder {
        MixingProblemBuilder::new(network)
    }

    pub fn network(&self) -> &SampleNetwork {
        &self.network
    }

    pub fn formulation(&self) -> &Formulation {
        &self.formulation
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self.formulation, Formulation::Continuous { .. })
    }

    pub fn grid(&self) -> Option<&InverseGrid> {
        match &self.formulation {
            Formulation::Continuous { grid, .. } => Some(grid),
            Formulation::Discrete { .. } => None,
        }
    }

    pub fn variable_count(&self) -> usize {
        self.variable_count
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    pub fn constraints(&self) -> &[Equality] {
        &self.constraints
    }

    pub fn primary_terms(&self) -> &[Term] {
        &self.primary_terms
    }

    pub fn regularizer_terms(&self) -> &[Term] {
        &self.regularizer_terms
    }

    pub fn has_regularizer(&self) -> bool {
        !self.regularizer_terms.is_empty()
    }

    pub fn normalized_concentration(&self, site: usize) -> VarId {
        self.normalized_concentration[site]
    }

    pub fn tracer_flux(&self, site: usize) -> VarId {
        self.tracer_flux[site]
    }

    /// Validate and bind observations, export rates, total fluxes and the
    /// regularization strength.
    ///
    /// Observations are normalized by their geometric mean before binding;
    /// the returned scale restores observation units. Export rates default
    /// to 1 at every site. Total fluxes are accumulated from relative areas
    /// and export rates.
    pub fn bind_inputs(
        &self,
        observations: &ElementData,
        export_rates: Option<&ElementData>,
        regularization_strength: Option<f64>,
    ) -> Result<BoundInputs, ConfigError> {
        let mut bindings = ParameterBindings::new(self.parameter_count);

        let observation_scale = self.bind_observations(&mut bindings, observations)?;
        let rates = self.resolve_export_rates(export_rates)?;
        for (id, &rate) in self.export_rates.iter().zip(&rates) {
            bindings.set(*id, Some(rate));
        }

        let totals = accumulate(&self.network, |i, node| node.relative_area * rates[i]);
        for (flux, total) in self.total_fluxes.iter().zip(totals) {
            flux.set(&mut bindings, Some(total));
        }

        if self.has_regularizer() {
            match regularization_strength {
                None => return Err(ConfigError::MissingRegularizationStrength),
                Some(s) if !s.is_finite() || s < 0.0 => {
                    return Err(ConfigError::InvalidRegularizationStrength(s))
                }
                Some(s) => bindings.set(self.regularization_strength, Some(s)),
            }
        }

        Ok(BoundInputs {
            bindings,
            observation_scale,
        })
    }

    fn bind_observations(
        &self,
        bindings: &mut ParameterBindings,
        observations: &ElementData,
    ) -> Result<f64, ConfigError> {
        if observations.is_empty() {
            return Err(ConfigError::EmptyObservations);
        }
        for (site, &value) in observations {
            if !self.network.contains(site) {
                return Err(ConfigError::UnknownSite {
                    site: site.clone(),
                    input: "observations",
                });
            }
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidObservation {
                    site: site.clone(),
                    value,
                });
            }
        }

        let mut values = Vec::with_capacity(self.network.len());
        for node in self.network.nodes() {
            let value = observations
                .get(&node.name)
                .copied()
                .ok_or_else(|| ConfigError::MissingObservation(node.name.clone()))?;
            values.push(value);
        }

        let scale = geometric_mean(&values);
        for (observed, value) in self.observations.iter().zip(values) {
            observed.set(bindings, Some(value / scale));
        }
        Ok(scale)
    }

    fn resolve_export_rates(
        &self,
        export_rates: Option<&ElementData>,
    ) -> Result<Vec<f64>, ConfigError> {
        let Some(map) = export_rates else {
            return Ok(vec![1.0; self.network.len()]);
        };
        for (site, &value) in map {
            if !self.network.contains(site) {
                return Err(ConfigError::UnknownSite {
                    site: site.clone(),
                    input: "export rates",
                });
            }
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidExportRate {
                    site: site.clone(),
                    value,
                });
            }
        }
        self.network
            .nodes()
            .iter()
            .map(|node| {
                map.get(&node.name)
                    .copied()
                    .ok_or_else(|| ConfigError::MissingExportRate(node.name.clone()))
            })
            .collect()
    }

    /// Instantiate the numeric program under `bindings`.
    ///
    /// A regularization strength of exactly 0 drops the regularizer, so the
    /// result is identical to the unregularized program.
    pub fn instantiate(&self, bindings: &ParameterBindings) -> Result<ConicProgram, ConfigError> {
        let equalities = self
            .constraints
            .iter()
            .map(|c| c.bind(bindings))
            .collect::<Result<Vec<_>, _>>()?;
        let primary = self
            .primary_terms
            .iter()
            .map(|t| t.bind(bindings))
            .collect::<Result<Vec<_>, _>>()?;

        let strength = if self.has_regularizer() {
            bindings
                .get(self.regularization_strength)
                .ok_or(ConfigError::MissingRegularizationStrength)?
        } else {
            0.0
        };
        let regularizer = if strength > 0.0 {
            self.regularizer_terms
                .iter()
                .map(|t| t.bind(bindings))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            Vec::new()
        };

        Ok(ConicProgram {
            variable_count: self.variable_count,
            equalities,
            primary,
            regularizer,
            regularization_strength: strength,
        })
    }
}

pub(crate) fn geometric_mean(values: &[f64]) -> f64 {
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    (log_sum / values.len() as f64).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::three_leaf_network;

    fn observations(values: [f64; 4]) -> ElementData {
        ["A", "B", "C", "D"]
            .into_iter()
            .map(String::from)
            .zip(values)
            .collect()
    }

    #[test]
    fn test_geometric_mean() {
        assert!((geometric_mean(&[1.0, 100.0]) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_observations_bound_normalized() {
        let problem = MixingProblem::builder(three_leaf_network()).build().unwrap();
        let bound = problem
            .bind_inputs(&observations([2.0, 8.0, 4.0, 4.0]), None, None)
            .unwrap();

        assert!((bound.observation_scale - 4.0).abs() < 1e-12);
        let program = problem.instantiate(&bound.bindings).unwrap();
        assert_eq!(program.primary.len(), 4);
        assert!(program.regularizer.is_empty());
    }

    #[test]
    fn test_missing_observation_rejected() {
        let problem = MixingProblem::builder(three_leaf_network()).build().unwrap();
        let mut obs = observations([1.0, 1.0, 1.0, 1.0]);
        obs.remove("C");
        assert_eq!(
            problem.bind_inputs(&obs, None, None).unwrap_err(),
            ConfigError::MissingObservation("C".into())
        );
    }

    #[test]
    fn test_unknown_and_invalid_sites_rejected() {
        let problem = MixingProblem::builder(three_leaf_network()).build().unwrap();

        let mut obs = observations([1.0, 1.0, 1.0, 1.0]);
        obs.insert("Z".into(), 1.0);
        assert!(matches!(
            problem.bind_inputs(&obs, None, None).unwrap_err(),
            ConfigError::UnknownSite { input: "observations", .. }
        ));

        let obs = observations([1.0, -1.0, 1.0, 1.0]);
        assert!(matches!(
            problem.bind_inputs(&obs, None, None).unwrap_err(),
            ConfigError::InvalidObservation { .. }
        ));
    }

    #[test]
    fn test_partial_export_rates_rejected() {
        let problem = MixingProblem::builder(three_leaf_network()).build().unwrap();
        let rates: ElementData = [("A".to_string(), 2.0)].into_iter().collect();
        assert_eq!(
            problem
                .bind_inputs(&observations([1.0; 4]), Some(&rates), None)
                .unwrap_err(),
            ConfigError::MissingExportRate("B".into())
        );
    }

    #[test]
    fn test_regularized_problem_requires_strength() {
        let problem = MixingProblem::builder(three_leaf_network())
            .regularized(true)
            .build()
            .unwrap();
        let obs = observations([1.0; 4]);

        assert_eq!(
            problem.bind_inputs(&obs, None, None).unwrap_err(),
            ConfigError::MissingRegularizationStrength
        );
        assert_eq!(
            problem.bind_inputs(&obs, None, Some(-1.0)).unwrap_err(),
            ConfigError::InvalidRegularizationStrength(-1.0)
        );

        let zero = problem.bind_inputs(&obs, None, Some(0.0)).unwrap();
        let program = problem.instantiate(&zero.bindings).unwrap();
        assert!(program.regularizer.is_empty());
        assert_eq!(program.regularization_strength, 0.0);

        let positive = problem.bind_inputs(&obs, None, Some(0.5)).unwrap();
        assert_eq!(problem.instantiate(&positive.bindings).unwrap().regularizer.len(), 4);
    }

    #[test]
    fn test_strength_ignored_without_regularizer() {
        let problem = MixingProblem::builder(three_leaf_network()).build().unwrap();
        let bound = problem
            .bind_inputs(&observations([1.0; 4]), None, Some(3.0))
            .unwrap();
        assert_eq!(problem.instantiate(&bound.bindings).unwrap().regularization_strength, 0.0);
    }
}
