use ndarray::Array2;
use tracing::{debug, info};

use super::expr::{LinearExpr, ParamAffine, ParamId, VarId};
use super::parameters::ReciprocalParameter;
use super::terms::{Equality, Term};
use super::{Formulation, MixingProblem};
use crate::error::GridError;
use crate::grid::InverseGrid;
use crate::network::{accumulate, SampleNetwork};

#[derive(Debug, Default)]
struct Registry {
    variables: usize,
    parameters: usize,
}

impl Registry {
    fn variable(&mut self) -> VarId {
        self.variables += 1;
        VarId(self.variables - 1)
    }

    fn parameter(&mut self) -> ParamId {
        self.parameters += 1;
        ParamId(self.parameters - 1)
    }

    fn reciprocal(&mut self) -> ReciprocalParameter {
        let value = self.parameter();
        ReciprocalParameter::new(value, self.parameter())
    }
}

#[derive(Debug, Clone)]
struct ContinuousSpec {
    labels: Array2<u32>,
    nx: usize,
    ny: usize,
}

/// Assembles a [`MixingProblem`] over a sample network.
#[derive(Debug, Clone)]
pub struct MixingProblemBuilder {
    network: SampleNetwork,
    regularize: bool,
    continuous: Option<ContinuousSpec>,
}

impl MixingProblemBuilder {
    pub(super) fn new(network: SampleNetwork) -> Self {
        Self {
            network,
            regularize: false,
            continuous: None,
        }
    }

    /// Add the regularizer: deviation from unit mean in the discrete mode,
    /// neighbour differences in the continuous one.
    pub fn regularized(mut self, regularize: bool) -> Self {
        self.regularize = regularize;
        self
    }

    /// Solve for a `nx × ny` grid of source concentrations over `labels`
    /// instead of one value per site.
    pub fn continuous(mut self, labels: Array2<u32>, nx: usize, ny: usize) -> Self {
        self.continuous = Some(ContinuousSpec { labels, nx, ny });
        self
    }

    pub fn build(self) -> Result<MixingProblem, GridError> {
        let Self {
            network,
            regularize,
            continuous,
        } = self;
        let mut registry = Registry::default();

        // Per-site source concentration as a linear expression
        let (formulation, sources): (Formulation, Vec<LinearExpr>) = match continuous {
            None => {
                let tracer: Vec<VarId> = (0..network.len()).map(|_| registry.variable()).collect();
                let sources = tracer.iter().map(|&v| LinearExpr::var(v)).collect();
                (Formulation::Discrete { tracer }, sources)
            }
            Some(spec) => {
                let grid = InverseGrid::new(spec.nx, spec.ny, &spec.labels, &network)?;
                let cell_variables: Vec<Option<VarId>> = grid
                    .cells()
                    .iter()
                    .map(|cell| cell.is_inside().then(|| registry.variable()))
                    .collect();
                let sources = (0..network.len())
                    .map(|site| {
                        let owned: Vec<VarId> = grid
                            .site_cells(site)
                            .iter()
                            .filter_map(|&c| cell_variables[c])
                            .collect();
                        LinearExpr::mean(&owned)
                    })
                    .collect();
                (Formulation::Continuous { grid, cell_variables }, sources)
            }
        };

        let export_rates: Vec<ParamId> = (0..network.len()).map(|_| registry.parameter()).collect();
        let accumulated = accumulate(&network, |i, node| {
            ParamAffine::from_linear(&sources[i])
                .scale(node.relative_area)
                .times_parameter(export_rates[i])
        });

        let mut constraints = Vec::with_capacity(2 * network.len());
        let mut tracer_flux = Vec::with_capacity(network.len());
        let mut normalized_concentration = Vec::with_capacity(network.len());
        let mut total_fluxes = Vec::with_capacity(network.len());
        let mut observations = Vec::with_capacity(network.len());
        let mut primary_terms = Vec::with_capacity(network.len());

        for expression in accumulated {
            let flux_var = registry.variable();
            constraints.push(Equality {
                target: flux_var,
                expression,
            });

            let total = registry.reciprocal();
            let concentration = registry.variable();
            constraints.push(Equality {
                target: concentration,
                expression: ParamAffine::var(flux_var).times_parameter(total.reciprocal_id()),
            });

            let observed = registry.reciprocal();
            primary_terms.push(Term::LogRatio {
                variable: concentration,
                observed,
            });

            tracer_flux.push(flux_var);
            normalized_concentration.push(concentration);
            total_fluxes.push(total);
            observations.push(observed);
        }

        let regularizer_terms = if !regularize {
            Vec::new()
        } else {
            match &formulation {
                Formulation::Discrete { tracer } => tracer
                    .iter()
                    .map(|&variable| Term::UnitRatio { variable })
                    .collect(),
                Formulation::Continuous {
                    grid,
                    cell_variables,
                } => grid
                    .inside_neighbour_pairs()
                    .into_iter()
                    .filter_map(|(a, b)| Some((cell_variables[a]?, cell_variables[b]?)))
                    .map(|(a, b)| Term::Linear(LinearExpr::difference(a, b)))
                    .collect(),
            }
        };
        let regularization_strength = registry.parameter();

        if let Formulation::Continuous { grid, .. } = &formulation {
            debug!(nx = grid.nx(), ny = grid.ny(), "continuous formulation");
        }
        info!(
            sites = network.len(),
            variables = registry.variables,
            parameters = registry.parameters,
            constraints = constraints.len(),
            regularizer_terms = regularizer_terms.len(),
            "assembled mixing problem"
        );

        Ok(MixingProblem {
            network,
            formulation,
            variable_count: registry.variables,
            parameter_count: registry.parameters,
            export_rates,
            total_fluxes,
            observations,
            regularization_strength,
            tracer_flux,
            normalized_concentration,
            primary_terms,
            regularizer_terms,
            constraints,
        })
    }
}
