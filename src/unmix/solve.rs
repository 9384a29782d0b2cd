use ndarray::Array2;
use tracing::{debug, info};

use crate::error::UnmixResult;
use crate::problem::{Formulation, MixingProblem};
use crate::solver::program::norm;
use crate::solver::{ConvexSolver, SolverSettings};
use crate::ElementData;

/// Recovered source concentrations.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamPrediction {
    /// One value per sample site.
    Sites(ElementData),
    /// Raster of the label grid's shape, NaN outside every catchment.
    Map(Array2<f64>),
}

impl UpstreamPrediction {
    pub fn as_sites(&self) -> Option<&ElementData> {
        match self {
            UpstreamPrediction::Sites(sites) => Some(sites),
            UpstreamPrediction::Map(_) => None,
        }
    }

    pub fn as_map(&self) -> Option<&Array2<f64>> {
        match self {
            UpstreamPrediction::Map(map) => Some(map),
            UpstreamPrediction::Sites(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnmixSolution {
    /// Predicted downstream concentration at every site.
    pub downstream: ElementData,
    pub upstream: UpstreamPrediction,
    /// Data misfit, in normalized units.
    pub misfit: f64,
    /// Regularizer norm, `None` without a regularizer.
    pub roughness: Option<f64>,
    pub objective: f64,
    pub iterations: usize,
}

impl MixingProblem {
    /// Solve with the backend chosen in `settings`.
    pub fn solve(
        &self,
        observations: &ElementData,
        export_rates: Option<&ElementData>,
        regularization_strength: Option<f64>,
        settings: &SolverSettings,
    ) -> UnmixResult<UnmixSolution> {
        let backend = settings.backend();
        self.solve_with(
            observations,
            export_rates,
            regularization_strength,
            backend.as_ref(),
        )
    }

    /// Bind inputs, solve, and scale the result back to observation units.
    ///
    /// Invalid inputs fail before `solver` is called.
    pub fn solve_with(
        &self,
        observations: &ElementData,
        export_rates: Option<&ElementData>,
        regularization_strength: Option<f64>,
        solver: &dyn ConvexSolver,
    ) -> UnmixResult<UnmixSolution> {
        let bound = self.bind_inputs(observations, export_rates, regularization_strength)?;
        let program = self.instantiate(&bound.bindings)?;
        debug!(
            solver = solver.name(),
            variables = program.variable_count,
            equalities = program.equalities.len(),
            "solving mixing problem"
        );

        let output = solver.solve(&program)?;
        let values = &output.values;
        let scale = bound.observation_scale;

        let downstream = self
            .network()
            .names()
            .enumerate()
            .map(|(site, name)| {
                let v = self.normalized_concentration(site);
                (name.to_string(), values[v.index()] * scale)
            })
            .collect();

        let upstream = match self.formulation() {
            Formulation::Discrete { tracer } => UpstreamPrediction::Sites(
                self.network()
                    .names()
                    .map(str::to_string)
                    .zip(tracer.iter().map(|v| values[v.index()] * scale))
                    .collect(),
            ),
            Formulation::Continuous {
                grid,
                cell_variables,
            } => UpstreamPrediction::Map(
                grid.rasterize(|cell| cell_variables[cell].map(|v| values[v.index()] * scale)),
            ),
        };

        let misfit = program.misfit(values);
        // Reported even when a zero strength kept it out of the program
        let roughness = if self.has_regularizer() {
            let terms = self
                .regularizer_terms()
                .iter()
                .map(|t| t.bind(&bound.bindings))
                .collect::<Result<Vec<_>, _>>()?;
            Some(norm(terms.iter().map(|t| t.evaluate(values))))
        } else {
            None
        };

        info!(
            solver = solver.name(),
            objective = output.objective,
            misfit,
            iterations = output.iterations,
            "mixing problem solved"
        );

        Ok(UnmixSolution {
            downstream,
            upstream,
            misfit,
            roughness,
            objective: output.objective,
            iterations: output.iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConfigError, SolverError, UnmixError};
    use crate::network::tests::three_leaf_network;
    use crate::network::mix_downstream;
    use crate::solver::{MockConvexSolver, SolverChoice};
    use rstest::rstest;

    fn sites(values: [f64; 4]) -> ElementData {
        ["A", "B", "C", "D"]
            .into_iter()
            .map(String::from)
            .zip(values)
            .collect()
    }

    #[test]
    fn test_config_error_never_reaches_solver() {
        let problem = MixingProblem::builder(three_leaf_network())
            .regularized(true)
            .build()
            .unwrap();
        let mut solver = MockConvexSolver::new();
        solver.expect_name().return_const("mock");
        solver.expect_solve().never();

        let err = problem
            .solve_with(&sites([1.0; 4]), None, None, &solver)
            .unwrap_err();
        assert_eq!(
            err,
            UnmixError::Config(ConfigError::MissingRegularizationStrength)
        );
    }

    #[test]
    fn test_solver_failure_propagates() {
        let problem = MixingProblem::builder(three_leaf_network()).build().unwrap();
        let mut solver = MockConvexSolver::new();
        solver.expect_name().return_const("mock");
        solver
            .expect_solve()
            .times(1)
            .returning(|_| Err(SolverError::NotConverged { iterations: 7 }));

        let err = problem
            .solve_with(&sites([1.0; 4]), None, None, &solver)
            .unwrap_err();
        assert!(err.is_solver_failure());
    }

    #[test]
    fn test_solution_rescaled_to_observation_units() {
        let problem = MixingProblem::builder(three_leaf_network()).build().unwrap();
        let mut solver = MockConvexSolver::new();
        solver.expect_name().return_const("mock");
        // Every variable at 1 in normalized units
        solver.expect_solve().returning(|program| {
            Ok(crate::solver::SolverOutput {
                values: vec![1.0; program.variable_count],
                objective: 2.0,
                iterations: 1,
            })
        });

        let solution = problem
            .solve_with(&sites([2.0, 8.0, 4.0, 4.0]), None, None, &solver)
            .unwrap();
        assert!((solution.downstream["D"] - 4.0).abs() < 1e-12);
        assert!((solution.upstream.as_sites().unwrap()["A"] - 4.0).abs() < 1e-12);
        assert_eq!(solution.roughness, None);
    }

    #[rstest]
    #[case::conic(SolverChoice::Conic)]
    #[case::barrier(SolverChoice::Barrier)]
    fn test_backend_recovers_known_sources(#[case] choice: SolverChoice) {
        let network = three_leaf_network();
        let truth = sites([12.0, 30.0, 7.5, 18.0]);
        let observed = mix_downstream(&network, &truth, None).unwrap();
        let problem = MixingProblem::builder(network).build().unwrap();

        let solution = problem
            .solve(&observed, None, None, &SolverSettings::with_choice(choice))
            .unwrap();

        let recovered = solution.upstream.as_sites().unwrap();
        for (site, expected) in &truth {
            let got = recovered[site];
            assert!(
                ((got - expected) / expected).abs() < 1e-5,
                "{site}: expected {expected}, got {got}"
            );
        }
        for (site, expected) in &observed {
            assert!(((solution.downstream[site] - expected) / expected).abs() < 1e-5);
        }
    }
}
