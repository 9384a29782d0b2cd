use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::path::PathBuf;

use crate::solver::SolverSettings;
use crate::unmix::MonteCarloSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub input: InputConfig,
    pub problem: ProblemConfig,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default)]
    pub monte_carlo: MonteCarloConfig,
    #[serde(default)]
    pub regularization_sweep: Option<SweepConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    pub network: PathBuf,
    /// Label raster, required by the continuous formulation
    #[serde(default)]
    pub labels: Option<PathBuf>,
    pub observations: PathBuf,
    #[serde(default = "default_sample_column")]
    pub sample_column: String,
    /// Single-byte cell separator
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default)]
    pub excluded_elements: Vec<String>,
    #[serde(default)]
    pub export_rates: Option<PathBuf>,
}

fn default_sample_column() -> String {
    "Sample.Code".to_string()
}

fn default_delimiter() -> char {
    ' '
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProblemConfig {
    pub continuous: bool,
    pub regularize: bool,
    pub regularization_strength: Option<f64>,
    pub nx: Option<usize>,
    pub ny: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: MonteCarloSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    pub element: String,
    pub min_exponent: f64,
    pub max_exponent: f64,
    pub trials: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(Figment::new().merge(Toml::file("config/default.toml")))
    }

    fn from_figment(base: Figment) -> Result<Self> {
        let figment = base.merge(Env::prefixed("UNMIX__").split("__"));
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::SolverChoice;

    #[test]
    fn test_minimal_config_takes_defaults() {
        let toml = r#"
            [input]
            network = "data/network.json"
            observations = "data/geochem.dat"

            [problem]
            regularize = true
            regularization_strength = 0.1
        "#;
        let config = Config::from_figment(Figment::new().merge(Toml::string(toml))).unwrap();

        assert_eq!(config.input.sample_column, "Sample.Code");
        assert_eq!(config.input.delimiter, ' ');
        assert_eq!(config.problem.regularization_strength, Some(0.1));
        assert_eq!(config.solver.choice, SolverChoice::Conic);
        assert_eq!(config.solver.barrier.tolerance, 1e-7);
        assert!(!config.monte_carlo.enabled);
        assert_eq!(config.monte_carlo.settings.repeats, 50);
        assert!(config.regularization_sweep.is_none());
    }

    #[test]
    fn test_solver_and_monte_carlo_sections() {
        let toml = r#"
            [input]
            network = "n.json"
            observations = "o.csv"
            delimiter = ","

            [problem]

            [solver]
            choice = "cutting_plane"

            [solver.cutting_plane]
            max_iterations = 40

            [monte_carlo]
            enabled = true
            relative_error_pct = 2.5
            seed = 9
        "#;
        let config = Config::from_figment(Figment::new().merge(Toml::string(toml))).unwrap();

        assert_eq!(config.input.delimiter, ',');
        assert_eq!(config.solver.choice, SolverChoice::CuttingPlane);
        assert_eq!(config.solver.cutting_plane.max_iterations, 40);
        assert_eq!(config.monte_carlo.settings.relative_error_pct, 2.5);
        assert_eq!(config.monte_carlo.settings.seed, Some(9));
    }
}
