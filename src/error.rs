//! Error taxonomy for network construction, grid construction, solve
//! configuration and the solver backends.

use thiserror::Error;

/// Violations of the sample network's shape.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    #[error("sample network has no nodes")]
    Empty,

    #[error("duplicate sample node: {0}")]
    DuplicateNode(String),

    #[error("edge references unknown sample node: {0}")]
    UnknownNode(String),

    #[error("more than one downstream neighbour for {node}: {receivers:?}")]
    MultipleDownstream { node: String, receivers: Vec<String> },

    #[error("sample network contains a cycle through {0}")]
    Cycle(String),

    #[error("sample node {node} has non-positive area {area}")]
    InvalidArea { node: String, area: f64 },

    #[error("raster label {label} claimed by both {first} and {second}")]
    DuplicateLabel {
        label: u32,
        first: String,
        second: String,
    },
}

/// Failures building an inversion grid over the label raster.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    #[error("grid resolution must be strictly positive (nx={nx}, ny={ny})")]
    NonPositiveResolution { nx: usize, ny: usize },

    #[error(
        "grid resolution {nx}x{ny} exceeds raster resolution {width}x{height}; decrease resolution"
    )]
    ExceedsRaster {
        nx: usize,
        ny: usize,
        width: usize,
        height: usize,
    },

    #[error("raster label {0} does not belong to any sample node")]
    UnknownLabel(u32),

    #[error("catchments without any grid cell: {0:?}; increase resolution")]
    UnderResolved(Vec<String>),
}

/// Invalid solve inputs. Always raised before the solver is invoked.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("regularizer terms present but no regularization strength assigned")]
    MissingRegularizationStrength,

    #[error("regularization strength must be finite and non-negative, got {0}")]
    InvalidRegularizationStrength(f64),

    #[error("{input} references unknown site {site}")]
    UnknownSite { site: String, input: &'static str },

    #[error("no observation for site {0}")]
    MissingObservation(String),

    #[error("no export rate for site {0}")]
    MissingExportRate(String),

    #[error("no upstream concentration for site {0}")]
    MissingUpstream(String),

    #[error("observation for site {site} must be positive and finite, got {value}")]
    InvalidObservation { site: String, value: f64 },

    #[error("export rate for site {site} must be positive and finite, got {value}")]
    InvalidExportRate { site: String, value: f64 },

    #[error("parameter {0} was not bound before instantiation")]
    UnboundParameter(usize),

    #[error("observation set is empty")]
    EmptyObservations,

    #[error("relative error must be finite and non-negative, got {0}%")]
    InvalidRelativeError(f64),
}

/// Outcome of a solver invocation that did not produce a usable optimum.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolverError {
    #[error("solver did not converge within {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("numerical failure: {0}")]
    Numerical(String),

    #[error("problem is infeasible: {0}")]
    Infeasible(String),

    #[error("unsupported program: {0}")]
    Unsupported(String),

    #[error("backend failure: {0}")]
    Backend(String),

    #[error("solver backend unavailable: {0}")]
    Unavailable(&'static str),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnmixError {
    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

impl UnmixError {
    /// Whether a batch sweep may skip this unit of work and continue.
    pub fn is_solver_failure(&self) -> bool {
        matches!(self, UnmixError::Solver(_))
    }
}

pub type UnmixResult<T> = std::result::Result<T, UnmixError>;
