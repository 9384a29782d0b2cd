//! # Solver Backends
//!
//! A [`ConvexSolver`] takes an instantiated [`ConicProgram`] and returns a
//! value for every program variable. Three backends are provided:
//!
//! - [`ConicSolver`]: sparse interior-point method on `clarabel` (default)
//! - [`BarrierSolver`]: dense log-barrier method for small discrete problems
//! - [`CuttingPlaneSolver`]: Kelley's method on `good_lp`, behind the `lp`
//!   feature
//!
//! The last two eliminate the equality constraints first, so only the free
//! variables are searched over.

pub mod barrier;
pub mod conic;
pub mod cutting_plane;
mod presolve;
pub mod program;

pub use barrier::{BarrierSettings, BarrierSolver};
pub use conic::{ConicSettings, ConicSolver};
pub use cutting_plane::{CuttingPlaneSettings, CuttingPlaneSolver};
pub use program::{BoundTerm, ConicProgram, LinearEquality};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::error::SolverError;

#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutput {
    /// One value per program variable.
    pub values: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
}

#[cfg_attr(test, mockall::automock)]
pub trait ConvexSolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, program: &ConicProgram) -> Result<SolverOutput, SolverError>;
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolverChoice {
    #[default]
    Conic,
    Barrier,
    CuttingPlane,
}

/// Backend selection plus per-backend tuning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub choice: SolverChoice,
    pub conic: ConicSettings,
    pub barrier: BarrierSettings,
    pub cutting_plane: CuttingPlaneSettings,
}

impl SolverSettings {
    pub fn with_choice(choice: SolverChoice) -> Self {
        Self {
            choice,
            ..Self::default()
        }
    }

    pub fn backend(&self) -> Box<dyn ConvexSolver> {
        match self.choice {
            SolverChoice::Conic => Box::new(ConicSolver::new(self.conic.clone())),
            SolverChoice::Barrier => Box::new(BarrierSolver::new(self.barrier.clone())),
            SolverChoice::CuttingPlane => {
                Box::new(CuttingPlaneSolver::new(self.cutting_plane.clone()))
            }
        }
    }
}
