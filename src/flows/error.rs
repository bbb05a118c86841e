use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use super::validation::ValidationError;
use super::PipelineStage;
use crate::repo::PersistError;
use crate::solver::SolverError;

/// Hard failures of a flows run. Telemetry gaps are not errors, the runner skips them.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error(
        "energy import and export totals do not match for {interval}: exports {exports} imports {imports}"
    )]
    EnergyImbalance {
        interval: DateTime<FixedOffset>,
        imports: f64,
        exports: f64,
    },

    #[error("flow solver failed: {0}")]
    Solver(#[from] SolverError),

    #[error("flow validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("failed to persist flow records: {0}")]
    Persist(#[from] PersistError),

    #[error("no data first seen for network {0}")]
    MissingFirstSeen(String),
}

impl FlowError {
    /// Pipeline stage the error is raised from
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            FlowError::EnergyImbalance { .. } => Some(PipelineStage::Netting),
            FlowError::Solver(_) => Some(PipelineStage::Solving),
            FlowError::Validation(_) => Some(PipelineStage::Validating),
            FlowError::Persist(_) => Some(PipelineStage::Persisting),
            FlowError::MissingFirstSeen(_) => None,
        }
    }
}
