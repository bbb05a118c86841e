//! Network flows aggregate
//!
//! Derives per-region interconnector imports and exports of energy and emissions for each
//! trading interval. Stages run strictly in order:
//! netting -> balance -> demand -> solve -> shape -> validate -> persist.

pub mod backfill;
pub mod balance;
pub mod demand;
pub mod error;
pub mod netting;
pub mod runner;
pub mod schedule;
pub mod shaping;
pub mod validation;

pub use backfill::{Backfill, BackfillSummary, BlockFailure};
pub use balance::region_balances;
pub use demand::reconcile_demand;
pub use error::FlowError;
pub use netting::net_flows;
pub use runner::{IntervalProcessor, IntervalRunner, PipelineStage, RunOutcome, RunReport};
pub use shaping::shape_flow_records;
pub use validation::{FlowValidator, ValidationError, Violation, ViolationKind};
