//! Flow record persistence
//!
//! Stores upsert [`NetworkFlowRecord`]s keyed on (trading_interval, network_id,
//! network_region). Re-running an interval overwrites the computed columns of its rows and
//! never adds new ones.

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::MemoryFlowStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::NetworkFlowRecord;

#[derive(Debug, Error)]
pub enum PersistError {
    #[cfg(feature = "db")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("flow record store unavailable: {0}")]
    Unavailable(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlowRecordStore: Send + Sync {
    /// Insert or update every record as one atomic batch, returning the number written
    async fn upsert_flow_records(
        &self,
        records: &[NetworkFlowRecord],
    ) -> Result<usize, PersistError>;
}
