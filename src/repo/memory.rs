use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use super::{FlowRecordStore, PersistError};
use crate::domain::{FlowRecordKey, NetworkFlowRecord};

/// In-process flow record store with the same upsert semantics as the database table.
///
/// Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryFlowStore {
    rows: Mutex<BTreeMap<FlowRecordKey, NetworkFlowRecord>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    pub fn get(&self, key: &FlowRecordKey) -> Option<NetworkFlowRecord> {
        self.rows.lock().get(key).cloned()
    }

    /// Snapshot of every stored row in key order
    pub fn records(&self) -> Vec<NetworkFlowRecord> {
        self.rows.lock().values().cloned().collect()
    }
}

#[async_trait]
impl FlowRecordStore for MemoryFlowStore {
    async fn upsert_flow_records(
        &self,
        records: &[NetworkFlowRecord],
    ) -> Result<usize, PersistError> {
        let mut rows = self.rows.lock();
        for record in records {
            rows.entry(record.key())
                .and_modify(|existing| existing.update_from(record))
                .or_insert_with(|| record.clone());
        }
        Ok(records.len())
    }
}
