#![cfg(feature = "db")]

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{FlowRecordStore, PersistError};
use crate::config::DbConfig;
use crate::domain::NetworkFlowRecord;
use crate::loader::pg::PgTelemetryLoader;

/// Rows per INSERT statement, keeps bind parameters under the protocol limit
const UPSERT_CHUNK_ROWS: usize = 1000;

const CONNECT_ATTEMPTS: u32 = 5;

/// Wait before retry `attempt` (1-based): 1s, 2s, 4s, ...
fn connect_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(6))
}

fn pool_options(config: &DbConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
}

/// Owns the connection pool shared by the telemetry loader and the flow record store
pub struct PgRepo {
    pool: PgPool,
}

impl PgRepo {
    /// Open the pool and ping it, retrying with exponential backoff
    pub async fn connect(config: &DbConfig) -> Result<Self> {
        let mut attempt = 1;
        loop {
            match Self::open(config).await {
                Ok(pool) => {
                    info!(attempt, "flow database pool ready");
                    return Ok(Self { pool });
                }
                Err(e) if attempt >= CONNECT_ATTEMPTS => {
                    return Err(e).context(format!(
                        "flow database unreachable after {CONNECT_ATTEMPTS} attempts"
                    ));
                }
                Err(e) => {
                    let wait = connect_backoff(attempt);
                    warn!(attempt, error = %e, retry_in = ?wait, "flow database not ready");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn open(config: &DbConfig) -> Result<PgPool> {
        let pool = pool_options(config)
            .connect(&config.url)
            .await
            .context("failed to open pool")?;
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("pool did not answer a ping")?;
        Ok(pool)
    }

    pub fn telemetry(&self) -> PgTelemetryLoader {
        PgTelemetryLoader::new(self.pool.clone())
    }

    pub fn flow_records(&self) -> PgFlowRecordStore {
        PgFlowRecordStore::new(self.pool.clone())
    }

    pub async fn close(self) {
        debug!("closing flow database pool");
        self.pool.close().await;
    }
}

/// Upserts flow records into `at_network_flows`
#[derive(Clone)]
pub struct PgFlowRecordStore {
    pool: PgPool,
}

impl PgFlowRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All chunks share one transaction. An early return drops it, which rolls back.
    async fn write_batch(&self, records: &[NetworkFlowRecord]) -> Result<usize, PersistError> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;

        for chunk in records.chunks(UPSERT_CHUNK_ROWS) {
            let mut query = upsert_query(chunk);
            let result = query.build().execute(&mut *tx).await?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(written)
    }
}

fn upsert_query(records: &[NetworkFlowRecord]) -> QueryBuilder<'static, Postgres> {
    let mut query: QueryBuilder<'static, Postgres> = QueryBuilder::new(
        "INSERT INTO at_network_flows (trading_interval, network_id, network_region, \
         energy_imports, energy_exports, emissions_imports, emissions_exports, \
         market_value_imports, market_value_exports) ",
    );

    query.push_values(records, |mut row, rec| {
        row.push_bind(rec.trading_interval.with_timezone(&Utc))
            .push_bind(rec.network_id.clone())
            .push_bind(rec.network_region.clone())
            .push_bind(rec.energy_imports)
            .push_bind(rec.energy_exports)
            .push_bind(rec.emissions_imports)
            .push_bind(rec.emissions_exports)
            .push_bind(rec.market_value_imports)
            .push_bind(rec.market_value_exports);
    });

    query.push(
        " ON CONFLICT (trading_interval, network_id, network_region) DO UPDATE SET \
         energy_imports = EXCLUDED.energy_imports, \
         energy_exports = EXCLUDED.energy_exports, \
         emissions_imports = EXCLUDED.emissions_imports, \
         emissions_exports = EXCLUDED.emissions_exports, \
         market_value_imports = EXCLUDED.market_value_imports, \
         market_value_exports = EXCLUDED.market_value_exports",
    );

    query
}

#[async_trait]
impl FlowRecordStore for PgFlowRecordStore {
    async fn upsert_flow_records(
        &self,
        records: &[NetworkFlowRecord],
    ) -> Result<usize, PersistError> {
        if records.is_empty() {
            return Ok(0);
        }

        match self.write_batch(records).await {
            Ok(written) => {
                debug!(rows = written, "upserted flow records");
                Ok(written)
            }
            Err(e) => {
                error!(error = %e, rows = records.len(), "flow record upsert rolled back");
                Err(e)
            }
        }
    }
}
