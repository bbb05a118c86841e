#![cfg(feature = "db")]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;

use super::{LoaderError, TelemetryLoader};
use crate::domain::{
    InterconnectorReading, IntervalRange, Network, RegionEnergyEmissions, RegionFlow,
};

const INTERCONNECTOR_FLOWS_QUERY: &str = r#"
    SELECT
        fs.trading_interval AS trading_interval,
        f.interconnector_region_from AS region_from,
        f.interconnector_region_to AS region_to,
        coalesce(sum(fs.generated), 0)::double precision AS generated,
        coalesce(sum(fs.generated) / $4, 0)::double precision AS energy
    FROM facility_scada fs
    LEFT JOIN facility f ON fs.facility_code = f.code
    WHERE
        fs.trading_interval >= $1
        AND fs.trading_interval <= $2
        AND f.interconnector IS TRUE
        AND f.network_id = $3
    GROUP BY 1, 2, 3
    ORDER BY 1 ASC
"#;

const REGION_ENERGY_EMISSIONS_QUERY: &str = r#"
    SELECT
        g.trading_interval AS trading_interval,
        g.network_region AS network_region,
        sum(g.energy)::double precision AS energy,
        sum(g.emissions)::double precision AS emissions
    FROM (
        SELECT
            fs.trading_interval,
            f.network_region,
            fs.facility_code,
            sum(fs.generated) / $4 AS energy,
            sum(fs.generated) / $4 * f.emissions_factor_co2 AS emissions
        FROM facility_scada fs
        LEFT JOIN facility f ON fs.facility_code = f.code
        WHERE
            fs.trading_interval >= $1
            AND fs.trading_interval <= $2
            AND f.network_id = ANY($3)
            AND f.fueltech_id NOT IN ('battery_charging')
            AND f.interconnector IS FALSE
            AND fs.generated > 0
        GROUP BY fs.trading_interval, fs.facility_code, f.emissions_factor_co2, f.network_region
    ) AS g
    GROUP BY 1, 2
    ORDER BY 1 ASC
"#;

#[derive(Debug, sqlx::FromRow)]
struct InterconnectorFlowRow {
    trading_interval: DateTime<Utc>,
    region_from: Option<String>,
    region_to: Option<String>,
    generated: f64,
    energy: f64,
}

#[derive(Debug, sqlx::FromRow)]
struct RegionEnergyEmissionsRow {
    trading_interval: DateTime<Utc>,
    network_region: Option<String>,
    energy: Option<f64>,
    emissions: Option<f64>,
}

/// Reads facility SCADA telemetry from PostgreSQL
#[derive(Clone)]
pub struct PgTelemetryLoader {
    pool: PgPool,
}

impl PgTelemetryLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TelemetryLoader for PgTelemetryLoader {
    async fn load_interconnector_flows(
        &self,
        network: &Network,
        range: &IntervalRange,
    ) -> Result<Vec<InterconnectorReading>, LoaderError> {
        let rows: Vec<InterconnectorFlowRow> = sqlx::query_as(INTERCONNECTOR_FLOWS_QUERY)
            .bind(range.start.with_timezone(&Utc))
            .bind(range.end.with_timezone(&Utc))
            .bind(&network.code)
            .bind(network.intervals_per_hour())
            .fetch_all(&self.pool)
            .await?;

        let readings: Vec<InterconnectorReading> = rows
            .into_iter()
            .filter_map(|row| {
                Some(InterconnectorReading::new(
                    network.localize(row.trading_interval),
                    RegionFlow::new(row.region_from?, row.region_to?),
                    row.generated,
                    row.energy,
                ))
            })
            .collect();

        debug!(
            network = %network.code,
            range = %range,
            rows = readings.len(),
            "loaded interconnector flows"
        );

        if readings.is_empty() {
            return Err(LoaderError::no_data("interconnector flow", network, range));
        }
        Ok(readings)
    }

    async fn load_region_energy_emissions(
        &self,
        network: &Network,
        range: &IntervalRange,
    ) -> Result<Vec<RegionEnergyEmissions>, LoaderError> {
        let rows: Vec<RegionEnergyEmissionsRow> = sqlx::query_as(REGION_ENERGY_EMISSIONS_QUERY)
            .bind(range.start.with_timezone(&Utc))
            .bind(range.end.with_timezone(&Utc))
            .bind(network.generation_network_codes())
            .bind(network.intervals_per_hour())
            .fetch_all(&self.pool)
            .await?;

        let per_hour = network.intervals_per_hour();
        let records: Vec<RegionEnergyEmissions> = rows
            .into_iter()
            .filter_map(|row| {
                Some(RegionEnergyEmissions::new(
                    network.localize(row.trading_interval),
                    network.code.clone(),
                    row.network_region?,
                    row.energy.unwrap_or(0.0),
                    row.emissions.unwrap_or(0.0),
                    per_hour,
                ))
            })
            .collect();

        debug!(
            network = %network.code,
            range = %range,
            rows = records.len(),
            "loaded region energy and emissions"
        );

        if records.is_empty() {
            return Err(LoaderError::no_data("region energy", network, range));
        }
        Ok(records)
    }
}
