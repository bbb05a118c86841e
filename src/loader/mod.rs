//! Telemetry loading
//!
//! The flows pipeline reads two series over a closed interval range: interconnector flows
//! and region generation/emissions. Both fail with [`LoaderError::NoData`] rather than
//! returning a partially populated range.

#[cfg(feature = "db")]
pub mod pg;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use thiserror::Error;

use crate::domain::{InterconnectorReading, IntervalRange, Network, RegionEnergyEmissions};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("no {series} results for {network} between {start} and {end}")]
    NoData {
        series: &'static str,
        network: String,
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },

    #[cfg(feature = "db")]
    #[error("telemetry query failed: {0}")]
    Query(#[from] sqlx::Error),

    #[error("telemetry source unavailable: {0}")]
    Unavailable(String),
}

impl LoaderError {
    pub fn no_data(series: &'static str, network: &Network, range: &IntervalRange) -> Self {
        LoaderError::NoData {
            series,
            network: network.code.clone(),
            start: range.start,
            end: range.end,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryLoader: Send + Sync {
    /// Interconnector flows per (interval, from, to), in the frame they were reported
    async fn load_interconnector_flows(
        &self,
        network: &Network,
        range: &IntervalRange,
    ) -> Result<Vec<InterconnectorReading>, LoaderError>;

    /// Generation and emissions per (interval, region), excluding interconnectors and
    /// storage charging
    async fn load_region_energy_emissions(
        &self,
        network: &Network,
        range: &IntervalRange,
    ) -> Result<Vec<RegionEnergyEmissions>, LoaderError>;
}
