use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Generation and emissions for a region over one interval, excluding interconnectors
/// and storage charging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEnergyEmissions {
    pub interval: DateTime<FixedOffset>,
    pub network_id: String,
    pub region: String,
    /// Instantaneous generation (MW)
    pub generated: f64,
    /// Energy generated (MWh)
    pub energy: f64,
    /// Emissions (tCO2e)
    pub emissions: f64,
    pub emissions_intensity: f64,
}

impl RegionEnergyEmissions {
    pub fn new(
        interval: DateTime<FixedOffset>,
        network_id: impl Into<String>,
        region: impl Into<String>,
        energy: f64,
        emissions: f64,
        intervals_per_hour: f64,
    ) -> Self {
        Self {
            interval,
            network_id: network_id.into(),
            region: region.into(),
            generated: energy * intervals_per_hour,
            energy,
            emissions,
            emissions_intensity: intensity(emissions, energy),
        }
    }
}

/// Import and export totals for a region over one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionBalance {
    pub interval: DateTime<FixedOffset>,
    pub region: String,
    pub energy_imports: f64,
    pub energy_exports: f64,
    pub generated_imports: f64,
    pub generated_exports: f64,
}

/// Region generation reconciled with its interconnector balance.
///
/// `demand` is the energy generated in-region. Imports and exports are carried alongside
/// but are not netted into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDemand {
    pub interval: DateTime<FixedOffset>,
    pub network_id: String,
    pub region: String,
    pub energy: f64,
    pub emissions: f64,
    pub energy_imports: f64,
    pub energy_exports: f64,
    pub demand: f64,
    pub emissions_intensity: f64,
}

/// `emissions / energy`, or zero when the ratio is undefined
pub fn intensity(emissions: f64, energy: f64) -> f64 {
    if energy > 0.0 && emissions > 0.0 {
        let ratio = emissions / energy;
        if ratio.is_finite() {
            return ratio;
        }
    }
    0.0
}
