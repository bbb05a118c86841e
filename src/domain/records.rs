use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Unique key of a persisted flow record: (trading_interval, network_id, network_region)
pub type FlowRecordKey = (DateTime<FixedOffset>, String, String);

/// Import/export energy, emissions and market value for one region and interval.
///
/// This is the only durable output of the flows pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFlowRecord {
    pub trading_interval: DateTime<FixedOffset>,
    pub network_id: String,
    pub network_region: String,
    pub energy_imports: f64,
    pub energy_exports: f64,
    pub emissions_imports: f64,
    pub emissions_exports: f64,
    pub market_value_imports: f64,
    pub market_value_exports: f64,
}

impl NetworkFlowRecord {
    pub fn empty(
        trading_interval: DateTime<FixedOffset>,
        network_id: impl Into<String>,
        network_region: impl Into<String>,
    ) -> Self {
        Self {
            trading_interval,
            network_id: network_id.into(),
            network_region: network_region.into(),
            energy_imports: 0.0,
            energy_exports: 0.0,
            emissions_imports: 0.0,
            emissions_exports: 0.0,
            market_value_imports: 0.0,
            market_value_exports: 0.0,
        }
    }

    pub fn key(&self) -> FlowRecordKey {
        (
            self.trading_interval,
            self.network_id.clone(),
            self.network_region.clone(),
        )
    }

    /// Implied emission factor of imports (t/MWh), if any energy was imported
    pub fn imports_emission_factor(&self) -> Option<f64> {
        (self.energy_imports > 0.0).then(|| self.emissions_imports / self.energy_imports)
    }

    /// Implied emission factor of exports (t/MWh), if any energy was exported
    pub fn exports_emission_factor(&self) -> Option<f64> {
        (self.energy_exports > 0.0).then(|| self.emissions_exports / self.energy_exports)
    }

    /// Overwrite the computed columns with those of `other`, keeping the key
    pub fn update_from(&mut self, other: &NetworkFlowRecord) {
        self.energy_imports = other.energy_imports;
        self.energy_exports = other.energy_exports;
        self.emissions_imports = other.emissions_imports;
        self.emissions_exports = other.emissions_exports;
        self.market_value_imports = other.market_value_imports;
        self.market_value_exports = other.market_value_exports;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_emission_factors_only_with_energy() {
        let at = FixedOffset::east_opt(10 * 3600)
            .unwrap()
            .with_ymd_and_hms(2023, 4, 9, 10, 15, 0)
            .unwrap();
        let mut rec = NetworkFlowRecord::empty(at, "NEM", "NSW1");
        assert_eq!(rec.imports_emission_factor(), None);

        rec.energy_exports = 10.0;
        rec.emissions_exports = 8.0;
        assert_eq!(rec.exports_emission_factor(), Some(0.8));
        assert_eq!(rec.imports_emission_factor(), None);
    }
}
