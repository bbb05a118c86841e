use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;

use crate::domain::{intensity, Network, RegionBalance, RegionDemand, RegionEnergyEmissions};

/// Merge region generation and emissions with interconnector balances.
///
/// Every (interval, region) present on either side gets a row; a missing side contributes
/// zeros. Demand equals in-region generated energy, imports and exports are carried as
/// separate columns.
pub fn reconcile_demand(
    network: &Network,
    generation: &[RegionEnergyEmissions],
    balances: &[RegionBalance],
) -> Vec<RegionDemand> {
    let mut merged: BTreeMap<(DateTime<FixedOffset>, String), RegionDemand> = BTreeMap::new();

    for source in generation {
        let row = merged
            .entry((source.interval, source.region.clone()))
            .or_insert_with(|| empty_demand(network, source.interval, &source.region));
        row.energy += source.energy;
        row.emissions += source.emissions;
    }

    for balance in balances {
        let row = merged
            .entry((balance.interval, balance.region.clone()))
            .or_insert_with(|| empty_demand(network, balance.interval, &balance.region));
        row.energy_imports += balance.energy_imports;
        row.energy_exports += balance.energy_exports;
    }

    merged
        .into_values()
        .map(|mut row| {
            row.demand = row.energy;
            row.emissions_intensity = intensity(row.emissions, row.demand);
            row
        })
        .collect()
}

fn empty_demand(network: &Network, interval: DateTime<FixedOffset>, region: &str) -> RegionDemand {
    RegionDemand {
        interval,
        network_id: network.code.clone(),
        region: region.to_string(),
        energy: 0.0,
        emissions: 0.0,
        energy_imports: 0.0,
        energy_exports: 0.0,
        demand: 0.0,
        emissions_intensity: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nem() -> Network {
        Network::new("NEM", FixedOffset::east_opt(10 * 3600).unwrap(), 5)
    }

    fn at() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(10 * 3600)
            .unwrap()
            .with_ymd_and_hms(2023, 4, 9, 10, 20, 0)
            .unwrap()
    }

    fn balance(region: &str, imports: f64, exports: f64) -> RegionBalance {
        RegionBalance {
            interval: at(),
            region: region.into(),
            energy_imports: imports,
            energy_exports: exports,
            generated_imports: imports * 12.0,
            generated_exports: exports * 12.0,
        }
    }

    #[test]
    fn test_demand_is_generation_only() {
        let generation = vec![RegionEnergyEmissions::new(at(), "NEM", "NSW1", 468.1, 226.5, 12.0)];
        let balances = vec![balance("NSW1", 82.5, 0.0)];

        let demand = reconcile_demand(&nem(), &generation, &balances);
        assert_eq!(demand.len(), 1);

        let nsw = &demand[0];
        assert_eq!(nsw.demand, 468.1);
        assert_eq!(nsw.energy_imports, 82.5);
        assert!((nsw.emissions_intensity - 226.5 / 468.1).abs() < 1e-12);
    }

    #[test]
    fn test_zero_demand_intensity_is_guarded() {
        let demand = reconcile_demand(&nem(), &[], &[balance("TAS1", 0.0, 11.0)]);
        assert_eq!(demand.len(), 1);
        assert_eq!(demand[0].demand, 0.0);
        assert_eq!(demand[0].emissions_intensity, 0.0);
        assert_eq!(demand[0].energy_exports, 11.0);
    }

    #[test]
    fn test_generation_without_interconnectors_is_kept() {
        let generation = vec![RegionEnergyEmissions::new(at(), "NEM", "SA1", 36.9, 9.06, 12.0)];
        let demand = reconcile_demand(&nem(), &generation, &[balance("VIC1", 0.0, 0.0)]);
        assert_eq!(demand.len(), 2);
        let sa = demand.iter().find(|d| d.region == "SA1").unwrap();
        assert_eq!(sa.energy_imports, 0.0);
        assert_eq!(sa.network_id, "NEM");
    }
}
