use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;
use tracing::{debug, error};

use super::FlowError;
use crate::domain::{FlowKey, NetFlowRecord, Network, RegionBalance};

/// Largest network-wide import/export difference (MWh) still treated as balanced
pub const ENERGY_BALANCE_TOLERANCE: f64 = 0.5;

/// Sum netted flows into per-region import and export totals for each interval.
///
/// Rows sharing an (interval, link) key are combined first and any negative residual is
/// floored at zero. Fails with [`FlowError::EnergyImbalance`] if network-wide imports and
/// exports differ by half a MWh or more for an interval.
pub fn region_balances(
    network: &Network,
    net_flows: &[NetFlowRecord],
) -> Result<Vec<RegionBalance>, FlowError> {
    let mut per_link: BTreeMap<FlowKey, f64> = BTreeMap::new();
    for record in net_flows {
        *per_link.entry(record.key()).or_default() += record.energy;
    }

    // (imports, exports)
    let mut totals: BTreeMap<(DateTime<FixedOffset>, String), (f64, f64)> = BTreeMap::new();
    for ((interval, flow), energy) in per_link {
        let energy = if energy > 0.0 { energy } else { 0.0 };
        totals.entry((interval, flow.to)).or_default().0 += energy;
        totals.entry((interval, flow.from)).or_default().1 += energy;
    }

    let per_hour = network.intervals_per_hour();
    let balances: Vec<RegionBalance> = totals
        .into_iter()
        .map(|((interval, region), (imports, exports))| RegionBalance {
            interval,
            region,
            energy_imports: imports,
            energy_exports: exports,
            generated_imports: imports * per_hour,
            generated_exports: exports * per_hour,
        })
        .collect();

    check_energy_conservation(&balances)?;

    debug!(
        network = %network.code,
        regions = balances.len(),
        "calculated region import/export balances"
    );

    Ok(balances)
}

/// Network-wide imports must equal exports for every interval, within half a MWh.
pub fn check_energy_conservation(balances: &[RegionBalance]) -> Result<(), FlowError> {
    let mut per_interval: BTreeMap<DateTime<FixedOffset>, (f64, f64)> = BTreeMap::new();
    for balance in balances {
        let entry = per_interval.entry(balance.interval).or_default();
        entry.0 += balance.energy_imports;
        entry.1 += balance.energy_exports;
    }

    for (interval, (imports, exports)) in per_interval {
        if (imports - exports).abs() >= ENERGY_BALANCE_TOLERANCE {
            error!(
                %interval,
                imports,
                exports,
                "energy import and export totals do not match"
            );
            return Err(FlowError::EnergyImbalance {
                interval,
                imports,
                exports,
            });
        }
    }

    Ok(())
}
