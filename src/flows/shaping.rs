use chrono::{DateTime, FixedOffset};
use std::collections::BTreeMap;

use crate::domain::{Network, NetworkFlowRecord};
use crate::solver::{InterconnectorEnergy, SolverResult};

/// Combine link energy with allocated emissions into per-region import/export records.
///
/// Exports are grouped on the `from` side of each link and imports on the `to` side. A
/// link the solver left without an allocation counts as zero emissions. Market value is
/// not priced yet and is always zero.
pub fn shape_flow_records(
    network: &Network,
    interconnectors: &[InterconnectorEnergy],
    result: &SolverResult,
) -> Vec<NetworkFlowRecord> {
    let emissions = result.emissions_by_flow();
    let mut records: BTreeMap<(DateTime<FixedOffset>, String), NetworkFlowRecord> =
        BTreeMap::new();

    for link in interconnectors {
        let allocated = emissions.get(&link.key()).copied().unwrap_or(0.0);

        let exporter = records
            .entry((link.interval, link.flow.from.clone()))
            .or_insert_with(|| {
                NetworkFlowRecord::empty(link.interval, network.code.clone(), link.flow.from.clone())
            });
        exporter.energy_exports += link.energy;
        exporter.emissions_exports += allocated;

        let importer = records
            .entry((link.interval, link.flow.to.clone()))
            .or_insert_with(|| {
                NetworkFlowRecord::empty(link.interval, network.code.clone(), link.flow.to.clone())
            });
        importer.energy_imports += link.energy;
        importer.emissions_imports += allocated;
    }

    records.into_values().collect()
}
