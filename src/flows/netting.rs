//! Flow netting
//!
//! Interconnector telemetry arrives in whatever frame the facility reports in. Netting
//! mirrors every reading into the opposite frame and suppresses the non-positive side, so
//! each physical link ends up with one positive row in the direction energy travelled.

use crate::domain::{FlowFrame, InterconnectorReading, NetFlowRecord};

/// Net raw interconnector readings into both physical directions.
///
/// For every reading on `A->B` a mirrored row on `B->A` is produced with `generated` and
/// `energy` negated. Any row whose energy is not strictly positive is zeroed on both values.
pub fn net_flows(readings: &[InterconnectorReading]) -> Vec<NetFlowRecord> {
    let mut netted = Vec::with_capacity(readings.len() * 2);

    for reading in readings {
        netted.push(suppress_non_positive(NetFlowRecord {
            interval: reading.interval,
            flow: reading.flow.clone(),
            frame: FlowFrame::Reported,
            generated: reading.generated,
            energy: reading.energy,
        }));
        netted.push(suppress_non_positive(NetFlowRecord {
            interval: reading.interval,
            flow: reading.flow.reversed(),
            frame: FlowFrame::Mirrored,
            generated: -reading.generated,
            energy: -reading.energy,
        }));
    }

    netted.sort_by(|a, b| {
        a.interval
            .cmp(&b.interval)
            .then_with(|| a.flow.cmp(&b.flow))
            .then_with(|| a.frame.cmp(&b.frame))
    });
    netted
}

fn suppress_non_positive(mut record: NetFlowRecord) -> NetFlowRecord {
    if record.energy > 0.0 {
        return record;
    }
    // NaN lands here as well
    record.generated = 0.0;
    record.energy = 0.0;
    record
}
