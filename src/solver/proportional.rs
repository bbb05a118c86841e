use chrono::{DateTime, FixedOffset};
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, BTreeSet};

use super::{
    FlowSolver, InterconnectorEmissions, InterconnectorEnergy, RegionConsumedEmissions,
    RegionDemandEmissions, SolverError, SolverInput, SolverResult,
};

const EPSILON: f64 = 1e-9;

/// Proportional sharing (flow tracing) allocation.
///
/// Each region is treated as a perfectly mixed pool: everything leaving it, to an
/// interconnector or to local consumption, carries the same emission intensity. With
/// throughput `T = max(generation + imports, exports)` the intensities solve
///
/// ```text
/// c_r * T_r - sum_k f(k->r) * c_k = E_r
/// ```
///
/// and a link `a->b` is allocated `f(a->b) * c_a`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProportionalSharingSolver;

impl FlowSolver for ProportionalSharingSolver {
    fn name(&self) -> &'static str {
        "proportional_sharing"
    }

    fn solve(&self, input: &SolverInput) -> Result<SolverResult, SolverError> {
        let mut flows: BTreeMap<DateTime<FixedOffset>, Vec<&InterconnectorEnergy>> =
            BTreeMap::new();
        for flow in &input.interconnectors {
            flows.entry(flow.interval).or_default().push(flow);
        }

        let mut regions: BTreeMap<DateTime<FixedOffset>, Vec<&RegionDemandEmissions>> =
            BTreeMap::new();
        for region in &input.regions {
            regions.entry(region.interval).or_default().push(region);
        }

        let mut result = SolverResult::default();
        for interval in input.intervals() {
            let interval_flows = flows.get(&interval).map(Vec::as_slice).unwrap_or_default();
            let interval_regions = regions.get(&interval).map(Vec::as_slice).unwrap_or_default();
            solve_interval(interval, interval_flows, interval_regions, &mut result)?;
        }

        Ok(result)
    }
}

fn solve_interval(
    interval: DateTime<FixedOffset>,
    flows: &[&InterconnectorEnergy],
    regions: &[&RegionDemandEmissions],
    out: &mut SolverResult,
) -> Result<(), SolverError> {
    let codes: BTreeSet<&str> = regions
        .iter()
        .map(|r| r.region.as_str())
        .chain(flows.iter().flat_map(|f| [f.flow.from.as_str(), f.flow.to.as_str()]))
        .collect();
    let index: BTreeMap<&str, usize> = codes.iter().enumerate().map(|(i, c)| (*c, i)).collect();
    let n = codes.len();

    let mut generation = vec![0.0; n];
    let mut emissions = vec![0.0; n];
    let mut imports = vec![0.0; n];
    let mut exports = vec![0.0; n];

    for region in regions {
        let i = index[region.region.as_str()];
        generation[i] += region.energy.max(0.0);
        emissions[i] += region.emissions;
    }

    let links: Vec<(usize, usize, f64)> = flows
        .iter()
        .map(|f| {
            (
                index[f.flow.from.as_str()],
                index[f.flow.to.as_str()],
                f.energy.max(0.0),
            )
        })
        .collect();
    for &(from, to, energy) in &links {
        exports[from] += energy;
        imports[to] += energy;
    }

    let throughput: Vec<f64> = (0..n)
        .map(|i| (generation[i] + imports[i]).max(exports[i]))
        .collect();

    let mut a = DMatrix::<f64>::zeros(n, n);
    let mut b = DVector::<f64>::zeros(n);
    for i in 0..n {
        if throughput[i] > EPSILON {
            a[(i, i)] = throughput[i];
            b[i] = emissions[i];
        } else {
            // nothing flows through, pin the intensity at zero
            a[(i, i)] = 1.0;
        }
    }
    for &(from, to, energy) in &links {
        if energy > 0.0 && throughput[to] > EPSILON {
            a[(to, from)] -= energy;
        }
    }

    let solved = a.lu().solve(&b).ok_or(SolverError::Singular { interval })?;

    let mut intensity = vec![0.0; n];
    for (i, code) in codes.iter().enumerate() {
        let c = solved[i];
        if !c.is_finite() || c < -EPSILON {
            return Err(SolverError::NegativeIntensity {
                interval,
                region: code.to_string(),
                intensity: c,
            });
        }
        intensity[i] = c.max(0.0);
    }

    for (flow, &(from, _, energy)) in flows.iter().zip(&links) {
        out.interconnectors.push(InterconnectorEmissions {
            interval,
            flow: flow.flow.clone(),
            emissions: energy * intensity[from],
        });
    }

    for (i, code) in codes.iter().enumerate() {
        let consumed = if throughput[i] > EPSILON {
            intensity[i] * (throughput[i] - exports[i])
        } else {
            emissions[i]
        };
        out.consumed.push(RegionConsumedEmissions {
            interval,
            region: code.to_string(),
            emissions: consumed,
        });
    }

    Ok(())
}
