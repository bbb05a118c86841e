//! Emissions allocation over interconnector flows
//!
//! The pipeline talks to a [`FlowSolver`] through [`SolverAdapter`], which builds the
//! canonical [`SolverInput`] and refuses any [`SolverResult`] that does not line up with
//! it: every netted link must be allocated exactly once, allocations must be non-negative,
//! and emissions must balance at every region in every interval.

pub mod proportional;

pub use proportional::ProportionalSharingSolver;

use chrono::{DateTime, FixedOffset};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use crate::domain::{FlowKey, NetFlowRecord, Network, RegionDemand, RegionFlow};

/// Relative tolerance for the conservation check
pub const CONSERVATION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("no interconnector flows to solve for network {network}")]
    EmptyInput { network: String },

    #[error("interval {interval} has interconnector flows but no region demand")]
    InputMismatch { interval: DateTime<FixedOffset> },

    #[error("solver input is not contiguous: gap between {previous} and {next}")]
    NonContiguous {
        previous: DateTime<FixedOffset>,
        next: DateTime<FixedOffset>,
    },

    #[error("flow system for interval {interval} is singular")]
    Singular { interval: DateTime<FixedOffset> },

    #[error("negative emission intensity {intensity} for {region} at {interval}")]
    NegativeIntensity {
        interval: DateTime<FixedOffset>,
        region: String,
        intensity: f64,
    },

    #[error(
        "solver '{solver}' output does not match input flows: {missing} missing, {unexpected} unexpected"
    )]
    KeyMismatch {
        solver: &'static str,
        missing: usize,
        unexpected: usize,
    },

    #[error("invalid emissions {emissions} allocated to {flow} at {interval}")]
    NegativeAllocation {
        interval: DateTime<FixedOffset>,
        flow: RegionFlow,
        emissions: f64,
    },

    #[error("emissions not conserved for {region} at {interval}: in {inflow:.6} out {outflow:.6}")]
    ConservationViolated {
        interval: DateTime<FixedOffset>,
        region: String,
        inflow: f64,
        outflow: f64,
    },
}

/// Net energy on one directed interconnector for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterconnectorEnergy {
    pub interval: DateTime<FixedOffset>,
    pub flow: RegionFlow,
    pub generated: f64,
    pub energy: f64,
}

impl InterconnectorEnergy {
    pub fn key(&self) -> FlowKey {
        (self.interval, self.flow.clone())
    }
}

/// Region demand (MWh) and in-region emissions (t) for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDemandEmissions {
    pub interval: DateTime<FixedOffset>,
    pub region: String,
    pub energy: f64,
    pub emissions: f64,
}

/// Canonical solver input covering one contiguous interval range of one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverInput {
    pub network_id: String,
    pub interconnectors: Vec<InterconnectorEnergy>,
    pub regions: Vec<RegionDemandEmissions>,
}

impl SolverInput {
    /// Build solver input from netted flows and reconciled demand.
    ///
    /// Netted rows sharing a link key are combined. Demand rows outside the intervals
    /// carrying flows are dropped, so both collections cover the same intervals.
    pub fn from_pipeline(
        network: &Network,
        net_flows: &[NetFlowRecord],
        demand: &[RegionDemand],
    ) -> Result<Self, SolverError> {
        let mut links: BTreeMap<FlowKey, (f64, f64)> = BTreeMap::new();
        for record in net_flows {
            let entry = links.entry(record.key()).or_default();
            entry.0 += record.generated;
            entry.1 += record.energy;
        }

        if links.is_empty() {
            return Err(SolverError::EmptyInput {
                network: network.code.clone(),
            });
        }

        let interconnectors: Vec<InterconnectorEnergy> = links
            .into_iter()
            .map(|((interval, flow), (generated, energy))| InterconnectorEnergy {
                interval,
                flow,
                generated,
                energy,
            })
            .collect();

        let intervals: BTreeSet<DateTime<FixedOffset>> =
            interconnectors.iter().map(|i| i.interval).collect();
        check_contiguous(network, &intervals)?;

        let regions: Vec<RegionDemandEmissions> = demand
            .iter()
            .filter(|d| intervals.contains(&d.interval))
            .map(|d| RegionDemandEmissions {
                interval: d.interval,
                region: d.region.clone(),
                energy: d.demand,
                emissions: d.emissions,
            })
            .collect();

        let covered: BTreeSet<DateTime<FixedOffset>> = regions.iter().map(|r| r.interval).collect();
        if let Some(interval) = intervals.iter().find(|i| !covered.contains(*i)) {
            return Err(SolverError::InputMismatch {
                interval: *interval,
            });
        }

        Ok(Self {
            network_id: network.code.clone(),
            interconnectors,
            regions,
        })
    }

    pub fn intervals(&self) -> BTreeSet<DateTime<FixedOffset>> {
        self.interconnectors
            .iter()
            .map(|i| i.interval)
            .chain(self.regions.iter().map(|r| r.interval))
            .collect()
    }

    pub fn flow_keys(&self) -> BTreeSet<FlowKey> {
        self.interconnectors.iter().map(InterconnectorEnergy::key).collect()
    }
}

fn check_contiguous(
    network: &Network,
    intervals: &BTreeSet<DateTime<FixedOffset>>,
) -> Result<(), SolverError> {
    let step = network.interval_duration();
    for (previous, next) in intervals.iter().tuple_windows() {
        if *next - *previous != step {
            return Err(SolverError::NonContiguous {
                previous: *previous,
                next: *next,
            });
        }
    }
    Ok(())
}

/// Emissions allocated to one directed interconnector for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterconnectorEmissions {
    pub interval: DateTime<FixedOffset>,
    pub flow: RegionFlow,
    pub emissions: f64,
}

/// Emissions consumed inside a region for one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConsumedEmissions {
    pub interval: DateTime<FixedOffset>,
    pub region: String,
    pub emissions: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverResult {
    pub interconnectors: Vec<InterconnectorEmissions>,
    pub consumed: Vec<RegionConsumedEmissions>,
}

impl SolverResult {
    pub fn emissions_by_flow(&self) -> BTreeMap<FlowKey, f64> {
        self.interconnectors
            .iter()
            .map(|i| ((i.interval, i.flow.clone()), i.emissions))
            .collect()
    }
}

/// A numerical method allocating region emissions onto interconnector flows.
///
/// Implementations receive the whole interval range at once and may use cross-interval
/// context. Output must hold one allocation per input link, never negative, and conserve
/// emissions at every region in every interval.
pub trait FlowSolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn solve(&self, input: &SolverInput) -> Result<SolverResult, SolverError>;
}

/// Runs a [`FlowSolver`] and verifies its output against the input contract.
#[derive(Clone)]
pub struct SolverAdapter {
    solver: Arc<dyn FlowSolver>,
    tolerance: f64,
}

impl SolverAdapter {
    pub fn new(solver: Arc<dyn FlowSolver>) -> Self {
        Self {
            solver,
            tolerance: CONSERVATION_TOLERANCE,
        }
    }

    /// Relative tolerance for the per-region emissions conservation re-check
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    pub fn allocate(&self, input: &SolverInput) -> Result<SolverResult, SolverError> {
        debug!(
            solver = self.solver.name(),
            network = %input.network_id,
            links = input.interconnectors.len(),
            regions = input.regions.len(),
            "solving flow emissions"
        );

        let result = self.solver.solve(input)?;
        self.verify(input, &result).inspect_err(|e| {
            error!(solver = self.solver.name(), error = %e, "rejected solver output");
        })?;
        Ok(result)
    }

    fn verify(&self, input: &SolverInput, result: &SolverResult) -> Result<(), SolverError> {
        let expected = input.flow_keys();
        let mut seen: BTreeSet<FlowKey> = BTreeSet::new();
        let mut unexpected = 0;
        for allocation in &result.interconnectors {
            let key = (allocation.interval, allocation.flow.clone());
            if !expected.contains(&key) || !seen.insert(key) {
                unexpected += 1;
            }
        }
        let missing = expected.difference(&seen).count();
        if missing > 0 || unexpected > 0 {
            return Err(SolverError::KeyMismatch {
                solver: self.solver.name(),
                missing,
                unexpected,
            });
        }

        if let Some(bad) = result
            .interconnectors
            .iter()
            .find(|a| !a.emissions.is_finite() || a.emissions < 0.0)
        {
            return Err(SolverError::NegativeAllocation {
                interval: bad.interval,
                flow: bad.flow.clone(),
                emissions: bad.emissions,
            });
        }

        // (inflow, outflow) per region and interval
        let mut ledger: BTreeMap<(DateTime<FixedOffset>, &str), (f64, f64)> = BTreeMap::new();
        for region in &input.regions {
            ledger
                .entry((region.interval, region.region.as_str()))
                .or_default()
                .0 += region.emissions;
        }
        for allocation in &result.interconnectors {
            ledger
                .entry((allocation.interval, allocation.flow.to.as_str()))
                .or_default()
                .0 += allocation.emissions;
            ledger
                .entry((allocation.interval, allocation.flow.from.as_str()))
                .or_default()
                .1 += allocation.emissions;
        }
        for consumed in &result.consumed {
            ledger
                .entry((consumed.interval, consumed.region.as_str()))
                .or_default()
                .1 += consumed.emissions;
        }

        for ((interval, region), (inflow, outflow)) in ledger {
            let scale = inflow.abs().max(outflow.abs()).max(1.0);
            let balanced = (inflow - outflow).abs() <= self.tolerance * scale;
            if !balanced {
                return Err(SolverError::ConservationViolated {
                    interval,
                    region: region.to_string(),
                    inflow,
                    outflow,
                });
            }
        }

        Ok(())
    }
}
