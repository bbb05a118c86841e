use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

use super::balance::ENERGY_BALANCE_TOLERANCE;
use crate::config::FlowsConfig;
use crate::domain::NetworkFlowRecord;

/// Default ceiling on implied emission factors (t/MWh)
pub const DEFAULT_EMISSION_FACTOR_CEILING: f64 = 1.7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ViolationKind {
    /// A computed column went negative
    NegativeValue { field: &'static str, value: f64 },
    /// Exports emission factor outside the plausible band
    ExportsEmissionFactor { factor: f64 },
    /// Imports emission factor outside the plausible band
    ImportsEmissionFactor { factor: f64 },
    /// Network-wide imports and exports disagree for the interval
    EnergyImbalance { imports: f64, exports: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub interval: DateTime<FixedOffset>,
    /// Region code, or the network code for network-wide violations
    pub region: String,
    pub kind: ViolationKind,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::NegativeValue { field, value } => {
                write!(f, "Bad value: {} {} {} {}", self.interval, self.region, field, value)
            }
            ViolationKind::ExportsEmissionFactor { factor } => write!(
                f,
                "Bad exports emission factor: {} {} {}",
                self.interval, self.region, factor
            ),
            ViolationKind::ImportsEmissionFactor { factor } => write!(
                f,
                "Bad imports emission factor: {} {} {}",
                self.interval, self.region, factor
            ),
            ViolationKind::EnergyImbalance { imports, exports } => write!(
                f,
                "Energy imbalance: {} {} imports {} exports {}",
                self.interval, self.region, imports, exports
            ),
        }
    }
}

#[derive(Debug, Error)]
#[error("{} flow record violations, first: {}", .violations.len(), first_violation(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

fn first_violation(violations: &[Violation]) -> String {
    violations
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

/// Sanity checks on shaped flow records before they are persisted.
#[derive(Debug, Clone)]
pub struct FlowValidator {
    factor_floor: f64,
    factor_ceiling: f64,
}

impl Default for FlowValidator {
    fn default() -> Self {
        Self {
            factor_floor: 0.0,
            factor_ceiling: DEFAULT_EMISSION_FACTOR_CEILING,
        }
    }
}

impl FlowValidator {
    pub fn new(factor_floor: f64, factor_ceiling: f64) -> Self {
        Self {
            factor_floor,
            factor_ceiling,
        }
    }

    pub fn from_config(cfg: &FlowsConfig) -> Self {
        Self::new(cfg.emission_factor_floor, cfg.emission_factor_ceiling)
    }

    /// Collect every violation across the records
    pub fn check(&self, records: &[NetworkFlowRecord]) -> Vec<Violation> {
        let mut violations = Vec::new();
        // (imports, exports) per interval and network
        let mut totals: BTreeMap<(DateTime<FixedOffset>, &str), (f64, f64)> = BTreeMap::new();

        for rec in records {
            let entry = totals
                .entry((rec.trading_interval, rec.network_id.as_str()))
                .or_default();
            entry.0 += rec.energy_imports;
            entry.1 += rec.energy_exports;

            let fields = [
                ("energy_exports", rec.energy_exports),
                ("energy_imports", rec.energy_imports),
                ("emissions_exports", rec.emissions_exports),
                ("emissions_imports", rec.emissions_imports),
            ];
            for (field, value) in fields {
                if value < 0.0 || value.is_nan() {
                    violations.push(Violation {
                        interval: rec.trading_interval,
                        region: rec.network_region.clone(),
                        kind: ViolationKind::NegativeValue { field, value },
                    });
                }
            }

            if let Some(factor) = rec.exports_emission_factor() {
                if !self.factor_in_bounds(factor) {
                    violations.push(Violation {
                        interval: rec.trading_interval,
                        region: rec.network_region.clone(),
                        kind: ViolationKind::ExportsEmissionFactor { factor },
                    });
                }
            }

            if let Some(factor) = rec.imports_emission_factor() {
                if !self.factor_in_bounds(factor) {
                    violations.push(Violation {
                        interval: rec.trading_interval,
                        region: rec.network_region.clone(),
                        kind: ViolationKind::ImportsEmissionFactor { factor },
                    });
                }
            }
        }

        for ((interval, network), (imports, exports)) in totals {
            if (imports - exports).abs() >= ENERGY_BALANCE_TOLERANCE {
                violations.push(Violation {
                    interval,
                    region: network.to_string(),
                    kind: ViolationKind::EnergyImbalance { imports, exports },
                });
            }
        }

        violations
    }

    /// Log every violation, then fail if `enforce` is set.
    ///
    /// With `enforce` off the violations are only reported at warn level and the records
    /// are let through.
    pub fn validate(
        &self,
        records: &[NetworkFlowRecord],
        enforce: bool,
    ) -> Result<(), ValidationError> {
        let violations = self.check(records);
        if violations.is_empty() {
            return Ok(());
        }

        for violation in &violations {
            if enforce {
                error!(%violation, "flow record failed validation");
            } else {
                warn!(%violation, "flow record failed validation (not enforced)");
            }
        }

        if enforce {
            return Err(ValidationError { violations });
        }
        Ok(())
    }

    fn factor_in_bounds(&self, factor: f64) -> bool {
        factor.is_finite() && (self.factor_floor..=self.factor_ceiling).contains(&factor)
    }
}
