use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A directed interconnector between two network regions, written `FROM->TO`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionFlow {
    pub from: String,
    pub to: String,
}

impl RegionFlow {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The same link seen from the opposite reference frame
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }
}

impl fmt::Display for RegionFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid region flow '{0}', expected FROM->TO")]
pub struct ParseRegionFlowError(String);

impl FromStr for RegionFlow {
    type Err = ParseRegionFlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("->") {
            Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
                Ok(Self::new(from.trim(), to.trim()))
            }
            _ => Err(ParseRegionFlowError(s.to_string())),
        }
    }
}

/// Key used to join flows with their allocated emissions
pub type FlowKey = (DateTime<FixedOffset>, RegionFlow);

/// Raw interconnector telemetry for one interval, in the frame it was reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterconnectorReading {
    pub interval: DateTime<FixedOffset>,
    pub flow: RegionFlow,
    /// Instantaneous flow (MW), signed in the reported frame
    pub generated: f64,
    /// Energy over the interval (MWh), signed in the reported frame
    pub energy: f64,
}

impl InterconnectorReading {
    pub fn new(
        interval: DateTime<FixedOffset>,
        flow: RegionFlow,
        generated: f64,
        energy: f64,
    ) -> Self {
        Self {
            interval,
            flow,
            generated,
            energy,
        }
    }
}

/// Which reference frame a netted flow row came from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[strum(serialize_all = "snake_case")]
pub enum FlowFrame {
    Reported,
    Mirrored,
}

/// A netted flow: non-negative energy travelling `flow.from` to `flow.to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetFlowRecord {
    pub interval: DateTime<FixedOffset>,
    pub flow: RegionFlow,
    pub frame: FlowFrame,
    pub generated: f64,
    pub energy: f64,
}

impl NetFlowRecord {
    pub fn key(&self) -> FlowKey {
        (self.interval, self.flow.clone())
    }
}
