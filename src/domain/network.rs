use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A zonal electricity network with a fixed local offset and interval granularity.
///
/// Trading intervals are labelled period-ending in the network's local time, so an
/// interval label is also the instant the interval closes.
#[derive(Debug, Clone)]
pub struct Network {
    pub code: String,
    utc_offset: FixedOffset,
    interval_minutes: u32,
    /// Earliest interval for which telemetry exists
    pub data_first_seen: Option<DateTime<FixedOffset>>,
    /// Other network codes whose facilities generate into this network (rooftop solar etc.)
    pub additional_generation_networks: Vec<String>,
}

impl Network {
    pub fn new(code: impl Into<String>, utc_offset: FixedOffset, interval_minutes: u32) -> Self {
        Self {
            code: code.into(),
            utc_offset,
            interval_minutes: interval_minutes.max(1),
            data_first_seen: None,
            additional_generation_networks: Vec::new(),
        }
    }

    pub fn with_data_first_seen(mut self, first_seen: DateTime<FixedOffset>) -> Self {
        self.data_first_seen = Some(first_seen.with_timezone(&self.utc_offset));
        self
    }

    pub fn with_additional_generation_networks(mut self, codes: Vec<String>) -> Self {
        self.additional_generation_networks = codes;
        self
    }

    pub fn fixed_offset(&self) -> FixedOffset {
        self.utc_offset
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Number of intervals in one hour, used to convert MWh per interval to MW
    pub fn intervals_per_hour(&self) -> f64 {
        60.0 / f64::from(self.interval_minutes)
    }

    /// Network codes whose generation counts towards this network's regions
    pub fn generation_network_codes(&self) -> Vec<String> {
        let mut codes = vec![self.code.clone()];
        codes.extend(self.additional_generation_networks.iter().cloned());
        codes
    }

    pub fn localize<Tz: TimeZone>(&self, at: DateTime<Tz>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.utc_offset)
    }

    /// Floor a timestamp to the interval grid in network local time
    pub fn floor_to_interval<Tz: TimeZone>(&self, at: DateTime<Tz>) -> DateTime<FixedOffset> {
        let local = self.localize(at);
        let step = i64::from(self.interval_minutes) * 60;
        let local_secs = local.timestamp() + i64::from(self.utc_offset.local_minus_utc());
        let rem = local_secs.rem_euclid(step);
        local
            - Duration::seconds(rem)
            - Duration::nanoseconds(i64::from(local.timestamp_subsec_nanos()))
    }

    /// The most recent interval label that has fully elapsed at `now`
    pub fn last_completed_interval(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        self.floor_to_interval(now)
    }

    /// Local midnight of the day containing `at`
    pub fn start_of_day<Tz: TimeZone>(&self, at: DateTime<Tz>) -> DateTime<FixedOffset> {
        let local = self.localize(at);
        let secs = local.timestamp() + i64::from(self.utc_offset.local_minus_utc());
        let rem = secs.rem_euclid(86_400);
        local
            - Duration::seconds(rem)
            - Duration::nanoseconds(i64::from(local.timestamp_subsec_nanos()))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// A closed range of interval labels, always ordered `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalRange {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl IntervalRange {
    /// Build a range, swapping the bounds if they were passed inverted
    pub fn new(start: DateTime<FixedOffset>, end: DateTime<FixedOffset>) -> Self {
        if start > end {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    pub fn single(interval: DateTime<FixedOffset>) -> Self {
        Self {
            start: interval,
            end: interval,
        }
    }

    pub fn from_optional_end(
        start: DateTime<FixedOffset>,
        end: Option<DateTime<FixedOffset>>,
    ) -> Self {
        Self::new(start, end.unwrap_or(start))
    }

    pub fn is_single_interval(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for IntervalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} => {}", self.start, self.end)
    }
}
