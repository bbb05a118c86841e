//! Convenience drivers used by the CLI and scheduled jobs.
//!
//! All take `now` explicitly so the interval arithmetic stays deterministic.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::{debug, info};

use super::{Backfill, BackfillSummary, FlowError, IntervalProcessor};
use crate::domain::{IntervalRange, Network};

/// Re-run each of the last `count` completed intervals on its own, with validation off.
pub async fn run_flows_for_last_intervals<P>(
    processor: &P,
    network: &Network,
    count: usize,
    now: DateTime<Utc>,
) -> Result<usize, FlowError>
where
    P: IntervalProcessor + ?Sized,
{
    info!(network = %network.code, intervals = count, "Running flows for last intervals");

    let step = network.interval_duration();
    let mut interval = network.last_completed_interval(now);
    let mut written = 0;

    for _ in 0..count {
        debug!(%interval, "Running flow for interval");
        written += processor
            .process_range(IntervalRange::single(interval), false)
            .await?;
        interval -= step;
    }

    Ok(written)
}

/// Run whole local days walking backward from `start_date` (default: today), validated.
///
/// Without an explicit start the current day stops at the last completed interval.
pub async fn run_flows_for_last_days<P>(
    processor: &P,
    network: &Network,
    days: u32,
    start_date: Option<DateTime<FixedOffset>>,
    now: DateTime<Utc>,
) -> Result<usize, FlowError>
where
    P: IntervalProcessor + ?Sized,
{
    info!(network = %network.code, days, "Running flows for last days");

    let latest = network.last_completed_interval(now);
    let series_start = match start_date {
        Some(start) => network.start_of_day(start),
        None => network.start_of_day(now),
    };
    let mut written = 0;

    for day_num in 0..days {
        let day = series_start - Duration::days(i64::from(day_num));
        let mut end = day + Duration::days(1) - network.interval_duration();
        if day_num == 0 && start_date.is_none() {
            end = latest;
        }

        debug!(%day, interval_end = %end, "Running flow for day");
        written += processor
            .process_range(IntervalRange::new(day, end), true)
            .await?;
    }

    Ok(written)
}

/// Backfill the network's whole history, from `now` back to when its data was first seen.
pub async fn run_flow_updates_all_for_network<P>(
    processor: &P,
    network: &Network,
    backfill: &Backfill,
    now: DateTime<Utc>,
) -> Result<BackfillSummary, FlowError>
where
    P: IntervalProcessor + ?Sized,
{
    let first_seen = network
        .data_first_seen
        .ok_or_else(|| FlowError::MissingFirstSeen(network.code.clone()))?;

    Ok(backfill
        .run(processor, network.localize(now), first_seen)
        .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingProcessor {
        seen: Mutex<Vec<(IntervalRange, bool)>>,
    }

    #[async_trait]
    impl IntervalProcessor for RecordingProcessor {
        async fn process_range(
            &self,
            range: IntervalRange,
            validate: bool,
        ) -> Result<usize, FlowError> {
            self.seen.lock().push((range, validate));
            Ok(1)
        }
    }

    fn aest() -> FixedOffset {
        FixedOffset::east_opt(10 * 3600).unwrap()
    }

    fn nem() -> Network {
        Network::new("NEM", aest(), 5)
    }

    fn local(d: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        aest().with_ymd_and_hms(2023, 4, d, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_last_intervals_run_individually_without_validation() {
        let processor = RecordingProcessor::default();
        let now = local(9, 10, 17).with_timezone(&Utc);

        let written = run_flows_for_last_intervals(&processor, &nem(), 3, now)
            .await
            .unwrap();

        assert_eq!(written, 3);
        let seen = processor.seen.lock();
        let starts: Vec<_> = seen.iter().map(|(r, _)| r.start).collect();
        assert_eq!(starts, vec![local(9, 10, 15), local(9, 10, 10), local(9, 10, 5)]);
        assert!(seen.iter().all(|(r, v)| r.is_single_interval() && !v));
    }

    #[tokio::test]
    async fn test_last_intervals_cross_midnight() {
        let processor = RecordingProcessor::default();
        let now = local(9, 0, 7).with_timezone(&Utc);

        let written = run_flows_for_last_intervals(&processor, &nem(), 300, now)
            .await
            .unwrap();

        assert_eq!(written, 300);
        let seen = processor.seen.lock();
        assert_eq!(seen[0].0.start, local(9, 0, 5));
        assert_eq!(seen[1].0.start, local(9, 0, 0));
        assert_eq!(seen[2].0.start, local(8, 23, 55));
        // 299 steps of five minutes before 00:05
        assert_eq!(seen[299].0.start, local(8, 23, 55) - Duration::minutes(5 * 297));
    }

    #[tokio::test]
    async fn test_zero_last_intervals_runs_nothing() {
        let processor = RecordingProcessor::default();
        let written = run_flows_for_last_intervals(&processor, &nem(), 0, Utc::now())
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert!(processor.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_last_days_stop_today_at_latest_interval() {
        let processor = RecordingProcessor::default();
        let now = local(9, 10, 17).with_timezone(&Utc);

        run_flows_for_last_days(&processor, &nem(), 2, None, now)
            .await
            .unwrap();

        let seen = processor.seen.lock();
        assert_eq!(seen[0].0, IntervalRange::new(local(9, 0, 0), local(9, 10, 15)));
        assert_eq!(seen[1].0, IntervalRange::new(local(8, 0, 0), local(8, 23, 55)));
        assert!(seen.iter().all(|(_, validate)| *validate));
    }

    #[tokio::test]
    async fn test_last_days_from_explicit_start_uses_full_days() {
        let processor = RecordingProcessor::default();
        let now = local(9, 10, 17).with_timezone(&Utc);

        run_flows_for_last_days(&processor, &nem(), 1, Some(local(3, 14, 0)), now)
            .await
            .unwrap();

        let seen = processor.seen.lock();
        assert_eq!(seen[0].0, IntervalRange::new(local(3, 0, 0), local(3, 23, 55)));
    }

    #[tokio::test]
    async fn test_full_history_needs_first_seen() {
        let processor = RecordingProcessor::default();
        let err = run_flow_updates_all_for_network(&processor, &nem(), &Backfill::default(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::MissingFirstSeen(code) if code == "NEM"));
    }

    #[tokio::test]
    async fn test_full_history_walks_back_to_first_seen() {
        let processor = RecordingProcessor::default();
        let network = nem().with_data_first_seen(local(1, 0, 0));
        let now = local(9, 0, 0).with_timezone(&Utc);

        let summary = run_flow_updates_all_for_network(&processor, &network, &Backfill::new(7), now)
            .await
            .unwrap();

        assert_eq!(summary.blocks_attempted, 2);
        let seen = processor.seen.lock();
        assert_eq!(seen[1].0, IntervalRange::new(local(1, 0, 0), local(2, 0, 0)));
    }
}
