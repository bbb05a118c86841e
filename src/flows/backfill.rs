use chrono::{DateTime, Duration, FixedOffset};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::IntervalProcessor;
use crate::domain::IntervalRange;

pub const DEFAULT_BLOCK_DAYS: u32 = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockFailure {
    pub range: IntervalRange,
    pub error: String,
}

/// Outcome of a backfill. Failed blocks are listed so coverage gaps can be re-run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillSummary {
    pub blocks_attempted: usize,
    pub blocks_failed: usize,
    pub records_written: usize,
    pub failed_ranges: Vec<BlockFailure>,
    pub cancelled: bool,
}

impl BackfillSummary {
    pub fn is_complete(&self) -> bool {
        self.blocks_failed == 0 && !self.cancelled
    }
}

/// Walks a historical range backward in fixed-size blocks, one block at a time.
///
/// A failing block is logged and recorded, then the walk moves on to the next earlier
/// block. Cancellation is honoured between blocks only.
#[derive(Debug, Clone)]
pub struct Backfill {
    block: Duration,
    validate: bool,
    cancel: CancellationToken,
}

impl Default for Backfill {
    fn default() -> Self {
        Self::new(DEFAULT_BLOCK_DAYS)
    }
}

impl Backfill {
    pub fn new(block_days: u32) -> Self {
        Self {
            block: Duration::days(i64::from(block_days.max(1))),
            validate: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn without_validation(mut self) -> Self {
        self.validate = false;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Blocks covering `[earliest, latest]`, latest first. Neighbouring blocks share their
    /// boundary interval and the earliest block is clamped to `earliest`.
    pub fn blocks(
        &self,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> Vec<IntervalRange> {
        let range = IntervalRange::new(from, to);
        let mut blocks = Vec::new();
        let mut block_end = range.end;

        while block_end > range.start {
            let block_start = (block_end - self.block).max(range.start);
            blocks.push(IntervalRange::new(block_start, block_end));
            block_end = block_start;
        }

        if blocks.is_empty() {
            blocks.push(range);
        }
        blocks
    }

    /// Run every block of the range through `processor`. Never fails; see the summary.
    pub async fn run<P>(
        &self,
        processor: &P,
        from: DateTime<FixedOffset>,
        to: DateTime<FixedOffset>,
    ) -> BackfillSummary
    where
        P: IntervalProcessor + ?Sized,
    {
        let mut summary = BackfillSummary::default();

        for block in self.blocks(from, to) {
            if self.cancel.is_cancelled() {
                warn!(remaining_from = %block.end, "backfill cancelled");
                summary.cancelled = true;
                break;
            }

            info!(
                interval_start = %block.start,
                interval_end = %block.end,
                "Running aggregate flows for block"
            );
            summary.blocks_attempted += 1;

            match processor.process_range(block, self.validate).await {
                Ok(written) => summary.records_written += written,
                Err(e) => {
                    error!(
                        interval_start = %block.start,
                        interval_end = %block.end,
                        error = %e,
                        "Error running aggregate flows for block"
                    );
                    summary.blocks_failed += 1;
                    summary.failed_ranges.push(BlockFailure {
                        range: block,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            blocks_attempted = summary.blocks_attempted,
            blocks_failed = summary.blocks_failed,
            records_written = summary.records_written,
            "Completed."
        );
        summary
    }
}
