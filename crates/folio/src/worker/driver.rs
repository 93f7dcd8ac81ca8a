use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};
use serde::Serialize;

use crate::content::BlogRef;
use crate::publish::Publisher;
use crate::queue::{BatchOutcome, QueueError};

/// Why a drive ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Drained,
    Halted,
    BatchLimit,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub blog: BlogRef,
    pub batches: usize,
    pub done: usize,
    pub failed: usize,
    pub remaining: u64,
    pub stop_reason: StopReason,
}

/// The polling client loop: processes batches until the queue drains or
/// halts, `max_batches` is reached, or `cancel` is raised between batches.
pub fn drive(
    publisher: &Publisher,
    blog: BlogRef,
    batch_size: usize,
    max_batches: Option<usize>,
    cancel: &AtomicBool,
) -> Result<RunSummary, QueueError> {
    let mut summary = RunSummary {
        blog,
        batches: 0,
        done: 0,
        failed: 0,
        remaining: 0,
        stop_reason: StopReason::Drained,
    };

    loop {
        if cancel.load(Ordering::Relaxed) {
            summary.stop_reason = StopReason::Cancelled;
            break;
        }
        if max_batches.is_some_and(|max| summary.batches >= max) {
            summary.stop_reason = StopReason::BatchLimit;
            break;
        }

        let report = publisher.process_batch(blog, batch_size)?;
        summary.done += report.done;
        summary.failed += report.failed;
        summary.remaining = report.remaining;
        if report.claimed > 0 {
            summary.batches += 1;
        }
        debug!(
            "Batch for {}: {} done, {} failed, {} remaining",
            blog, report.done, report.failed, report.remaining
        );

        match report.outcome {
            BatchOutcome::Halted => {
                summary.stop_reason = StopReason::Halted;
                break;
            }
            BatchOutcome::Drained => {
                summary.stop_reason = StopReason::Drained;
                break;
            }
            BatchOutcome::Claimed if report.remaining == 0 => {
                summary.stop_reason = StopReason::Drained;
                break;
            }
            BatchOutcome::Claimed => {}
        }
    }

    info!(
        "Drive for {} stopped ({:?}) after {} batches: {} done, {} failed, {} remaining",
        blog, summary.stop_reason, summary.batches, summary.done, summary.failed, summary.remaining
    );
    Ok(summary)
}
