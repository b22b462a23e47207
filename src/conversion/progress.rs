//! Live counters for a running batch.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use stillforged_common::{ConversionResult, ConversionStatus};

/// Counters shared between the scheduler and observers such as the
/// `/progress` endpoint.
#[derive(Debug, Default)]
pub struct BatchProgress {
    queued: AtomicUsize,
    in_flight: AtomicUsize,
    successful: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

/// Point-in-time copy of [`BatchProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub queued: usize,
    pub in_flight: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` objects to the pending queue.
    pub fn enqueue(&self, count: usize) {
        self.queued.fetch_add(count, Ordering::Relaxed);
    }

    /// Move one object from queued to in flight.
    pub fn dispatched(&self) {
        sub_saturating(&self.queued, 1);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record objects dropped from the queue without being dispatched.
    pub fn abandoned(&self, count: usize) {
        sub_saturating(&self.queued, count);
    }

    /// Record skips decided before the scheduler ran.
    pub fn record_skipped(&self, count: usize) {
        self.skipped.fetch_add(count, Ordering::Relaxed);
    }

    /// Move one in-flight object to its terminal counter.
    pub fn finished(&self, result: &ConversionResult) {
        sub_saturating(&self.in_flight, 1);
        let counter = match result.status {
            ConversionStatus::Success => &self.successful,
            ConversionStatus::Failed => &self.failed,
            ConversionStatus::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

fn sub_saturating(counter: &AtomicUsize, count: usize) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
        Some(v.saturating_sub(count))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_lifecycle() {
        let progress = BatchProgress::new();
        progress.enqueue(3);
        progress.dispatched();
        progress.dispatched();

        let snap = progress.snapshot();
        assert_eq!(snap.queued, 1);
        assert_eq!(snap.in_flight, 2);

        progress.finished(&ConversionResult::skipped("a", "a.webp", 1));
        progress.finished(&ConversionResult::failed("b", "b.webp", 1, "boom"));
        progress.abandoned(1);

        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                queued: 0,
                in_flight: 0,
                successful: 0,
                failed: 1,
                skipped: 1,
            }
        );
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let progress = BatchProgress::new();
        progress.enqueue(2);
        progress.dispatched();
        let json = serde_json::to_value(progress.snapshot()).unwrap();
        assert_eq!(json["inFlight"], 1);
        assert_eq!(json["queued"], 1);
    }
}
