//! Bounded-concurrency batch scheduler.
//!
//! The scheduler drains a pending queue into at most `limit` spawned
//! conversions, folds each terminal result into a [`ConversionReport`] as it
//! arrives, and keeps going until nothing is pending or in flight.

use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use stillforged_common::{ConversionReport, ConversionResult, ConversionStatus, SourceObject};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::BatchProgress;

/// Converts a single object into a terminal result.
///
/// Implementations report failures through the returned result. A panic is
/// caught by the scheduler and recorded as a failure for that object.
#[async_trait]
pub trait ItemConverter: Send + Sync {
    async fn convert(&self, object: &SourceObject) -> ConversionResult;
}

/// Scheduler-side bookkeeping for one batch.
///
/// A key is pending or in flight, never both, and ends up in exactly one of
/// `completed` or `failed`.
#[derive(Debug, Default)]
struct ProcessingQueue {
    pending: VecDeque<SourceObject>,
    in_flight: HashMap<String, SourceObject>,
    completed: HashSet<String>,
    failed: HashSet<String>,
}

impl ProcessingQueue {
    /// Build the queue, dropping repeated keys.
    fn new(objects: Vec<SourceObject>) -> Self {
        let mut seen = HashSet::with_capacity(objects.len());
        let mut pending = VecDeque::with_capacity(objects.len());
        for object in objects {
            if seen.insert(object.key.clone()) {
                pending.push_back(object);
            } else {
                warn!(source_key = %object.key, "Duplicate object in batch, ignoring");
            }
        }
        Self {
            pending,
            ..Self::default()
        }
    }

    /// Move the next pending object in flight.
    fn dispatch(&mut self) -> Option<SourceObject> {
        let object = self.pending.pop_front()?;
        self.in_flight.insert(object.key.clone(), object.clone());
        Some(object)
    }

    /// Retire an in-flight key with its terminal status.
    fn complete(&mut self, key: &str, status: ConversionStatus) -> Option<SourceObject> {
        let object = self.in_flight.remove(key)?;
        match status {
            ConversionStatus::Failed => self.failed.insert(object.key.clone()),
            ConversionStatus::Success | ConversionStatus::Skipped => {
                self.completed.insert(object.key.clone())
            }
        };
        Some(object)
    }

    fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}

/// Runs an [`ItemConverter`] over a batch with bounded parallelism.
pub struct BatchScheduler {
    converter: Arc<dyn ItemConverter>,
    dispatch_delay: Duration,
    progress: Arc<BatchProgress>,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(converter: Arc<dyn ItemConverter>) -> Self {
        Self {
            converter,
            dispatch_delay: Duration::ZERO,
            progress: Arc::new(BatchProgress::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Pause between successive dispatches.
    pub fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = delay;
        self
    }

    /// Report live counts into `progress`.
    pub fn with_progress(mut self, progress: Arc<BatchProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Stop dispatching once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn progress(&self) -> Arc<BatchProgress> {
        Arc::clone(&self.progress)
    }

    /// Convert every object with at most `limit` conversions in flight.
    ///
    /// Counts in the returned report sum to the number of objects that were
    /// dispatched. Objects left undispatched by cancellation are reported as
    /// a single error line.
    pub async fn run_batch(&self, objects: Vec<SourceObject>, limit: usize) -> ConversionReport {
        let started = Instant::now();
        let limit = limit.max(1);

        let mut queue = ProcessingQueue::new(objects);
        let mut report = ConversionReport::new(queue.pending.len());
        self.progress.enqueue(queue.pending.len());

        info!(
            objects = queue.pending.len(),
            concurrency = limit,
            "Starting batch"
        );

        let mut tasks = FuturesUnordered::new();
        let mut dispatched = 0usize;

        while !queue.is_drained() {
            while queue.in_flight.len() < limit
                && !queue.pending.is_empty()
                && !self.cancel.is_cancelled()
            {
                if dispatched > 0 && !self.dispatch_delay.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(self.dispatch_delay) => {}
                        _ = self.cancel.cancelled() => break,
                    }
                }

                let Some(object) = queue.dispatch() else {
                    break;
                };
                self.progress.dispatched();
                dispatched += 1;

                let key = object.key.clone();
                let converter = Arc::clone(&self.converter);
                let handle = tokio::spawn(async move { converter.convert(&object).await });
                tasks.push(async move { (key, handle.await) });
            }

            // Nothing in flight and nothing dispatchable: cancelled.
            let Some((key, joined)) = tasks.next().await else {
                break;
            };

            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    let size = queue.in_flight.get(&key).map(|o| o.size).unwrap_or(0);
                    let message = panic_message(e);
                    warn!(source_key = %key, error = %message, "Conversion task aborted");
                    ConversionResult::failed(&key, "", size, message)
                }
            };

            queue.complete(&key, result.status);
            self.progress.finished(&result);
            report.record(&result);
        }

        if !queue.pending.is_empty() {
            let remaining = queue.pending.len();
            warn!(remaining, "Run cancelled before all objects were dispatched");
            self.progress.abandoned(remaining);
            report.record_error(format!(
                "{} objects not dispatched: run cancelled",
                remaining
            ));
        }

        report.finalize(started.elapsed());
        debug!(
            completed = queue.completed.len(),
            failed = queue.failed.len(),
            "Batch drained"
        );
        info!(
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            duration_ms = report.processing_duration.as_millis() as u64,
            "Batch finished"
        );

        report
    }
}

/// Describe why a conversion task did not return a result.
fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return "Conversion task was cancelled".to_string();
    }
    let payload: Box<dyn Any + Send> = error.into_panic();
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("Conversion task panicked: {}", detail)
}
