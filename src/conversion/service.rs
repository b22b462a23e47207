//! Batch conversion over a bucket prefix.

use std::sync::Arc;
use std::time::Instant;

use stillforged_common::keys::{has_extension, target_key};
use stillforged_common::{ConversionReport, SourceObject, TargetFormat};
use stillforged_ledger::ConversionLedger;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::pipeline::{ConversionPipeline, PipelineSettings};
use super::progress::BatchProgress;
use super::scheduler::BatchScheduler;
use crate::codec::ImageCodec;
use crate::config::Config;
use crate::store::ObjectStore;

/// Lists a prefix, filters out what is already done, and converts the rest.
pub struct ConversionService {
    store: Arc<dyn ObjectStore>,
    ledger: ConversionLedger,
    scheduler: BatchScheduler,
    bucket: String,
    target_format: TargetFormat,
    extensions: Vec<String>,
    concurrency: usize,
    progress: Arc<BatchProgress>,
    cancel: CancellationToken,
}

impl ConversionService {
    pub fn new(
        config: &Config,
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn ImageCodec>,
        ledger: ConversionLedger,
    ) -> Self {
        let conversion = &config.conversion;
        let target_format = codec.target_format();
        let pipeline = ConversionPipeline::new(
            Arc::clone(&store),
            codec,
            ledger.clone(),
            PipelineSettings {
                bucket: config.store.bucket.clone(),
                quality: conversion.quality,
                dry_run: conversion.dry_run,
                verify_target_in_store: conversion.verify_target_in_store,
            },
        );

        let progress = Arc::new(BatchProgress::new());
        let cancel = CancellationToken::new();
        let scheduler = BatchScheduler::new(Arc::new(pipeline))
            .with_dispatch_delay(conversion.dispatch_delay())
            .with_progress(Arc::clone(&progress))
            .with_cancellation(cancel.clone());

        Self {
            store,
            ledger,
            scheduler,
            bucket: config.store.bucket.clone(),
            target_format,
            extensions: conversion.extensions.clone(),
            concurrency: conversion.concurrency,
            progress,
            cancel,
        }
    }

    /// Live counters for the current run.
    pub fn progress(&self) -> Arc<BatchProgress> {
        Arc::clone(&self.progress)
    }

    /// Cancelling this token stops new dispatches; in-flight work finishes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Convert every eligible object under `prefix`.
    ///
    /// Always returns a report. A listing or ledger-load failure yields a
    /// zero-count report with one error line.
    pub async fn run(&self, prefix: &str) -> ConversionReport {
        let started = Instant::now();
        info!(bucket = %self.bucket, prefix = %prefix, "Listing objects");

        let listed = match self.store.list_objects(&self.bucket, prefix).await {
            Ok(objects) => objects,
            Err(e) => {
                error!(bucket = %self.bucket, error = %e, "Listing failed, aborting run");
                return abort(
                    format!("Failed to list {}/{}: {}", self.bucket, prefix, e),
                    started,
                );
            }
        };

        let candidates: Vec<SourceObject> = listed
            .into_iter()
            .filter(|o| self.is_candidate(&o.key))
            .collect();
        let total = candidates.len();

        let converted = match self.ledger.get_converted_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Ledger load failed, aborting run");
                return abort(format!("Failed to load conversion ledger: {}", e), started);
            }
        };

        let (done, pending): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|o| converted.contains(&o.key));

        info!(
            candidates = total,
            already_converted = done.len(),
            to_convert = pending.len(),
            "Starting conversion run"
        );
        self.progress.record_skipped(done.len());

        let mut report = self.scheduler.run_batch(pending, self.concurrency).await;
        report.total_images = total;
        report.skipped += done.len();

        match self.ledger.flush().await {
            Ok(0) => {}
            Ok(n) => info!(records = n, "Ledger flushed"),
            Err(e) => {
                error!(error = %e, "Ledger flush failed");
                report.record_error(format!("Failed to flush conversion ledger: {}", e));
            }
        }

        report.finalize(started.elapsed());
        info!(
            total = report.total_images,
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            "Conversion run complete"
        );
        report
    }

    /// Image keys that are not already in the target format.
    fn is_candidate(&self, key: &str) -> bool {
        has_extension(key, &self.extensions) && target_key(key, self.target_format) != key
    }
}

fn abort(message: String, started: Instant) -> ConversionReport {
    let mut report = ConversionReport::aborted(message);
    report.finalize(started.elapsed());
    report
}
