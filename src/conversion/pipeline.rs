//! Per-object conversion: skip check, download, validate, encode, upload,
//! record.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use stillforged_common::keys::target_key;
use stillforged_common::{
    compression_ratio, ConversionResult, Error, Result, SourceObject, TargetFormat,
};
use stillforged_ledger::ConversionLedger;
use tracing::{debug, info, warn};

use super::scheduler::ItemConverter;
use crate::codec::{ImageCodec, ImageInfo};
use crate::store::{ObjectMetadata, ObjectStore};

/// Settings for a single pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Bucket both sources and targets live in.
    pub bucket: String,
    /// Encoder quality, 1-100.
    pub quality: u8,
    /// Log instead of uploading, and never touch the ledger.
    pub dry_run: bool,
    /// Treat an existing target object as already converted.
    pub verify_target_in_store: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bucket: "images".to_string(),
            quality: 80,
            dry_run: false,
            verify_target_in_store: true,
        }
    }
}

/// Converts one source object at a time.
///
/// Every step may end the pipeline; errors are folded into a failed
/// [`ConversionResult`] so nothing escapes to the scheduler.
pub struct ConversionPipeline {
    store: Arc<dyn ObjectStore>,
    codec: Arc<dyn ImageCodec>,
    ledger: ConversionLedger,
    settings: PipelineSettings,
}

/// Output of the codec stage.
struct Encoded {
    info: ImageInfo,
    data: Vec<u8>,
}

impl ConversionPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        codec: Arc<dyn ImageCodec>,
        ledger: ConversionLedger,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            codec,
            ledger,
            settings,
        }
    }

    pub fn target_format(&self) -> TargetFormat {
        self.codec.target_format()
    }

    /// Run the pipeline for `object`.
    pub async fn process(&self, object: &SourceObject) -> ConversionResult {
        let started = Instant::now();
        let target = target_key(&object.key, self.target_format());

        let result = match self.try_process(object, &target, started).await {
            Ok(result) => result,
            Err(e) => ConversionResult::failed(&object.key, &target, object.size, e.to_string())
                .with_processing_time(started.elapsed()),
        };

        match &result.error {
            Some(error) => warn!(source_key = %object.key, error = %error, "Conversion failed"),
            None => debug!(
                source_key = %object.key,
                target_key = %result.target_key,
                status = %result.status,
                "Conversion finished"
            ),
        }

        result
    }

    async fn try_process(
        &self,
        object: &SourceObject,
        target: &str,
        started: Instant,
    ) -> Result<ConversionResult> {
        if self.already_converted(&object.key, target).await? {
            return Ok(ConversionResult::skipped(&object.key, target, object.size));
        }

        let source = self
            .store
            .download_object(&self.settings.bucket, &object.key)
            .await?;
        let original_size = source.len() as u64;

        let encoded = self.encode(source).await?;
        let converted_size = encoded.data.len() as u64;
        let ratio = compression_ratio(original_size, converted_size);
        let converted_at = Utc::now();

        if self.settings.dry_run {
            info!(
                source_key = %object.key,
                target_key = %target,
                original_size,
                converted_size,
                "Dry run: would upload {:.1}% smaller output",
                ratio * 100.0
            );
        } else {
            let metadata = self.upload_metadata(
                &encoded.info,
                original_size,
                converted_size,
                ratio,
                converted_at,
            );
            self.store
                .upload_object(
                    &self.settings.bucket,
                    target,
                    Bytes::from(encoded.data),
                    self.target_format().content_type(),
                    metadata,
                )
                .await?;
        }

        let result = ConversionResult::success(
            &object.key,
            target,
            original_size,
            converted_size,
            started.elapsed(),
        );

        if !self.settings.dry_run {
            if let Some(record) = result.to_record(converted_at) {
                self.ledger.mark_as_converted(record).await?;
            }
        }

        Ok(result)
    }

    /// Exact ledger membership first, then the store when configured.
    async fn already_converted(&self, source_key: &str, target: &str) -> Result<bool> {
        if self.ledger.is_converted(source_key).await? {
            return Ok(true);
        }
        if self.settings.verify_target_in_store {
            return self.store.object_exists(&self.settings.bucket, target).await;
        }
        Ok(false)
    }

    /// Decode and re-encode off the async workers.
    async fn encode(&self, source: Bytes) -> Result<Encoded> {
        let codec = Arc::clone(&self.codec);
        let quality = self.settings.quality;

        tokio::task::spawn_blocking(move || {
            let info = codec.decode_and_validate(&source)?;
            let data = codec.encode(&source, quality)?;
            Ok(Encoded { info, data })
        })
        .await
        .map_err(|e| Error::internal(format!("Codec task failed: {}", e)))?
    }

    fn upload_metadata(
        &self,
        info: &ImageInfo,
        original_size: u64,
        converted_size: u64,
        ratio: f64,
        converted_at: DateTime<Utc>,
    ) -> ObjectMetadata {
        let mut metadata = ObjectMetadata::new();
        metadata.insert("original-format".into(), info.format.clone());
        metadata.insert("width".into(), info.width.to_string());
        metadata.insert("height".into(), info.height.to_string());
        metadata.insert("original-size".into(), original_size.to_string());
        metadata.insert("converted-size".into(), converted_size.to_string());
        metadata.insert("compression-ratio".into(), format!("{:.4}", ratio));
        metadata.insert("quality".into(), self.settings.quality.to_string());
        metadata.insert("converted-at".into(), converted_at.to_rfc3339());
        metadata
    }
}

#[async_trait]
impl ItemConverter for ConversionPipeline {
    async fn convert(&self, object: &SourceObject) -> ConversionResult {
        self.process(object).await
    }
}
