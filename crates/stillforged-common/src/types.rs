//! Core type definitions for conversions.
//!
//! Records are serialized in camelCase so ledgers written by earlier runs
//! stay readable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Format images are converted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// WebP.
    #[default]
    Webp,
    /// AVIF.
    Avif,
    /// Baseline JPEG.
    Jpeg,
}

impl TargetFormat {
    /// File extension used for converted keys.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Jpeg => "jpg",
        }
    }

    /// MIME type sent with uploads.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
            Self::Jpeg => "image/jpeg",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webp => write!(f, "webp"),
            Self::Avif => write!(f, "avif"),
            Self::Jpeg => write!(f, "jpeg"),
        }
    }
}

impl FromStr for TargetFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "webp" => Ok(Self::Webp),
            "avif" => Ok(Self::Avif),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            _ => Err(format!("Unknown target format: {}", s)),
        }
    }
}

/// Snapshot of an object as listed from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceObject {
    /// Object key within the bucket.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time reported by the store.
    pub last_modified: DateTime<Utc>,
    /// Content checksum, when the store provides one.
    pub etag: Option<String>,
}

impl SourceObject {
    /// Create a source object snapshot stamped with the current time.
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified: Utc::now(),
            etag: None,
        }
    }
}

/// Durable proof that a source key was converted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRecord {
    pub source_key: String,
    pub target_key: String,
    pub converted_at: DateTime<Utc>,
    pub original_size: u64,
    pub converted_size: u64,
    pub compression_ratio: f64,
}

/// Terminal status of one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for ConversionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Fraction of the original size saved by a conversion.
///
/// Negative when the converted output is larger. Zero for empty inputs.
pub fn compression_ratio(original_size: u64, converted_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    (original_size as f64 - converted_size as f64) / original_size as f64
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

/// Outcome of converting a single source object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    pub source_key: String,
    pub target_key: String,
    pub original_size: u64,
    pub converted_size: u64,
    pub compression_ratio: f64,
    #[serde(rename = "processingTimeMs", serialize_with = "serialize_millis")]
    pub processing_time: Duration,
    pub status: ConversionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConversionResult {
    /// A completed conversion.
    pub fn success(
        source_key: impl Into<String>,
        target_key: impl Into<String>,
        original_size: u64,
        converted_size: u64,
        processing_time: Duration,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            target_key: target_key.into(),
            original_size,
            converted_size,
            compression_ratio: compression_ratio(original_size, converted_size),
            processing_time,
            status: ConversionStatus::Success,
            error: None,
        }
    }

    /// A conversion that stopped with an error.
    pub fn failed(
        source_key: impl Into<String>,
        target_key: impl Into<String>,
        original_size: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            target_key: target_key.into(),
            original_size,
            converted_size: 0,
            compression_ratio: 0.0,
            processing_time: Duration::ZERO,
            status: ConversionStatus::Failed,
            error: Some(error.into()),
        }
    }

    /// An object that had already been converted.
    pub fn skipped(
        source_key: impl Into<String>,
        target_key: impl Into<String>,
        original_size: u64,
    ) -> Self {
        Self {
            source_key: source_key.into(),
            target_key: target_key.into(),
            original_size,
            converted_size: 0,
            compression_ratio: 0.0,
            processing_time: Duration::ZERO,
            status: ConversionStatus::Skipped,
            error: None,
        }
    }

    /// Set the elapsed processing time.
    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time = elapsed;
        self
    }

    /// Build the ledger record for a successful result.
    ///
    /// Returns `None` for failed and skipped results.
    pub fn to_record(&self, converted_at: DateTime<Utc>) -> Option<ConversionRecord> {
        if self.status != ConversionStatus::Success {
            return None;
        }
        Some(ConversionRecord {
            source_key: self.source_key.clone(),
            target_key: self.target_key.clone(),
            converted_at,
            original_size: self.original_size,
            converted_size: self.converted_size,
            compression_ratio: self.compression_ratio,
        })
    }
}

/// Aggregated outcome of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReport {
    pub total_images: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_size_before: u64,
    pub total_size_after: u64,
    pub average_compression_ratio: f64,
    #[serde(rename = "processingDurationMs", serialize_with = "serialize_millis")]
    pub processing_duration: Duration,
    pub errors: Vec<String>,
}

impl ConversionReport {
    /// Start an empty report for `total_images` candidates.
    pub fn new(total_images: usize) -> Self {
        Self {
            total_images,
            ..Self::default()
        }
    }

    /// A report for a run that aborted before any item was processed.
    pub fn aborted(error: impl Into<String>) -> Self {
        Self {
            errors: vec![error.into()],
            ..Self::default()
        }
    }

    /// Fold one item's result into the running totals.
    pub fn record(&mut self, result: &ConversionResult) {
        match result.status {
            ConversionStatus::Success => {
                self.successful += 1;
                self.total_size_before += result.original_size;
                self.total_size_after += result.converted_size;
            }
            ConversionStatus::Failed => {
                self.failed += 1;
                let message = result.error.as_deref().unwrap_or("unknown error");
                self.errors.push(format!("{}: {}", result.source_key, message));
            }
            ConversionStatus::Skipped => {
                self.skipped += 1;
            }
        }
    }

    /// Append a batch-level error line.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Number of items that reached a terminal status.
    pub fn processed(&self) -> usize {
        self.successful + self.failed + self.skipped
    }

    /// A zero-count report carrying errors marks a failed run, not a no-op.
    pub fn is_aborted(&self) -> bool {
        self.processed() == 0 && !self.errors.is_empty()
    }

    /// Compute the derived fields once the run is over.
    pub fn finalize(&mut self, duration: Duration) {
        self.processing_duration = duration;
        self.average_compression_ratio =
            compression_ratio(self.total_size_before, self.total_size_after);
    }
}

impl fmt::Display for ConversionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total images:      {}", self.total_images)?;
        writeln!(f, "Successful:        {}", self.successful)?;
        writeln!(f, "Failed:            {}", self.failed)?;
        writeln!(f, "Skipped:           {}", self.skipped)?;
        writeln!(f, "Size before:       {} bytes", self.total_size_before)?;
        writeln!(f, "Size after:        {} bytes", self.total_size_after)?;
        writeln!(
            f,
            "Avg compression:   {:.2}%",
            self.average_compression_ratio * 100.0
        )?;
        write!(
            f,
            "Duration:          {:.2}s",
            self.processing_duration.as_secs_f64()
        )?;
        if !self.errors.is_empty() {
            writeln!(f)?;
            write!(f, "Errors:")?;
            for error in &self.errors {
                write!(f, "\n  - {}", error)?;
            }
        }
        Ok(())
    }
}
