//! Batch image conversion.
//!
//! This module holds the conversion engine:
//!
//! - [`ConversionPipeline`]: converts one object (skip check, download,
//!   validate, encode, upload, ledger record)
//! - [`BatchScheduler`]: runs a converter over many objects with bounded
//!   concurrency and aggregates a report
//! - [`ConversionService`]: lists a prefix, filters already-converted keys,
//!   and drives the scheduler
//! - [`BatchProgress`]: live counters for observers

mod pipeline;
mod progress;
mod scheduler;
mod service;

pub use pipeline::{ConversionPipeline, PipelineSettings};
pub use progress::{BatchProgress, ProgressSnapshot};
pub use scheduler::{BatchScheduler, ItemConverter};
pub use service::ConversionService;
