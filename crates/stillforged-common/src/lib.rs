//! Stillforged-Common: Shared types, key helpers, and errors.
//!
//! This crate provides the data model shared by the ledger and the
//! conversion engine:
//!
//! - **Core Types**: source objects, conversion records, per-item results
//!   and the aggregated batch report
//! - **Key Utilities**: target-key derivation and extension checks
//! - **Error Handling**: Common error type and result alias
//!
//! # Examples
//!
//! ```
//! use stillforged_common::keys::target_key;
//! use stillforged_common::{compression_ratio, TargetFormat};
//!
//! assert_eq!(target_key("a/b/photo.JPG", TargetFormat::Webp), "a/b/photo.webp");
//! assert_eq!(compression_ratio(1000, 750), 0.25);
//! ```

pub mod error;
pub mod keys;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
