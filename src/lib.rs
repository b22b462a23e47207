//! Stillforged - idempotent batch image conversion
//!
//! This library crate exposes the core functionality for integration testing.

pub mod codec;
pub mod config;
pub mod conversion;
pub mod server;
pub mod store;
