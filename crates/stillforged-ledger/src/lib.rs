//! Stillforged-Ledger: durable record of converted source keys.
//!
//! The ledger answers "has this source key already been converted?" across
//! process restarts. Every record is appended to a line-oriented journal
//! before it is acknowledged, and journaled records are periodically
//! compacted into a primary JSON store:
//!
//! - **Journal** (`<primary>.journal`): one JSON record per line, fsynced on
//!   every append. Only needed between compactions.
//! - **Primary store**: a JSON array of all compacted records, rewritten
//!   atomically (temp file + rename).
//!
//! On load the two are unioned by source key, folded into the primary store,
//! and the journal is truncated.

mod ledger;
mod storage;

pub use ledger::{ConversionLedger, LedgerPaths, LedgerStats, DEFAULT_BATCH_SIZE};
