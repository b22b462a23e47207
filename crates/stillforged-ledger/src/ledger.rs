//! The conversion ledger.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use stillforged_common::{ConversionRecord, Error, Result};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, error, info, warn};

use crate::storage;

/// Number of queued records that triggers a compaction.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Locations of the primary store and its journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPaths {
    pub primary: PathBuf,
    pub journal: PathBuf,
}

impl LedgerPaths {
    /// Use `primary` with a journal next to it at `<primary>.journal`.
    pub fn new(primary: impl Into<PathBuf>) -> Self {
        let primary = primary.into();
        let mut journal = primary.as_os_str().to_owned();
        journal.push(".journal");
        Self {
            primary,
            journal: PathBuf::from(journal),
        }
    }

    /// Override the journal location.
    pub fn with_journal(mut self, journal: impl Into<PathBuf>) -> Self {
        self.journal = journal.into();
        self
    }
}

/// Summary of what the ledger holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    /// Distinct converted source keys.
    pub records: usize,
    /// Records journaled but not yet compacted.
    pub pending: usize,
    pub total_original_size: u64,
    pub total_converted_size: u64,
}

/// Records as they stand on disk, plus the queue awaiting compaction.
#[derive(Default)]
struct DurableState {
    committed: Vec<ConversionRecord>,
    committed_keys: HashSet<String>,
    pending: Vec<ConversionRecord>,
}

impl DurableState {
    fn commit(&mut self, record: ConversionRecord) -> bool {
        if self.committed_keys.insert(record.source_key.clone()) {
            self.committed.push(record);
            true
        } else {
            false
        }
    }
}

struct Inner {
    paths: LedgerPaths,
    batch_size: usize,
    loaded: OnceCell<()>,
    converted: RwLock<HashSet<String>>,
    /// Serializes journal appends and compactions.
    durable: Mutex<DurableState>,
    compacting: AtomicBool,
    read_only: bool,
}

/// Durable, append-first record of converted source keys.
///
/// Cheap to clone; clones share state. Loading from disk happens once, on
/// the first call that needs it, no matter how many tasks race into it.
///
/// # Example
///
/// ```rust,ignore
/// let ledger = ConversionLedger::new(LedgerPaths::new("converted-images.json"));
/// if !ledger.is_converted("photos/a.jpg").await? {
///     // ... convert ...
///     ledger.mark_as_converted(record).await?;
/// }
/// ledger.flush().await?;
/// ```
#[derive(Clone)]
pub struct ConversionLedger {
    inner: Arc<Inner>,
}

impl ConversionLedger {
    /// Create a ledger with the default compaction batch size.
    pub fn new(paths: LedgerPaths) -> Self {
        Self::with_batch_size(paths, DEFAULT_BATCH_SIZE)
    }

    /// Create a ledger that compacts after `batch_size` queued records.
    pub fn with_batch_size(paths: LedgerPaths, batch_size: usize) -> Self {
        Self::build(paths, batch_size, false)
    }

    /// Open a ledger that answers membership queries but never writes.
    ///
    /// A journal left by a crash is read but not consolidated, and
    /// [`flush`](Self::flush) does nothing.
    pub fn read_only(paths: LedgerPaths) -> Self {
        Self::build(paths, DEFAULT_BATCH_SIZE, true)
    }

    fn build(paths: LedgerPaths, batch_size: usize, read_only: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                paths,
                batch_size: batch_size.max(1),
                loaded: OnceCell::new(),
                converted: RwLock::new(HashSet::new()),
                durable: Mutex::new(DurableState::default()),
                compacting: AtomicBool::new(false),
                read_only,
            }),
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// The files backing this ledger.
    pub fn paths(&self) -> &LedgerPaths {
        &self.inner.paths
    }

    /// Load durable state, recovering the journal if needed.
    ///
    /// Called implicitly by every other operation; calling it directly is
    /// only useful to surface load errors early.
    pub async fn load(&self) -> Result<()> {
        self.inner
            .loaded
            .get_or_try_init(|| self.load_from_disk())
            .await?;
        Ok(())
    }

    async fn load_from_disk(&self) -> Result<()> {
        let paths = &self.inner.paths;
        let mut durable = self.inner.durable.lock().await;

        let primary = storage::read_primary(&paths.primary).await?;
        let primary_count = primary.len();
        for record in primary {
            durable.commit(record);
        }

        let scan = storage::read_journal(&paths.journal).await?;
        let mut queued: HashSet<String> = HashSet::new();
        for record in scan.records {
            if durable.committed_keys.contains(&record.source_key) {
                continue;
            }
            if queued.insert(record.source_key.clone()) {
                durable.pending.push(record);
            }
        }
        let recovered = durable.pending.len();

        {
            let mut converted = self.inner.converted.write();
            converted.extend(durable.committed_keys.iter().cloned());
            converted.extend(queued);
        }

        info!(
            primary = %paths.primary.display(),
            records = primary_count,
            recovered,
            malformed = scan.malformed,
            "Loaded conversion ledger"
        );

        if scan.lines > 0 && !self.inner.read_only {
            // Fold the journal into the primary store so the next load
            // starts clean.
            if let Err(e) = self.compact_locked(&mut durable).await {
                error!(
                    error = %e,
                    pending = durable.pending.len(),
                    "Failed to consolidate recovered journal; will retry on next flush"
                );
            }
        }

        Ok(())
    }

    /// Check whether `source_key` has been converted.
    pub async fn is_converted(&self, source_key: &str) -> Result<bool> {
        self.load().await?;
        Ok(self.inner.converted.read().contains(source_key))
    }

    /// Record a successful conversion.
    ///
    /// The key is visible to [`is_converted`](Self::is_converted) immediately.
    /// The call returns once the record is synced to the journal; a journal
    /// failure is returned to the caller and the key is withdrawn again.
    /// Records for keys already present are ignored.
    pub async fn mark_as_converted(&self, record: ConversionRecord) -> Result<()> {
        if self.inner.read_only {
            return Err(Error::ledger(format!(
                "Ledger is read-only, not recording {}",
                record.source_key
            )));
        }
        self.load().await?;

        let source_key = record.source_key.clone();
        if !self.inner.converted.write().insert(source_key.clone()) {
            debug!(source_key = %source_key, "Already recorded, ignoring duplicate");
            return Ok(());
        }

        let mut durable = self.inner.durable.lock().await;
        if let Err(e) = storage::append_journal(&self.inner.paths.journal, &record).await {
            drop(durable);
            self.inner.converted.write().remove(&source_key);
            return Err(Error::ledger(format!(
                "Failed to journal conversion of {}: {}",
                source_key, e
            )));
        }
        durable.pending.push(record);
        let should_compact = durable.pending.len() >= self.inner.batch_size;
        drop(durable);

        if should_compact {
            self.spawn_compaction();
        }
        Ok(())
    }

    /// Snapshot of every converted source key.
    pub async fn get_converted_keys(&self) -> Result<HashSet<String>> {
        self.load().await?;
        Ok(self.inner.converted.read().clone())
    }

    /// Commit any queued records to the primary store.
    ///
    /// Returns the number of records compacted. Must be awaited before the
    /// process exits so the primary store catches up with the journal.
    pub async fn flush(&self) -> Result<usize> {
        self.load().await?;
        let mut durable = self.inner.durable.lock().await;
        if durable.pending.is_empty() || self.inner.read_only {
            return Ok(0);
        }
        self.compact_locked(&mut durable).await
    }

    /// Counts and byte totals across all records.
    pub async fn stats(&self) -> Result<LedgerStats> {
        self.load().await?;
        let durable = self.inner.durable.lock().await;
        let mut stats = LedgerStats {
            records: durable.committed.len() + durable.pending.len(),
            pending: durable.pending.len(),
            ..LedgerStats::default()
        };
        for record in durable.committed.iter().chain(durable.pending.iter()) {
            stats.total_original_size += record.original_size;
            stats.total_converted_size += record.converted_size;
        }
        Ok(stats)
    }

    /// Start a background compaction unless one is already running.
    fn spawn_compaction(&self) {
        if self
            .inner
            .compacting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let ledger = self.clone();
        tokio::spawn(async move {
            {
                let mut durable = ledger.inner.durable.lock().await;
                if durable.pending.len() >= ledger.inner.batch_size {
                    if let Err(e) = ledger.compact_locked(&mut durable).await {
                        error!(
                            error = %e,
                            pending = durable.pending.len(),
                            "Ledger compaction failed; records re-queued"
                        );
                    }
                }
            }
            ledger.inner.compacting.store(false, Ordering::Release);
        });
    }

    /// Move every pending record into the primary store.
    ///
    /// On a failed write the batch goes back to the head of the queue.
    async fn compact_locked(&self, durable: &mut DurableState) -> Result<usize> {
        let batch = std::mem::take(&mut durable.pending);

        let mut records = durable.committed.clone();
        let mut keys = durable.committed_keys.clone();
        for record in &batch {
            if keys.insert(record.source_key.clone()) {
                records.push(record.clone());
            }
        }

        if let Err(e) = storage::write_primary(&self.inner.paths.primary, &records).await {
            let mut requeued = batch;
            requeued.append(&mut durable.pending);
            durable.pending = requeued;
            return Err(e);
        }

        durable.committed = records;
        durable.committed_keys = keys;

        if let Err(e) = storage::truncate_journal(&self.inner.paths.journal).await {
            // Harmless: the stale lines dedupe against the primary store on
            // the next load.
            warn!(error = %e, "Failed to truncate ledger journal after compaction");
        }

        debug!(
            compacted = batch.len(),
            total = durable.committed.len(),
            "Compacted ledger journal"
        );
        Ok(batch.len())
    }
}

impl std::fmt::Debug for ConversionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionLedger")
            .field("primary", &self.inner.paths.primary)
            .field("journal", &self.inner.paths.journal)
            .field("batch_size", &self.inner.batch_size)
            .finish()
    }
}
