// SPDX-License-Identifier: MIT OR Apache-2.0

//! C6 — two-phase compaction journal.

use crate::blob_store::BlobStore;
use crate::error::Result;
use crate::kv_store::{JournalStatus, LocalKv};
use crate::time::now_millis;
use std::sync::Arc;

/// Thin wrapper around the `compaction_journal` table and the recovery
/// protocol that makes compaction crash-safe.
pub struct CompactionJournal {
    kv: Arc<dyn LocalKv>,
}

/// Outcome of running [`CompactionJournal::recover`] once at startup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Source keys that were deleted because their compaction had already
    /// completed (`status = written`); the file-key list should drop them.
    pub sources_removed: Vec<String>,
    /// Target keys produced by compactions that completed (`status =
    /// written`); the file-key list should gain them, replacing their
    /// sources.
    pub targets_added: Vec<String>,
}

impl CompactionJournal {
    #[must_use]
    pub fn new(kv: Arc<dyn LocalKv>) -> Self {
        Self { kv }
    }

    /// Step 1 of the write protocol: insert an `in_progress` row before any
    /// read of sources or write of the target.
    pub fn begin(&self, source_keys: &[String], target_key: &str) -> Result<u64> {
        self.kv.journal_insert(source_keys, target_key, now_millis())
    }

    /// Step 2: mark the row `written` once the target file has been put.
    pub fn mark_written(&self, id: u64) -> Result<()> {
        self.kv.journal_mark_written(id)
    }

    /// Step 3: delete the row once all sources have been deleted.
    pub fn complete(&self, id: u64) -> Result<()> {
        self.kv.journal_delete(id)
    }

    /// Aborts an in-progress compaction without ever reaching `written`
    /// (used when merging sources produced nothing worth writing).
    pub fn abort(&self, id: u64) -> Result<()> {
        self.kv.journal_delete(id)
    }

    /// Runs startup recovery:
    ///
    /// - For `written` rows: best-effort delete each source key, report the
    ///   post-compaction file-key change, delete the row.
    /// - For `in_progress` rows: delete the (possibly partial) target key,
    ///   delete the row; sources remain canonical.
    pub fn recover(&self, blob: &dyn BlobStore) -> Result<RecoveryOutcome> {
        let mut outcome = RecoveryOutcome::default();

        for row in self.kv.journal_scan()? {
            match row.status {
                JournalStatus::Written => {
                    for source in &row.source_keys {
                        if let Err(e) = blob.delete(source) {
                            log::warn!("best-effort delete of compacted source {source} failed: {e}");
                        }
                    }
                    outcome.sources_removed.extend(row.source_keys.iter().cloned());
                    outcome.targets_added.push(row.target_key.clone());
                    self.kv.journal_delete(row.id)?;
                }
                JournalStatus::InProgress => {
                    if let Err(e) = blob.delete(&row.target_key) {
                        log::warn!("best-effort delete of partial compaction target {} failed: {e}", row.target_key);
                    }
                    self.kv.journal_delete(row.id)?;
                }
            }
        }

        Ok(outcome)
    }
}
