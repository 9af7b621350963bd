// SPDX-License-Identifier: MIT OR Apache-2.0

//! The "local KV store" collaborator: a durable store the core depends on
//! for the write-ahead log, compaction journal, bloom segments, and the
//! exact-SHA cache.
//!
//! Conceptually this collaborator executes parameterised SQL-like
//! statements against four named tables. Modelling that literally in Rust
//! would mean shipping a tiny ad-hoc SQL layer with no real safety
//! benefit; instead this crate exposes one typed method per table
//! operation, the same way this crate's other storage collaborators
//! (`BlobStore`) are shaped. Table and column names are preserved in the
//! row types and doc comments below so a host backing this trait with an
//! actual SQL database (e.g. SQLite) can map methods to statements
//! one-to-one.

use crate::error::Result;
use crate::hash::Sha;

/// A row in `write_buffer_wal(id, sha, type, data, path, created_at)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRow {
    pub id: u64,
    pub sha: Sha,
    pub object_type: String,
    pub data: Vec<u8>,
    pub path: Option<String>,
    pub created_at: i64,
}

/// A row in `compaction_journal(id, source_keys, target_key, status, created_at)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRow {
    pub id: u64,
    pub source_keys: Vec<String>,
    pub target_key: String,
    pub status: JournalStatus,
    pub created_at: i64,
}

/// `compaction_journal.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalStatus {
    InProgress,
    Written,
}

/// A row in `bloom_filter(id, filter_data, item_count, updated_at)`, keyed
/// here by 1-based segment index rather than an opaque id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomSegmentRow {
    pub index: u32,
    pub data: Vec<u8>,
    pub item_count: u64,
}

/// A row in `sha_cache(sha, type, size, added_at)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaCacheRow {
    pub sha: Sha,
    pub object_type: String,
    pub size: u64,
    pub added_at: i64,
}

/// The durability and point-lookup collaborator the engine depends on.
///
/// Implementations must make each individual method call atomic; the
/// engine relies on `sha_cache_upsert` succeeding or failing as a whole
/// before it touches the in-memory bloom filter.
pub trait LocalKv: Send + Sync {
    /// Creates all four backing tables if absent. Must be idempotent.
    fn ensure_schema(&self) -> Result<()>;

    /// Appends one row to `write_buffer_wal`, returning its id.
    fn wal_append(&self, sha: &Sha, object_type: &str, data: &[u8], path: Option<&str>, created_at: i64) -> Result<u64>;

    /// Deletes `write_buffer_wal` rows by id (batched).
    fn wal_clear(&self, ids: &[u64]) -> Result<()>;

    /// Returns all `write_buffer_wal` rows in id order.
    fn wal_recover(&self) -> Result<Vec<WalRow>>;

    /// Inserts a `compaction_journal` row with `status = in_progress`.
    fn journal_insert(&self, source_keys: &[String], target_key: &str, created_at: i64) -> Result<u64>;

    /// `UPDATE compaction_journal SET status = 'written' WHERE id = ?`.
    fn journal_mark_written(&self, id: u64) -> Result<()>;

    /// `DELETE FROM compaction_journal WHERE id = ?`.
    fn journal_delete(&self, id: u64) -> Result<()>;

    /// Returns every `compaction_journal` row (used on startup recovery).
    fn journal_scan(&self) -> Result<Vec<JournalRow>>;

    /// `DELETE FROM bloom_filter`.
    fn bloom_truncate(&self) -> Result<()>;

    /// Inserts (or replaces) one `bloom_filter` row.
    fn bloom_insert_segment(&self, row: &BloomSegmentRow) -> Result<()>;

    /// Returns all persisted bloom segments, in no particular order (the
    /// caller sorts by index).
    fn bloom_load_segments(&self) -> Result<Vec<BloomSegmentRow>>;

    /// `INSERT OR REPLACE INTO sha_cache ...`.
    fn sha_cache_upsert(&self, row: &ShaCacheRow) -> Result<()>;

    /// Point lookup by SHA.
    fn sha_cache_get(&self, sha: &Sha) -> Result<Option<ShaCacheRow>>;

    /// `SELECT EXISTS(... WHERE sha = ?)`.
    fn sha_cache_contains(&self, sha: &Sha) -> Result<bool>;

    /// Deletes the oldest rows (by `added_at`) so at most `limit` remain.
    fn sha_cache_prune(&self, limit: u64) -> Result<()>;

    /// `DELETE FROM sha_cache WHERE sha IN (...)` (batched, mirrors `wal_clear`).
    fn sha_cache_delete(&self, shas: &[Sha]) -> Result<()>;

    /// `SELECT COUNT(*) FROM sha_cache`.
    fn sha_cache_len(&self) -> Result<u64>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    //! An in-memory [`LocalKv`] implementation for tests and for hosts
    //! exploring this crate without a real SQL-backed store.

    use super::{BloomSegmentRow, JournalRow, JournalStatus, LocalKv, ShaCacheRow, WalRow};
    use crate::error::Result;
    use crate::hash::Sha;
    use std::sync::Mutex;

    #[derive(Default)]
    struct State {
        next_wal_id: u64,
        wal: Vec<WalRow>,
        next_journal_id: u64,
        journal: Vec<JournalRow>,
        bloom: Vec<BloomSegmentRow>,
        sha_cache: Vec<ShaCacheRow>,
    }

    /// In-memory, `Mutex`-guarded [`LocalKv`].
    #[derive(Default)]
    pub struct InMemoryKv {
        state: Mutex<State>,
    }

    impl InMemoryKv {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl LocalKv for InMemoryKv {
        fn ensure_schema(&self) -> Result<()> {
            Ok(())
        }

        fn wal_append(&self, sha: &Sha, object_type: &str, data: &[u8], path: Option<&str>, created_at: i64) -> Result<u64> {
            let mut state = self.state.lock().expect("poisoned");
            state.next_wal_id += 1;
            let id = state.next_wal_id;
            state.wal.push(WalRow {
                id,
                sha: sha.clone(),
                object_type: object_type.to_string(),
                data: data.to_vec(),
                path: path.map(str::to_string),
                created_at,
            });
            Ok(id)
        }

        fn wal_clear(&self, ids: &[u64]) -> Result<()> {
            let mut state = self.state.lock().expect("poisoned");
            state.wal.retain(|row| !ids.contains(&row.id));
            Ok(())
        }

        fn wal_recover(&self) -> Result<Vec<WalRow>> {
            let mut rows = self.state.lock().expect("poisoned").wal.clone();
            rows.sort_by_key(|r| r.id);
            Ok(rows)
        }

        fn journal_insert(&self, source_keys: &[String], target_key: &str, created_at: i64) -> Result<u64> {
            let mut state = self.state.lock().expect("poisoned");
            state.next_journal_id += 1;
            let id = state.next_journal_id;
            state.journal.push(JournalRow {
                id,
                source_keys: source_keys.to_vec(),
                target_key: target_key.to_string(),
                status: JournalStatus::InProgress,
                created_at,
            });
            Ok(id)
        }

        fn journal_mark_written(&self, id: u64) -> Result<()> {
            let mut state = self.state.lock().expect("poisoned");
            if let Some(row) = state.journal.iter_mut().find(|r| r.id == id) {
                row.status = JournalStatus::Written;
            }
            Ok(())
        }

        fn journal_delete(&self, id: u64) -> Result<()> {
            let mut state = self.state.lock().expect("poisoned");
            state.journal.retain(|r| r.id != id);
            Ok(())
        }

        fn journal_scan(&self) -> Result<Vec<JournalRow>> {
            Ok(self.state.lock().expect("poisoned").journal.clone())
        }

        fn bloom_truncate(&self) -> Result<()> {
            self.state.lock().expect("poisoned").bloom.clear();
            Ok(())
        }

        fn bloom_insert_segment(&self, row: &BloomSegmentRow) -> Result<()> {
            self.state.lock().expect("poisoned").bloom.push(row.clone());
            Ok(())
        }

        fn bloom_load_segments(&self) -> Result<Vec<BloomSegmentRow>> {
            Ok(self.state.lock().expect("poisoned").bloom.clone())
        }

        fn sha_cache_upsert(&self, row: &ShaCacheRow) -> Result<()> {
            let mut state = self.state.lock().expect("poisoned");
            if let Some(existing) = state.sha_cache.iter_mut().find(|r| r.sha == row.sha) {
                *existing = row.clone();
            } else {
                state.sha_cache.push(row.clone());
            }
            Ok(())
        }

        fn sha_cache_get(&self, sha: &Sha) -> Result<Option<ShaCacheRow>> {
            Ok(self
                .state
                .lock()
                .expect("poisoned")
                .sha_cache
                .iter()
                .find(|r| &r.sha == sha)
                .cloned())
        }

        fn sha_cache_contains(&self, sha: &Sha) -> Result<bool> {
            Ok(self.state.lock().expect("poisoned").sha_cache.iter().any(|r| &r.sha == sha))
        }

        fn sha_cache_prune(&self, limit: u64) -> Result<()> {
            let mut state = self.state.lock().expect("poisoned");
            if (state.sha_cache.len() as u64) <= limit {
                return Ok(());
            }
            state.sha_cache.sort_by_key(|r| r.added_at);
            let excess = state.sha_cache.len() - limit as usize;
            state.sha_cache.drain(0..excess);
            Ok(())
        }

        fn sha_cache_len(&self) -> Result<u64> {
            Ok(self.state.lock().expect("poisoned").sha_cache.len() as u64)
        }

        fn sha_cache_delete(&self, shas: &[Sha]) -> Result<()> {
            let mut state = self.state.lock().expect("poisoned");
            state.sha_cache.retain(|row| !shas.contains(&row.sha));
            Ok(())
        }
    }

}
