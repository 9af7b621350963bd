// SPDX-License-Identifier: MIT OR Apache-2.0

//! A content-addressed, columnar object store for Git-shaped data (blobs,
//! trees, commits, tags).
//!
//! Objects are hashed the way Git hashes them (`sha1("<type> <len>\0<payload>")`)
//! and buffered in memory behind a write-ahead log before being flushed into
//! immutable columnar files addressed by a deterministic file id. A
//! segmented Bloom filter plus an exact-match cache answer existence checks
//! without touching the backing blob store; a two-phase journal makes
//! background compaction crash-safe. See [`CasEngine`] for the primary
//! entry point.
//!
//! This crate is storage-agnostic: callers supply a [`BlobStore`] (for the
//! columnar files and overflow/LFS payloads) and a [`LocalKv`] (for the WAL,
//! compaction journal, bloom segments, and exact-SHA cache). Enable the
//! `test-util` feature to pull in in-memory implementations of both for
//! tests or demos.

mod blob_store;
mod bloom;
mod codec;
mod coding;
mod columnar;
mod config;
mod engine;
mod error;
mod hash;
mod journal;
mod kv_store;
mod object;
mod stats;
mod time;
mod variant;
mod wal;

pub use blob_store::{BlobStore, ListedObject};
pub use bloom::{BloomConfig, BloomStats, CheckResult, ObjectMetadata};
pub use codec::{detect_storage_mode, parse_lfs_pointer, DEFAULT_INLINE_THRESHOLD};
pub use config::Config;
pub use engine::{CasEngine, PostFlushInfo};
pub use error::{Error, Result};
pub use hash::{hash_object, is_valid_sha, Sha};
pub use kv_store::{BloomSegmentRow, JournalRow, JournalStatus, LocalKv, ShaCacheRow, WalRow};
pub use object::{CommitFields, EncodedRow, ObjectType, StorageMode};
pub use stats::Stats;
pub use variant::Value;

#[cfg(any(test, feature = "test-util"))]
pub use blob_store::testing::InMemoryBlobStore;
#[cfg(any(test, feature = "test-util"))]
pub use kv_store::testing::InMemoryKv;
