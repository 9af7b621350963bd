// SPDX-License-Identifier: MIT OR Apache-2.0

//! C7 — the CAS engine itself.
//!
//! Concurrency note: this crate runs the engine on blocking OS threads
//! rather than a cooperative reactor, following a fully-synchronous
//! design throughout. The reader/writer lock is `compaction_lock`:
//! `compact` takes it exclusively (`write`), everything else takes it
//! shared (`read`), so nothing ever runs concurrently with a compaction
//! while readers and flushes still run alongside each other. Because
//! `put_object`/`delete_object`/`flush` all *mutate* shared buffer state
//! while only holding that shared guard, a second, short-lived `state`
//! mutex guards the actual buffer/tombstone/file-key fields so two
//! concurrent writers never race on them; only one such mutation is ever
//! in flight at a time.

use crate::blob_store::BlobStore;
use crate::bloom::{BloomCache, CheckResult};
use crate::codec::{encode_batch, encode_object, raw_key, EncodeOptions};
use crate::columnar::{decode_columnar_file, encode_columnar_file, file_id_for_shas};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hash::{hash_object, is_valid_sha, Sha};
use crate::journal::CompactionJournal;
use crate::kv_store::LocalKv;
use crate::object::{BufferedObject, EncodedRow, ObjectType, StorageMode};
use crate::stats::Stats;
use crate::time::now_millis;
use crate::wal::Wal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

/// Payload passed to an optional post-flush handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFlushInfo {
    pub parquet_key: String,
    pub file_size_bytes: u64,
    pub record_count: usize,
    pub prefix: String,
}

type PostFlushHandler = dyn Fn(PostFlushInfo) -> Result<()> + Send + Sync;

struct EngineState {
    /// Insertion order of buffered SHAs; used so `encode_batch` sees
    /// objects in a stable order.
    buffer_order: Vec<Sha>,
    buffer_index: HashMap<Sha, BufferedObject>,
    buffer_bytes: u64,
    /// Newest last.
    object_file_keys: Vec<String>,
    tombstones: HashSet<Sha>,
    compaction_needed: bool,
}

impl EngineState {
    fn new() -> Self {
        Self {
            buffer_order: Vec::new(),
            buffer_index: HashMap::new(),
            buffer_bytes: 0,
            object_file_keys: Vec::new(),
            tombstones: HashSet::new(),
            compaction_needed: false,
        }
    }

    fn push(&mut self, obj: BufferedObject) {
        self.buffer_bytes += obj.data.len() as u64;
        if !self.buffer_index.contains_key(&obj.sha) {
            self.buffer_order.push(obj.sha.clone());
        }
        self.buffer_index.insert(obj.sha.clone(), obj);
    }

    fn remove(&mut self, sha: &Sha) -> Option<BufferedObject> {
        let removed = self.buffer_index.remove(sha);
        if removed.is_some() {
            self.buffer_order.retain(|s| s != sha);
        }
        removed
    }
}

/// The columnar content-addressed object store.
pub struct CasEngine {
    config: Config,
    blob: Arc<dyn BlobStore>,
    kv_wal: Wal,
    journal: CompactionJournal,
    bloom: BloomCache,
    compaction_lock: RwLock<()>,
    flush_mutex: Mutex<()>,
    state: Mutex<EngineState>,
    post_flush: Option<Arc<PostFlushHandler>>,
}

impl CasEngine {
    /// Opens the engine: creates backing tables, loads bloom segments,
    /// lists existing columnar files, recovers any in-flight compaction,
    /// then replays the WAL into the buffer.
    pub fn open(config: Config, blob: Arc<dyn BlobStore>, kv: Arc<dyn LocalKv>) -> Result<Self> {
        kv.ensure_schema()?;
        let bloom = BloomCache::open(kv.clone(), config.bloom.clone())?;

        let mut object_file_keys: Vec<String> = blob
            .list(&config.objects_prefix())?
            .into_iter()
            .map(|o| o.key)
            .collect();
        object_file_keys.sort_unstable();

        let journal = CompactionJournal::new(kv.clone());
        let recovery = journal.recover(blob.as_ref())?;
        object_file_keys.retain(|k| !recovery.sources_removed.contains(k));
        for target in recovery.targets_added {
            if !object_file_keys.contains(&target) {
                object_file_keys.push(target);
            }
        }

        let wal = Wal::new(kv.clone());
        let mut state = EngineState::new();
        state.object_file_keys = object_file_keys;
        for obj in wal.recover(&HashSet::new())? {
            state.push(obj);
        }

        Ok(Self {
            config,
            blob,
            kv_wal: wal,
            journal,
            bloom,
            compaction_lock: RwLock::new(()),
            flush_mutex: Mutex::new(()),
            state: Mutex::new(state),
            post_flush: None,
        })
    }

    /// Registers a post-flush handler. Errors are logged and swallowed,
    /// never fail the flush.
    #[must_use]
    pub fn with_post_flush_handler(
        mut self,
        handler: impl Fn(PostFlushInfo) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.post_flush = Some(Arc::new(handler));
        self
    }

    fn encode_options(&self) -> EncodeOptions {
        EncodeOptions {
            inline_threshold: self.config.inline_threshold,
            r2_prefix: self.config.raw_prefix(),
        }
    }

    /// Stores `data` as a Git object of `object_type`, returning its SHA.
    pub fn put_object(&self, object_type: ObjectType, data: &[u8], path: Option<&str>) -> Result<Sha> {
        let _compaction_guard = self.compaction_lock.read().expect("lock poisoned");

        let sha = hash_object(object_type.as_str(), data);
        let mode = crate::codec::detect_storage_mode(object_type, data, self.config.inline_threshold);

        if matches!(mode, StorageMode::R2 | StorageMode::Lfs) {
            self.blob.put(&raw_key(&self.config.raw_prefix(), &sha), data)?;
        }

        let wal_id = self.kv_wal.append(&sha, object_type, data, path)?;

        let should_flush = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.push(BufferedObject {
                sha: sha.clone(),
                object_type,
                data: data.to_vec(),
                path: path.map(str::to_string),
                wal_id,
            });
            state.buffer_order.len() >= self.config.max_buffer_objects
                || state.buffer_bytes >= self.config.max_buffer_bytes
                || state.buffer_order.len() >= self.config.flush_threshold
                || state.buffer_bytes >= self.config.flush_bytes_threshold
        };

        self.bloom.add(&sha, object_type.as_str(), data.len() as u64, now_millis())?;

        drop(_compaction_guard);
        if should_flush {
            self.flush()?;
        }

        Ok(sha)
    }

    /// Fetches an object by SHA, or `None` if it is absent, tombstoned, or
    /// the SHA is syntactically invalid.
    pub fn get_object(&self, sha: &Sha) -> Result<Option<(ObjectType, Vec<u8>)>> {
        if !is_valid_sha(sha) {
            return Ok(None);
        }

        let _compaction_guard = self.compaction_lock.read().expect("lock poisoned");

        {
            let state = self.state.lock().expect("lock poisoned");
            if state.tombstones.contains(sha) {
                return Ok(None);
            }
            if let Some(obj) = state.buffer_index.get(sha) {
                return Ok(Some((obj.object_type, obj.data.clone())));
            }
        }

        let check = self.bloom.check(sha)?;
        if check == CheckResult::Absent {
            return Ok(None);
        }

        let file_keys = self.state.lock().expect("lock poisoned").object_file_keys.clone();
        let Some((row, _)) = self.scan_files_for_sha(&file_keys, sha)? else {
            return Ok(None);
        };

        let payload = self.materialize_payload(&row)?;

        if check == CheckResult::Probable {
            self.bloom.add(sha, row.object_type.as_str(), row.size, now_millis())?;
        }

        Ok(Some((row.object_type, payload)))
    }

    /// Returns whether `sha` is known to the store.
    pub fn has_object(&self, sha: &Sha) -> Result<bool> {
        if !is_valid_sha(sha) {
            return Ok(false);
        }

        let _compaction_guard = self.compaction_lock.read().expect("lock poisoned");

        {
            let state = self.state.lock().expect("lock poisoned");
            if state.tombstones.contains(sha) {
                return Ok(false);
            }
            if state.buffer_index.contains_key(sha) {
                return Ok(true);
            }
        }

        match self.bloom.check(sha)? {
            CheckResult::Definite => Ok(true),
            CheckResult::Absent => {
                if !self.config.verify_bloom_negatives {
                    return Ok(false);
                }
                let file_keys = self.state.lock().expect("lock poisoned").object_file_keys.clone();
                match self.scan_files_for_sha(&file_keys, sha)? {
                    Some((row, _)) => {
                        log::warn!("bloom filter reported false negative for {sha}, self-healing");
                        self.bloom.add(sha, row.object_type.as_str(), row.size, now_millis())?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            CheckResult::Probable => {
                let file_keys = self.state.lock().expect("lock poisoned").object_file_keys.clone();
                match self.scan_files_for_sha(&file_keys, sha)? {
                    Some((row, _)) => {
                        self.bloom.add(sha, row.object_type.as_str(), row.size, now_millis())?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    /// Marks `sha` as deleted. Honoured by `get_object`/`has_object` via the
    /// tombstone set until the next successful `compact`, which is also
    /// when it's actually purged from every columnar file. Also evicts
    /// `sha` from the exact-SHA table immediately, so a stale `Definite`
    /// result can't outlive the tombstone that made it stale.
    pub fn delete_object(&self, sha: &Sha) -> Result<()> {
        let _compaction_guard = self.compaction_lock.read().expect("lock poisoned");

        let wal_id = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.tombstones.insert(sha.clone());
            state.remove(sha).map(|obj| obj.wal_id)
        };

        if let Some(id) = wal_id {
            self.kv_wal.clear(&[id])?;
        }
        self.bloom.evict(std::slice::from_ref(sha))?;

        Ok(())
    }

    /// Scans `file_keys` newest-first for a row matching `sha`, decoding
    /// only as much of each file as needed to find it.
    fn scan_files_for_sha(&self, file_keys: &[String], sha: &Sha) -> Result<Option<(EncodedRow, String)>> {
        for key in file_keys.iter().rev() {
            let Some(bytes) = self.blob.get(key)? else {
                continue;
            };
            let rows = decode_columnar_file(&bytes).map_err(|e| Error::Corruption(e.to_string()))?;
            if let Some(row) = rows.into_iter().find(|r| &r.sha == sha) {
                return Ok(Some((row, key.clone())));
            }
        }
        Ok(None)
    }

    fn materialize_payload(&self, row: &EncodedRow) -> Result<Vec<u8>> {
        if row.storage == StorageMode::Inline {
            if let Some(data) = &row.raw_data {
                return Ok(data.clone());
            }
        }
        let key = raw_key(&self.config.raw_prefix(), &row.sha);
        self.blob
            .get(&key)?
            .ok_or_else(|| Error::Corruption(format!("overflow payload missing for {}", row.sha)))
    }

    /// Drains the buffer into one new immutable columnar file. Returns
    /// `None` if the buffer was empty: flushing twice with no intervening
    /// writes produces no new file the second time.
    pub fn flush(&self) -> Result<Option<String>> {
        let _flush_guard = self.flush_mutex.lock().expect("lock poisoned");
        let _compaction_guard = self.compaction_lock.read().expect("lock poisoned");

        let snapshot = {
            let state = self.state.lock().expect("lock poisoned");
            if state.buffer_order.is_empty() {
                return Ok(None);
            }
            state
                .buffer_order
                .iter()
                .map(|sha| state.buffer_index.get(sha).expect("index/order in sync").clone())
                .collect::<Vec<_>>()
        };

        let batch = encode_batch(&snapshot, &self.encode_options());
        let bytes = encode_columnar_file(&batch);
        let shas: Vec<String> = snapshot.iter().map(|o| o.sha.clone()).collect();
        let file_id = file_id_for_shas(&shas);
        let key = format!("{}.parquet", key_prefix_for(&self.config, &file_id));

        self.blob.put(&key, &bytes)?;

        let wal_ids: Vec<u64> = snapshot.iter().map(|o| o.wal_id).collect();
        {
            let mut state = self.state.lock().expect("lock poisoned");
            let flushed: HashSet<&Sha> = shas.iter().collect();
            for sha in &shas {
                state.buffer_index.remove(sha);
            }
            state.buffer_order.retain(|s| !flushed.contains(s));
            state.buffer_bytes = state.buffer_bytes.saturating_sub(
                snapshot.iter().map(|o| o.data.len() as u64).sum(),
            );
            if !state.object_file_keys.contains(&key) {
                state.object_file_keys.push(key.clone());
            }
        }

        self.kv_wal.clear(&wal_ids)?;
        self.bloom.persist()?;

        if let Some(handler) = &self.post_flush {
            let info = PostFlushInfo {
                parquet_key: key.clone(),
                file_size_bytes: bytes.len() as u64,
                record_count: batch.len(),
                prefix: self.config.prefix.clone(),
            };
            if let Err(e) = handler(info) {
                log::warn!("post-flush handler failed for {key}: {e}");
            }
        }

        Ok(Some(key))
    }

    /// Merges every current columnar file (minus tombstoned/duplicate rows)
    /// plus any still-buffered objects into one new file, then deletes the
    /// old files. Returns `None` if fewer than two files exist.
    pub fn compact(&self) -> Result<Option<String>> {
        let _write_guard = self.compaction_lock.write().expect("lock poisoned");

        let (sources, buffered, tombstones) = {
            let state = self.state.lock().expect("lock poisoned");
            if state.object_file_keys.len() < 2 {
                return Ok(None);
            }
            (
                state.object_file_keys.clone(),
                state
                    .buffer_order
                    .iter()
                    .map(|sha| state.buffer_index.get(sha).expect("in sync").clone())
                    .collect::<Vec<_>>(),
                state.tombstones.clone(),
            )
        };

        let target = format!("{}.parquet", key_prefix_for(&self.config, &uuid::Uuid::new_v4().to_string()));
        let journal_id = self.journal.begin(&sources, &target)?;

        let mut seen: HashSet<Sha> = HashSet::new();
        let mut merged_rows: Vec<EncodedRow> = Vec::new();

        for key in sources.iter().rev() {
            let bytes = match self.blob.get(key) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => {
                    log::warn!("compaction source {key} vanished, skipping");
                    continue;
                }
                Err(e) => {
                    log::warn!("compaction source {key} unreadable ({e}), skipping");
                    continue;
                }
            };
            let rows = match decode_columnar_file(&bytes) {
                Ok(rows) => rows,
                Err(e) => {
                    log::warn!("compaction source {key} corrupt ({e}), skipping");
                    continue;
                }
            };
            for row in rows {
                if tombstones.contains(&row.sha) || seen.contains(&row.sha) {
                    continue;
                }
                seen.insert(row.sha.clone());
                merged_rows.push(row);
            }
        }

        let options = self.encode_options();
        for obj in &buffered {
            if tombstones.contains(&obj.sha) || seen.contains(&obj.sha) {
                continue;
            }
            seen.insert(obj.sha.clone());
            merged_rows.push(encode_object(&obj.sha, obj.object_type, &obj.data, obj.path.clone(), &options));
        }

        if merged_rows.is_empty() {
            self.journal.abort(journal_id)?;
            return Ok(None);
        }

        let bytes = encode_columnar_file(&crate::codec::ColumnBatch { rows: merged_rows });
        self.blob.put(&target, &bytes)?;
        self.journal.mark_written(journal_id)?;

        for source in &sources {
            if let Err(e) = self.blob.delete(source) {
                log::warn!("failed to delete compacted source {source}: {e}");
            }
        }

        {
            let mut state = self.state.lock().expect("lock poisoned");
            state.object_file_keys = vec![target.clone()];
            for obj in &buffered {
                state.buffer_index.remove(&obj.sha);
            }
            state.buffer_order.clear();
            state.buffer_bytes = 0;
            state.tombstones.clear();
        }

        // The buffer is fully absorbed into `target` (or dropped as a
        // duplicate/tombstone already on disk); its WAL rows are now
        // redundant. Without this, `Wal::recover` would replay them back
        // into the buffer on the next restart and flush would write them
        // out a second time.
        let absorbed_wal_ids: Vec<u64> = buffered.iter().map(|o| o.wal_id).collect();
        self.kv_wal.clear(&absorbed_wal_ids)?;

        // Purged SHAs must stop reporting `Definite` once their tombstone
        // is gone; leaving them in the exact-SHA table would make
        // `has_object` disagree with `get_object`.
        let purged: Vec<Sha> = tombstones.into_iter().collect();
        self.bloom.evict(&purged)?;

        self.bloom.persist()?;
        self.journal.complete(journal_id)?;

        Ok(Some(target))
    }

    /// Sets the compaction-needed flag if there is enough to compact.
    /// Returns the new flag value.
    pub fn schedule_compaction(&self) -> bool {
        let mut state = self.state.lock().expect("lock poisoned");
        state.compaction_needed = state.object_file_keys.len() >= 2 || !state.buffer_order.is_empty();
        state.compaction_needed
    }

    /// Clears the compaction-needed flag (regardless of outcome) and runs
    /// `compact()`.
    pub fn run_compaction_if_needed(&self) -> Result<Option<String>> {
        self.state.lock().expect("lock poisoned").compaction_needed = false;
        self.compact()
    }

    pub fn get_stats(&self) -> Result<Stats> {
        let state = self.state.lock().expect("lock poisoned");
        Ok(Stats {
            buffered_objects: state.buffer_order.len(),
            buffered_bytes: state.buffer_bytes,
            parquet_files: state.object_file_keys.len(),
            bloom: self.bloom.stats()?,
        })
    }
}

fn key_prefix_for(config: &Config, file_id: &str) -> String {
    format!("{}{}", config.objects_prefix(), file_id)
}
