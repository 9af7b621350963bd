// SPDX-License-Identifier: MIT OR Apache-2.0

//! C3 — segmented Bloom filter + exact-SHA cache.

mod bit_array;

use crate::error::Result;
use crate::hash::Sha;
use crate::kv_store::{BloomSegmentRow, LocalKv, ShaCacheRow};
use bit_array::BitArray;
use fnv::FnvHasher;
use std::hash::Hasher;
use std::sync::{Arc, Mutex};

/// Default number of bits per segment: 8 Mi bits (1 MiB).
pub const DEFAULT_NUM_BITS: u64 = 8 * 1024 * 1024;
/// Default number of hash probes per item.
pub const DEFAULT_HASH_COUNT: u32 = 7;
/// Default number of items before a new segment is started.
pub const DEFAULT_SEGMENT_THRESHOLD: u64 = 10_000;
/// Default number of segments before the oldest ones are merged.
pub const DEFAULT_MAX_SEGMENTS: usize = 10;
/// Default cap on the exact-SHA table.
pub const DEFAULT_EXACT_CACHE_LIMIT: u64 = 100_000;

/// Bloom cache configuration.
#[derive(Debug, Clone)]
pub struct BloomConfig {
    pub num_bits: u64,
    pub hash_count: u32,
    pub segment_threshold: u64,
    pub max_segments: usize,
    pub exact_cache_limit: u64,
}

impl Default for BloomConfig {
    fn default() -> Self {
        Self {
            num_bits: DEFAULT_NUM_BITS,
            hash_count: DEFAULT_HASH_COUNT,
            segment_threshold: DEFAULT_SEGMENT_THRESHOLD,
            max_segments: DEFAULT_MAX_SEGMENTS,
            exact_cache_limit: DEFAULT_EXACT_CACHE_LIMIT,
        }
    }
}

/// Two 32-bit FNV-1a derived seeds used for double hashing.
fn seeds(key: &[u8]) -> (u64, u64) {
    let mut h1 = FnvHasher::default();
    h1.write(key);
    let a = h1.finish();

    let mut h2 = FnvHasher::default();
    h2.write(b"git-cas-bloom-seed-2");
    h2.write(key);
    let mut b = h2.finish();
    if b == 0 {
        b = 1;
    }

    (a, b)
}

fn probe_positions(key: &[u8], hash_count: u32, num_bits: u64) -> impl Iterator<Item = u64> {
    let (h1, h2) = seeds(key);
    (0..u64::from(hash_count)).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
}

#[derive(Debug, Clone)]
struct Segment {
    bits: BitArray,
    item_count: u64,
}

impl Segment {
    fn new(num_bits: u64) -> Self {
        Self {
            bits: BitArray::with_capacity_bits(num_bits),
            item_count: 0,
        }
    }

    fn insert(&mut self, key: &[u8], hash_count: u32, num_bits: u64) {
        for pos in probe_positions(key, hash_count, num_bits) {
            self.bits.set(pos);
        }
        self.item_count += 1;
    }

    fn might_contain(&self, key: &[u8], hash_count: u32, num_bits: u64) -> bool {
        probe_positions(key, hash_count, num_bits).all(|pos| self.bits.get(pos))
    }
}

/// An ordered list of fixed-size Bloom filters; `might_contain` returns
/// `true` if any segment does.
#[derive(Debug, Clone)]
struct SegmentedBloom {
    segments: Vec<Segment>,
    config: BloomConfig,
}

impl SegmentedBloom {
    fn new(config: BloomConfig) -> Self {
        Self {
            segments: vec![Segment::new(config.num_bits)],
            config,
        }
    }

    fn insert(&mut self, key: &[u8]) {
        if self
            .segments
            .last()
            .is_some_and(|s| s.item_count >= self.config.segment_threshold)
        {
            self.segments.push(Segment::new(self.config.num_bits));
        }
        let tail = self.segments.last_mut().expect("always at least one segment");
        tail.insert(key, self.config.hash_count, self.config.num_bits);

        if self.segments.len() > self.config.max_segments {
            self.merge_older_segments();
        }
    }

    /// OR-merges every segment but the newest into a single segment. Summed
    /// counts overestimate the merged segment's true cardinality, which
    /// makes the reported false-positive rate conservative rather than
    /// optimistic.
    fn merge_older_segments(&mut self) {
        let newest = self.segments.pop().expect("non-empty");
        let mut merged = Segment::new(self.config.num_bits);
        for seg in &self.segments {
            merged.bits.or_merge(&seg.bits);
            merged.item_count += seg.item_count;
        }
        self.segments = vec![merged, newest];
    }

    fn might_contain(&self, key: &[u8]) -> bool {
        self.segments
            .iter()
            .any(|s| s.might_contain(key, self.config.hash_count, self.config.num_bits))
    }

    fn total_items(&self) -> u64 {
        self.segments.iter().map(|s| s.item_count).sum()
    }

    /// Closed-form false-positive rate: `1 - prod(1 - p_i)` over segments,
    /// where `p_i = (1 - e^{-k n_i / m})^k` is the standard Bloom filter
    /// estimate for a segment holding `n_i` items.
    fn false_positive_rate(&self) -> f64 {
        let k = f64::from(self.config.hash_count);
        let m = self.config.num_bits as f64;

        let survives_all: f64 = self
            .segments
            .iter()
            .map(|s| {
                let n = s.item_count as f64;
                let p = (1.0 - (-k * n / m).exp()).powf(k);
                1.0 - p
            })
            .product();

        1.0 - survives_all
    }
}

/// Result of probing the bloom cache for a SHA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Definite,
    Probable,
    Absent,
}

/// Type/size metadata for a SHA known to the exact-SHA table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub object_type: String,
    pub size: u64,
}

/// Snapshot of bloom cache statistics for `CasEngine::get_stats`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomStats {
    pub items: u64,
    pub fp_rate: f64,
    pub segments: usize,
    pub exact_cache_size: u64,
}

/// Segmented Bloom filter + exact-SHA table, persisted in the local KV
/// store. Internally synchronized so that it remains safe to call from
/// multiple threads holding only the engine's shared reader lock, since
/// `put_object` only takes that shared lock yet still mutates the bloom
/// cache.
pub struct BloomCache {
    kv: Arc<dyn LocalKv>,
    inner: Mutex<SegmentedBloom>,
    config: BloomConfig,
}

impl BloomCache {
    /// Creates the backing tables (idempotent) and loads any persisted
    /// segments.
    pub fn open(kv: Arc<dyn LocalKv>, config: BloomConfig) -> Result<Self> {
        kv.ensure_schema()?;

        let rows = kv.bloom_load_segments()?;
        let bloom = if rows.is_empty() {
            SegmentedBloom::new(config.clone())
        } else {
            let mut rows = rows;
            rows.sort_by_key(|r| r.index);
            let segments = rows
                .into_iter()
                .map(|r| Segment {
                    bits: BitArray::from_bytes(r.data.into_boxed_slice()),
                    item_count: r.item_count,
                })
                .collect();
            SegmentedBloom { segments, config: config.clone() }
        };

        Ok(Self {
            kv,
            inner: Mutex::new(bloom),
            config,
        })
    }

    /// Registers `sha` as present: inserts into the bloom filter and
    /// upserts the exact-SHA table. The exact-SHA write happens first; if
    /// it fails the bloom filter is left unchanged.
    pub fn add(&self, sha: &Sha, object_type: &str, size: u64, now_millis: i64) -> Result<()> {
        self.kv.sha_cache_upsert(&ShaCacheRow {
            sha: sha.clone(),
            object_type: object_type.to_string(),
            size,
            added_at: now_millis,
        })?;
        self.kv.sha_cache_prune(self.config.exact_cache_limit)?;

        self.inner.lock().expect("bloom mutex poisoned").insert(sha.as_bytes());

        Ok(())
    }

    /// Checks whether `sha` is definitely, probably, or not present.
    pub fn check(&self, sha: &Sha) -> Result<CheckResult> {
        if self.kv.sha_cache_contains(sha)? {
            return Ok(CheckResult::Definite);
        }
        if self.inner.lock().expect("bloom mutex poisoned").might_contain(sha.as_bytes()) {
            return Ok(CheckResult::Probable);
        }
        Ok(CheckResult::Absent)
    }

    /// Evicts `shas` from the exact-SHA table. Does not touch the
    /// underlying bloom filter, which never forgets a bit once set; a
    /// caller that evicts a SHA should expect later checks to still fall
    /// through to `Probable` (and from there to a file scan) rather than
    /// `Absent`.
    pub fn evict(&self, shas: &[Sha]) -> Result<()> {
        self.kv.sha_cache_delete(shas)
    }

    /// Reads type/size metadata for `sha` from the exact-SHA table only.
    pub fn get_metadata(&self, sha: &Sha) -> Result<Option<ObjectMetadata>> {
        Ok(self.kv.sha_cache_get(sha)?.map(|row| ObjectMetadata {
            object_type: row.object_type,
            size: row.size,
        }))
    }

    /// Persists the current segments: truncates the table, then inserts
    /// the segments in order.
    pub fn persist(&self) -> Result<()> {
        let bloom = self.inner.lock().expect("bloom mutex poisoned");
        self.kv.bloom_truncate()?;
        for (i, seg) in bloom.segments.iter().enumerate() {
            self.kv.bloom_insert_segment(&BloomSegmentRow {
                index: (i + 1) as u32,
                data: seg.bits.bytes().to_vec(),
                item_count: seg.item_count,
            })?;
        }
        Ok(())
    }

    pub fn stats(&self) -> Result<BloomStats> {
        let bloom = self.inner.lock().expect("bloom mutex poisoned");
        Ok(BloomStats {
            items: bloom.total_items(),
            fp_rate: bloom.false_positive_rate(),
            segments: bloom.segments.len(),
            exact_cache_size: self.kv.sha_cache_len()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::testing::InMemoryKv;

    fn cache() -> BloomCache {
        BloomCache::open(Arc::new(InMemoryKv::new()), BloomConfig::default()).unwrap()
    }

    #[test]
    fn absent_before_insert() {
        let cache = cache();
        let sha = "a".repeat(40);
        assert_eq!(cache.check(&sha).unwrap(), CheckResult::Absent);
    }

    #[test]
    fn definite_after_add() {
        let cache = cache();
        let sha = "b".repeat(40);
        cache.add(&sha, "blob", 5, 0).unwrap();
        assert_eq!(cache.check(&sha).unwrap(), CheckResult::Definite);
        assert_eq!(
            cache.get_metadata(&sha).unwrap(),
            Some(ObjectMetadata { object_type: "blob".into(), size: 5 })
        );
    }

    #[test]
    fn evict_drops_exact_match_but_not_the_bloom_bits() {
        let cache = cache();
        let sha = "d".repeat(40);
        cache.add(&sha, "blob", 5, 0).unwrap();
        assert_eq!(cache.check(&sha).unwrap(), CheckResult::Definite);

        cache.evict(&[sha.clone()]).unwrap();
        assert_eq!(cache.check(&sha).unwrap(), CheckResult::Probable);
        assert_eq!(cache.get_metadata(&sha).unwrap(), None);
    }

    #[test]
    fn segments_rotate_and_merge() {
        let mut config = BloomConfig::default();
        config.segment_threshold = 4;
        config.max_segments = 2;
        let cache = BloomCache::open(Arc::new(InMemoryKv::new()), config).unwrap();

        for i in 0..20u32 {
            let sha = format!("{i:040}");
            cache.add(&sha, "blob", 1, i as i64).unwrap();
        }

        // Every inserted SHA is still (at minimum) probable, regardless of
        // how many merges/rotations happened.
        for i in 0..20u32 {
            let sha = format!("{i:040}");
            assert_ne!(cache.check(&sha).unwrap(), CheckResult::Absent);
        }

        let stats = cache.stats().unwrap();
        assert!(stats.segments <= 3);
    }

    #[test]
    fn persist_and_reload_round_trips() {
        let kv = Arc::new(InMemoryKv::new());
        {
            let cache = BloomCache::open(kv.clone(), BloomConfig::default()).unwrap();
            cache.add(&"c".repeat(40), "blob", 1, 0).unwrap();
            cache.persist().unwrap();
        }
        let reopened = BloomCache::open(kv, BloomConfig::default()).unwrap();
        assert_eq!(reopened.check(&"c".repeat(40)).unwrap(), CheckResult::Probable);
    }

    #[test]
    fn false_positive_rate_increases_with_items() {
        let cache = cache();
        let rate_empty = cache.stats().unwrap().fp_rate;
        for i in 0..1000u32 {
            cache.add(&format!("{i:040}"), "blob", 1, 0).unwrap();
        }
        let rate_full = cache.stats().unwrap().fp_rate;
        assert!(rate_full >= rate_empty);
    }
}
