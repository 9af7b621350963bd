// SPDX-License-Identifier: MIT OR Apache-2.0

//! Point-in-time engine statistics, returned by `CasEngine::get_stats`.

use crate::bloom::BloomStats;

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub buffered_objects: usize,
    pub buffered_bytes: u64,
    pub parquet_files: usize,
    pub bloom: BloomStats,
}

impl std::fmt::Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "buffered={} ({} bytes), files={}, bloom_items={}, bloom_fp_rate={:.6}, bloom_segments={}, exact_cache={}",
            self.buffered_objects,
            self.buffered_bytes,
            self.parquet_files,
            self.bloom.items,
            self.bloom.fp_rate,
            self.bloom.segments,
            self.bloom.exact_cache_size,
        )
    }
}
