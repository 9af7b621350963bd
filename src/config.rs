// SPDX-License-Identifier: MIT OR Apache-2.0

//! Engine configuration.

use crate::bloom::BloomConfig;
use crate::codec::DEFAULT_INLINE_THRESHOLD;

/// Default soft-flush trigger: object count.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1_000;
/// Default soft-flush trigger: buffered bytes (10 MiB).
pub const DEFAULT_FLUSH_BYTES_THRESHOLD: u64 = 10 * 1024 * 1024;
/// Default hard back-pressure trigger: object count.
pub const DEFAULT_MAX_BUFFER_OBJECTS: usize = 10_000;
/// Default hard back-pressure trigger: buffered bytes (50 MiB).
pub const DEFAULT_MAX_BUFFER_BYTES: u64 = 50 * 1024 * 1024;

/// CAS engine configuration. All fields have sensible defaults; construct
/// with [`Config::new`] and override individual fields as needed.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-repository key prefix under which all columnar files and
    /// overflow payloads are addressed.
    pub prefix: String,

    pub flush_threshold: usize,
    pub flush_bytes_threshold: u64,
    pub max_buffer_objects: usize,
    pub max_buffer_bytes: u64,

    pub inline_threshold: u64,

    /// If set, a `get_object`/`has_object` lookup for a SHA the bloom
    /// filter reported `absent` still gets a chance to self-heal via an
    /// exhaustive scan.
    pub verify_bloom_negatives: bool,

    pub bloom: BloomConfig,
}

impl Config {
    /// Creates a configuration with every tunable set to its default for
    /// the given repository prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            flush_bytes_threshold: DEFAULT_FLUSH_BYTES_THRESHOLD,
            max_buffer_objects: DEFAULT_MAX_BUFFER_OBJECTS,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            verify_bloom_negatives: false,
            bloom: BloomConfig::default(),
        }
    }

    #[must_use]
    pub fn objects_prefix(&self) -> String {
        format!("{}/objects/", self.prefix)
    }

    #[must_use]
    pub fn raw_prefix(&self) -> String {
        format!("{}/raw", self.prefix)
    }
}
