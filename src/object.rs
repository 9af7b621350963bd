// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data model types shared by the codec, the columnar file, and the engine.

use crate::hash::Sha;

/// The four Git object kinds the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    /// Parses the lowercase Git object type name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blob" => Some(Self::Blob),
            "tree" => Some(Self::Tree),
            "commit" => Some(Self::Commit),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }

    /// Renders the lowercase Git object type name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an object's payload is physically stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Payload is small and lives directly in the columnar file's `raw_data` column.
    Inline,
    /// Payload is an LFS pointer file; the real content lives under `raw/<oid prefix>`.
    Lfs,
    /// Payload exceeded the inline threshold and was written to `raw/<sha prefix>`.
    R2,
}

impl StorageMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Lfs => "lfs",
            Self::R2 => "r2",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inline" => Some(Self::Inline),
            "lfs" => Some(Self::Lfs),
            "r2" => Some(Self::R2),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shredded commit fields; `None` for non-commit objects or commits whose
/// envelope failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFields {
    pub author_name: String,
    /// Milliseconds since the Unix epoch.
    pub author_date: i64,
    pub message: String,
    pub tree_sha: Sha,
    pub parent_shas: Vec<Sha>,
}

/// One row in a columnar file, corresponding to one stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedRow {
    pub sha: Sha,
    pub object_type: ObjectType,
    pub size: u64,
    pub storage: StorageMode,
    pub variant_metadata: Vec<u8>,
    pub variant_value: Vec<u8>,
    /// Present only when `storage == Inline`.
    pub raw_data: Option<Vec<u8>>,
    pub path: Option<String>,
    pub author_name: Option<String>,
    pub author_date: Option<i64>,
    pub message: Option<String>,
}

/// A buffered, not-yet-flushed object plus the WAL row id that made it
/// durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedObject {
    pub sha: Sha,
    pub object_type: ObjectType,
    pub data: Vec<u8>,
    pub path: Option<String>,
    pub wal_id: u64,
}
