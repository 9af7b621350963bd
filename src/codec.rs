// SPDX-License-Identifier: MIT OR Apache-2.0

//! C2 (part 2) — the variant codec's object-level operations: storage-mode
//! detection, LFS pointer parsing, commit-field shredding, and encoding a
//! batch of objects into parallel column vectors.

use crate::hash::Sha;
use crate::object::{BufferedObject, CommitFields, EncodedRow, ObjectType, StorageMode};
use crate::variant::{encode_variant, Value};

/// Default inline threshold: 1 MiB.
pub const DEFAULT_INLINE_THRESHOLD: u64 = 1024 * 1024;

/// Maximum payload length (exclusive) for the LFS-pointer heuristic.
const LFS_POINTER_MAX_LEN: usize = 512;

const LFS_POINTER_PREFIX: &str = "version https://git-lfs.github.com/spec/v1";

/// Options controlling `encode_object`/`encode_batch`.
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub inline_threshold: u64,
    /// Prefix under which `r2`-mode raw object keys are addressed, e.g. `"raw"`.
    pub r2_prefix: String,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            r2_prefix: "raw".to_string(),
        }
    }
}

/// Parallel column vectors produced by [`encode_batch`], in the same order
/// as the input objects.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ColumnBatch {
    pub rows: Vec<EncodedRow>,
}

impl ColumnBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Determines how an object's payload should be stored.
///
/// LFS detection takes priority: it is the narrowest, most specific rule
/// (blob, under 512 bytes, exact pointer prefix). Overflow to `r2` is
/// checked next; everything else is inline.
#[must_use]
pub fn detect_storage_mode(object_type: ObjectType, payload: &[u8], inline_threshold: u64) -> StorageMode {
    if object_type == ObjectType::Blob
        && payload.len() < LFS_POINTER_MAX_LEN
        && payload.starts_with(LFS_POINTER_PREFIX.as_bytes())
    {
        return StorageMode::Lfs;
    }
    if payload.len() as u64 > inline_threshold {
        return StorageMode::R2;
    }
    StorageMode::Inline
}

/// Parses a Git LFS pointer file's `oid`/`size` lines.
///
/// Matches `oid sha256:<64 hex>` and `size <n>` anywhere in the payload;
/// returns `None` if either is missing or malformed.
#[must_use]
pub fn parse_lfs_pointer(payload: &[u8]) -> Option<LfsPointer> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut oid = None;
    let mut size = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("oid sha256:") {
            if rest.len() == 64 && rest.bytes().all(|b| b.is_ascii_hexdigit()) {
                oid = Some(rest.to_string());
            }
        } else if let Some(rest) = line.strip_prefix("size ") {
            size = rest.trim().parse::<u64>().ok();
        }
    }

    Some(LfsPointer { oid: oid?, size: size? })
}

/// A parsed LFS pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LfsPointer {
    pub oid: String,
    pub size: u64,
}

/// Parses the commit envelope: `tree`, zero or more `parent`, one `author`,
/// one `committer`, a blank line, then the message.
///
/// Returns `None` if the mandatory `tree` line is missing or the `author`
/// line cannot be parsed.
#[must_use]
pub fn extract_commit_fields(payload: &[u8]) -> Option<CommitFields> {
    let text = std::str::from_utf8(payload).ok()?;
    let mut lines = text.split('\n');

    let mut tree_sha = None;
    let mut parent_shas = Vec::new();
    let mut author_line = None;

    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
        if let Some(rest) = line.strip_prefix("tree ") {
            tree_sha = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("parent ") {
            parent_shas.push(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("author ") {
            author_line = Some(rest.to_string());
        } else if line.starts_with("committer ") {
            // Consumed but not shredded separately; author already
            // carries name and date.
        }
    }

    let tree_sha = tree_sha?;
    let (author_name, author_date) = parse_author_line(author_line.as_deref()?)?;
    let message = lines.collect::<Vec<_>>().join("\n");

    Some(CommitFields {
        author_name,
        author_date,
        message,
        tree_sha,
        parent_shas,
    })
}

/// Parses `<name> <<email>> <epoch-seconds> <±HHMM>` and returns
/// `(name, epoch_millis)`.
fn parse_author_line(line: &str) -> Option<(String, i64)> {
    let email_start = line.find('<')?;
    let name = line[..email_start].trim().to_string();

    let after_email = &line[email_start..];
    let email_end = after_email.find('>')?;
    let rest = after_email[email_end + 1..].trim();

    let mut parts = rest.split_whitespace();
    let epoch_seconds: i64 = parts.next()?.parse().ok()?;
    // Timezone offset is part of the Git envelope but not part of the
    // shredded field set; it is validated for shape only.
    let _tz = parts.next()?;

    Some((name, epoch_seconds * 1000))
}

/// Encodes one object into an [`EncodedRow`].
#[must_use]
pub fn encode_object(
    sha: &Sha,
    object_type: ObjectType,
    payload: &[u8],
    path: Option<String>,
    options: &EncodeOptions,
) -> EncodedRow {
    let storage = detect_storage_mode(object_type, payload, options.inline_threshold);

    let (variant_value, raw_data) = match storage {
        StorageMode::Inline => (Value::Bytes(payload.to_vec()), Some(payload.to_vec())),
        StorageMode::R2 => {
            let key = raw_key(&options.r2_prefix, sha);
            (
                Value::Object(vec![
                    ("r2_key".to_string(), Value::Str(key)),
                    ("size".to_string(), Value::I64(payload.len() as i64)),
                ]),
                None,
            )
        }
        StorageMode::Lfs => {
            let pointer = parse_lfs_pointer(payload);
            let (oid, size) = match &pointer {
                Some(p) => (p.oid.clone(), p.size as i64),
                None => (String::new(), payload.len() as i64),
            };
            let key = format!("lfs/{}/{}", &oid.get(0..2).unwrap_or("00"), oid.get(2..).unwrap_or(&oid));
            (
                Value::Object(vec![
                    ("r2_key".to_string(), Value::Str(key)),
                    ("oid".to_string(), Value::Str(oid)),
                    ("size".to_string(), Value::I64(size)),
                    ("pointer".to_string(), Value::Bool(true)),
                ]),
                None,
            )
        }
    };

    let (variant_metadata, variant_value) = encode_variant(&variant_value);

    let commit_fields = if object_type == ObjectType::Commit {
        extract_commit_fields(payload)
    } else {
        None
    };

    EncodedRow {
        sha: sha.clone(),
        object_type,
        size: payload.len() as u64,
        storage,
        variant_metadata,
        variant_value,
        raw_data,
        path,
        author_name: commit_fields.as_ref().map(|c| c.author_name.clone()),
        author_date: commit_fields.as_ref().map(|c| c.author_date),
        message: commit_fields.map(|c| c.message),
    }
}

/// Computes the overflow-payload key `{r2Prefix}/{sha[0:2]}/{sha[2:]}`.
#[must_use]
pub fn raw_key(r2_prefix: &str, sha: &Sha) -> String {
    format!("{r2_prefix}/{}/{}", &sha[0..2], &sha[2..])
}

/// Encodes a batch of buffered objects into parallel column vectors,
/// preserving input order.
#[must_use]
pub fn encode_batch(objects: &[BufferedObject], options: &EncodeOptions) -> ColumnBatch {
    let rows = objects
        .iter()
        .map(|obj| encode_object(&obj.sha, obj.object_type, &obj.data, obj.path.clone(), options))
        .collect();
    ColumnBatch { rows }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_inline_by_default() {
        assert_eq!(
            detect_storage_mode(ObjectType::Blob, b"hello", DEFAULT_INLINE_THRESHOLD),
            StorageMode::Inline
        );
    }

    #[test]
    fn detects_overflow() {
        let big = vec![0u8; DEFAULT_INLINE_THRESHOLD as usize + 1];
        assert_eq!(
            detect_storage_mode(ObjectType::Blob, &big, DEFAULT_INLINE_THRESHOLD),
            StorageMode::R2
        );
    }

    #[test]
    fn detects_lfs_pointer() {
        let pointer = format!(
            "{LFS_POINTER_PREFIX}\noid sha256:{}\nsize 42\n",
            "a".repeat(64)
        );
        assert_eq!(
            detect_storage_mode(ObjectType::Blob, pointer.as_bytes(), DEFAULT_INLINE_THRESHOLD),
            StorageMode::Lfs
        );
    }

    #[test]
    fn lfs_requires_exact_prefix_and_short_length() {
        let not_quite = "version https://git-lfs.github.com/spec/v2\n";
        assert_eq!(
            detect_storage_mode(ObjectType::Blob, not_quite.as_bytes(), DEFAULT_INLINE_THRESHOLD),
            StorageMode::Inline
        );

        let too_long = format!("{LFS_POINTER_PREFIX}\n{}", "x".repeat(600));
        assert_eq!(
            detect_storage_mode(ObjectType::Blob, too_long.as_bytes(), DEFAULT_INLINE_THRESHOLD),
            StorageMode::Inline
        );
    }

    #[test]
    fn parses_lfs_pointer_fields() {
        let oid = "b".repeat(64);
        let payload = format!("{LFS_POINTER_PREFIX}\noid sha256:{oid}\nsize 2048\n");
        let parsed = parse_lfs_pointer(payload.as_bytes()).unwrap();
        assert_eq!(parsed.oid, oid);
        assert_eq!(parsed.size, 2048);
    }

    #[test]
    fn shreds_commit_fields() {
        let payload = b"tree aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\n\
parent bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\n\
author Alice <a@x> 1700000000 +0000\n\
committer Alice <a@x> 1700000000 +0000\n\
\n\
ship";
        let fields = extract_commit_fields(payload).unwrap();
        assert_eq!(fields.author_name, "Alice");
        assert_eq!(fields.author_date, 1_700_000_000_000);
        assert_eq!(fields.message, "ship");
        assert_eq!(fields.tree_sha, "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(
            fields.parent_shas,
            vec!["bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string()]
        );
    }

    #[test]
    fn malformed_commit_returns_none() {
        assert!(extract_commit_fields(b"not a commit").is_none());
    }

    #[test]
    fn encode_object_inline_round_trips_through_variant() {
        let options = EncodeOptions::default();
        let sha = crate::hash::hash_object("blob", b"hello");
        let row = encode_object(&sha, ObjectType::Blob, b"hello", None, &options);
        assert_eq!(row.storage, StorageMode::Inline);
        assert_eq!(row.raw_data.as_deref(), Some(b"hello".as_slice()));
        assert_eq!(row.size, 5);

        let decoded = crate::variant::decode_variant(&row.variant_metadata, &row.variant_value).unwrap();
        assert_eq!(decoded, Value::Bytes(b"hello".to_vec()));
    }

    #[test]
    fn encode_object_r2_round_trips() {
        let options = EncodeOptions::default();
        let big = vec![7u8; DEFAULT_INLINE_THRESHOLD as usize + 10];
        let sha = crate::hash::hash_object("blob", &big);
        let row = encode_object(&sha, ObjectType::Blob, &big, None, &options);
        assert_eq!(row.storage, StorageMode::R2);
        assert!(row.raw_data.is_none());

        let decoded = crate::variant::decode_variant(&row.variant_metadata, &row.variant_value).unwrap();
        match decoded {
            Value::Object(fields) => {
                assert_eq!(fields[0].0, "r2_key");
                assert_eq!(fields[1].0, "size");
            }
            _ => panic!("expected object"),
        }
    }
}
