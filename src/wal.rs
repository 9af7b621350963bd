// SPDX-License-Identifier: MIT OR Apache-2.0

//! C5 — write-ahead log.

use crate::error::Result;
use crate::hash::Sha;
use crate::kv_store::LocalKv;
use crate::object::{BufferedObject, ObjectType};
use crate::time::now_millis;
use std::sync::Arc;

/// Thin wrapper around the `write_buffer_wal` table.
pub struct Wal {
    kv: Arc<dyn LocalKv>,
}

impl Wal {
    #[must_use]
    pub fn new(kv: Arc<dyn LocalKv>) -> Self {
        Self { kv }
    }

    /// Appends a row, returning its id. The caller is expected to have
    /// already made this durable in the same local-KV transaction that
    /// will be considered committed once `put_object` returns; this
    /// crate's `LocalKv::wal_append` is itself atomic, which satisfies
    /// that requirement without a separate transaction handle.
    pub fn append(&self, sha: &Sha, object_type: ObjectType, data: &[u8], path: Option<&str>) -> Result<u64> {
        self.kv.wal_append(sha, object_type.as_str(), data, path, now_millis())
    }

    /// Deletes rows by id (batched).
    pub fn clear(&self, ids: &[u64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.kv.wal_clear(ids)
    }

    /// Replays rows into buffered objects in id order, skipping any SHA
    /// already present in `already_buffered` (defensive against a partial
    /// clear) and discarding rows with an unknown `type`.
    pub fn recover(&self, already_buffered: &std::collections::HashSet<Sha>) -> Result<Vec<BufferedObject>> {
        let rows = self.kv.wal_recover()?;
        let mut to_discard = Vec::new();
        let mut out = Vec::with_capacity(rows.len());

        for row in rows {
            if already_buffered.contains(&row.sha) {
                continue;
            }
            match ObjectType::parse(&row.object_type) {
                Some(object_type) => out.push(BufferedObject {
                    sha: row.sha,
                    object_type,
                    data: row.data,
                    path: row.path,
                    wal_id: row.id,
                }),
                None => {
                    log::warn!("discarding WAL row {} with unknown object type {:?}", row.id, row.object_type);
                    to_discard.push(row.id);
                }
            }
        }

        if !to_discard.is_empty() {
            self.kv.wal_clear(&to_discard)?;
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::testing::InMemoryKv;
    use std::collections::HashSet;

    #[test]
    fn append_and_recover() {
        let wal = Wal::new(Arc::new(InMemoryKv::new()));
        let sha = "a".repeat(40);
        let id = wal.append(&sha, ObjectType::Blob, b"hello", None).unwrap();

        let recovered = wal.recover(&HashSet::new()).unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].wal_id, id);
        assert_eq!(recovered[0].data, b"hello");
    }

    #[test]
    fn clear_removes_rows() {
        let wal = Wal::new(Arc::new(InMemoryKv::new()));
        let id = wal.append(&"b".repeat(40), ObjectType::Blob, b"x", None).unwrap();
        wal.clear(&[id]).unwrap();
        assert!(wal.recover(&HashSet::new()).unwrap().is_empty());
    }

    #[test]
    fn recover_skips_already_buffered_and_drops_unknown_type() {
        let kv = Arc::new(InMemoryKv::new());
        let sha_known = "c".repeat(40);
        let sha_bad = "d".repeat(40);
        kv.wal_append(&sha_known, "blob", b"x", None, 0).unwrap();
        kv.wal_append(&sha_bad, "bogus", b"y", None, 0).unwrap();

        let wal = Wal::new(kv.clone());
        let mut already = HashSet::new();
        already.insert(sha_known.clone());

        let recovered = wal.recover(&already).unwrap();
        assert!(recovered.is_empty());
        // The unknown-type row was discarded from the WAL.
        assert!(kv.wal_recover().unwrap().is_empty());
    }
}
