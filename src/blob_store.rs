// SPDX-License-Identifier: MIT OR Apache-2.0

//! C4 — the remote blob store collaborator.

use crate::error::Result;

/// One entry returned by [`BlobStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size: u64,
}

/// The object-storage collaborator the core depends on.
///
/// `list` returns every key under `prefix`; an implementation backed by a
/// paginated API (S3, R2, GCS, ...) is responsible for following cursors
/// internally so that callers always see the full listing. No consistency
/// guarantee stronger than read-your-writes-after-`put`-returns is
/// required.
pub trait BlobStore: Send + Sync {
    fn list(&self, prefix: &str) -> Result<Vec<ListedObject>>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Byte-range get. The default implementation falls back to a full
    /// `get` followed by slicing, for collaborators that do not support
    /// native range reads.
    fn get_range(&self, key: &str, start: u64, len: u64) -> Result<Option<Vec<u8>>> {
        let Some(bytes) = self.get(key)? else {
            return Ok(None);
        };
        let start = start as usize;
        let end = (start + len as usize).min(bytes.len());
        if start >= bytes.len() {
            return Ok(Some(Vec::new()));
        }
        Ok(Some(bytes[start..end].to_vec()))
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod testing {
    //! An in-memory [`BlobStore`] for tests and for hosts exploring this
    //! crate without a real object store.

    use super::{BlobStore, ListedObject};
    use crate::error::Result;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory, `Mutex`-guarded [`BlobStore`].
    #[derive(Default)]
    pub struct InMemoryBlobStore {
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
    }

    impl InMemoryBlobStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl BlobStore for InMemoryBlobStore {
        fn list(&self, prefix: &str) -> Result<Vec<ListedObject>> {
            Ok(self
                .objects
                .lock()
                .expect("poisoned")
                .iter()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, data)| ListedObject { key: key.clone(), size: data.len() as u64 })
                .collect())
        }

        fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.objects.lock().expect("poisoned").get(key).cloned())
        }

        fn put(&self, key: &str, data: &[u8]) -> Result<()> {
            self.objects.lock().expect("poisoned").insert(key.to_string(), data.to_vec());
            Ok(())
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.objects.lock().expect("poisoned").remove(key);
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn list_filters_by_prefix() {
            let store = InMemoryBlobStore::new();
            store.put("a/1", b"x").unwrap();
            store.put("b/1", b"y").unwrap();
            let listed = store.list("a/").unwrap();
            assert_eq!(listed.len(), 1);
            assert_eq!(listed[0].key, "a/1");
        }

        #[test]
        fn range_get_falls_back_to_slicing() {
            let store = InMemoryBlobStore::new();
            store.put("k", b"0123456789").unwrap();
            assert_eq!(store.get_range("k", 2, 3).unwrap(), Some(b"234".to_vec()));
        }
    }
}
