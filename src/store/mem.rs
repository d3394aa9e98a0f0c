//! In-memory store for tests, demos, and single-process experiments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, SumdbError};
use crate::store::{Record, Store};
use crate::tlog::Hash;

/// Non-durable [`Store`] backed by process memory.
///
/// Does not expose the transactional capability, so it exercises the same
/// append path a minimal production store would.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: Vec<Record>,
    by_module: HashMap<(String, String), u64>,
    hashes: HashMap<u64, Hash>,
    tree_size: u64,
}

impl MemStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn record_id(&self, path: &str, version: &str) -> Result<u64> {
        let inner = self.inner.read().expect("lock poisoned");
        inner
            .by_module
            .get(&(path.to_string(), version.to_string()))
            .copied()
            .ok_or(SumdbError::NotFound)
    }

    async fn records(&self, id: u64, n: u64) -> Result<Vec<Record>> {
        let inner = self.inner.read().expect("lock poisoned");
        let len = inner.records.len() as u64;
        let start = id.min(len) as usize;
        let end = id.saturating_add(n).min(len) as usize;
        Ok(inner.records[start..end].to_vec())
    }

    async fn add_record(&self, record: &Record) -> Result<u64> {
        let mut inner = self.inner.write().expect("lock poisoned");
        let key = (record.path.clone(), record.version.clone());
        if inner.by_module.contains_key(&key) {
            return Err(SumdbError::store(
                "add_record",
                format!("record already exists for {}@{}", record.path, record.version),
            ));
        }
        let id = inner.records.len() as u64;
        inner.by_module.insert(key, id);
        inner.records.push(Record { id, ..record.clone() });
        Ok(id)
    }

    async fn read_hashes(&self, indexes: &[u64]) -> Result<Vec<Hash>> {
        let inner = self.inner.read().expect("lock poisoned");
        Ok(indexes.iter().map(|i| inner.hashes.get(i).copied().unwrap_or(Hash::ZERO)).collect())
    }

    async fn write_hashes(&self, indexes: &[u64], hashes: &[Hash]) -> Result<()> {
        if indexes.len() != hashes.len() {
            return Err(SumdbError::store(
                "write_hashes",
                format!("{} indexes but {} hashes", indexes.len(), hashes.len()),
            ));
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        for (&index, &hash) in indexes.iter().zip(hashes) {
            inner.hashes.insert(index, hash);
        }
        Ok(())
    }

    async fn tree_size(&self) -> Result<u64> {
        Ok(self.inner.read().expect("lock poisoned").tree_size)
    }

    async fn set_tree_size(&self, size: u64) -> Result<()> {
        self.inner.write().expect("lock poisoned").tree_size = size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, version: &str) -> Record {
        Record {
            id: 0,
            path: path.to_string(),
            version: version.to_string(),
            data: format!("{path} {version} h1:fake\n{path} {version}/go.mod h1:fake\n").into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let store = MemStore::new();
        assert!(store.record_id("example.com/a", "v1.0.0").await.unwrap_err().is_not_found());

        let id = store.add_record(&record("example.com/a", "v1.0.0")).await.unwrap();
        assert_eq!(id, 0);
        assert_eq!(store.record_id("example.com/a", "v1.0.0").await.unwrap(), 0);

        let recs = store.records(0, 10).await.unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].id, 0);
        assert_eq!(recs[0].path, "example.com/a");
    }

    #[tokio::test]
    async fn test_duplicate_record_rejected() {
        let store = MemStore::new();
        store.add_record(&record("example.com/a", "v1.0.0")).await.unwrap();
        let err = store.add_record(&record("example.com/a", "v1.0.0")).await.unwrap_err();
        assert!(matches!(err, SumdbError::Store { .. }));
    }

    #[tokio::test]
    async fn test_unknown_hashes_read_as_zero() {
        let store = MemStore::new();
        let hashes = store.read_hashes(&[0, 7, 100]).await.unwrap();
        assert_eq!(hashes, vec![Hash::ZERO; 3]);
    }

    #[tokio::test]
    async fn test_write_hashes_length_mismatch() {
        let store = MemStore::new();
        assert!(store.write_hashes(&[0, 1], &[Hash::ZERO]).await.is_err());
    }
}
