//! Persistent store backed by redb.
//!
//! Tables mirror the logical layout of the persisted state: a records table
//! keyed by id, a `(path, version)` index, the positional-hash grid, and a
//! meta table holding the tree size and the key material generated on first
//! run. Implements the transactional capability over a single redb write
//! transaction, which aborts on drop.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use redb::Database;
use redb::ReadableTable;
use redb::TableDefinition;

use crate::error::{Result, SumdbError};
use crate::store::{Record, Store, StoreTx, TransactionalStore};
use crate::tlog::{Hash, HASH_SIZE};

/// Records by id; values are bincode-encoded [`Record`]s.
const RECORDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Natural-key index: `(path, version)` to record id.
const MODULE_INDEX_TABLE: TableDefinition<(&str, &str), u64> = TableDefinition::new("record_index");

/// Positional hashes by storage index; values are 32 raw bytes.
const HASHES_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("hashes");

/// Singleton metadata: keys `size`, `signer_key`, `verifier_key`.
const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

const META_SIZE: &str = "size";
const META_SIGNER_KEY: &str = "signer_key";
const META_VERIFIER_KEY: &str = "verifier_key";

/// Durable [`Store`] backed by a single redb file.
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open or create the database at `path` and ensure all tables exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(|e| SumdbError::store("open", e))?;
        let write_txn = db.begin_write().map_err(|e| SumdbError::store("open", e))?;
        {
            write_txn.open_table(RECORDS_TABLE).map_err(|e| SumdbError::store("open", e))?;
            write_txn.open_table(MODULE_INDEX_TABLE).map_err(|e| SumdbError::store("open", e))?;
            write_txn.open_table(HASHES_TABLE).map_err(|e| SumdbError::store("open", e))?;
            write_txn.open_table(META_TABLE).map_err(|e| SumdbError::store("open", e))?;
        }
        write_txn.commit().map_err(|e| SumdbError::store("open", e))?;
        Ok(Self { db })
    }

    /// The persisted signer key, if keys were ever stored.
    pub fn signer_key(&self) -> Result<Option<String>> {
        self.meta_string(META_SIGNER_KEY)
    }

    /// The persisted verifier key, if keys were ever stored.
    pub fn verifier_key(&self) -> Result<Option<String>> {
        self.meta_string(META_VERIFIER_KEY)
    }

    /// Persist the key pair generated on first run.
    pub fn set_keys(&self, signer_key: &str, verifier_key: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| SumdbError::store("set_keys", e))?;
        {
            let mut meta = write_txn.open_table(META_TABLE).map_err(|e| SumdbError::store("set_keys", e))?;
            meta.insert(META_SIGNER_KEY, signer_key.as_bytes())
                .map_err(|e| SumdbError::store("set_keys", e))?;
            meta.insert(META_VERIFIER_KEY, verifier_key.as_bytes())
                .map_err(|e| SumdbError::store("set_keys", e))?;
        }
        write_txn.commit().map_err(|e| SumdbError::store("set_keys", e))
    }

    fn meta_string(&self, key: &str) -> Result<Option<String>> {
        let read_txn = self.db.begin_read().map_err(|e| SumdbError::store("meta", e))?;
        let meta = read_txn.open_table(META_TABLE).map_err(|e| SumdbError::store("meta", e))?;
        let value = meta.get(key).map_err(|e| SumdbError::store("meta", e))?;
        match value {
            Some(v) => Ok(Some(
                String::from_utf8(v.value().to_vec())
                    .map_err(|_| SumdbError::store("meta", format!("{key} is not UTF-8")))?,
            )),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Store for RedbStore {
    async fn record_id(&self, path: &str, version: &str) -> Result<u64> {
        let read_txn = self.db.begin_read().map_err(|e| SumdbError::store("record_id", e))?;
        let index = read_txn
            .open_table(MODULE_INDEX_TABLE)
            .map_err(|e| SumdbError::store("record_id", e))?;
        read_record_id(&index, path, version)
    }

    async fn records(&self, id: u64, n: u64) -> Result<Vec<Record>> {
        let read_txn = self.db.begin_read().map_err(|e| SumdbError::store("records", e))?;
        let records = read_txn.open_table(RECORDS_TABLE).map_err(|e| SumdbError::store("records", e))?;
        read_records(&records, id, n)
    }

    async fn add_record(&self, record: &Record) -> Result<u64> {
        let write_txn = self.db.begin_write().map_err(|e| SumdbError::store("add_record", e))?;
        let id = {
            let mut records = write_txn.open_table(RECORDS_TABLE).map_err(|e| SumdbError::store("add_record", e))?;
            let mut index =
                write_txn.open_table(MODULE_INDEX_TABLE).map_err(|e| SumdbError::store("add_record", e))?;
            insert_record(&mut records, &mut index, record)?
        };
        write_txn.commit().map_err(|e| SumdbError::store("add_record", e))?;
        Ok(id)
    }

    async fn read_hashes(&self, indexes: &[u64]) -> Result<Vec<Hash>> {
        let read_txn = self.db.begin_read().map_err(|e| SumdbError::store("read_hashes", e))?;
        let hashes = read_txn.open_table(HASHES_TABLE).map_err(|e| SumdbError::store("read_hashes", e))?;
        read_hash_slice(&hashes, indexes)
    }

    async fn write_hashes(&self, indexes: &[u64], hashes: &[Hash]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| SumdbError::store("write_hashes", e))?;
        {
            let mut table = write_txn.open_table(HASHES_TABLE).map_err(|e| SumdbError::store("write_hashes", e))?;
            write_hash_slice(&mut table, indexes, hashes)?;
        }
        write_txn.commit().map_err(|e| SumdbError::store("write_hashes", e))
    }

    async fn tree_size(&self) -> Result<u64> {
        let read_txn = self.db.begin_read().map_err(|e| SumdbError::store("tree_size", e))?;
        let meta = read_txn.open_table(META_TABLE).map_err(|e| SumdbError::store("tree_size", e))?;
        read_tree_size(&meta)
    }

    async fn set_tree_size(&self, size: u64) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(|e| SumdbError::store("set_tree_size", e))?;
        {
            let mut meta = write_txn.open_table(META_TABLE).map_err(|e| SumdbError::store("set_tree_size", e))?;
            meta.insert(META_SIZE, size.to_le_bytes().as_slice())
                .map_err(|e| SumdbError::store("set_tree_size", e))?;
        }
        write_txn.commit().map_err(|e| SumdbError::store("set_tree_size", e))
    }

    fn as_transactional(&self) -> Option<&dyn TransactionalStore> {
        Some(self)
    }
}

#[async_trait]
impl TransactionalStore for RedbStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let txn = self.db.begin_write().map_err(|e| SumdbError::store("begin", e))?;
        Ok(Box::new(RedbTx {
            txn: Mutex::new(Some(txn)),
        }))
    }
}

/// One open write transaction. Dropping it without commit aborts.
struct RedbTx {
    // redb write transactions are Send but not Sync; the append path is
    // single-writer, so a mutex costs nothing and restores Sync.
    txn: Mutex<Option<redb::WriteTransaction>>,
}

impl RedbTx {
    fn with_txn<T>(&self, op: &'static str, f: impl FnOnce(&redb::WriteTransaction) -> Result<T>) -> Result<T> {
        let guard = self.txn.lock().expect("lock poisoned");
        let txn = guard.as_ref().ok_or_else(|| SumdbError::store(op, "transaction already committed"))?;
        f(txn)
    }
}

#[async_trait]
impl Store for RedbTx {
    async fn record_id(&self, path: &str, version: &str) -> Result<u64> {
        self.with_txn("record_id", |txn| {
            let index = txn.open_table(MODULE_INDEX_TABLE).map_err(|e| SumdbError::store("record_id", e))?;
            read_record_id(&index, path, version)
        })
    }

    async fn records(&self, id: u64, n: u64) -> Result<Vec<Record>> {
        self.with_txn("records", |txn| {
            let records = txn.open_table(RECORDS_TABLE).map_err(|e| SumdbError::store("records", e))?;
            read_records(&records, id, n)
        })
    }

    async fn add_record(&self, record: &Record) -> Result<u64> {
        self.with_txn("add_record", |txn| {
            let mut records = txn.open_table(RECORDS_TABLE).map_err(|e| SumdbError::store("add_record", e))?;
            let mut index = txn.open_table(MODULE_INDEX_TABLE).map_err(|e| SumdbError::store("add_record", e))?;
            insert_record(&mut records, &mut index, record)
        })
    }

    async fn read_hashes(&self, indexes: &[u64]) -> Result<Vec<Hash>> {
        self.with_txn("read_hashes", |txn| {
            let hashes = txn.open_table(HASHES_TABLE).map_err(|e| SumdbError::store("read_hashes", e))?;
            read_hash_slice(&hashes, indexes)
        })
    }

    async fn write_hashes(&self, indexes: &[u64], hashes: &[Hash]) -> Result<()> {
        self.with_txn("write_hashes", |txn| {
            let mut table = txn.open_table(HASHES_TABLE).map_err(|e| SumdbError::store("write_hashes", e))?;
            write_hash_slice(&mut table, indexes, hashes)
        })
    }

    async fn tree_size(&self) -> Result<u64> {
        self.with_txn("tree_size", |txn| {
            let meta = txn.open_table(META_TABLE).map_err(|e| SumdbError::store("tree_size", e))?;
            read_tree_size(&meta)
        })
    }

    async fn set_tree_size(&self, size: u64) -> Result<()> {
        self.with_txn("set_tree_size", |txn| {
            let mut meta = txn.open_table(META_TABLE).map_err(|e| SumdbError::store("set_tree_size", e))?;
            meta.insert(META_SIZE, size.to_le_bytes().as_slice())
                .map_err(|e| SumdbError::store("set_tree_size", e))?;
            Ok(())
        })
    }
}

#[async_trait]
impl StoreTx for RedbTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        let txn = self
            .txn
            .lock()
            .expect("lock poisoned")
            .take()
            .ok_or_else(|| SumdbError::store("commit", "transaction already committed"))?;
        txn.commit().map_err(|e| SumdbError::store("commit", e))
    }
}

// ------------------------------------------------------------------------
// Shared table logic (used by both the store and its transaction view)
// ------------------------------------------------------------------------

fn read_record_id(index: &impl ReadableTable<(&'static str, &'static str), u64>, path: &str, version: &str) -> Result<u64> {
    index
        .get((path, version))
        .map_err(|e| SumdbError::store("record_id", e))?
        .map(|v| v.value())
        .ok_or(SumdbError::NotFound)
}

fn read_records(records: &impl ReadableTable<u64, &'static [u8]>, id: u64, n: u64) -> Result<Vec<Record>> {
    let end = id.saturating_add(n);
    let mut out = Vec::new();
    for entry in records.range(id..end).map_err(|e| SumdbError::store("records", e))? {
        let (_, value) = entry.map_err(|e| SumdbError::store("records", e))?;
        let record: Record = bincode::deserialize(value.value()).map_err(|e| SumdbError::store("records", e))?;
        out.push(record);
    }
    Ok(out)
}

fn insert_record(
    records: &mut redb::Table<'_, u64, &'static [u8]>,
    index: &mut redb::Table<'_, (&'static str, &'static str), u64>,
    record: &Record,
) -> Result<u64> {
    if index
        .get((record.path.as_str(), record.version.as_str()))
        .map_err(|e| SumdbError::store("add_record", e))?
        .is_some()
    {
        return Err(SumdbError::store(
            "add_record",
            format!("record already exists for {}@{}", record.path, record.version),
        ));
    }
    let id = records
        .last()
        .map_err(|e| SumdbError::store("add_record", e))?
        .map(|(k, _)| k.value() + 1)
        .unwrap_or(0);
    let stored = Record { id, ..record.clone() };
    let encoded = bincode::serialize(&stored).map_err(|e| SumdbError::store("add_record", e))?;
    records.insert(id, encoded.as_slice()).map_err(|e| SumdbError::store("add_record", e))?;
    index
        .insert((record.path.as_str(), record.version.as_str()), id)
        .map_err(|e| SumdbError::store("add_record", e))?;
    Ok(id)
}

fn read_hash_slice(hashes: &impl ReadableTable<u64, &'static [u8]>, indexes: &[u64]) -> Result<Vec<Hash>> {
    let mut out = Vec::with_capacity(indexes.len());
    for &index in indexes {
        let value = hashes.get(index).map_err(|e| SumdbError::store("read_hashes", e))?;
        match value {
            Some(v) if v.value().len() == HASH_SIZE => out.push(Hash::try_from(v.value())?),
            Some(v) => {
                return Err(SumdbError::store(
                    "read_hashes",
                    format!("hash at index {index} has {} bytes", v.value().len()),
                ))
            }
            None => out.push(Hash::ZERO),
        }
    }
    Ok(out)
}

fn write_hash_slice(table: &mut redb::Table<'_, u64, &'static [u8]>, indexes: &[u64], hashes: &[Hash]) -> Result<()> {
    if indexes.len() != hashes.len() {
        return Err(SumdbError::store(
            "write_hashes",
            format!("{} indexes but {} hashes", indexes.len(), hashes.len()),
        ));
    }
    for (&index, hash) in indexes.iter().zip(hashes) {
        table
            .insert(index, hash.as_bytes().as_slice())
            .map_err(|e| SumdbError::store("write_hashes", e))?;
    }
    Ok(())
}

fn read_tree_size(meta: &impl ReadableTable<&'static str, &'static [u8]>) -> Result<u64> {
    let value = meta.get(META_SIZE).map_err(|e| SumdbError::store("tree_size", e))?;
    match value {
        Some(v) => {
            let bytes: [u8; 8] = v
                .value()
                .try_into()
                .map_err(|_| SumdbError::store("tree_size", "size is not 8 bytes"))?;
            Ok(u64::from_le_bytes(bytes))
        }
        None => Ok(0),
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

    fn open_temp() -> (tempfile::TempDir, RedbStore) {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = RedbStore::open(dir.path().join("sumdb.redb")).expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let (_dir, store) = open_temp();
        assert!(store.record_id("example.com/a", "v1.0.0").await.unwrap_err().is_not_found());

        let id = store.add_record(&record("example.com/a", "v1.0.0")).await.unwrap();
        assert_eq!(id, 0);
        let id = store.add_record(&record("example.com/b", "v2.0.0")).await.unwrap();
        assert_eq!(id, 1);

        let recs = store.records(0, 10).await.unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].path, "example.com/a");
        assert_eq!(recs[1].id, 1);
    }

    #[tokio::test]
    async fn test_duplicate_record_rejected() {
        let (_dir, store) = open_temp();
        store.add_record(&record("example.com/a", "v1.0.0")).await.unwrap();
        assert!(store.add_record(&record("example.com/a", "v1.0.0")).await.is_err());
    }

    #[tokio::test]
    async fn test_hashes_and_tree_size() {
        let (_dir, store) = open_temp();
        assert_eq!(store.tree_size().await.unwrap(), 0);
        assert_eq!(store.read_hashes(&[5]).await.unwrap(), vec![Hash::ZERO]);

        let h = crate::tlog::record_hash(b"data\n");
        store.write_hashes(&[5], &[h]).await.unwrap();
        store.set_tree_size(1).await.unwrap();

        assert_eq!(store.read_hashes(&[5, 6]).await.unwrap(), vec![h, Hash::ZERO]);
        assert_eq!(store.tree_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let (_dir, store) = open_temp();

        // Rolled back: dropped without commit.
        {
            let tx = store.as_transactional().unwrap().begin().await.unwrap();
            tx.add_record(&record("example.com/a", "v1.0.0")).await.unwrap();
            tx.set_tree_size(1).await.unwrap();
        }
        assert_eq!(store.tree_size().await.unwrap(), 0);
        assert!(store.record_id("example.com/a", "v1.0.0").await.unwrap_err().is_not_found());

        // Committed: all mutations land together.
        let tx = store.as_transactional().unwrap().begin().await.unwrap();
        tx.add_record(&record("example.com/a", "v1.0.0")).await.unwrap();
        tx.set_tree_size(1).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.tree_size().await.unwrap(), 1);
        assert_eq!(store.record_id("example.com/a", "v1.0.0").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_reads_own_writes() {
        let (_dir, store) = open_temp();
        let tx = store.as_transactional().unwrap().begin().await.unwrap();
        tx.add_record(&record("example.com/a", "v1.0.0")).await.unwrap();
        assert_eq!(tx.record_id("example.com/a", "v1.0.0").await.unwrap(), 0);
        assert_eq!(tx.records(0, 1).await.unwrap().len(), 1);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_persist() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("sumdb.redb");
        {
            let store = RedbStore::open(&path).unwrap();
            assert_eq!(store.signer_key().unwrap(), None);
            store.set_keys("skey", "vkey").unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.signer_key().unwrap().as_deref(), Some("skey"));
        assert_eq!(store.verifier_key().unwrap().as_deref(), Some("vkey"));
    }
}
