//! Persistence contract for records, positional hashes, and tree size.

mod mem;
mod redb_store;

pub use mem::MemStore;
pub use redb_store::RedbStore;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::tlog::Hash;

/// A module checksum entry in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Dense id assigned by the log; equals the record's leaf index.
    pub id: u64,
    /// Module path.
    pub path: String,
    /// Module version.
    pub version: String,
    /// Two-line checksum text (`<path> <version> h1:…` and the `/go.mod` line).
    pub data: Vec<u8>,
}

/// Persistence interface for the checksum database.
///
/// Implementations must be safe for concurrent use. A store instance must be
/// owned by exactly one [`SumDb`](crate::SumDb): write serialization lives
/// above the store, so sharing one store between databases can corrupt the
/// tree.
///
/// Non-transactional stores must tolerate a crash between `add_record` and
/// `set_tree_size`: on startup the database detects records with
/// `id >= tree_size` and replays their hash writes (positional hashes are
/// write-once, so the replay is idempotent).
#[async_trait]
pub trait Store: Send + Sync {
    /// Id of the record for `(path, version)`.
    ///
    /// Returns [`SumdbError::NotFound`](crate::SumdbError::NotFound) if no
    /// record exists.
    async fn record_id(&self, path: &str, version: &str) -> Result<u64>;

    /// Records with ids in `[id, id + n)`, ascending, without gaps.
    ///
    /// May return fewer than `n` records when the range extends past the
    /// current tree size.
    async fn records(&self, id: u64, n: u64) -> Result<Vec<Record>>;

    /// Append a record, assigning the next sequential id (the record's `id`
    /// field is ignored). Fails if `(path, version)` is already present.
    async fn add_record(&self, record: &Record) -> Result<u64>;

    /// Hashes at the given storage indexes, in input order; unknown indexes
    /// yield [`Hash::ZERO`].
    async fn read_hashes(&self, indexes: &[u64]) -> Result<Vec<Hash>>;

    /// Upsert hashes at the given storage indexes. `indexes` and `hashes`
    /// are parallel slices of equal length; stored values are write-once.
    async fn write_hashes(&self, indexes: &[u64], hashes: &[Hash]) -> Result<()>;

    /// Current number of records in the tree; 0 if never initialised.
    async fn tree_size(&self) -> Result<u64>;

    /// Advance the recorded tree size. Callers only ever pass
    /// `previous + 1`, after the hashes for record `previous` are durable.
    async fn set_tree_size(&self, size: u64) -> Result<()>;

    /// Runtime probe for the optional transactional capability.
    fn as_transactional(&self) -> Option<&dyn TransactionalStore> {
        None
    }
}

/// Optional capability: stores that can run the append sequence atomically.
///
/// When present, the database wraps `add_record` + hash writes + size
/// advance in one transaction, so a failed append leaves no partial state.
#[async_trait]
pub trait TransactionalStore: Store {
    /// Begin a transaction. Mutations through the returned view become
    /// durable together on [`StoreTx::commit`]; dropping the view without
    /// committing rolls everything back.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// A transactional view of a store.
#[async_trait]
pub trait StoreTx: Store {
    /// Commit all mutations made through this view.
    async fn commit(self: Box<Self>) -> Result<()>;
}
