//! The checksum database facade.
//!
//! Composes the upstream proxy, a store, the tree engine, and the note
//! signer. Lookups follow a three-tier discipline: reads run fully in
//! parallel, at most one fetch per module version is in flight, and appends
//! serialize across modules because every append reads the right edge of
//! the tree and advances its size.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::error::{Result, SumdbError};
use crate::flight::{Flight, Group};
use crate::module::ModuleVersion;
use crate::note::NoteSigner;
use crate::proxy::{Proxy, DEFAULT_UPSTREAM};
use crate::store::{Record, Store};
use crate::tlog::{Hash, Tile, Tree};
use crate::tree;

/// A checksum database server.
///
/// Cheap to clone; all clones share one store and one signer. Safe for
/// concurrent use from many tasks.
#[derive(Clone)]
pub struct SumDb {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    proxy: Proxy,
    signer: NoteSigner,
    lookups: Group<Result<u64>>,
    append_lock: Mutex<()>,
}

impl SumDb {
    /// Start building a database from an encoded signer key
    /// (`PRIVATE+KEY+<name>+<hash>+<keydata>`, see
    /// [`generate_keys`](crate::generate_keys)).
    pub fn builder(signer_key: impl Into<String>) -> SumDbBuilder {
        SumDbBuilder {
            signer_key: signer_key.into(),
            store: None,
            upstream: DEFAULT_UPSTREAM.to_string(),
            http_client: None,
        }
    }

    /// The verifier key matching this database's signer, for distribution
    /// to clients.
    pub fn verifier_key(&self) -> String {
        self.inner.signer.verifier_key()
    }

    /// Find or create the record for a module version, returning its id.
    ///
    /// On first sight the module is fetched from upstream, hashed, and
    /// appended to the log; concurrent lookups of the same version share
    /// one fetch.
    #[instrument(skip(self), fields(module = %module))]
    pub async fn lookup(&self, module: &ModuleVersion) -> Result<u64> {
        // Fast path: the record already exists.
        match self.inner.store.record_id(&module.path, &module.version).await {
            Ok(id) => return Ok(id),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let key = module.flight_key();
        loop {
            match self.inner.lookups.join(&key) {
                Flight::Lead(leader) => {
                    let result = self.fetch_and_append(module).await;
                    leader.publish(result.clone());
                    return result;
                }
                Flight::Wait(rx) => match Group::wait(rx).await {
                    Some(result) => return result,
                    // The leader was cancelled before publishing; start
                    // over (the double-check keeps this idempotent).
                    None => continue,
                },
            }
        }
    }

    /// Raw record data for ids in `[id, id + n)`.
    pub async fn read_records(&self, id: u64, n: u64) -> Result<Vec<Vec<u8>>> {
        let records = self.inner.store.records(id, n).await?;
        Ok(records.into_iter().map(|r| r.data).collect())
    }

    /// Raw bytes of a hash tile.
    pub async fn read_tile_data(&self, tile: &Tile) -> Result<Vec<u8>> {
        tree::read_tile(self.inner.store.as_ref(), tile).await
    }

    /// The signed tree head for the current tree state.
    pub async fn signed(&self) -> Result<Vec<u8>> {
        let size = self.inner.store.tree_size().await?;
        let hash = if size == 0 {
            Hash::ZERO
        } else {
            tree::tree_hash(self.inner.store.as_ref()).await?
        };
        Ok(self.inner.signer.sign_tree_head(&Tree { size, hash }))
    }

    /// An axum router serving the public HTTP surface.
    pub fn router(&self) -> axum::Router {
        crate::server::router(self.clone())
    }

    // The single-flight leader's path: double-check, fetch both hashes,
    // then append under the cross-key lock.
    async fn fetch_and_append(&self, module: &ModuleVersion) -> Result<u64> {
        // Another leader may have appended while we waited for the key.
        match self.inner.store.record_id(&module.path, &module.version).await {
            Ok(id) => return Ok(id),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let gomod_h1 = self.inner.proxy.fetch_gomod_hash(module).await?;
        let zip_h1 = self.inner.proxy.fetch_zip_hash(module).await?;

        let record = Record {
            id: 0,
            path: module.path.clone(),
            version: module.version.clone(),
            data: format!(
                "{p} {v} {zip_h1}\n{p} {v}/go.mod {gomod_h1}\n",
                p = module.path,
                v = module.version,
            )
            .into_bytes(),
        };

        // Appends across distinct modules must not interleave: each one
        // reads the current right edge and advances the tree size.
        let _append = self.inner.append_lock.lock().await;

        let store = self.inner.store.as_ref();
        let id = match store.as_transactional() {
            Some(transactional) => {
                let tx = transactional.begin().await?;
                let id = append_record(&*tx, &record).await?;
                tx.commit().await?;
                id
            }
            None => append_record(store, &record).await?,
        };
        info!(id, module = %module, "appended new record");
        Ok(id)
    }

    // Replay tree appends for records that were written before a crash cut
    // off their hash writes or size advance (non-transactional stores).
    async fn reconcile(&self) -> Result<()> {
        let store = self.inner.store.as_ref();
        loop {
            let size = store.tree_size().await?;
            let pending = store.records(size, 64).await?;
            if pending.is_empty() {
                return Ok(());
            }
            for record in pending {
                warn!(id = record.id, "replaying tree append for recovered record");
                tree::add_record(store, record.id, &record.data).await?;
            }
        }
    }
}

async fn append_record(store: &dyn Store, record: &Record) -> Result<u64> {
    let id = store.add_record(record).await?;
    tree::add_record(store, id, &record.data).await?;
    Ok(id)
}

/// Builder for [`SumDb`].
///
/// Recognized options: the store (required), the upstream proxy URL, and
/// the HTTP client used for upstream requests.
pub struct SumDbBuilder {
    signer_key: String,
    store: Option<Arc<dyn Store>>,
    upstream: String,
    http_client: Option<reqwest::Client>,
}

impl SumDbBuilder {
    /// Set the persistence backend. Required; the database cannot serve
    /// without one.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the upstream module proxy base URL
    /// (default `https://proxy.golang.org`).
    pub fn upstream(mut self, upstream: impl Into<String>) -> Self {
        self.upstream = upstream.into();
        self
    }

    /// Override the HTTP client used for upstream requests (e.g. in tests).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Parse the signer key, wire everything together, and reconcile any
    /// partially appended records before serving.
    pub async fn build(self) -> Result<SumDb> {
        let signer = NoteSigner::new(&self.signer_key)?;
        let store = self.store.ok_or_else(|| SumdbError::Internal {
            message: "a store is required".into(),
        })?;
        let client = self.http_client.unwrap_or_else(Proxy::default_client);

        let db = SumDb {
            inner: Arc::new(Inner {
                store,
                proxy: Proxy::new(client, self.upstream),
                signer,
                lookups: Group::new(),
                append_lock: Mutex::new(()),
            }),
        };
        db.reconcile().await?;
        Ok(db)
    }
}
