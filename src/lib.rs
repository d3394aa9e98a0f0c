//! Checksum database server for Go modules.
//!
//! An append-only, cryptographically verifiable registry of module-artifact
//! hashes. Lookups either return a previously recorded entry or, on first
//! sight, fetch the module from an upstream proxy, compute its `h1:`
//! hashes, and append a new leaf to a tiled transparent log whose heads are
//! signed as Ed25519 notes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sumdb::{generate_keys, MemStore, ModuleVersion, SumDb};
//!
//! # async fn run() -> sumdb::Result<()> {
//! let (signer_key, verifier_key) = generate_keys("sum.example.org")?;
//! println!("clients verify with: {verifier_key}");
//!
//! let db = SumDb::builder(signer_key)
//!     .store(Arc::new(MemStore::new()))
//!     .build()
//!     .await?;
//!
//! let id = db.lookup(&ModuleVersion::new("golang.org/x/mod", "v0.17.0")).await?;
//! println!("record {id}");
//!
//! // Serve the HTTP surface.
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
//! axum::serve(listener, db.router()).await.unwrap();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod db;
/// The `h1:` directory hash over file sets and module zips.
pub mod dirhash;
mod error;
mod flight;
/// Module identity and proxy-URL escaping.
pub mod module;
/// Ed25519 signed notes and their key encodings.
pub mod note;
mod proxy;
/// The public HTTP endpoints.
pub mod server;
/// The persistence contract and bundled backends.
pub mod store;
/// Pure transparent-log primitives.
pub mod tlog;
/// The tree engine bridging tlog arithmetic to a store.
pub mod tree;

pub use db::{SumDb, SumDbBuilder};
pub use error::{Result, SumdbError};
pub use module::ModuleVersion;
pub use note::{generate_keys, NoteSigner, NoteVerifier};
pub use proxy::DEFAULT_UPSTREAM;
pub use store::{MemStore, Record, RedbStore, Store};
