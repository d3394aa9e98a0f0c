//! Checksum database server binary.
//!
//! Serves the sumdb HTTP endpoints backed by a redb file. On first run a
//! signing key pair is generated and persisted alongside the tree; the
//! verifier key is printed so it can be distributed to clients.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sumdb::{generate_keys, RedbStore, SumDb, DEFAULT_UPSTREAM};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "sumdb-server", about = "Checksum database server for Go modules")]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:3080")]
    listen: SocketAddr,

    /// Path to the database file.
    #[arg(long, default_value = "sumdb.redb")]
    db: PathBuf,

    /// Server name bound to the signing key generated on first run.
    #[arg(long, default_value = "sum.example.org")]
    name: String,

    /// Upstream module proxy to fetch unknown modules from.
    #[arg(long, default_value = DEFAULT_UPSTREAM)]
    upstream: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let store = RedbStore::open(&args.db)?;
    let signer_key = match store.signer_key()? {
        Some(key) => key,
        None => {
            let (skey, vkey) = generate_keys(&args.name)?;
            store.set_keys(&skey, &vkey)?;
            info!(name = %args.name, "generated new signing key pair");
            skey
        }
    };

    let db = SumDb::builder(signer_key)
        .store(Arc::new(store))
        .upstream(args.upstream)
        .build()
        .await?;

    println!("verifier key: {}", db.verifier_key());

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    info!(addr = %listener.local_addr()?, "serving checksum database");
    axum::serve(listener, db.router()).await?;
    Ok(())
}
