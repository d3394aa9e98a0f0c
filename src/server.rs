//! HTTP surface of the checksum database.
//!
//! Three endpoints, all read-mostly:
//!
//! - `GET /latest` — the signed tree head.
//! - `GET /lookup/<module>@<version>` — record id, record text, and the
//!   signed head; creates the record on first sight.
//! - `GET /tile/<H>/<L>/<N>[.p/<W>]` — raw tile bytes; the `data` level
//!   serves framed record text instead of hashes.

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::debug;
use tracing::error;

use crate::db::SumDb;
use crate::error::{Result, SumdbError};
use crate::module::{self, ModuleVersion};
use crate::tlog::{format_record, Tile};
use crate::tree::TILE_HEIGHT;

/// Build the router serving the public endpoints.
pub fn router(db: SumDb) -> Router {
    Router::new()
        .route("/latest", get(latest))
        .route("/lookup/{*module}", get(lookup))
        .route("/tile/{*coords}", get(tile))
        .with_state(db)
}

async fn latest(State(db): State<SumDb>) -> Response {
    match db.signed().await {
        Ok(signed) => signed.into_response(),
        Err(e) => error_response("latest", e),
    }
}

async fn lookup(State(db): State<SumDb>, Path(module): Path<String>) -> Response {
    let module = match parse_lookup_target(&module) {
        Ok(m) => m,
        Err(e) => return error_response("lookup", e),
    };
    match lookup_response(&db, &module).await {
        Ok(body) => body.into_response(),
        Err(e) => error_response("lookup", e),
    }
}

async fn lookup_response(db: &SumDb, module: &ModuleVersion) -> Result<Vec<u8>> {
    let id = db.lookup(module).await?;
    let records = db.read_records(id, 1).await?;
    let data = records.into_iter().next().ok_or_else(|| SumdbError::Internal {
        message: format!("record {id} missing after lookup"),
    })?;

    let mut body = format_record(id, &data)?;
    body.extend_from_slice(&db.signed().await?);
    Ok(body)
}

async fn tile(State(db): State<SumDb>, Path(coords): Path<String>) -> Response {
    let tile = match Tile::from_path(&format!("tile/{coords}")) {
        Ok(t) => t,
        Err(e) => return error_response("tile", e),
    };
    if tile.height != TILE_HEIGHT {
        return error_response(
            "tile",
            SumdbError::InvalidTile {
                reason: format!("height {} not served", tile.height),
            },
        );
    }
    debug!(%tile, "serving tile");
    let result = if tile.is_data() {
        data_tile_response(&db, &tile).await
    } else {
        db.read_tile_data(&tile).await
    };
    match result {
        Ok(bytes) => bytes.into_response(),
        Err(e) => error_response("tile", e),
    }
}

// Data tiles carry the framed record text for the records the tile covers;
// a tile past the end of the log does not exist yet.
async fn data_tile_response(db: &SumDb, tile: &Tile) -> Result<Vec<u8>> {
    let start = tile.start_record();
    let records = db.read_records(start, u64::from(tile.width)).await?;
    if records.len() < tile.width as usize {
        return Err(SumdbError::NotFound);
    }
    let mut body = Vec::new();
    for (i, data) in records.iter().enumerate() {
        body.extend_from_slice(&format_record(start + i as u64, data)?);
    }
    Ok(body)
}

// `<escaped path>@<escaped version>` from the URL tail.
fn parse_lookup_target(raw: &str) -> Result<ModuleVersion> {
    let (esc_path, esc_version) = raw.split_once('@').ok_or_else(|| SumdbError::InvalidModule {
        reason: format!("expected path@version, got {raw:?}"),
    })?;
    Ok(ModuleVersion {
        path: module::unescape_path(esc_path)?,
        version: module::unescape_version(esc_version)?,
    })
}

fn error_response(endpoint: &str, err: SumdbError) -> Response {
    let status = match &err {
        SumdbError::InvalidModule { .. } | SumdbError::InvalidTile { .. } => StatusCode::BAD_REQUEST,
        SumdbError::NotFound => StatusCode::NOT_FOUND,
        // The module does not exist upstream; mirror the status.
        SumdbError::UpstreamHttp { status, .. } if *status == 404 || *status == 410 => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(endpoint, error = %err, "request failed");
    } else {
        debug!(endpoint, error = %err, "request rejected");
    }
    (status, err.to_string()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lookup_target() {
        let m = parse_lookup_target("github.com/!azure/sdk@v1.0.0").unwrap();
        assert_eq!(m.path, "github.com/Azure/sdk");
        assert_eq!(m.version, "v1.0.0");
    }

    #[test]
    fn test_parse_lookup_target_rejects_malformed() {
        assert!(parse_lookup_target("no-version").is_err());
        assert!(parse_lookup_target("Upper.com/x@v1").is_err());
        assert!(parse_lookup_target("example.com/x@v1 bad").is_err());
    }
}
