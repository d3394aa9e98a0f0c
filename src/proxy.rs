//! Client for an upstream Go module proxy.
//!
//! Two operations, both returning `h1:` hashes: the `go.mod` file (small,
//! buffered in memory) and the module zip (possibly large, streamed through
//! a temporary file that is deleted on every exit path).

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing::instrument;

use crate::dirhash;
use crate::error::{Result, SumdbError};
use crate::module::ModuleVersion;

/// Default upstream module proxy.
pub const DEFAULT_UPSTREAM: &str = "https://proxy.golang.org";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for one upstream module proxy.
#[derive(Debug, Clone)]
pub struct Proxy {
    client: reqwest::Client,
    upstream: String,
}

impl Proxy {
    /// Create a proxy client against `upstream` with the supplied HTTP
    /// client.
    pub fn new(client: reqwest::Client, upstream: impl Into<String>) -> Self {
        Self {
            client,
            upstream: upstream.into().trim_end_matches('/').to_string(),
        }
    }

    /// The HTTP client used for upstream requests when none is supplied.
    pub fn default_client() -> reqwest::Client {
        reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("default HTTP client configuration is valid")
    }

    /// Fetch `go.mod` for the module and return its `h1:` hash.
    #[instrument(skip(self), fields(module = %module))]
    pub async fn fetch_gomod_hash(&self, module: &ModuleVersion) -> Result<String> {
        let url = self.url(module, "mod")?;
        let resp = self.get(&url).await?;
        let body = resp.bytes().await.map_err(|e| SumdbError::UpstreamNetwork {
            message: format!("read go.mod body from {url}: {e}"),
        })?;
        debug!(bytes = body.len(), "fetched go.mod");
        dirhash::hash_gomod(&body)
    }

    /// Fetch the module zip and return its `h1:` hash.
    ///
    /// The body streams into a temporary file which is removed when hashing
    /// finishes, succeeds or not.
    #[instrument(skip(self), fields(module = %module))]
    pub async fn fetch_zip_hash(&self, module: &ModuleVersion) -> Result<String> {
        let url = self.url(module, "zip")?;
        let mut resp = self.get(&url).await?;

        let tmp = tempfile::NamedTempFile::new().map_err(|e| SumdbError::Internal {
            message: format!("create temp file for zip: {e}"),
        })?;
        let mut file = tokio::fs::File::create(tmp.path()).await.map_err(|e| SumdbError::Internal {
            message: format!("open temp file for zip: {e}"),
        })?;

        let mut total = 0usize;
        while let Some(chunk) = resp.chunk().await.map_err(|e| SumdbError::UpstreamNetwork {
            message: format!("read zip body from {url}: {e}"),
        })? {
            total += chunk.len();
            file.write_all(&chunk).await.map_err(|e| SumdbError::Internal {
                message: format!("write zip to temp file: {e}"),
            })?;
        }
        file.flush().await.map_err(|e| SumdbError::Internal {
            message: format!("flush zip temp file: {e}"),
        })?;
        drop(file);
        debug!(bytes = total, "fetched module zip");

        // Zip hashing is synchronous I/O; run it off the async workers. The
        // temp file moves into the closure and is deleted when it drops.
        let prefix = module.to_string();
        tokio::task::spawn_blocking(move || dirhash::hash_zip(tmp.path(), &prefix))
            .await
            .map_err(|e| SumdbError::Internal {
                message: format!("zip hashing task failed: {e}"),
            })?
    }

    fn url(&self, module: &ModuleVersion, suffix: &str) -> Result<String> {
        let (path, version) = module.escaped()?;
        Ok(format!("{}/{path}/@v/{version}.{suffix}", self.upstream))
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let resp = self.client.get(url).send().await.map_err(|e| SumdbError::UpstreamNetwork {
            message: format!("GET {url}: {e}"),
        })?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(SumdbError::UpstreamHttp {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(resp)
    }
}
