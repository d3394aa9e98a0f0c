//! Crate-wide error taxonomy.
//!
//! Every variant carries owned context so results can be cloned across
//! deduplicated in-flight lookups.

use snafu::Snafu;

/// Convenience alias used throughout the crate.
pub type Result<T, E = SumdbError> = std::result::Result<T, E>;

/// Errors surfaced by the checksum database.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SumdbError {
    /// No record exists for the requested module version.
    ///
    /// Only meaningful from [`Store::record_id`](crate::store::Store::record_id);
    /// lookups recover from it by fetching the module from upstream.
    #[snafu(display("record not found"))]
    NotFound,

    /// The upstream module proxy answered with a non-200 status.
    #[snafu(display("upstream returned {status} for {url}"))]
    UpstreamHttp {
        /// HTTP status code received.
        status: u16,
        /// The URL that was requested.
        url: String,
    },

    /// Transport-level failure talking to the upstream module proxy.
    #[snafu(display("upstream request failed: {message}"))]
    UpstreamNetwork {
        /// Description of the underlying transport error.
        message: String,
    },

    /// Store I/O or constraint failure.
    #[snafu(display("store {op} failed: {message}"))]
    Store {
        /// The store operation that failed.
        op: &'static str,
        /// Description of the underlying failure.
        message: String,
    },

    /// A signed note failed signature verification.
    #[snafu(display("signature verification failed"))]
    VerifyFailed,

    /// A signed note or tree text could not be parsed.
    #[snafu(display("invalid note: {reason}"))]
    InvalidNote {
        /// What was malformed.
        reason: String,
    },

    /// A signer or verifier key string is malformed.
    #[snafu(display("invalid key: {reason}"))]
    InvalidKey {
        /// What was malformed.
        reason: String,
    },

    /// A module path or version violates the escaping rules.
    #[snafu(display("invalid module: {reason}"))]
    InvalidModule {
        /// What was rejected.
        reason: String,
    },

    /// A tile coordinate path is malformed.
    #[snafu(display("invalid tile: {reason}"))]
    InvalidTile {
        /// What was rejected.
        reason: String,
    },

    /// Invariant violation inside the log engine.
    #[snafu(display("internal error: {message}"))]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },
}

impl SumdbError {
    /// True when this is the distinguished absent-record error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SumdbError::NotFound)
    }

    /// Build a [`SumdbError::Store`] from any displayable cause.
    pub fn store(op: &'static str, cause: impl std::fmt::Display) -> Self {
        SumdbError::Store {
            op,
            message: cause.to_string(),
        }
    }
}
