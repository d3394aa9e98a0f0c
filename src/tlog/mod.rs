//! Transparent-log primitives: hashes, tree heads, tiles, record framing.
//!
//! This module is pure: it computes hashes and wire encodings, and leaves
//! all storage I/O to [`crate::tree`]. Hashing follows RFC 6962 with
//! domain-separated leaf (`0x00`) and interior (`0x01`) prefixes.

mod index;
mod tile;

pub use index::{
    merge_hash_indexes, split_stored_hash_index, stored_hash_count, stored_hash_index,
    stored_hash_indexes, stored_hashes, subtree_hash, subtree_index, tree_hash_from,
};
pub use tile::Tile;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::Digest;
use sha2::Sha256;

use crate::error::{Result, SumdbError};

/// Size of a stored hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A node hash in the log's Merkle tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; HASH_SIZE]);

impl Hash {
    /// The all-zero hash: unwritten grid positions and the empty tree root.
    pub const ZERO: Hash = Hash([0u8; HASH_SIZE]);

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Parse from the padded standard base64 used in tree texts.
    pub fn from_base64(s: &str) -> Result<Hash> {
        let bytes = BASE64.decode(s).map_err(|e| SumdbError::InvalidNote {
            reason: format!("bad hash encoding: {e}"),
        })?;
        let arr: [u8; HASH_SIZE] = bytes.try_into().map_err(|b: Vec<u8>| SumdbError::InvalidNote {
            reason: format!("hash is {} bytes, want {HASH_SIZE}", b.len()),
        })?;
        Ok(Hash(arr))
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&BASE64.encode(self.0))
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = SumdbError;

    fn try_from(bytes: &[u8]) -> Result<Hash> {
        let arr: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| SumdbError::Internal {
            message: format!("hash is {} bytes, want {HASH_SIZE}", bytes.len()),
        })?;
        Ok(Hash(arr))
    }
}

/// Leaf hash of a record: `SHA-256(0x00 || data)`.
pub fn record_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(data);
    Hash(hasher.finalize().into())
}

/// Interior hash: `SHA-256(0x01 || left || right)`.
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left.0);
    hasher.update(right.0);
    Hash(hasher.finalize().into())
}

/// A tree head: the number of records and the root hash over them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tree {
    /// Number of records in the tree.
    pub size: u64,
    /// Root hash; [`Hash::ZERO`] when `size == 0`.
    pub hash: Hash,
}

const TREE_HEADER: &str = "go.sum database tree";

/// Render a tree head as the canonical three-line text that gets signed.
pub fn format_tree(tree: &Tree) -> String {
    format!("{TREE_HEADER}\n{}\n{}\n", tree.size, tree.hash)
}

/// Parse the canonical tree text back into a [`Tree`].
pub fn parse_tree(text: &str) -> Result<Tree> {
    let malformed = |reason: &str| SumdbError::InvalidNote {
        reason: format!("malformed tree text: {reason}"),
    };
    let mut lines = text.split('\n');
    if lines.next() != Some(TREE_HEADER) {
        return Err(malformed("missing header"));
    }
    let size_line = lines.next().ok_or_else(|| malformed("missing size"))?;
    let size: u64 = size_line.parse().map_err(|_| malformed("bad size"))?;
    // Reject non-canonical encodings such as leading zeroes.
    if size_line != size.to_string() {
        return Err(malformed("non-canonical size"));
    }
    let hash_line = lines.next().ok_or_else(|| malformed("missing hash"))?;
    let hash = Hash::from_base64(hash_line)?;
    if !matches!(lines.next(), Some("") | None) {
        return Err(malformed("trailing data"));
    }
    Ok(Tree { size, hash })
}

/// Frame a record for lookup responses and data tiles:
/// the id on its own line, the record text, then a blank line.
pub fn format_record(id: u64, text: &[u8]) -> Result<Vec<u8>> {
    check_record_text(text)?;
    let mut msg = format!("{id}\n").into_bytes();
    msg.extend_from_slice(text);
    msg.push(b'\n');
    Ok(msg)
}

// Record text must be newline-terminated UTF-8 with no control characters
// besides '\n' and no blank lines, so the framing above stays parseable.
fn check_record_text(text: &[u8]) -> Result<()> {
    let s = std::str::from_utf8(text).map_err(|_| SumdbError::Internal {
        message: "record text is not valid UTF-8".into(),
    })?;
    let mut last = '\0';
    for c in s.chars() {
        if (c < ' ' && c != '\n') || (last == '\n' && c == '\n') {
            return Err(SumdbError::Internal {
                message: "record text contains control characters or blank lines".into(),
            });
        }
        last = c;
    }
    if last != '\n' {
        return Err(SumdbError::Internal {
            message: "record text must end with a newline".into(),
        });
    }
    Ok(())
}
