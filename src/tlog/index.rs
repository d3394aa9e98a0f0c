//! Stored-hash grid arithmetic.
//!
//! The log keeps one hash per node of the Merkle tree, addressed by a single
//! integer: the hashes for record `k` are interleaved so that everything
//! committed by records `0..n` occupies a dense prefix of the index space.
//! Appending record `k` writes `1 + k.trailing_ones()` hashes: the new leaf
//! plus one hash per subtree the leaf completes.
//!
//! Everything here is pure arithmetic over `u64`; reading and writing the
//! grid lives in [`crate::tree`].

use crate::error::{Result, SumdbError};
use crate::tlog::{node_hash, Hash};

/// Storage index of the hash for node `n` at `level` (0 = leaves).
///
/// Level-`L` hash `n` is stored right after level-`L+1` hash `2n+1`; working
/// down to the leaf ordering, leaf `n` lands at `n + n/2 + n/4 + …`.
pub fn stored_hash_index(level: usize, mut n: u64) -> u64 {
    for _ in 0..level {
        n = 2 * n + 1;
    }
    let mut i = 0u64;
    while n > 0 {
        i += n;
        n >>= 1;
    }
    i + level as u64
}

/// Inverse of [`stored_hash_index`].
pub fn split_stored_hash_index(index: u64) -> (usize, u64) {
    // The leaf committed at or just before `index` is in
    // [index/2, index/2 + log2(index)]; walk forward to it.
    let mut n = index / 2;
    let mut index_n = stored_hash_index(0, n);
    debug_assert!(index_n <= index);
    loop {
        // Record n+1 adds 1 + (n+1).trailing_zeros() hashes.
        let x = index_n + 1 + u64::from((n + 1).trailing_zeros());
        if x > index {
            break;
        }
        n += 1;
        index_n = x;
    }
    // The hash is one of (0, n), (1, n/2), (2, n/4), …
    let level = (index - index_n) as usize;
    (level, n >> level)
}

/// Number of stored hashes for a tree with `n` records.
pub fn stored_hash_count(n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    // Everything up to the last leaf, plus the subtrees it completed.
    let mut count = stored_hash_index(0, n - 1) + 1;
    let mut i = n - 1;
    while i & 1 == 1 {
        count += 1;
        i >>= 1;
    }
    count
}

/// The storage indexes written when record `id` is appended, in the order
/// the hashes are produced by [`stored_hashes`]: the leaf first, then each
/// newly completed internal node bottom-up.
pub fn stored_hash_indexes(id: u64) -> Vec<u64> {
    let count = 1 + id.trailing_ones() as usize;
    (0..count).map(|level| stored_hash_index(level, id >> level)).collect()
}

/// The storage indexes of the older sibling hashes needed to compute the
/// internal nodes completed by appending record `id`, in ascending order.
pub fn merge_hash_indexes(id: u64) -> Vec<u64> {
    let m = id.trailing_ones() as usize;
    let mut indexes = vec![0u64; m];
    for i in 0..m {
        // id >> i is odd for i < m, so the sibling subtree root exists.
        indexes[m - 1 - i] = stored_hash_index(i, (id >> i) - 1);
    }
    indexes
}

/// Combine the leaf hash of record `id` with the sibling hashes read at
/// [`merge_hash_indexes`]`(id)` into the sequence of hashes to store.
pub fn stored_hashes(id: u64, leaf: Hash, old: &[Hash]) -> Result<Vec<Hash>> {
    let m = id.trailing_ones() as usize;
    if old.len() != m {
        return Err(SumdbError::Internal {
            message: format!("merge hashes for record {id}: expected {m}, got {}", old.len()),
        });
    }
    let mut hashes = Vec::with_capacity(1 + m);
    let mut h = leaf;
    hashes.push(h);
    for i in 0..m {
        h = node_hash(&old[m - 1 - i], &h);
        hashes.push(h);
    }
    Ok(hashes)
}

/// Storage indexes needed to compute the hash of the subtree holding
/// records `[lo, hi)`, appended to `need`.
///
/// The subtree is split into maximal complete left subtrees, whose roots
/// are stored directly (RFC 6962 §2.1 decomposition).
pub fn subtree_index(mut lo: u64, hi: u64, need: &mut Vec<u64>) {
    while lo < hi {
        let (k, level) = maxpow2(hi - lo + 1);
        debug_assert_eq!(lo & (k - 1), 0, "subtree split must be aligned");
        need.push(stored_hash_index(level, lo >> level));
        lo += k;
    }
}

/// Combine the hashes read at [`subtree_index`]`(lo, hi)` into the subtree
/// hash for records `[lo, hi)`. Returns the hash and any leftover input.
pub fn subtree_hash(mut lo: u64, hi: u64, mut hashes: &[Hash]) -> Result<(Hash, &[Hash])> {
    let mut trees: Vec<Hash> = Vec::new();
    while lo < hi {
        let (k, _) = maxpow2(hi - lo + 1);
        let (first, rest) = hashes.split_first().ok_or_else(|| SumdbError::Internal {
            message: format!("ran out of hashes combining subtree [{lo}, {hi})"),
        })?;
        trees.push(*first);
        hashes = rest;
        lo += k;
    }
    // Assemble right to left: the fringe folds into the complete subtrees.
    let mut h = *trees.last().ok_or_else(|| SumdbError::Internal {
        message: format!("empty subtree [{lo}, {hi})"),
    })?;
    for t in trees.iter().rev().skip(1) {
        h = node_hash(t, &h);
    }
    Ok((h, hashes))
}

/// Root hash of an `n`-record tree given the hashes read at
/// [`subtree_index`]`(0, n)`. The empty tree hashes to all zeroes.
pub fn tree_hash_from(n: u64, hashes: &[Hash]) -> Result<Hash> {
    if n == 0 {
        return Ok(Hash::ZERO);
    }
    let (hash, rest) = subtree_hash(0, n, hashes)?;
    if !rest.is_empty() {
        return Err(SumdbError::Internal {
            message: format!("{} hashes left over computing tree hash at size {n}", rest.len()),
        });
    }
    Ok(hash)
}

/// Largest power of two strictly less than `n`, with its log2.
fn maxpow2(n: u64) -> (u64, usize) {
    let mut l = 0;
    while (1u64 << (l + 1)) < n {
        l += 1;
    }
    (1 << l, l)
}
