//! Aggregated hash tree with variable fan-out.
//!
//! The tree collapses an ordered sequence of `(hash, size)` pairs level by
//! level until a single root remains. Cut points are chosen by the child
//! hashes themselves (last 8 bytes mod the mean branching factor), giving a
//! canonical tree shape for any input without storing any structure.
//!
//! The merge input is textual: one `{hash} : {size}\n` line per child, with
//! the hash in its string form and the size in ASCII decimal. This layout is
//! part of the wire contract; hashing raw bytes instead would change every
//! xorb and file hash.

use std::fmt::Write as _;

use xet_types::constants::{INTERNAL_NODE_KEY, MAX_CHILDREN, MEAN_BRANCHING_FACTOR, MIN_CHILDREN};
use xet_types::XetHash;

use crate::keyed_hash;

/// Number of leading entries to merge into the next parent node.
///
/// Scans entries starting from the second one; the first entry whose hash
/// tail is divisible by [`MEAN_BRANCHING_FACTOR`] closes the run. A run
/// never exceeds [`MAX_CHILDREN`], and a remainder of two or fewer entries
/// is always merged whole so every internal node keeps at least
/// [`MIN_CHILDREN`] children.
fn next_merge_cut(entries: &[(XetHash, u64)]) -> usize {
    if entries.len() <= MIN_CHILDREN {
        return entries.len();
    }

    let end = MAX_CHILDREN.min(entries.len());
    for (i, (hash, _)) in entries.iter().enumerate().take(end).skip(MIN_CHILDREN - 1) {
        if hash.last_u64() % MEAN_BRANCHING_FACTOR == 0 {
            return i + 1;
        }
    }
    end
}

/// Merge a run of `(hash, size)` pairs into one parent pair.
fn merge_hash_sequence(entries: &[(XetHash, u64)]) -> (XetHash, u64) {
    let mut buffer = String::with_capacity(entries.len() * 80);
    let mut total_size = 0u64;

    for (hash, size) in entries {
        writeln!(buffer, "{hash} : {size}").expect("writing to String cannot fail");
        total_size += size;
    }

    (keyed_hash(&INTERNAL_NODE_KEY, buffer.as_bytes()), total_size)
}

/// Compute the tree root of an ordered `(hash, size)` sequence.
///
/// An empty input yields [`XetHash::ZERO`].
pub fn merkle_root(entries: &[(XetHash, u64)]) -> XetHash {
    if entries.is_empty() {
        return XetHash::ZERO;
    }

    let mut level: Vec<(XetHash, u64)> = entries.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / MIN_CHILDREN + 1);
        let mut rest = level.as_slice();

        while !rest.is_empty() {
            let cut = next_merge_cut(rest);
            next.push(merge_hash_sequence(&rest[..cut]));
            rest = &rest[cut..];
        }

        level = next;
    }

    level[0].0
}
