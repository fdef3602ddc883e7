//! Merkle root computation over ordered transaction hashes

use crate::serialize::hash256;
use crate::types::*;

/// Root returned for an empty sequence
pub const EMPTY_MERKLE_ROOT: Hash = [0u8; 32];

/// MerkleRoot: ℍ* → ℍ
///
/// Pairs adjacent hashes and hashes each concatenation, duplicating the last
/// element of any odd-length level, until one hash remains.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    merkle_root_with_mutation(hashes).0
}

/// Same as `merkle_root`, additionally reporting whether two identical
/// adjacent hashes were paired at any level. Such a tree has the same root as
/// a different transaction list, so a brick committing to it is ambiguous.
pub fn merkle_root_with_mutation(hashes: &[Hash]) -> (Hash, bool) {
    if hashes.is_empty() {
        return (EMPTY_MERKLE_ROOT, false);
    }

    let mut level = hashes.to_vec();
    let mut mutated = false;
    while level.len() > 1 {
        let mut next_level = Vec::with_capacity((level.len() + 1) / 2);
        for chunk in level.chunks(2) {
            let left = &chunk[0];
            let right = match chunk.get(1) {
                Some(right) => {
                    if right == left {
                        mutated = true;
                    }
                    right
                }
                None => left,
            };
            let mut combined = [0u8; 64];
            combined[..32].copy_from_slice(left);
            combined[32..].copy_from_slice(right);
            next_level.push(hash256(&combined));
        }
        level = next_level;
    }

    (level[0], mutated)
}

/// Merkle root over the brick's transaction ids, in brick order
pub fn brick_merkle_root(brick: &Brick) -> (Hash, bool) {
    let txids: Vec<Hash> = brick.transactions.iter().map(Transaction::txid).collect();
    merkle_root_with_mutation(&txids)
}

/// Witness merkle root: the coinbase leaf is the zero hash, every other leaf
/// is the transaction's witness-inclusive hash.
pub fn witness_merkle_root(brick: &Brick) -> Hash {
    let leaves: Vec<Hash> = brick
        .transactions
        .iter()
        .enumerate()
        .map(|(i, tx)| if i == 0 { [0u8; 32] } else { tx.wtxid() })
        .collect();
    merkle_root(&leaves)
}
