//! Compact brick relay encodings
//!
//! A compact brick carries the header, a 48-bit short ID per transaction the
//! receiver is expected to already hold, and the transactions it cannot
//! (always the coinbase). The receiver fills the gaps from its pool, asks for
//! whatever is still missing and checks the result against the merkle root.

use crate::error::{RelayError, Result};
use crate::merkle::brick_merkle_root;
use crate::serialize::{
    deserialize_header, deserialize_transaction, encode_varint, serialize_header, serialize_transaction,
    sha256, Reader,
};
use crate::types::*;
use siphasher::sip::SipHasher24;
use std::collections::{HashMap, HashSet};
use std::hash::Hasher;
use tracing::debug;

const SHORT_ID_MASK: u64 = 0xffff_ffff_ffff;

/// Transactions addressable by a 16-bit index
const MAX_INDEXED_TRANSACTIONS: u64 = u16::MAX as u64 + 1;

/// Transaction sent in full inside a compact brick. `index` is differential:
/// the gap since the previous prefilled transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefilledTransaction {
    pub index: u16,
    pub tx: Transaction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderAndShortIds {
    pub header: BrickHeader,
    pub nonce: u64,
    pub short_ids: Vec<u64>,
    pub prefilled: Vec<PrefilledTransaction>,
}

impl HeaderAndShortIds {
    /// Encode a brick with only the coinbase prefilled. Short IDs are taken
    /// over witness hashes when `use_wtxid` is set, transaction ids otherwise.
    pub fn from_brick(brick: &Brick, nonce: u64, use_wtxid: bool) -> Self {
        let mut compact = Self {
            header: brick.header.clone(),
            nonce,
            short_ids: Vec::with_capacity(brick.transactions.len().saturating_sub(1)),
            prefilled: Vec::new(),
        };

        let mut txs = brick.transactions.iter();
        if let Some(coinbase) = txs.next() {
            compact.prefilled.push(PrefilledTransaction {
                index: 0,
                tx: coinbase.clone(),
            });
        }
        let keys = compact.short_id_keys();
        for tx in txs {
            let hash = if use_wtxid { tx.wtxid() } else { tx.txid() };
            compact.short_ids.push(short_id_with_keys(keys, &hash));
        }
        compact
    }

    /// Wire form: header, nonce, short IDs as 6 little-endian bytes each,
    /// then prefilled transactions with differential indexes.
    pub fn encode(&self) -> Vec<u8> {
        let mut data = serialize_header(&self.header);
        data.extend_from_slice(&self.nonce.to_le_bytes());

        data.extend(encode_varint(self.short_ids.len() as u64));
        for short_id in &self.short_ids {
            data.extend_from_slice(&short_id.to_le_bytes()[..6]);
        }

        data.extend(encode_varint(self.prefilled.len() as u64));
        for prefilled in &self.prefilled {
            data.extend(encode_varint(prefilled.index as u64));
            data.extend(serialize_transaction(&prefilled.tx, true));
        }
        data
    }

    /// Inverse of `encode`. Prefilled indexes must stay inside the brick.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let header = deserialize_header(&mut reader)?;
        let nonce = reader.read_u64()?;

        let short_count = reader.read_varint()?;
        if short_count > MAX_INDEXED_TRANSACTIONS {
            return Err(RelayError::Serialization(format!("too many short ids: {short_count}")));
        }
        let mut short_ids = Vec::with_capacity(short_count as usize);
        for _ in 0..short_count {
            let low = reader.read_u32()? as u64;
            let high = reader.read_u16()? as u64;
            short_ids.push(high << 32 | low);
        }

        let prefilled_count = reader.read_varint()?;
        let total = short_count.saturating_add(prefilled_count);
        if total > MAX_INDEXED_TRANSACTIONS {
            return Err(RelayError::Serialization(format!("too many transactions: {total}")));
        }
        let mut prefilled = Vec::with_capacity(prefilled_count as usize);
        let mut next: u64 = 0;
        for _ in 0..prefilled_count {
            let gap = reader.read_varint()?;
            let index = next
                .checked_add(gap)
                .filter(|index| *index < total)
                .ok_or_else(|| {
                    RelayError::Serialization(format!(
                        "prefilled index gap {gap} past the end of a {total} transaction brick"
                    ))
                })?;
            prefilled.push(PrefilledTransaction {
                index: gap as u16,
                tx: deserialize_transaction(&mut reader)?,
            });
            next = index + 1;
        }

        if !reader.is_empty() {
            return Err(RelayError::Serialization("trailing bytes after compact brick".to_string()));
        }
        Ok(Self {
            header,
            nonce,
            short_ids,
            prefilled,
        })
    }

    /// Total number of transactions in the encoded brick
    pub fn transaction_count(&self) -> usize {
        self.short_ids.len() + self.prefilled.len()
    }

    /// SipHash-2-4 of `hash`, keyed from SHA256(header || nonce), cut to 48 bits
    pub fn short_id(&self, hash: &Hash) -> u64 {
        short_id_with_keys(self.short_id_keys(), hash)
    }

    fn short_id_keys(&self) -> (u64, u64) {
        let mut data = serialize_header(&self.header);
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let digest = sha256(&data);

        let mut k0 = [0u8; 8];
        let mut k1 = [0u8; 8];
        k0.copy_from_slice(&digest[0..8]);
        k1.copy_from_slice(&digest[8..16]);
        (u64::from_le_bytes(k0), u64::from_le_bytes(k1))
    }
}

fn short_id_with_keys((k0, k1): (u64, u64), hash: &Hash) -> u64 {
    let mut hasher = SipHasher24::new_with_keys(k0, k1);
    hasher.write(hash);
    hasher.finish() & SHORT_ID_MASK
}

/// Result of decoding or completing a compact brick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    /// The encoding itself is inconsistent; the sender misbehaved
    Invalid,
    /// Well formed but unusable, e.g. short ID collision; fall back to a
    /// full brick request
    Failed,
}

/// Brick under reconstruction from a compact encoding
#[derive(Debug, Clone, Default)]
pub struct PartiallyDownloadedBrick {
    header: Option<BrickHeader>,
    available: Vec<Option<Transaction>>,
}

impl PartiallyDownloadedBrick {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place prefilled transactions, then fill remaining slots from `pool` by
    /// witness hash. A slot claimed by two pool transactions is left empty.
    pub fn init_data(&mut self, compact: &HeaderAndShortIds, pool: &[Transaction]) -> ReadStatus {
        if compact.header.is_null() || compact.transaction_count() == 0 {
            return ReadStatus::Invalid;
        }
        let total = compact.transaction_count();
        if total > u16::MAX as usize + 1 {
            return ReadStatus::Invalid;
        }

        let mut available: Vec<Option<Transaction>> = vec![None; total];
        let mut last_index: i64 = -1;
        for (i, prefilled) in compact.prefilled.iter().enumerate() {
            last_index += prefilled.index as i64 + 1;
            if last_index > u16::MAX as i64 {
                return ReadStatus::Invalid;
            }
            // Each prefilled slot can only be preceded by short IDs we have seen
            if last_index as usize > compact.short_ids.len() + i {
                return ReadStatus::Invalid;
            }
            available[last_index as usize] = Some(prefilled.tx.clone());
        }

        let mut slot_by_short_id: HashMap<u64, usize> = HashMap::with_capacity(compact.short_ids.len());
        let mut short_ids = compact.short_ids.iter();
        for (slot, tx) in available.iter().enumerate() {
            if tx.is_some() {
                continue;
            }
            let Some(short_id) = short_ids.next() else {
                return ReadStatus::Invalid;
            };
            if slot_by_short_id.insert(*short_id, slot).is_some() {
                debug!(short_id, "short id collision in compact brick");
                return ReadStatus::Failed;
            }
        }

        let mut contested: HashSet<usize> = HashSet::new();
        for tx in pool {
            let Some(&slot) = slot_by_short_id.get(&compact.short_id(&tx.wtxid())) else {
                continue;
            };
            if contested.contains(&slot) {
                continue;
            }
            if available[slot].is_some() {
                available[slot] = None;
                contested.insert(slot);
            } else {
                available[slot] = Some(tx.clone());
            }
        }

        self.header = Some(compact.header.clone());
        self.available = available;
        ReadStatus::Ok
    }

    pub fn is_tx_available(&self, index: usize) -> bool {
        matches!(self.available.get(index), Some(Some(_)))
    }

    /// Indexes still to be requested from the sender
    pub fn missing_indexes(&self) -> Vec<u16> {
        self.available
            .iter()
            .enumerate()
            .filter(|(_, tx)| tx.is_none())
            .map(|(i, _)| i as u16)
            .collect()
    }

    /// Complete the brick with `missing`, one transaction per empty slot in
    /// order. The error is `Invalid` for a count mismatch and `Failed` when
    /// the result does not match the header's merkle root.
    pub fn fill_brick(&self, missing: &[Transaction]) -> std::result::Result<Brick, ReadStatus> {
        let header = self.header.clone().ok_or(ReadStatus::Invalid)?;

        let mut missing_iter = missing.iter();
        let mut transactions = Vec::with_capacity(self.available.len());
        for slot in &self.available {
            match slot {
                Some(tx) => transactions.push(tx.clone()),
                None => transactions.push(missing_iter.next().ok_or(ReadStatus::Invalid)?.clone()),
            }
        }
        if missing_iter.next().is_some() {
            return Err(ReadStatus::Invalid);
        }

        let brick = Brick { header, transactions };
        let (root, mutated) = brick_merkle_root(&brick);
        if mutated || root != brick.header.merkle_root {
            return Err(ReadStatus::Failed);
        }
        Ok(brick)
    }
}

/// Request for the transactions a compact brick did not resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrickTransactionsRequest {
    pub brick_hash: Hash,
    /// Absolute indexes, strictly increasing
    pub indexes: Vec<u16>,
}

impl BrickTransactionsRequest {
    /// Wire form: hash, count, then each index as the gap since the previous one
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut data = self.brick_hash.to_vec();
        data.extend(encode_varint(self.indexes.len() as u64));

        let mut next: u32 = 0;
        for &index in &self.indexes {
            let index = index as u32;
            if index < next {
                return Err(RelayError::Serialization(format!(
                    "transaction indexes not strictly increasing at {index}"
                )));
            }
            data.extend(encode_varint((index - next) as u64));
            next = index + 1;
        }
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let brick_hash = reader.read_hash()?;
        let count = reader.read_varint()?;
        if count > MAX_INDEXED_TRANSACTIONS {
            return Err(RelayError::Serialization(format!("too many indexes: {count}")));
        }

        let mut indexes = Vec::with_capacity(count as usize);
        let mut next: u64 = 0;
        for _ in 0..count {
            let gap = reader.read_varint()?;
            let index = next
                .checked_add(gap)
                .filter(|index| *index <= u16::MAX as u64)
                .ok_or_else(|| {
                    RelayError::Serialization(format!("index gap {gap} overflows 16 bits"))
                })?;
            indexes.push(index as u16);
            next = index + 1;
        }
        if !reader.is_empty() {
            return Err(RelayError::Serialization("trailing bytes after request".to_string()));
        }
        Ok(Self { brick_hash, indexes })
    }
}
