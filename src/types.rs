//! Core brick and transaction types

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash, stored in internal (little-endian) byte order
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Witness stack: 𝒲 = 𝕊*
pub type Witness = Vec<ByteString>;

/// OutPoint: 𝒪 = ℍ × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

impl OutPoint {
    /// The null outpoint referenced by coinbase inputs
    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32] && self.index == u32::MAX
    }
}

/// Transaction Input: ℐ = 𝒪 × 𝕊 × ℕ × 𝒲
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prevout: OutPoint,
    pub script_sig: ByteString,
    pub sequence: u32,
    #[serde(default)]
    pub witness: Witness,
}

/// Transaction Output: 𝒯 = ℤ × 𝕊
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: i64,
    pub script_pubkey: ByteString,
}

/// Transaction: 𝒯𝒳 = ℤ × ℐ* × 𝒯* × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u32,
}

impl Transaction {
    /// Identity hash: double-SHA256 of the serialization without witness data
    pub fn txid(&self) -> Hash {
        crate::serialize::hash256(&crate::serialize::serialize_transaction(self, false))
    }

    /// Witness-inclusive hash. Equal to `txid` when no input carries witness data.
    pub fn wtxid(&self) -> Hash {
        crate::serialize::hash256(&crate::serialize::serialize_transaction(self, true))
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }
}

/// Brick Header: ℋ = ℤ × ℍ × ℍ × ℕ × ℕ × ℕ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickHeader {
    pub version: i32,
    pub prev_brick_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BrickHeader {
    pub fn hash(&self) -> Hash {
        crate::serialize::hash256(&crate::serialize::serialize_header(self))
    }

    pub fn is_null(&self) -> bool {
        self.bits == 0
    }
}

/// Brick: ℬ = ℋ × 𝒯𝒳*
///
/// The first transaction is the coinbase. A brick is final once its header
/// merkle root matches its transactions; every structural change to the
/// transaction list must be followed by recomputing the merkle root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Brick {
    pub header: BrickHeader,
    pub transactions: Vec<Transaction>,
}

impl Brick {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }
}
