//! Wire serialization and hashing helpers

use crate::error::{RelayError, Result};
use crate::types::*;
use bitcoin_hashes::{sha256d, Hash as BitcoinHash};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Single SHA256
pub fn sha256(data: &[u8]) -> Hash {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(data));
    hash
}

/// Hash256: SHA256(SHA256(x))
pub fn hash256(data: &[u8]) -> Hash {
    let first = Sha256::digest(data);
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(first));
    hash
}

/// Render a hash the way 256-bit identifiers are conventionally displayed:
/// big-endian hex, i.e. the internal bytes reversed.
pub fn hash_to_hex(hash: &Hash) -> String {
    sha256d::Hash::from_inner(*hash).to_string()
}

/// Inverse of `hash_to_hex`
pub fn hash_from_hex(s: &str) -> Result<Hash> {
    sha256d::Hash::from_str(s)
        .map(|h| h.into_inner())
        .map_err(|e| RelayError::Serialization(format!("invalid hash hex {s:?}: {e}")))
}

/// Encode a number as a compact-size varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffffffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

/// Length-prefixed byte string
pub fn encode_bytes(data: &[u8]) -> Vec<u8> {
    let mut result = encode_varint(data.len() as u64);
    result.extend_from_slice(data);
    result
}

/// Serialize a transaction.
///
/// With `with_witness` set and at least one non-empty witness, the extended
/// format is used: marker `0x00`, flag `0x01`, and one witness stack per input
/// after the outputs. Otherwise the legacy format is produced.
pub fn serialize_transaction(tx: &Transaction, with_witness: bool) -> Vec<u8> {
    let extended = with_witness && tx.has_witness();
    let mut data = Vec::new();

    data.extend_from_slice(&tx.version.to_le_bytes());
    if extended {
        data.extend_from_slice(&[0x00, 0x01]);
    }

    data.extend_from_slice(&encode_varint(tx.inputs.len() as u64));
    for input in &tx.inputs {
        data.extend_from_slice(&input.prevout.hash);
        data.extend_from_slice(&input.prevout.index.to_le_bytes());
        data.extend_from_slice(&encode_bytes(&input.script_sig));
        data.extend_from_slice(&input.sequence.to_le_bytes());
    }

    data.extend_from_slice(&encode_varint(tx.outputs.len() as u64));
    for output in &tx.outputs {
        data.extend_from_slice(&output.value.to_le_bytes());
        data.extend_from_slice(&encode_bytes(&output.script_pubkey));
    }

    if extended {
        for input in &tx.inputs {
            data.extend_from_slice(&encode_varint(input.witness.len() as u64));
            for element in &input.witness {
                data.extend_from_slice(&encode_bytes(element));
            }
        }
    }

    data.extend_from_slice(&tx.lock_time.to_le_bytes());
    data
}

/// Serialize the 80-byte brick header
pub fn serialize_header(header: &BrickHeader) -> Vec<u8> {
    let mut data = Vec::with_capacity(80);
    data.extend_from_slice(&header.version.to_le_bytes());
    data.extend_from_slice(&header.prev_brick_hash);
    data.extend_from_slice(&header.merkle_root);
    data.extend_from_slice(&header.timestamp.to_le_bytes());
    data.extend_from_slice(&header.bits.to_le_bytes());
    data.extend_from_slice(&header.nonce.to_le_bytes());
    data
}

/// Inverse of `serialize_header`
pub fn deserialize_header(reader: &mut Reader<'_>) -> Result<BrickHeader> {
    Ok(BrickHeader {
        version: reader.read_i32()?,
        prev_brick_hash: reader.read_hash()?,
        merkle_root: reader.read_hash()?,
        timestamp: reader.read_u32()?,
        bits: reader.read_u32()?,
        nonce: reader.read_u32()?,
    })
}

// Upper bound on speculative allocation for counts read off the wire
const MAX_PREALLOC: u64 = 1024;

/// Inverse of `serialize_transaction`, accepting both the legacy and the
/// extended format. An extended encoding without any witness is rejected.
pub fn deserialize_transaction(reader: &mut Reader<'_>) -> Result<Transaction> {
    let version = reader.read_i32()?;

    let extended = reader.peek_u8() == Some(0x00);
    if extended {
        reader.read_u8()?;
        let flag = reader.read_u8()?;
        if flag != 0x01 {
            return Err(RelayError::Serialization(format!("unknown transaction flag {flag:#04x}")));
        }
    }

    let input_count = reader.read_varint()?;
    let mut inputs = Vec::with_capacity(input_count.min(MAX_PREALLOC) as usize);
    for _ in 0..input_count {
        inputs.push(TransactionInput {
            prevout: OutPoint {
                hash: reader.read_hash()?,
                index: reader.read_u32()?,
            },
            script_sig: reader.read_var_bytes()?,
            sequence: reader.read_u32()?,
            witness: Vec::new(),
        });
    }

    let output_count = reader.read_varint()?;
    let mut outputs = Vec::with_capacity(output_count.min(MAX_PREALLOC) as usize);
    for _ in 0..output_count {
        outputs.push(TransactionOutput {
            value: reader.read_i64()?,
            script_pubkey: reader.read_var_bytes()?,
        });
    }

    if extended {
        for input in &mut inputs {
            let items = reader.read_varint()?;
            let mut witness = Vec::with_capacity(items.min(MAX_PREALLOC) as usize);
            for _ in 0..items {
                witness.push(reader.read_var_bytes()?);
            }
            input.witness = witness;
        }
        if inputs.iter().all(|input| input.witness.is_empty()) {
            return Err(RelayError::Serialization("superfluous witness record".to_string()));
        }
    }

    Ok(Transaction {
        version,
        inputs,
        outputs,
        lock_time: reader.read_u32()?,
    })
}

/// Cursor over a byte slice for decoding wire data
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                RelayError::Serialization(format!(
                    "unexpected end of data: wanted {} bytes at offset {}",
                    len, self.pos
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Next byte without consuming it
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    /// Length-prefixed byte string
    pub fn read_var_bytes(&mut self) -> Result<ByteString> {
        let len = self.read_varint()?;
        let len = usize::try_from(len)
            .map_err(|_| RelayError::Serialization(format!("length {len} too large")))?;
        Ok(self.read_bytes(len)?.to_vec())
    }

    pub fn read_hash(&mut self) -> Result<Hash> {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(self.read_bytes(32)?);
        Ok(hash)
    }

    /// Read a compact-size varint, rejecting non-canonical encodings
    pub fn read_varint(&mut self) -> Result<u64> {
        let (value, min) = match self.read_u8()? {
            0xfd => {
                let mut buf = [0u8; 2];
                buf.copy_from_slice(self.read_bytes(2)?);
                (u16::from_le_bytes(buf) as u64, 0xfd)
            }
            0xfe => {
                let mut buf = [0u8; 4];
                buf.copy_from_slice(self.read_bytes(4)?);
                (u32::from_le_bytes(buf) as u64, 0x1_0000)
            }
            0xff => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(self.read_bytes(8)?);
                (u64::from_le_bytes(buf), 0x1_0000_0000)
            }
            small => return Ok(small as u64),
        };
        if value < min {
            return Err(RelayError::Serialization(format!(
                "non-canonical compact size {value}"
            )));
        }
        Ok(value)
    }
}
