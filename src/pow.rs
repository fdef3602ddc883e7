//! Proof of work: compact targets and nonce grinding

use crate::error::{RelayError, Result};
use crate::types::*;

/// ExpandTarget: ℕ → ℍ
///
/// Decode a compact `bits` value into a 256-bit big-endian target.
/// Negative, zero and overflowing targets are rejected.
pub fn expand_target(bits: u32) -> Result<[u8; 32]> {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x007fffff;

    if bits & 0x00800000 != 0 && mantissa != 0 {
        return Err(RelayError::InvalidProofOfWork(format!(
            "negative target in bits {bits:#010x}"
        )));
    }

    let mut target = [0u8; 32];
    if exponent <= 3 {
        let value = mantissa >> (8 * (3 - exponent));
        target[29..].copy_from_slice(&value.to_be_bytes()[1..]);
    } else {
        for (i, byte) in mantissa.to_be_bytes()[1..].iter().enumerate() {
            if *byte == 0 {
                continue;
            }
            // Big-endian position of this mantissa byte once shifted
            let pos = (32 + i).checked_sub(exponent).ok_or_else(|| {
                RelayError::InvalidProofOfWork(format!("target overflow in bits {bits:#010x}"))
            })?;
            target[pos] = *byte;
        }
    }

    if target.iter().all(|b| *b == 0) {
        return Err(RelayError::InvalidProofOfWork(format!(
            "zero target in bits {bits:#010x}"
        )));
    }
    Ok(target)
}

/// CheckProofOfWork: ℋ → {true, false}
///
/// Hash256(header), read as a little-endian number, must not exceed the target.
pub fn check_proof_of_work(header: &BrickHeader) -> Result<bool> {
    let target = expand_target(header.bits)?;
    let mut hash = header.hash();
    hash.reverse();
    Ok(hash <= target)
}

/// Grind the header nonce until the brick satisfies its own target
pub fn solve(brick: &mut Brick) -> Result<()> {
    loop {
        if check_proof_of_work(&brick.header)? {
            return Ok(());
        }
        brick.header.nonce = brick.header.nonce.checked_add(1).ok_or_else(|| {
            RelayError::InvalidProofOfWork("nonce space exhausted".to_string())
        })?;
    }
}
