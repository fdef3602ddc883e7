//! Brick and transaction assembly for regtest-style chains

use crate::constants::*;
use crate::economic::get_brick_subsidy;
use crate::error::{RelayError, Result};
use crate::merkle::{brick_merkle_root, witness_merkle_root};
use crate::script::{serialize_script_num, ScriptBuilder, OP_CHECKSIG, OP_TRUE};
use crate::segwit::{witness_commitment, witness_commitment_script};
use crate::serialize::encode_bytes;
use crate::types::*;
use secp256k1::PublicKey;
use std::time::{SystemTime, UNIX_EPOCH};

/// CreateCoinbase: ℕ × Option<PubKey> → 𝒯𝒳
///
/// The single input spends the null outpoint and its scriptSig pushes the
/// height as a minimal script number. The single output pays the full
/// subsidy for `height`, to `<pubkey> OP_CHECKSIG` when a key is supplied and
/// to `OP_TRUE` otherwise.
pub fn create_coinbase(height: u32, pubkey: Option<&PublicKey>) -> Transaction {
    let coinbase_input = TransactionInput {
        prevout: OutPoint::null(),
        script_sig: encode_bytes(&serialize_script_num(height as i64)),
        sequence: SEQUENCE_FINAL,
        witness: Vec::new(),
    };

    let script_pubkey = match pubkey {
        Some(key) => ScriptBuilder::new()
            .push_slice(&key.serialize())
            .push_opcode(OP_CHECKSIG)
            .into_bytes(),
        None => ScriptBuilder::new().push_opcode(OP_TRUE).into_bytes(),
    };

    Transaction {
        version: TX_VERSION,
        inputs: vec![coinbase_input],
        outputs: vec![TransactionOutput {
            value: get_brick_subsidy(height),
            script_pubkey,
        }],
        lock_time: 0,
    }
}

/// CreateBrick: ℍ × 𝒯𝒳 × Option<ℕ> → ℬ
///
/// Regtest difficulty, coinbase as the only transaction, timestamp defaulting
/// to ten minutes from now.
pub fn create_brick(prev_brick_hash: Hash, coinbase: Transaction, timestamp: Option<u32>) -> Brick {
    let timestamp = timestamp.unwrap_or_else(default_timestamp);
    let mut brick = Brick {
        header: BrickHeader {
            version: BRICK_VERSION,
            prev_brick_hash,
            merkle_root: [0u8; 32],
            timestamp,
            bits: REGTEST_BITS,
            nonce: 0,
        },
        transactions: vec![coinbase],
    };
    update_merkle_root(&mut brick);
    brick
}

/// Re-derive the header merkle root from the current transaction list.
/// Must follow any change to the transactions before the brick hash is used.
pub fn update_merkle_root(brick: &mut Brick) {
    brick.header.merkle_root = brick_merkle_root(brick).0;
}

/// AddWitnessCommitment: ℬ × ℍ → ℬ
///
/// Commits to the witness root of the current transaction list: the nonce
/// becomes the coinbase input's witness stack and an `OP_RETURN` output with
/// the commitment is appended to the coinbase, after which the merkle root is
/// recomputed. Changing the coinbase afterwards invalidates the commitment,
/// so this has to be the last structural change.
pub fn add_witness_commitment(mut brick: Brick, nonce: &Hash) -> Result<Brick> {
    if brick.transactions.is_empty() {
        return Err(RelayError::MalformedAssembly(
            "cannot commit to witnesses of a brick without coinbase".to_string(),
        ));
    }

    let commitment = witness_commitment(&witness_merkle_root(&brick), nonce);

    let coinbase = &mut brick.transactions[0];
    let input = coinbase.inputs.first_mut().ok_or_else(|| {
        RelayError::MalformedAssembly("coinbase has no input to carry the witness nonce".to_string())
    })?;
    input.witness = vec![nonce.to_vec()];
    coinbase.outputs.push(TransactionOutput {
        value: 0,
        script_pubkey: witness_commitment_script(&commitment),
    });

    update_merkle_root(&mut brick);
    Ok(brick)
}

/// CreateTransaction: 𝒯𝒳 × ℕ × 𝕊 × ℤ × 𝕊 → 𝒯𝒳
///
/// Spend output `n` of `prev_tx` into a single output. An empty
/// `script_pubkey` makes the output anyone-can-spend.
pub fn create_transaction(
    prev_tx: &Transaction,
    n: u32,
    script_sig: ByteString,
    value: i64,
    script_pubkey: ByteString,
) -> Result<Transaction> {
    if n as usize >= prev_tx.outputs.len() {
        return Err(RelayError::MalformedAssembly(format!(
            "output index {} out of range, transaction has {} outputs",
            n,
            prev_tx.outputs.len()
        )));
    }

    Ok(Transaction {
        version: TX_VERSION,
        inputs: vec![TransactionInput {
            prevout: OutPoint { hash: prev_tx.txid(), index: n },
            script_sig,
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        }],
        outputs: vec![TransactionOutput { value, script_pubkey }],
        lock_time: 0,
    })
}

fn default_timestamp() -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    (now + BRICK_TIME_OFFSET).min(u32::MAX as u64) as u32
}
