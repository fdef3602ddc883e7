//! Segregated witness commitment encoding

use crate::constants::WITNESS_COMMITMENT_HEADER;
use crate::merkle::witness_merkle_root;
use crate::script::{ScriptBuilder, OP_RETURN};
use crate::serialize::hash256;
use crate::types::*;

/// Length of a commitment script: OP_RETURN, push(36), header, commitment
pub const WITNESS_COMMITMENT_SCRIPT_LEN: usize = 38;

/// Commitment = Hash256(WitnessRoot ‖ Nonce)
pub fn witness_commitment(witness_root: &Hash, nonce: &Hash) -> Hash {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(witness_root);
    data[32..].copy_from_slice(nonce);
    hash256(&data)
}

/// Unspendable output script carrying the commitment
pub fn witness_commitment_script(commitment: &Hash) -> ByteString {
    let mut payload = Vec::with_capacity(36);
    payload.extend_from_slice(&WITNESS_COMMITMENT_HEADER);
    payload.extend_from_slice(commitment);
    ScriptBuilder::new()
        .push_opcode(OP_RETURN)
        .push_slice(&payload)
        .into_bytes()
}

fn commitment_from_script(script: &[u8]) -> Option<Hash> {
    if script.len() < WITNESS_COMMITMENT_SCRIPT_LEN
        || script[0] != OP_RETURN
        || script[1] != 0x24
        || script[2..6] != WITNESS_COMMITMENT_HEADER
    {
        return None;
    }
    let mut commitment = [0u8; 32];
    commitment.copy_from_slice(&script[6..38]);
    Some(commitment)
}

/// Commitment carried by the last matching output of the coinbase
pub fn extract_witness_commitment(coinbase: &Transaction) -> Option<Hash> {
    coinbase
        .outputs
        .iter()
        .rev()
        .find_map(|output| commitment_from_script(&output.script_pubkey))
}

/// Check the brick's witness commitment against its transactions.
///
/// Without a commitment no transaction may carry witness data. With one, the
/// coinbase witness must be a single 32-byte nonce and the commitment must
/// equal Hash256(WitnessRoot ‖ nonce).
pub fn validate_witness_commitment(brick: &Brick) -> bool {
    let coinbase = match brick.coinbase() {
        Some(coinbase) => coinbase,
        None => return false,
    };

    let commitment = match extract_witness_commitment(coinbase) {
        Some(commitment) => commitment,
        None => return !brick.transactions.iter().any(Transaction::has_witness),
    };

    let nonce = match coinbase.inputs.first().map(|input| input.witness.as_slice()) {
        Some([nonce]) if nonce.len() == 32 => nonce,
        _ => return false,
    };
    let mut nonce_hash = [0u8; 32];
    nonce_hash.copy_from_slice(nonce);

    commitment == witness_commitment(&witness_merkle_root(brick), &nonce_hash)
}
