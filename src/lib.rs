//! # Brick-Relay
//!
//! Brick download flow control and the brick/transaction construction toolkit
//! used to exercise it.
//!
//! A node requests bricks announced to it by a peer, but never asks for the
//! same brick twice while a request is outstanding and never keeps more than
//! `max_in_flight` requests open per peer. The assembly side builds regtest
//! coinbases, bricks, spending transactions and witness commitments, counts
//! legacy signature operations and computes merkle roots.
//!
//! ## Layout
//!
//! - Encoding and hashing: `serialize`, `merkle`, `script`
//! - Assembly: `mining`, `segwit`, `pow`, `economic`, `sigops`, `compact`
//! - Relay: `flow` (per-peer ledger), `network` (message handling and chain
//!   state), `node` (tokio peer tasks), `harness` (driver side)
//!
//! ## Usage
//!
//! ```rust
//! use brick_relay::BrickRelay;
//!
//! let relay = BrickRelay::new();
//! let coinbase = relay.create_coinbase(1, None);
//! let brick = relay.create_brick([0; 32], coinbase, None);
//! let brick = relay.add_witness_commitment(brick, &[0; 32]).unwrap();
//! assert_eq!(brick.transactions[0].outputs.len(), 2);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod config;
pub mod serialize;
pub mod merkle;
pub mod script;
pub mod sigops;
pub mod economic;
pub mod pow;
pub mod segwit;
pub mod mining;
pub mod compact;
pub mod flow;
pub mod network;
pub mod node;
pub mod harness;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use config::{FlowControlConfig, SettleMode};
pub use error::{RelayError, Result};
pub use flow::{Decision, InFlightTracker, SkipReason};

use secp256k1::PublicKey;

/// Entry point bundling the assembly operations
///
/// # Examples
///
/// ```
/// use brick_relay::BrickRelay;
/// use brick_relay::types::*;
///
/// let relay = BrickRelay::new();
/// let coinbase = relay.create_coinbase(1, None);
/// let spend = relay
///     .create_transaction(&coinbase, 0, vec![], 1000, vec![0x51])
///     .unwrap();
/// assert_eq!(spend.inputs[0].prevout, OutPoint { hash: coinbase.txid(), index: 0 });
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BrickRelay;

impl BrickRelay {
    pub fn new() -> Self {
        Self
    }

    /// Coinbase for `height`, paying to `pubkey` or to `OP_TRUE`
    ///
    /// # Examples
    ///
    /// ```
    /// use brick_relay::BrickRelay;
    ///
    /// let relay = BrickRelay::new();
    /// let coinbase = relay.create_coinbase(150, None);
    /// assert!(coinbase.is_coinbase());
    /// assert_eq!(coinbase.outputs[0].value, 2_500_000_000);
    /// ```
    pub fn create_coinbase(&self, height: u32, pubkey: Option<&PublicKey>) -> Transaction {
        mining::create_coinbase(height, pubkey)
    }

    pub fn create_brick(&self, prev_brick_hash: Hash, coinbase: Transaction, timestamp: Option<u32>) -> Brick {
        mining::create_brick(prev_brick_hash, coinbase, timestamp)
    }

    pub fn add_witness_commitment(&self, brick: Brick, nonce: &Hash) -> Result<Brick> {
        mining::add_witness_commitment(brick, nonce)
    }

    pub fn create_transaction(
        &self,
        prev_tx: &Transaction,
        n: u32,
        script_sig: ByteString,
        value: i64,
        script_pubkey: ByteString,
    ) -> Result<Transaction> {
        mining::create_transaction(prev_tx, n, script_sig, value, script_pubkey)
    }

    /// Merkle root over transaction hashes
    ///
    /// # Examples
    ///
    /// ```
    /// use brick_relay::BrickRelay;
    ///
    /// let relay = BrickRelay::new();
    /// assert_eq!(relay.merkle_root(&[]), [0u8; 32]);
    /// assert_eq!(relay.merkle_root(&[[7u8; 32]]), [7u8; 32]);
    /// ```
    pub fn merkle_root(&self, hashes: &[Hash]) -> Hash {
        merkle::merkle_root(hashes)
    }

    pub fn legacy_sigop_count(&self, tx: &Transaction, accurate: bool) -> u64 {
        sigops::get_legacy_sigop_count_tx(tx, accurate)
    }

    pub fn legacy_sigop_count_brick(&self, brick: &Brick, accurate: bool) -> u64 {
        sigops::get_legacy_sigop_count_brick(brick, accurate)
    }

    pub fn get_brick_subsidy(&self, height: u32) -> i64 {
        economic::get_brick_subsidy(height)
    }

    pub fn check_proof_of_work(&self, header: &BrickHeader) -> Result<bool> {
        pow::check_proof_of_work(header)
    }

    /// Grind the nonce of `brick` until it meets its target
    pub fn solve(&self, brick: &mut Brick) -> Result<()> {
        pow::solve(brick)
    }
}
