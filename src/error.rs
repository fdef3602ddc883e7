//! Error types for brick relay and assembly

use crate::serialize::hash_to_hex;
use crate::types::Hash;
use thiserror::Error;

/// Every variant is fatal to the scenario that produced it.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("brick {} requested {count} times while outstanding", hash_to_hex(.hash))]
    DuplicateRequestViolation { hash: Hash, count: u32 },

    #[error("too many bricks ({requested}) requested, cap is {cap}")]
    InFlightCapViolation { requested: usize, cap: usize },

    #[error("peer disconnected unexpectedly with {outstanding} requests outstanding")]
    UnexpectedDisconnect { outstanding: usize },

    #[error("Malformed assembly: {0}")]
    MalformedAssembly(String),

    #[error("Brick rejected: {0}")]
    RejectedBrick(String),

    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;
