//! Protocol and flow-control constants

/// Maximum number of bricks requested from a single peer at once
pub const MAX_IN_FLIGHT: usize = 128;

/// Maximum number of items carried by one inventory or getdata message
pub const MAX_INV_SIZE: usize = 50_000;

/// Inventory type: transaction
pub const MSG_TX: u32 = 1;

/// Inventory type: brick
pub const MSG_BRICK: u32 = 2;

/// Regtest compact difficulty target
pub const REGTEST_BITS: u32 = 0x207fffff;

/// Default brick time offset from now, in seconds
pub const BRICK_TIME_OFFSET: u64 = 600;

/// Brick header version used by assembled bricks
pub const BRICK_VERSION: i32 = 1;

/// Transaction version used by assembled transactions
pub const TX_VERSION: i32 = 1;

/// Marker prefixing the witness commitment in the coinbase commitment output
pub const WITNESS_COMMITMENT_HEADER: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

/// Satoshis per coin
pub const COIN: i64 = 100_000_000;

/// Initial brick subsidy: 50 coins
pub const INITIAL_SUBSIDY: i64 = 50 * COIN;

/// Regtest halving interval
pub const HALVING_INTERVAL: u32 = 150;

/// Sequence number for final inputs
pub const SEQUENCE_FINAL: u32 = 0xffffffff;

/// Upper bound on keys in a multisig, charged when the count is unknown
pub const MAX_PUBKEYS_PER_MULTISIG: u32 = 20;
