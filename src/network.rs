//! Peer protocol messages and their processing by the node

use crate::config::FlowControlConfig;
use crate::constants::*;
use crate::error::{RelayError, Result};
use crate::flow::{Decision, InFlightTracker};
use crate::merkle::brick_merkle_root;
use crate::mining::{create_brick, create_coinbase};
use crate::pow::{check_proof_of_work, solve};
use crate::serialize::hash_to_hex;
use crate::types::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Timestamp of the regtest genesis brick
pub const GENESIS_TIMESTAMP: u32 = 1296688602;

/// Network message types exchanged with a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
    Inv(InvMessage),
    GetData(GetDataMessage),
    Brick(Brick),
    Tx(Transaction),
    Ping(PingMessage),
    Pong(PongMessage),
}

impl NetworkMessage {
    pub fn command(&self) -> &'static str {
        match self {
            NetworkMessage::Inv(_) => "inv",
            NetworkMessage::GetData(_) => "getdata",
            NetworkMessage::Brick(_) => "brick",
            NetworkMessage::Tx(_) => "tx",
            NetworkMessage::Ping(_) => "ping",
            NetworkMessage::Pong(_) => "pong",
        }
    }
}

/// Inventory vector identifying objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryVector {
    pub inv_type: u32,
    pub hash: Hash,
}

impl InventoryVector {
    pub fn brick(hash: Hash) -> Self {
        Self { inv_type: MSG_BRICK, hash }
    }

    pub fn tx(hash: Hash) -> Self {
        Self { inv_type: MSG_TX, hash }
    }

    pub fn is_brick(&self) -> bool {
        self.inv_type == MSG_BRICK
    }
}

/// Inventory message listing available objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvMessage {
    pub inventory: Vec<InventoryVector>,
}

/// GetData message requesting specific objects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDataMessage {
    pub inventory: Vec<InventoryVector>,
}

/// Ping message for connection keepalive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingMessage {
    pub nonce: u64,
}

/// Pong message responding to ping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PongMessage {
    pub nonce: u64,
}

/// Network response to a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkResponse {
    Ok,
    SendMessage(NetworkMessage),
    SendMessages(Vec<NetworkMessage>),
    Reject(String),
}

/// Split an announcement into messages of at most `max_items` entries
pub fn split_inventory(items: Vec<InventoryVector>, max_items: usize) -> Vec<InvMessage> {
    let max_items = max_items.max(1);
    let mut messages = Vec::with_capacity(items.len() / max_items + 1);
    let mut current = Vec::new();
    for item in items {
        current.push(item);
        if current.len() >= max_items {
            messages.push(InvMessage {
                inventory: std::mem::take(&mut current),
            });
        }
    }
    if !current.is_empty() {
        messages.push(InvMessage { inventory: current });
    }
    messages
}

/// Process an incoming message against the peer's tracker and the chain
pub fn process_network_message(
    message: &NetworkMessage,
    tracker: &mut InFlightTracker,
    chain: &mut ChainState,
    config: &FlowControlConfig,
) -> Result<NetworkResponse> {
    match message {
        NetworkMessage::Inv(inv) => process_inv_message(inv, tracker, chain, config),
        NetworkMessage::GetData(getdata) => process_getdata_message(getdata, chain, config),
        NetworkMessage::Brick(brick) => process_brick_message(brick, tracker, chain),
        NetworkMessage::Tx(_) => Ok(NetworkResponse::Ok),
        NetworkMessage::Ping(ping) => Ok(NetworkResponse::SendMessage(NetworkMessage::Pong(
            PongMessage { nonce: ping.nonce },
        ))),
        NetworkMessage::Pong(_) => Ok(NetworkResponse::Ok),
    }
}

/// Process inv message: request announced bricks subject to flow control
fn process_inv_message(
    inv: &InvMessage,
    tracker: &mut InFlightTracker,
    chain: &ChainState,
    config: &FlowControlConfig,
) -> Result<NetworkResponse> {
    if inv.inventory.len() > config.max_inv_size {
        warn!(items = inv.inventory.len(), "rejecting oversized inv");
        return Ok(NetworkResponse::Reject("Too many inventory items".to_string()));
    }

    if chain.in_initial_sync() {
        debug!(items = inv.inventory.len(), "ignoring inv during initial sync");
        return Ok(NetworkResponse::Ok);
    }

    let mut wanted = Vec::new();
    for item in inv.inventory.iter().filter(|item| item.is_brick()) {
        if chain.has_brick(&item.hash) {
            continue;
        }
        if tracker.offer(item.hash) == Decision::Request {
            wanted.push(InventoryVector::brick(item.hash));
        }
    }

    debug!(
        announced = inv.inventory.len(),
        requested = wanted.len(),
        in_flight = tracker.in_flight_count(),
        "processed inv"
    );

    if wanted.is_empty() {
        return Ok(NetworkResponse::Ok);
    }

    let messages: Vec<NetworkMessage> = split_inventory(wanted, config.max_inv_size)
        .into_iter()
        .map(|batch| {
            NetworkMessage::GetData(GetDataMessage {
                inventory: batch.inventory,
            })
        })
        .collect();
    Ok(NetworkResponse::SendMessages(messages))
}

/// Process getdata message: serve bricks we have
fn process_getdata_message(
    getdata: &GetDataMessage,
    chain: &ChainState,
    config: &FlowControlConfig,
) -> Result<NetworkResponse> {
    if getdata.inventory.len() > config.max_inv_size {
        return Ok(NetworkResponse::Reject("Too many getdata items".to_string()));
    }

    let responses = getdata
        .inventory
        .iter()
        .filter(|item| item.is_brick())
        .filter_map(|item| chain.get_brick(&item.hash))
        .map(|brick| NetworkMessage::Brick(brick.clone()))
        .collect();
    Ok(NetworkResponse::SendMessages(responses))
}

/// Process brick message: settle the outstanding request, then try to connect
fn process_brick_message(
    brick: &Brick,
    tracker: &mut InFlightTracker,
    chain: &mut ChainState,
) -> Result<NetworkResponse> {
    let hash = brick.hash();
    let was_requested = tracker.on_delivered(&hash);
    debug!(hash = %hash_to_hex(&hash), was_requested, "received brick");

    match chain.accept_brick(brick.clone()) {
        Ok(()) => Ok(NetworkResponse::Ok),
        Err(e) => Ok(NetworkResponse::Reject(e.to_string())),
    }
}

/// Chain state of the node under test
#[derive(Debug, Clone)]
pub struct ChainState {
    bricks: HashMap<Hash, Brick>,
    heights: HashMap<Hash, u32>,
    tip: Hash,
}

impl ChainState {
    /// Chain holding only a solved regtest genesis brick
    pub fn new() -> Result<Self> {
        let mut genesis = create_brick([0u8; 32], create_coinbase(0, None), Some(GENESIS_TIMESTAMP));
        solve(&mut genesis)?;
        let tip = genesis.hash();

        let mut bricks = HashMap::new();
        let mut heights = HashMap::new();
        bricks.insert(tip, genesis);
        heights.insert(tip, 0);
        Ok(Self { bricks, heights, tip })
    }

    pub fn tip(&self) -> Hash {
        self.tip
    }

    pub fn height(&self) -> u32 {
        self.heights.get(&self.tip).copied().unwrap_or(0)
    }

    /// The node leaves initial sync once it has any brick beyond genesis
    pub fn in_initial_sync(&self) -> bool {
        self.height() == 0
    }

    pub fn has_brick(&self, hash: &Hash) -> bool {
        self.bricks.contains_key(hash)
    }

    pub fn get_brick(&self, hash: &Hash) -> Option<&Brick> {
        self.bricks.get(hash)
    }

    /// Store a brick whose parent is known. A brick extending the tip
    /// becomes the new tip.
    pub fn accept_brick(&mut self, brick: Brick) -> Result<()> {
        let hash = brick.hash();
        if self.bricks.contains_key(&hash) {
            return Ok(());
        }
        if brick.transactions.is_empty() {
            return Err(RelayError::RejectedBrick("brick has no transactions".to_string()));
        }
        if brick_merkle_root(&brick).0 != brick.header.merkle_root {
            return Err(RelayError::RejectedBrick("bad merkle root".to_string()));
        }
        if !check_proof_of_work(&brick.header)? {
            return Err(RelayError::RejectedBrick("high hash".to_string()));
        }
        let parent_height = match self.heights.get(&brick.header.prev_brick_hash) {
            Some(height) => *height,
            None => return Err(RelayError::RejectedBrick("unknown parent".to_string())),
        };

        let height = parent_height + 1;
        let extends_tip = brick.header.prev_brick_hash == self.tip;
        self.bricks.insert(hash, brick);
        self.heights.insert(hash, height);
        if extends_tip {
            self.tip = hash;
        }
        Ok(())
    }

    /// Mine `count` bricks on the tip, returning their hashes in order
    pub fn generate(&mut self, count: u32) -> Result<Vec<Hash>> {
        let mut hashes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let height = self.height() + 1;
            let mut brick = create_brick(self.tip, create_coinbase(height, None), None);
            solve(&mut brick)?;
            let hash = brick.hash();
            self.bricks.insert(hash, brick);
            self.heights.insert(hash, height);
            self.tip = hash;
            hashes.push(hash);
        }
        info!(count, height = self.height(), tip = %hash_to_hex(&self.tip), "generated bricks");
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (InFlightTracker, ChainState, FlowControlConfig) {
        let config = FlowControlConfig::default();
        let mut chain = ChainState::new().unwrap();
        chain.generate(1).unwrap();
        (InFlightTracker::new(config.max_in_flight), chain, config)
    }

    fn inv_of(hashes: &[Hash]) -> NetworkMessage {
        NetworkMessage::Inv(InvMessage {
            inventory: hashes.iter().map(|h| InventoryVector::brick(*h)).collect(),
        })
    }

    #[test]
    fn test_split_inventory() {
        let items: Vec<_> = (0..5u8).map(|i| InventoryVector::brick([i; 32])).collect();
        let messages = split_inventory(items, 2);
        let sizes: Vec<_> = messages.iter().map(|m| m.inventory.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(split_inventory(vec![], 2).is_empty());
    }

    #[test]
    fn test_inv_ignored_during_initial_sync() {
        let config = FlowControlConfig::default();
        let mut chain = ChainState::new().unwrap();
        let mut tracker = InFlightTracker::new(config.max_in_flight);
        let response =
            process_network_message(&inv_of(&[[1; 32]]), &mut tracker, &mut chain, &config).unwrap();
        assert_eq!(response, NetworkResponse::Ok);
        assert_eq!(tracker.in_flight_count(), 0);
    }

    #[test]
    fn test_inv_requests_unknown_bricks() {
        let (mut tracker, mut chain, config) = setup();
        let response =
            process_network_message(&inv_of(&[[1; 32], [2; 32], [1; 32]]), &mut tracker, &mut chain, &config)
                .unwrap();
        match response {
            NetworkResponse::SendMessages(messages) => {
                assert_eq!(messages.len(), 1);
                match &messages[0] {
                    NetworkMessage::GetData(getdata) => assert_eq!(getdata.inventory.len(), 2),
                    other => panic!("unexpected message {other:?}"),
                }
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_inv_skips_known_bricks_and_transactions() {
        let (mut tracker, mut chain, config) = setup();
        let tip = chain.tip();
        let message = NetworkMessage::Inv(InvMessage {
            inventory: vec![InventoryVector::brick(tip), InventoryVector::tx([3; 32])],
        });
        let response = process_network_message(&message, &mut tracker, &mut chain, &config).unwrap();
        assert_eq!(response, NetworkResponse::Ok);
    }

    #[test]
    fn test_oversized_inv_rejected() {
        let (mut tracker, mut chain, mut config) = setup();
        config.max_inv_size = 2;
        let response =
            process_network_message(&inv_of(&[[1; 32], [2; 32], [3; 32]]), &mut tracker, &mut chain, &config)
                .unwrap();
        assert!(matches!(response, NetworkResponse::Reject(_)));
        assert_eq!(tracker.in_flight_count(), 0);
    }

    #[test]
    fn test_ping_answered_with_pong() {
        let (mut tracker, mut chain, config) = setup();
        let response = process_network_message(
            &NetworkMessage::Ping(PingMessage { nonce: 42 }),
            &mut tracker,
            &mut chain,
            &config,
        )
        .unwrap();
        assert_eq!(
            response,
            NetworkResponse::SendMessage(NetworkMessage::Pong(PongMessage { nonce: 42 }))
        );
    }

    #[test]
    fn test_brick_delivery_settles_request() {
        let (mut tracker, mut chain, config) = setup();
        let mut brick = create_brick(chain.tip(), create_coinbase(2, None), None);
        solve(&mut brick).unwrap();
        let hash = brick.hash();

        process_network_message(&inv_of(&[hash]), &mut tracker, &mut chain, &config).unwrap();
        assert!(tracker.is_in_flight(&hash));

        let response =
            process_network_message(&NetworkMessage::Brick(brick), &mut tracker, &mut chain, &config).unwrap();
        assert_eq!(response, NetworkResponse::Ok);
        assert!(!tracker.is_in_flight(&hash));
        assert_eq!(chain.tip(), hash);
        assert_eq!(chain.height(), 2);
    }

    #[test]
    fn test_getdata_serves_known_bricks() {
        let (mut tracker, mut chain, config) = setup();
        let tip = chain.tip();
        let message = NetworkMessage::GetData(GetDataMessage {
            inventory: vec![InventoryVector::brick(tip), InventoryVector::brick([9; 32])],
        });
        match process_network_message(&message, &mut tracker, &mut chain, &config).unwrap() {
            NetworkResponse::SendMessages(messages) => assert_eq!(messages.len(), 1),
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_accept_brick_rejects_unknown_parent() {
        let (_, mut chain, _) = setup();
        let mut brick = create_brick([0xee; 32], create_coinbase(9, None), None);
        solve(&mut brick).unwrap();
        assert!(matches!(
            chain.accept_brick(brick),
            Err(RelayError::RejectedBrick(reason)) if reason == "unknown parent"
        ));
    }

    #[test]
    fn test_delivered_brick_with_bad_merkle_root_rejected() {
        let (mut tracker, mut chain, config) = setup();
        let mut brick = create_brick(chain.tip(), create_coinbase(2, None), None);
        brick.header.merkle_root = [0x55; 32];
        solve(&mut brick).unwrap();
        let hash = brick.hash();
        process_network_message(&inv_of(&[hash]), &mut tracker, &mut chain, &config).unwrap();

        let response =
            process_network_message(&NetworkMessage::Brick(brick), &mut tracker, &mut chain, &config).unwrap();
        assert_eq!(
            response,
            NetworkResponse::Reject("Brick rejected: bad merkle root".to_string())
        );
        assert!(!tracker.is_in_flight(&hash));
        assert!(!chain.has_brick(&hash));
    }

    #[test]
    fn test_generate_advances_height() {
        let mut chain = ChainState::new().unwrap();
        assert!(chain.in_initial_sync());
        let hashes = chain.generate(3).unwrap();
        assert_eq!(hashes.len(), 3);
        assert_eq!(chain.height(), 3);
        assert_eq!(chain.tip(), hashes[2]);
        assert!(!chain.in_initial_sync());
    }
}
