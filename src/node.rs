//! The node under test: chain state, per-peer sessions and the serving loop
//!
//! Each connected peer gets a `PeerSession` owning its in-flight tracker
//! behind a single lock. The serving task (network context) and the
//! controlling code (control context) both go through that lock; it is never
//! held across an await point.

use crate::config::FlowControlConfig;
use crate::error::Result;
use crate::flow::InFlightTracker;
use crate::network::{process_network_message, ChainState, NetworkMessage, NetworkResponse};
use crate::types::Hash;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Flow-control state of one peer connection
#[derive(Debug)]
pub struct PeerSession {
    id: u64,
    tracker: Mutex<InFlightTracker>,
}

impl PeerSession {
    pub fn new(id: u64, max_in_flight: usize) -> Self {
        Self {
            id,
            tracker: Mutex::new(InFlightTracker::new(max_in_flight)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn in_flight_count(&self) -> usize {
        self.tracker.lock().in_flight_count()
    }

    pub fn is_in_flight(&self, hash: &Hash) -> bool {
        self.tracker.lock().is_in_flight(hash)
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.tracker.lock().check_invariants()
    }
}

/// Both ends of an in-process peer connection, as seen by the driver
pub struct PeerLink {
    pub session: Arc<PeerSession>,
    pub to_node: mpsc::UnboundedSender<NetworkMessage>,
    pub from_node: mpsc::UnboundedReceiver<NetworkMessage>,
    pub task: JoinHandle<Result<()>>,
}

pub struct RelayNode {
    config: FlowControlConfig,
    chain: Mutex<ChainState>,
    next_peer_id: AtomicU64,
}

impl RelayNode {
    pub fn new(config: FlowControlConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            chain: Mutex::new(ChainState::new()?),
            next_peer_id: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &FlowControlConfig {
        &self.config
    }

    /// Control operation: advance the chain by `count` bricks
    pub fn generate(&self, count: u32) -> Result<Vec<Hash>> {
        self.chain.lock().generate(count)
    }

    pub fn height(&self) -> u32 {
        self.chain.lock().height()
    }

    pub fn tip(&self) -> Hash {
        self.chain.lock().tip()
    }

    /// Open a peer connection served by a new task. Must be called from
    /// within a tokio runtime.
    pub fn connect(self: &Arc<Self>) -> PeerLink {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(PeerSession::new(id, self.config.max_in_flight));
        let (to_node, inbound) = mpsc::unbounded_channel();
        let (outbound, from_node) = mpsc::unbounded_channel();

        let task = tokio::spawn(serve_peer(
            Arc::clone(self),
            Arc::clone(&session),
            inbound,
            outbound,
        ));
        info!(peer = id, "peer connected");

        PeerLink {
            session,
            to_node,
            from_node,
            task,
        }
    }

    fn handle_message(&self, session: &PeerSession, message: &NetworkMessage) -> Result<NetworkResponse> {
        let mut chain = self.chain.lock();
        let mut tracker = session.tracker.lock();
        process_network_message(message, &mut tracker, &mut chain, &self.config)
    }
}

/// Serve one peer until either side closes the connection. Outstanding
/// requests are dropped on exit.
async fn serve_peer(
    node: Arc<RelayNode>,
    session: Arc<PeerSession>,
    mut inbound: mpsc::UnboundedReceiver<NetworkMessage>,
    outbound: mpsc::UnboundedSender<NetworkMessage>,
) -> Result<()> {
    let peer = session.id();
    let result = 'serve: loop {
        let message = match inbound.recv().await {
            Some(message) => message,
            None => break 'serve Ok(()),
        };
        debug!(peer, command = message.command(), "received message");

        let outgoing = match node.handle_message(&session, &message) {
            Ok(NetworkResponse::Ok) => Vec::new(),
            Ok(NetworkResponse::SendMessage(reply)) => vec![reply],
            Ok(NetworkResponse::SendMessages(replies)) => replies,
            Ok(NetworkResponse::Reject(reason)) => {
                warn!(peer, command = message.command(), %reason, "rejected message");
                Vec::new()
            }
            Err(e) => break 'serve Err(e),
        };

        for reply in outgoing {
            if outbound.send(reply).is_err() {
                debug!(peer, "driver side closed");
                break 'serve Ok(());
            }
        }
    };

    let dropped = session.tracker.lock().on_disconnect();
    info!(peer, dropped = dropped.len(), "peer disconnected");
    result
}
