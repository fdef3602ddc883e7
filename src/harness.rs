//! Driver-side harness for exercising a node's brick request flow control
//!
//! `NodeConn` owns the driver end of a peer connection. A reader task
//! dispatches every message from the node to a `NodeConnCallbacks` handler;
//! `MaxBricksInFlightTest` floods the node with random brick announcements
//! and checks that the requests it gets back respect the in-flight cap and
//! never repeat a hash.

use crate::config::{FlowControlConfig, SettleMode};
use crate::error::{RelayError, Result};
use crate::network::*;
use crate::node::{PeerLink, PeerSession, RelayNode};
use crate::types::*;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handler for messages arriving from the node, one method per event kind.
/// Methods run on the reader task and must not block.
pub trait NodeConnCallbacks: Send + Sync {
    fn on_getdata(&self, _message: &GetDataMessage) {}

    fn on_inv(&self, _message: &InvMessage) {}

    fn on_brick(&self, _brick: &Brick) {}

    fn on_pong(&self, _message: &PongMessage) {}

    /// The node closed the connection. An error here is reported by
    /// `NodeConn::disconnect`.
    fn on_close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct PingWaiters {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<()>>,
}

/// Driver end of a peer connection
pub struct NodeConn {
    session: Arc<PeerSession>,
    to_node: Option<mpsc::UnboundedSender<NetworkMessage>>,
    pings: Arc<Mutex<PingWaiters>>,
    node_task: JoinHandle<Result<()>>,
    reader: JoinHandle<Result<()>>,
}

impl NodeConn {
    /// Take over a freshly opened link and start dispatching to `callbacks`.
    /// Must be called from within a tokio runtime.
    pub fn new(link: PeerLink, callbacks: Arc<dyn NodeConnCallbacks>) -> Self {
        let pings = Arc::new(Mutex::new(PingWaiters::default()));
        let reader = tokio::spawn(read_loop(link.from_node, callbacks, Arc::clone(&pings)));
        Self {
            session: link.session,
            to_node: Some(link.to_node),
            pings,
            node_task: link.task,
            reader,
        }
    }

    /// Node-side session of this connection
    pub fn session(&self) -> &Arc<PeerSession> {
        &self.session
    }

    pub fn send_message(&self, message: NetworkMessage) -> Result<()> {
        let sender = self
            .to_node
            .as_ref()
            .ok_or_else(|| RelayError::Transport("connection already closed".to_string()))?;
        sender.send(message).map_err(|_| RelayError::UnexpectedDisconnect {
            outstanding: self.session.in_flight_count(),
        })
    }

    /// Wait until the node has processed everything sent so far: the node
    /// answers in order, so the pong arrives after every earlier reply.
    pub async fn sync_with_ping(&self, nonce: u64, timeout: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pings = self.pings.lock();
            if pings.closed {
                return Err(RelayError::UnexpectedDisconnect {
                    outstanding: self.session.in_flight_count(),
                });
            }
            pings.waiters.insert(nonce, tx);
        }
        self.send_message(NetworkMessage::Ping(PingMessage { nonce }))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(RelayError::UnexpectedDisconnect {
                outstanding: self.session.in_flight_count(),
            }),
            Err(_) => {
                self.pings.lock().waiters.remove(&nonce);
                Err(RelayError::Transport(format!(
                    "no pong for nonce {nonce} within {timeout:?}"
                )))
            }
        }
    }

    /// Close the connection and wait for both sides to wind down
    pub async fn disconnect(mut self) -> Result<()> {
        self.to_node.take();

        let node_result = (&mut self.node_task)
            .await
            .map_err(|e| RelayError::Transport(format!("peer task failed: {e}")))?;
        let reader_result = (&mut self.reader)
            .await
            .map_err(|e| RelayError::Transport(format!("reader task failed: {e}")))?;
        node_result?;
        reader_result
    }
}

async fn read_loop(
    mut from_node: mpsc::UnboundedReceiver<NetworkMessage>,
    callbacks: Arc<dyn NodeConnCallbacks>,
    pings: Arc<Mutex<PingWaiters>>,
) -> Result<()> {
    while let Some(message) = from_node.recv().await {
        match &message {
            NetworkMessage::GetData(getdata) => callbacks.on_getdata(getdata),
            NetworkMessage::Inv(inv) => callbacks.on_inv(inv),
            NetworkMessage::Brick(brick) => callbacks.on_brick(brick),
            NetworkMessage::Pong(pong) => {
                callbacks.on_pong(pong);
                if let Some(waiter) = pings.lock().waiters.remove(&pong.nonce) {
                    let _ = waiter.send(());
                }
            }
            other => debug!(command = other.command(), "ignoring message from node"),
        }
    }

    {
        let mut pings = pings.lock();
        pings.closed = true;
        pings.waiters.clear();
    }
    callbacks.on_close()
}

#[derive(Default)]
struct RecorderState {
    brick_req_counts: HashMap<Hash, u32>,
    disconnect_okay: bool,
}

/// Records every brick the node requests, across all rounds
#[derive(Default)]
pub struct RequestRecorder {
    state: Mutex<RecorderState>,
}

impl RequestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the upcoming close as expected
    pub fn allow_disconnect(&self) {
        self.state.lock().disconnect_okay = true;
    }

    pub fn request_count(&self, hash: &Hash) -> u32 {
        self.state.lock().brick_req_counts.get(hash).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.state
            .lock()
            .brick_req_counts
            .values()
            .map(|count| *count as usize)
            .sum()
    }

    /// Check the recorded requests: no hash twice, no more than `cap` overall.
    /// Returns the total number of requests.
    pub fn verify(&self, cap: usize) -> Result<usize> {
        let state = self.state.lock();
        let mut total = 0usize;
        for (hash, count) in &state.brick_req_counts {
            total += *count as usize;
            if *count > 1 {
                return Err(RelayError::DuplicateRequestViolation {
                    hash: *hash,
                    count: *count,
                });
            }
        }
        if total > cap {
            return Err(RelayError::InFlightCapViolation {
                requested: total,
                cap,
            });
        }
        Ok(total)
    }
}

impl NodeConnCallbacks for RequestRecorder {
    fn on_getdata(&self, message: &GetDataMessage) {
        debug!(items = message.inventory.len(), "got getdata");
        let mut state = self.state.lock();
        for item in message.inventory.iter().filter(|item| item.is_brick()) {
            *state.brick_req_counts.entry(item.hash).or_insert(0) += 1;
        }
    }

    fn on_close(&self) -> Result<()> {
        let state = self.state.lock();
        if state.disconnect_okay {
            return Ok(());
        }
        let outstanding = state.brick_req_counts.values().map(|c| *c as usize).sum();
        warn!(outstanding, "node closed the connection unexpectedly");
        Err(RelayError::UnexpectedDisconnect { outstanding })
    }
}

/// Outcome of one announcement round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    pub round: usize,
    pub announced: usize,
    /// Requests recorded so far, cumulative over rounds
    pub total_requests: usize,
    pub in_flight: usize,
}

/// Announces rounds of random brick hashes and checks the node's requests
pub struct MaxBricksInFlightTest<R> {
    config: FlowControlConfig,
    rng: R,
}

impl<R: Rng> MaxBricksInFlightTest<R> {
    pub fn new(config: FlowControlConfig, rng: R) -> Self {
        Self { config, rng }
    }

    pub async fn run(&mut self, node: &Arc<RelayNode>) -> Result<Vec<RoundReport>> {
        let recorder = Arc::new(RequestRecorder::new());
        let conn = NodeConn::new(node.connect(), recorder.clone());

        node.generate(1)?;

        let rounds = self.config.rounds.clone();
        let mut reports = Vec::with_capacity(rounds.len());
        for (round, &count) in rounds.iter().enumerate() {
            let announced: Vec<InventoryVector> = (0..count)
                .map(|_| InventoryVector::brick(self.rng.gen()))
                .collect();
            for inv in split_inventory(announced, self.config.max_inv_size) {
                conn.send_message(NetworkMessage::Inv(inv))?;
            }

            self.settle(&conn).await?;

            let total_requests = match recorder.verify(self.config.max_in_flight) {
                Ok(total) => total,
                Err(e) => {
                    warn!(round, error = %e, "round failed");
                    return Err(e);
                }
            };
            info!(round, total_requests, "round succeeded");
            reports.push(RoundReport {
                round,
                announced: count,
                total_requests,
                in_flight: conn.session().in_flight_count(),
            });
        }

        recorder.allow_disconnect();
        conn.disconnect().await?;
        Ok(reports)
    }

    async fn settle(&mut self, conn: &NodeConn) -> Result<()> {
        match self.config.settle {
            SettleMode::Delay => {
                tokio::time::sleep(self.config.settle_delay()).await;
                Ok(())
            }
            SettleMode::Ping => {
                let nonce = self.rng.gen();
                conn.sync_with_ping(nonce, self.config.ping_timeout()).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn getdata(hashes: &[Hash]) -> GetDataMessage {
        GetDataMessage {
            inventory: hashes.iter().map(|h| InventoryVector::brick(*h)).collect(),
        }
    }

    #[test]
    fn test_recorder_counts_requests() {
        let recorder = RequestRecorder::new();
        recorder.on_getdata(&getdata(&[[1; 32], [2; 32]]));
        assert_eq!(recorder.request_count(&[1; 32]), 1);
        assert_eq!(recorder.total_requests(), 2);
        assert_eq!(recorder.verify(2).unwrap(), 2);
    }

    #[test]
    fn test_recorder_detects_duplicate() {
        let recorder = RequestRecorder::new();
        recorder.on_getdata(&getdata(&[[1; 32]]));
        recorder.on_getdata(&getdata(&[[1; 32]]));
        match recorder.verify(10) {
            Err(RelayError::DuplicateRequestViolation { hash, count }) => {
                assert_eq!(hash, [1; 32]);
                assert_eq!(count, 2);
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_recorder_detects_cap_violation() {
        let recorder = RequestRecorder::new();
        recorder.on_getdata(&getdata(&[[1; 32], [2; 32], [3; 32]]));
        assert!(matches!(
            recorder.verify(2),
            Err(RelayError::InFlightCapViolation { requested: 3, cap: 2 })
        ));
    }

    #[test]
    fn test_recorder_close_requires_authorization() {
        let recorder = RequestRecorder::new();
        assert!(matches!(
            recorder.on_close(),
            Err(RelayError::UnexpectedDisconnect { .. })
        ));
        recorder.allow_disconnect();
        assert!(recorder.on_close().is_ok());
    }
}
