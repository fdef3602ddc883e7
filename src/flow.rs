//! Per-peer brick request flow control
//!
//! The tracker owns the request ledger of one peer connection: a map from
//! brick hash to request counter. A hash is in flight while its counter is 1.
//! A hash is never requested again while in flight, and the number of hashes
//! in flight never exceeds the configured cap.

use crate::error::{RelayError, Result};
use crate::serialize::hash_to_hex;
use crate::types::Hash;
use std::collections::HashMap;
use tracing::debug;

/// Why an offered hash was not requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Already requested and not yet delivered
    AlreadyInFlight,
    /// The peer already has `max_in_flight` outstanding requests
    CapReached,
}

/// Outcome of offering an announced hash to the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Request,
    Skip(SkipReason),
}

#[derive(Debug, Clone)]
pub struct InFlightTracker {
    ledger: HashMap<Hash, u32>,
    max_in_flight: usize,
}

impl InFlightTracker {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            ledger: HashMap::new(),
            max_in_flight,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Offer a newly announced hash. Requests it (and records it in the
    /// ledger) only if it is not already in flight and the cap has room;
    /// a skipped hash leaves the ledger untouched.
    pub fn offer(&mut self, hash: Hash) -> Decision {
        if self.ledger.contains_key(&hash) {
            debug!(hash = %hash_to_hex(&hash), "skip: already in flight");
            return Decision::Skip(SkipReason::AlreadyInFlight);
        }
        if self.in_flight_count() >= self.max_in_flight {
            debug!(hash = %hash_to_hex(&hash), cap = self.max_in_flight, "skip: in-flight cap reached");
            return Decision::Skip(SkipReason::CapReached);
        }
        self.ledger.insert(hash, 1);
        Decision::Request
    }

    /// Offer a batch in announcement order, returning the hashes to request
    pub fn offer_batch<I>(&mut self, hashes: I) -> Vec<Hash>
    where
        I: IntoIterator<Item = Hash>,
    {
        hashes
            .into_iter()
            .filter(|hash| self.offer(*hash) == Decision::Request)
            .collect()
    }

    /// Data for `hash` arrived. Returns whether it was in flight; unknown
    /// hashes are ignored.
    pub fn on_delivered(&mut self, hash: &Hash) -> bool {
        self.ledger.remove(hash).is_some()
    }

    /// The connection closed: every outstanding request is dropped.
    pub fn on_disconnect(&mut self) -> Vec<Hash> {
        self.ledger.drain().map(|(hash, _)| hash).collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.ledger.values().filter(|count| **count == 1).count()
    }

    pub fn is_in_flight(&self, hash: &Hash) -> bool {
        self.ledger.get(hash) == Some(&1)
    }

    /// Verify the ledger invariants, reporting the first violation found.
    /// `offer` only ever records a counter of 1, so a counter above 1 means
    /// the ledger was corrupted by something other than this tracker's API.
    pub fn check_invariants(&self) -> Result<()> {
        if let Some((hash, count)) = self.ledger.iter().find(|(_, count)| **count > 1) {
            return Err(RelayError::DuplicateRequestViolation {
                hash: *hash,
                count: *count,
            });
        }
        let in_flight = self.in_flight_count();
        if in_flight > self.max_in_flight {
            return Err(RelayError::InFlightCapViolation {
                requested: in_flight,
                cap: self.max_in_flight,
            });
        }
        Ok(())
    }

    #[cfg(test)]
    fn set_counter(&mut self, hash: Hash, count: u32) {
        self.ledger.insert(hash, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn hash(n: u8) -> Hash {
        [n; 32]
    }

    #[test]
    fn test_offer_requests_new_hash() {
        let mut tracker = InFlightTracker::new(4);
        assert_eq!(tracker.offer(hash(1)), Decision::Request);
        assert!(tracker.is_in_flight(&hash(1)));
        assert_eq!(tracker.in_flight_count(), 1);
    }

    #[test]
    fn test_offer_duplicate_skipped() {
        let mut tracker = InFlightTracker::new(4);
        tracker.offer(hash(1));
        assert_eq!(tracker.offer(hash(1)), Decision::Skip(SkipReason::AlreadyInFlight));
        assert_eq!(tracker.in_flight_count(), 1);
    }

    #[test]
    fn test_offer_cap_reached() {
        let mut tracker = InFlightTracker::new(2);
        tracker.offer(hash(1));
        tracker.offer(hash(2));
        assert_eq!(tracker.offer(hash(3)), Decision::Skip(SkipReason::CapReached));
        assert!(!tracker.is_in_flight(&hash(3)));
        assert_eq!(tracker.in_flight_count(), 2);
    }

    #[test]
    fn test_delivery_frees_slot_and_allows_rerequest() {
        let mut tracker = InFlightTracker::new(1);
        tracker.offer(hash(1));
        assert!(tracker.on_delivered(&hash(1)));
        assert_eq!(tracker.in_flight_count(), 0);
        assert_eq!(tracker.offer(hash(1)), Decision::Request);
    }

    #[test]
    fn test_delivery_of_unknown_hash_is_noop() {
        let mut tracker = InFlightTracker::new(1);
        tracker.offer(hash(1));
        assert!(!tracker.on_delivered(&hash(2)));
        assert!(!tracker.on_delivered(&hash(2)));
        assert_eq!(tracker.in_flight_count(), 1);
    }

    #[test]
    fn test_disconnect_clears_ledger() {
        let mut tracker = InFlightTracker::new(8);
        tracker.offer_batch([hash(1), hash(2), hash(3)]);
        let mut dropped = tracker.on_disconnect();
        dropped.sort();
        assert_eq!(dropped, vec![hash(1), hash(2), hash(3)]);
        assert_eq!(tracker.in_flight_count(), 0);
    }

    #[test]
    fn test_batch_preserves_announcement_order() {
        let mut tracker = InFlightTracker::new(2);
        let requested = tracker.offer_batch([hash(3), hash(1), hash(3), hash(2)]);
        assert_eq!(requested, vec![hash(3), hash(1)]);
    }

    #[test]
    fn test_invariants_catch_corrupted_counter() {
        let mut tracker = InFlightTracker::new(4);
        tracker.offer(hash(1));
        tracker.set_counter(hash(1), 2);
        match tracker.check_invariants() {
            Err(RelayError::DuplicateRequestViolation { hash: h, count }) => {
                assert_eq!(h, hash(1));
                assert_eq!(count, 2);
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(!tracker.is_in_flight(&hash(1)));
    }

    #[test]
    fn test_invariants_hold_under_random_traffic() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut tracker = InFlightTracker::new(16);
        let pool: Vec<Hash> = (0..64).map(|_| rng.gen()).collect();

        for _ in 0..5_000 {
            let hash = pool[rng.gen_range(0..pool.len())];
            if rng.gen_bool(0.7) {
                let was_in_flight = tracker.is_in_flight(&hash);
                let decision = tracker.offer(hash);
                if was_in_flight {
                    assert_ne!(decision, Decision::Request);
                }
            } else {
                tracker.on_delivered(&hash);
            }
            assert!(tracker.in_flight_count() <= 16);
            tracker.check_invariants().unwrap();
        }
    }
}
