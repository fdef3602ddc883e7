//! Tests for error paths and edge cases

use brick_relay::*;
use brick_relay::pow::expand_target;
use brick_relay::serialize::*;

#[test]
fn test_witness_commitment_needs_coinbase() {
    let relay = BrickRelay::new();
    let mut brick = relay.create_brick([0; 32], relay.create_coinbase(1, None), None);
    brick.transactions.clear();
    let result = relay.add_witness_commitment(brick, &[0; 32]);
    assert!(matches!(result, Err(RelayError::MalformedAssembly(_))));
}

#[test]
fn test_bad_compact_targets() {
    // negative
    assert!(matches!(
        expand_target(0x04923456),
        Err(RelayError::InvalidProofOfWork(_))
    ));
    // zero
    assert!(matches!(
        expand_target(0x01003456),
        Err(RelayError::InvalidProofOfWork(_))
    ));
    // overflow
    assert!(matches!(
        expand_target(0xff123456),
        Err(RelayError::InvalidProofOfWork(_))
    ));
    assert!(expand_target(REGTEST_BITS).is_ok());
}

#[test]
fn test_unsolvable_header_reported() {
    let relay = BrickRelay::new();
    let mut brick = relay.create_brick([0; 32], relay.create_coinbase(1, None), Some(0));
    brick.header.bits = 0;
    assert!(relay.check_proof_of_work(&brick.header).is_err());
    assert!(relay.solve(&mut brick).is_err());
}

#[test]
fn test_truncated_wire_data() {
    let mut reader = Reader::new(&[0xfd, 0x01]);
    assert!(matches!(reader.read_varint(), Err(RelayError::Serialization(_))));

    let mut reader = Reader::new(&[0x01; 31]);
    assert!(reader.read_hash().is_err());
}

#[test]
fn test_non_canonical_varint_rejected() {
    let mut reader = Reader::new(&[0xfd, 0x10, 0x00]);
    assert!(reader.read_varint().is_err());
}

#[test]
fn test_bad_hash_hex() {
    assert!(hash_from_hex("xyz").is_err());
    assert!(hash_from_hex(&"00".repeat(31)).is_err());
}

#[test]
fn test_config_errors() {
    assert!(matches!(
        FlowControlConfig::from_json(r#"{"max_inv_size": 0}"#),
        Err(RelayError::Config(_))
    ));
    assert!(matches!(
        FlowControlConfig::from_json(r#"{"settle": "sometimes"}"#),
        Err(RelayError::Config(_))
    ));
}

#[test]
fn test_violation_messages_name_the_brick() {
    let mut hash = [0u8; 32];
    hash[31] = 0xab;
    let message = RelayError::DuplicateRequestViolation { hash, count: 2 }.to_string();
    assert!(message.starts_with("brick ab"));
    assert!(message.contains("2 times"));

    let message = RelayError::InFlightCapViolation { requested: 129, cap: 128 }.to_string();
    assert!(message.contains("129"));
    assert!(message.contains("128"));
}

#[test]
fn test_tracker_rejects_nothing_at_zero_cap() {
    let mut tracker = InFlightTracker::new(0);
    assert_eq!(tracker.offer([1; 32]), Decision::Skip(SkipReason::CapReached));
    assert_eq!(tracker.in_flight_count(), 0);
    tracker.check_invariants().unwrap();
}
