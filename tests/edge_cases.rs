#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Edge-case tests for the wire format, the packet pool and the topology packets
//! Tests boundary sizes, hostile headers and resource limits

use bytes::BytesMut;
use overlay_protocol::core::pool::SLAB_SIZE;
use overlay_protocol::core::reader::MAX_PACKET_LENGTH;
use overlay_protocol::core::{parse_from_stream, Packet, PacketPool, PacketType, StreamRead};
use overlay_protocol::error::ProtocolError;
use overlay_protocol::protocol::khl::KnownHubList;
use overlay_protocol::protocol::lni::LocalNodeInfo;

// ============================================================================
// PACKET CODEC EDGE CASES
// ============================================================================

#[test]
fn test_packet_empty_payload() {
    let packet = Packet::new("PI", false).unwrap();
    let bytes = packet.to_wire().unwrap();
    assert_eq!(bytes, vec![0b00_001_000, b'P', b'I']);

    let (decoded, consumed) = Packet::from_bytes(&bytes).expect("Should decode empty payload");
    assert_eq!(consumed, 3);
    assert!(decoded.is_empty());
}

#[test]
fn test_packet_max_payload_size() {
    let mut packet = Packet::new("BIG", false).unwrap();
    packet.write(&vec![0xAB; MAX_PACKET_LENGTH]);
    let bytes = packet.to_wire().unwrap();
    assert_eq!(bytes[0] >> 6, 3);

    let (decoded, _) = Packet::from_bytes(&bytes).expect("Should decode max payload");
    assert_eq!(decoded.len(), MAX_PACKET_LENGTH);
}

#[test]
fn test_packet_oversized_payload_rejected() {
    let mut packet = Packet::new("BIG", false).unwrap();
    packet.write(&vec![0; MAX_PACKET_LENGTH + 1]);
    match packet.to_wire() {
        Err(ProtocolError::OversizedPacket(n)) => assert_eq!(n, MAX_PACKET_LENGTH + 1),
        other => panic!("Unexpected result: {other:?}"),
    }
}

#[test]
fn test_packet_type_bounds() {
    assert!(PacketType::new("ABCDEFGH").is_ok());
    assert!(matches!(
        PacketType::new("ABCDEFGHI"),
        Err(ProtocolError::InvalidPacketType(_))
    ));
    assert!(matches!(
        PacketType::new(""),
        Err(ProtocolError::InvalidPacketType(_))
    ));
    assert!(matches!(
        PacketType::from_bytes(b"A\0"),
        Err(ProtocolError::InvalidPacketType(_))
    ));
}

#[test]
fn test_null_in_wire_type_is_format_error() {
    // two-byte type "A\0", no length field
    let err = Packet::from_bytes(&[0b00_001_000, b'A', 0]).unwrap_err();
    assert!(err.is_format_error());
}

#[test]
fn test_big_endian_flag_rejected_before_length() {
    // header claims a 3-byte length that is not even present
    let err = Packet::from_bytes(&[0b11_000_100, 0xFF]).unwrap_err();
    assert!(matches!(err, ProtocolError::BigEndianLength));
}

#[test]
fn test_packet_truncated_header() {
    // three length bytes declared, one present
    let result = Packet::from_bytes(&[0b11_000_000, 0x01]);
    assert!(matches!(result, Err(ProtocolError::Incomplete)));
}

#[test]
fn test_packet_empty_buffer() {
    assert!(matches!(
        Packet::from_bytes(&[]),
        Err(ProtocolError::Incomplete)
    ));
    let mut pool = PacketPool::new();
    let mut buf = BytesMut::new();
    assert_eq!(
        parse_from_stream(&mut pool, &mut buf).unwrap(),
        StreamRead::NeedMore
    );
}

#[test]
fn test_lone_end_marker_waits_for_second_byte() {
    let mut pool = PacketPool::new();
    let mut buf = BytesMut::from(&[0u8][..]);
    assert_eq!(
        parse_from_stream(&mut pool, &mut buf).unwrap(),
        StreamRead::NeedMore
    );
    assert_eq!(buf.len(), 1);
}

#[test]
fn test_leading_end_markers_are_skipped() {
    let (packet, consumed) = Packet::from_bytes(&[0, 0, 0b00_001_000, b'A', b'B']).unwrap();
    assert_eq!(packet.packet_type(), "AB");
    assert!(packet.is_empty());
    assert_eq!(consumed, 5);

    // a marker followed by a partial header still just needs more bytes
    let err = Packet::from_bytes(&[0, 0b00_001_000, b'A']).unwrap_err();
    assert!(matches!(err, ProtocolError::Incomplete));
    assert!(!err.is_format_error());
}

#[test]
fn test_child_overrunning_parent_is_rejected() {
    // parent KHL declares 4 bytes; its child claims 9
    let wire = [
        0b01_010_001,
        4,
        b'K',
        b'H',
        b'L',
        0b01_001_000,
        9,
        b'T',
        b'S',
    ];
    let (mut packet, _) = Packet::from_bytes(&wire).unwrap();
    assert!(packet.next_child().unwrap_err().is_format_error());
}

#[test]
fn test_marker_ends_children_before_payload() {
    let mut packet = Packet::new("Q", true).unwrap();
    packet.write_child("TS", &[1, 2, 3, 4]).unwrap();
    packet.write_u8(0);
    packet.write(b"tail");

    let (mut decoded, _) = Packet::from_bytes(&packet.to_wire().unwrap()).unwrap();
    let child = decoded.next_child().unwrap().unwrap();
    decoded.read(child.length).unwrap();
    assert!(decoded.next_child().unwrap().is_none());
    assert_eq!(decoded.read(4).unwrap(), b"tail");
}

// ============================================================================
// TOPOLOGY PACKET EDGE CASES
// ============================================================================

#[test]
fn test_khl_without_children() {
    let mut packet = Packet::new("KHL", false).unwrap();
    let parsed = KnownHubList::parse(&mut packet).unwrap();
    assert_eq!(parsed.timestamp, None);
    assert!(parsed.hubs.is_empty());
}

#[test]
fn test_khl_short_address_is_malformed() {
    let mut packet = Packet::new("KHL", true).unwrap();
    packet.write_child("NH", &[10, 0, 0, 1]).unwrap();
    assert!(KnownHubList::parse(&mut packet).unwrap_err().is_format_error());
}

#[test]
fn test_khl_ignores_unknown_children() {
    let mut packet = Packet::new("KHL", true).unwrap();
    packet.write_child("XYZ", b"ignored").unwrap();
    packet.write_child("NH", &[10, 0, 0, 1, 0xCA, 0x18]).unwrap();
    let parsed = KnownHubList::parse(&mut packet).unwrap();
    assert_eq!(parsed.hubs.len(), 1);
    assert_eq!(parsed.hubs[0].port(), 6346);
}

#[test]
fn test_lni_requires_address_and_guid() {
    let mut packet = Packet::new("LNI", true).unwrap();
    packet.write_child("NA", &[10, 0, 0, 1, 0xCA, 0x18]).unwrap();
    packet.write_child("V", b"RSOV").unwrap();
    assert!(LocalNodeInfo::parse(&mut packet).unwrap_err().is_format_error());
}

// ============================================================================
// PACKET POOL EDGE CASES
// ============================================================================

#[test]
fn test_pool_grows_by_whole_slabs() {
    let mut pool = PacketPool::new();
    assert_eq!(pool.capacity(), 0);

    let ids: Vec<_> = (0..=SLAB_SIZE)
        .map(|_| pool.acquire("Q", true).unwrap())
        .collect();
    assert_eq!(pool.slab_count(), 2);
    assert_eq!(pool.live(), SLAB_SIZE + 1);

    for id in ids {
        pool.release(id).unwrap();
    }
    assert_eq!(pool.live(), 0);
    assert_eq!(pool.available(), 2 * SLAB_SIZE);
}

#[test]
fn test_pool_limit_is_enforced() {
    let mut pool = PacketPool::with_limits(1, Some(1));
    for _ in 0..SLAB_SIZE {
        pool.acquire("Q", true).unwrap();
    }
    assert!(matches!(
        pool.acquire("Q", true),
        Err(ProtocolError::PoolExhausted)
    ));
}

#[test]
fn test_released_slot_is_reused_clean() {
    let mut pool = PacketPool::new();
    let first = pool.acquire("OLD", false).unwrap();
    pool.packet_mut(first).unwrap().write(b"stale");
    pool.release(first).unwrap();

    let second = pool.acquire("NEW", true).unwrap();
    assert_eq!(first, second);
    let packet = pool.packet(second).unwrap();
    assert!(packet.is_empty());
    assert_eq!(packet.packet_type(), "NEW");
    assert_eq!(packet.ref_count(), 1);
}

#[test]
fn test_access_after_release_fails() {
    let mut pool = PacketPool::new();
    let id = pool.acquire("Q", true).unwrap();
    pool.release(id).unwrap();
    assert!(matches!(
        pool.packet(id),
        Err(ProtocolError::InvalidPacketId(_))
    ));
    assert!(pool.retain(id).is_err());
}
