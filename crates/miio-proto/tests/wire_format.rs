//! Integration tests for the miio-proto wire format.
//!
//! These drive the public API the way the discovery engine does: build a
//! probe, feed crafted device replies through the parser, and classify the
//! results.

use std::net::SocketAddr;

use miio_proto::{
    build_handshake, build_info_request, build_probe, parse_response, DeviceId, DeviceRecord,
    ProtocolError, MAGIC, PACKET_SIZE,
};

fn addr(s: &str) -> SocketAddr {
    s.parse().expect("test address must parse")
}

/// The reference reply captured from a wifispeaker on the bench:
/// magic, declared length 0x20, type 00000002, id 08f83588, stamp 1,
/// then a 16-byte trailer that is neither all-zero nor all-one.
fn reference_reply() -> Vec<u8> {
    let mut bytes = vec![
        0x21, 0x31, 0x00, 0x20, // magic + length
        0x00, 0x00, 0x00, 0x02, // device type
        0x08, 0xF8, 0x35, 0x88, // device id
        0x00, 0x00, 0x00, 0x01, // stamp
    ];
    bytes.extend((0x10..0x20).map(|b| b as u8));
    bytes
}

#[test]
fn test_reference_reply_parses_and_validates() {
    let source = addr("192.168.1.45:54321");

    let resp = parse_response(&reference_reply(), source).expect("reference reply must parse");

    assert_eq!(resp.device_id.to_string(), "08f83588");
    assert_eq!(resp.device_type.to_string(), "00000002");
    assert!(resp.is_valid());

    let record = DeviceRecord::from(resp);
    assert_eq!(record.addr, source.ip());
    assert_eq!(record.port, 54321);
    assert_eq!(record.raw, reference_reply());
}

#[test]
fn test_all_probe_variants_share_the_header() {
    let id: DeviceId = "08f83588".parse().unwrap();

    for packet in [build_probe(), build_handshake(id), build_info_request(id)] {
        assert_eq!(packet.len(), PACKET_SIZE);
        assert_eq!(u16::from_be_bytes([packet[0], packet[1]]), MAGIC);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), PACKET_SIZE as u16);
    }
}

#[test]
fn test_short_datagram_fails_length_guard() {
    let result = parse_response(&reference_reply()[..16], addr("10.0.0.9:54321"));

    assert_eq!(
        result,
        Err(ProtocolError::TooShort {
            needed: 32,
            available: 16
        })
    );
}

#[test]
fn test_foreign_magic_fails_for_any_body() {
    // A DNS-sized blob, an all-zero packet, and a near-miss magic all fail.
    let mut near_miss = reference_reply();
    near_miss[1] = 0x32;

    for bytes in [vec![0x13u8; 48], vec![0x00; 32], near_miss] {
        let result = parse_response(&bytes, addr("10.0.0.9:54321"));
        assert!(matches!(result, Err(ProtocolError::BadMagic(_))));
    }
}

#[test]
fn test_probe_echo_is_classified_as_filler() {
    // A broadcast probe bounced back by the network stack parses fine but
    // must never count as a device.
    let echo = build_probe();

    let resp = parse_response(&echo, addr("192.168.1.5:54321")).unwrap();

    assert!(resp.device_id.is_filler());
    assert!(!resp.is_valid());
}
