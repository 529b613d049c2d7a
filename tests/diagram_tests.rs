//! Wire codec round-trip tests.

use bytes::Bytes;
use rdtstream::{Diagram, RdtError};

#[test]
fn data_roundtrip() {
    let diagram = Diagram::data(42, Bytes::from_static(b"hello world"));
    let encoded = diagram.encode();
    let decoded = Diagram::decode(&encoded).unwrap();
    assert_eq!(diagram, decoded);
}

#[test]
fn data_empty_payload_roundtrip() {
    let diagram = Diagram::data(1, Bytes::new());
    let decoded = Diagram::decode(&diagram.encode()).unwrap();
    assert_eq!(diagram, decoded);
    assert_eq!(diagram.encoded_len(), 1);
}

#[test]
fn cumulative_ack_roundtrip() {
    let diagram = Diagram::cumulative_ack(7);
    let decoded = Diagram::decode(&diagram.encode()).unwrap();
    assert_eq!(diagram, decoded);
    assert!(decoded.is_ack);
    assert!(decoded.is_cumulative());
}

#[test]
fn selective_ack_roundtrip() {
    let diagram = Diagram::selective_ack(7);
    let decoded = Diagram::decode(&diagram.encode()).unwrap();
    assert_eq!(diagram, decoded);
    assert!(decoded.is_ack);
    assert!(!decoded.is_cumulative());
}

#[test]
fn sentinel_roundtrips() {
    let connect = Diagram::connect_request();
    assert_eq!(Diagram::decode(&connect.encode()).unwrap(), connect);

    let disconnect = Diagram::disconnect_request();
    assert_eq!(Diagram::decode(&disconnect.encode()).unwrap(), disconnect);
}

#[test]
fn every_ring_sequence_roundtrips() {
    for sequence in 1..=126u8 {
        let data = Diagram::data(sequence, Bytes::from_static(b"payload"));
        assert_eq!(Diagram::decode(&data.encode()).unwrap(), data);

        let cumulative = Diagram::cumulative_ack(sequence);
        assert_eq!(Diagram::decode(&cumulative.encode()).unwrap(), cumulative);

        let selective = Diagram::selective_ack(sequence);
        assert_eq!(Diagram::decode(&selective.encode()).unwrap(), selective);
    }
}

#[test]
fn wire_layout_is_one_header_byte_plus_payload() {
    let encoded = Diagram::data(5, Bytes::from_static(b"abc")).encode();
    assert_eq!(&encoded[..], &[5, b'a', b'b', b'c']);

    // Acknowledgments carry the negated sequence in two's complement.
    let encoded = Diagram::cumulative_ack(5).encode();
    assert_eq!(&encoded[..], &[0xFB]);

    let encoded = Diagram::selective_ack(5).encode();
    assert_eq!(&encoded[..], &[0xFB, 0]);

    assert_eq!(&Diagram::connect_request().encode()[..], &[0]);
    assert_eq!(&Diagram::disconnect_request().encode()[..], &[128]);
}

#[test]
fn empty_packet_rejected() {
    assert!(matches!(Diagram::decode(&[]), Err(RdtError::EmptyDatagram)));
}

#[test]
fn sentinels_ignore_trailing_bytes() {
    let decoded = Diagram::decode(&[0, 9, 9, 9]).unwrap();
    assert!(decoded.is_connect_request());
    assert!(decoded.payload.is_empty());

    let decoded = Diagram::decode(&[128, 1]).unwrap();
    assert!(decoded.is_disconnect_request());
    assert!(decoded.payload.is_empty());
}

#[test]
fn large_payload_roundtrip() {
    let payload = Bytes::from(vec![0xA5u8; 65534]);
    let diagram = Diagram::data(126, payload);
    assert_eq!(diagram.encoded_len(), 65535);
    assert_eq!(Diagram::decode(&diagram.encode()).unwrap(), diagram);
}
