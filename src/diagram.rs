//! The wire unit: one header byte plus an optional payload.
//!
//! The header byte carries `(is_ack, sequence)` in sign form: a non-negative
//! value is a data diagram with that sequence, a negative value (read as
//! two's complement) acknowledges the sequence of its magnitude. The values
//! 0 and 128 bypass sign interpretation entirely: they are the
//! connection-request and disconnect-request sentinels.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{RdtError, Result};
use crate::seq;

/// Largest payload a single diagram may carry.
pub const MAX_PAYLOAD_LEN: usize = 65534;

/// Largest raw packet: header byte plus the largest permitted payload.
pub const MAX_RAW_LEN: usize = MAX_PAYLOAD_LEN + 1;

/// A single protocol datagram.
///
/// An acknowledgment with an empty payload is cumulative ("everything up to
/// and including `sequence` arrived", Go-Back-N); one with a single marker
/// byte is selective ("exactly `sequence` arrived", Selective-Repeat).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagram {
    /// 1..=126 for data and acknowledgment traffic; [`seq::CONNECT`] or
    /// [`seq::DISCONNECT`] for the control sentinels.
    pub sequence: u8,
    /// True for acknowledgments.
    pub is_ack: bool,
    /// Application bytes; empty for acknowledgments and sentinels.
    pub payload: Bytes,
}

impl Diagram {
    /// A data diagram carrying `payload` under `sequence`.
    pub fn data(sequence: u8, payload: Bytes) -> Self {
        Self {
            sequence,
            is_ack: false,
            payload,
        }
    }

    /// The zero-payload connection-request sentinel.
    pub fn connect_request() -> Self {
        Self {
            sequence: seq::CONNECT,
            is_ack: false,
            payload: Bytes::new(),
        }
    }

    /// The zero-payload disconnect-request sentinel.
    pub fn disconnect_request() -> Self {
        Self {
            sequence: seq::DISCONNECT,
            is_ack: false,
            payload: Bytes::new(),
        }
    }

    /// A cumulative acknowledgment: everything up to and including
    /// `sequence` has been received.
    pub fn cumulative_ack(sequence: u8) -> Self {
        Self {
            sequence,
            is_ack: true,
            payload: Bytes::new(),
        }
    }

    /// A selective acknowledgment: exactly `sequence` has been received,
    /// the window may still have gaps. The single payload byte is the
    /// selective marker.
    pub fn selective_ack(sequence: u8) -> Self {
        Self {
            sequence,
            is_ack: true,
            payload: Bytes::from_static(&[0]),
        }
    }

    /// Build the acknowledgment for this data diagram: cumulative for a
    /// Go-Back-N receiver, selective for Selective-Repeat.
    pub fn confirm(&self, selective: bool) -> Self {
        debug_assert!(!self.is_ack, "acknowledgments are not themselves confirmed");
        if selective {
            Self::selective_ack(self.sequence)
        } else {
            Self::cumulative_ack(self.sequence)
        }
    }

    pub fn is_connect_request(&self) -> bool {
        self.sequence == seq::CONNECT && !self.is_ack
    }

    pub fn is_disconnect_request(&self) -> bool {
        self.sequence == seq::DISCONNECT && !self.is_ack
    }

    /// Whether this acknowledgment confirms the whole arc up to its
    /// sequence (empty payload) rather than the exact sequence alone.
    pub fn is_cumulative(&self) -> bool {
        self.payload.is_empty()
    }

    /// The header byte encoding `(is_ack, sequence)`.
    pub fn header(&self) -> u8 {
        if self.is_ack {
            self.sequence.wrapping_neg()
        } else {
            self.sequence
        }
    }

    /// Total number of bytes this diagram occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        1 + self.payload.len()
    }

    /// Encode into the wire layout: header byte, then the payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.header());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a raw packet. The two sentinels are recognized before any
    /// sign interpretation; whatever trails them is ignored.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let (&header, payload) = raw.split_first().ok_or(RdtError::EmptyDatagram)?;
        Ok(match header {
            seq::CONNECT => Self::connect_request(),
            seq::DISCONNECT => Self::disconnect_request(),
            _ => {
                let signed = header as i8;
                if signed < 0 {
                    Self {
                        sequence: signed.unsigned_abs(),
                        is_ack: true,
                        payload: Bytes::copy_from_slice(payload),
                    }
                } else {
                    Self {
                        sequence: header,
                        is_ack: false,
                        payload: Bytes::copy_from_slice(payload),
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sign_encoding() {
        assert_eq!(Diagram::data(1, Bytes::new()).header(), 1);
        assert_eq!(Diagram::data(126, Bytes::new()).header(), 126);
        assert_eq!(Diagram::cumulative_ack(1).header(), 0xFF);
        assert_eq!(Diagram::cumulative_ack(126).header(), 0x82);
        assert_eq!(Diagram::connect_request().header(), 0);
        assert_eq!(Diagram::disconnect_request().header(), 128);
    }

    #[test]
    fn decode_recognizes_sentinels_first() {
        let connect = Diagram::decode(&[0]).unwrap();
        assert!(connect.is_connect_request());
        assert!(!connect.is_ack);

        let disconnect = Diagram::decode(&[128]).unwrap();
        assert!(disconnect.is_disconnect_request());
        assert!(!disconnect.is_ack);

        // Trailing bytes after a sentinel header are dropped.
        let connect = Diagram::decode(&[0, 1, 2, 3]).unwrap();
        assert!(connect.payload.is_empty());
    }

    #[test]
    fn empty_packet_is_an_error() {
        assert!(matches!(Diagram::decode(&[]), Err(RdtError::EmptyDatagram)));
    }

    #[test]
    fn cumulative_and_selective_acks_differ_by_payload() {
        assert!(Diagram::cumulative_ack(7).is_cumulative());
        assert!(!Diagram::selective_ack(7).is_cumulative());
        assert_eq!(Diagram::selective_ack(7).payload.len(), 1);
    }

    #[test]
    fn confirm_matches_receiver_discipline() {
        let data = Diagram::data(9, Bytes::from_static(b"abc"));
        assert_eq!(data.confirm(false), Diagram::cumulative_ack(9));
        assert_eq!(data.confirm(true), Diagram::selective_ack(9));
    }
}
