use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{Header, LengthEncoding, INHIBIT_FLAG, TIME_CODE_LEN};
use crate::{Error, Result};

/// A single telemetry packet recovered from the byte stream.
///
/// Packets are independently owned values; a [Framer](super::Framer) keeps no reference
/// to packets it has produced.
///
/// # Example
/// Build a packet and get its wire bytes.
/// ```
/// use tlmsync::framing::{LengthEncoding, Packet};
///
/// let packet = Packet::new(1, 4, 0x7e, 0, [0u8; 6], vec![1, 2, 3, 4, 5, 6]);
/// let dat = packet.encode(LengthEncoding::Binary).unwrap();
/// assert_eq!(dat.len(), 20);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Packet {
    routing: u8,
    node: u8,
    channel: u8,
    sequence: u8,
    time_code: [u8; TIME_CODE_LEN],
    inhibit: bool,
    #[cfg_attr(feature = "serde", serde(with = "serde_bytes"))]
    payload: Vec<u8>,
    sequence_anomaly: bool,
    offset: usize,
}

impl Packet {
    /// Create a packet for transmission. The sequence anomaly flag is always false and
    /// the stream offset is 0.
    #[must_use]
    pub fn new(
        routing: u8,
        node: u8,
        channel: u8,
        sequence: u8,
        time_code: [u8; TIME_CODE_LEN],
        payload: Vec<u8>,
    ) -> Self {
        Packet {
            routing,
            node,
            channel,
            sequence,
            time_code,
            inhibit: false,
            payload,
            sequence_anomaly: false,
            offset: 0,
        }
    }

    /// Set the inhibit sequence check flag sent with this packet.
    #[must_use]
    pub fn with_inhibit(mut self, inhibit: bool) -> Self {
        self.inhibit = inhibit;
        self
    }

    pub(crate) fn decoded(
        header: &Header,
        payload: Vec<u8>,
        sequence_anomaly: bool,
        offset: usize,
    ) -> Self {
        Packet {
            routing: header.routing,
            node: header.node,
            channel: header.channel,
            sequence: header.sequence,
            time_code: header.time_code,
            inhibit: header.inhibit(),
            payload,
            sequence_anomaly,
            offset,
        }
    }

    #[must_use]
    pub fn routing(&self) -> u8 {
        self.routing
    }

    #[must_use]
    pub fn node(&self) -> u8 {
        self.node
    }

    #[must_use]
    pub fn channel(&self) -> u8 {
        self.channel
    }

    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Raw time code bytes. Interpreting them is up to the consumer.
    #[must_use]
    pub fn time_code(&self) -> &[u8; TIME_CODE_LEN] {
        &self.time_code
    }

    /// Whether the header asked for sequence checking to be skipped.
    #[must_use]
    pub fn inhibit(&self) -> bool {
        self.inhibit
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// True if the sequence number did not follow the previous packet's.
    #[must_use]
    pub fn sequence_anomaly(&self) -> bool {
        self.sequence_anomaly
    }

    /// Offset of the packet's lead-in in the stream, counted from when the framer was
    /// created or last reset.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Encode this packet, lead-in, header and payload, using `encoding`.
    ///
    /// # Errors
    /// [Error::InvalidLength] if the payload is too large or too small for a valid
    /// packet.
    pub fn encode(&self, encoding: LengthEncoding) -> Result<Vec<u8>> {
        let len = encoding.header_len() + self.payload.len();
        if !encoding.valid_len(len) {
            return Err(Error::InvalidLength { len });
        }
        let header = Header {
            len,
            flags: if self.inhibit { INHIBIT_FLAG } else { 0 },
            routing: self.routing,
            node: self.node,
            channel: self.channel,
            sequence: self.sequence,
            time_code: self.time_code,
        };
        let mut dat = header.encode(encoding)?;
        dat.extend_from_slice(&self.payload);
        Ok(dat)
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Packet{{routing={}, node={}, channel={}, sequence={}, anomaly={}, payload:[len={}]}}",
            self.routing,
            self.node,
            self.channel,
            self.sequence,
            self.sequence_anomaly,
            self.payload.len()
        )
    }
}

/// Calculate the number of sequence numbers skipped between two packets.
///
/// `cur` is the current sequence number. `last` is the sequence number seen before
/// `cur`. Sequence numbers wrap at 256, so a repeated sequence number counts as 255
/// missing packets.
#[must_use]
pub fn missing_packets(cur: u8, last: u8) -> u8 {
    cur.wrapping_sub(last).wrapping_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_packets() {
        assert_eq!(missing_packets(5, 4), 0);
        assert_eq!(missing_packets(9, 5), 3);
        assert_eq!(missing_packets(0, 255), 0);
        assert_eq!(missing_packets(1, 254), 2);
        assert_eq!(missing_packets(5, 5), 255);
    }

    #[test]
    fn encode_packet() {
        let packet = Packet::new(1, 4, 0x7e, 0, [1, 2, 3, 4, 5, 6], vec![0xaa; 6]);
        let dat = packet.encode(LengthEncoding::Binary).unwrap();

        assert_eq!(
            dat[..14],
            [0x1b, 0x03, 20, 0x00, 0x01, 0x04, 0x7e, 0x00, 1, 2, 3, 4, 5, 6]
        );
        assert_eq!(dat[14..], [0xaa; 6]);
    }

    #[test]
    fn encode_with_inhibit_sets_flag() {
        let packet = Packet::new(0, 0, 0, 7, [0; 6], vec![]).with_inhibit(true);
        let dat = packet.encode(LengthEncoding::Binary).unwrap();
        assert_eq!(dat.len(), 14);
        assert_eq!(dat[3], 0x80);
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let packet = Packet::new(0, 0, 0, 0, [0; 6], vec![0; 2048]);
        assert!(matches!(
            packet.encode(LengthEncoding::Binary),
            Err(Error::InvalidLength { len: 2062 })
        ));
    }
}
