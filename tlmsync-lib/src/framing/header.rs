#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// First lead-in byte.
pub const ESC: u8 = 0x1b;
/// Second lead-in byte.
pub const STX: u8 = 0x03;
/// Marker indicating the start of every packet.
pub const LEAD_IN: [u8; 2] = [ESC, STX];

/// Smallest packet length accepted from the length field.
pub const MIN_PACKET_LEN: usize = 8;
/// Largest packet length accepted from the length field.
pub const MAX_PACKET_LEN: usize = 2048;

/// Length of the opaque time code carried in every header.
pub const TIME_CODE_LEN: usize = 6;

/// Longest header of any [LengthEncoding].
pub const MAX_HEADER_LEN: usize = LengthEncoding::Printable.header_len();

/// Value of a zero digit in the printable length encoding, i.e., `'@'`.
pub const PRINTABLE_DIGIT_BASE: u8 = b'0' + 16;

const LENGTH_MASK: u16 = 0x1fff;
/// Inhibit sequence check bit within the right-aligned length field flags. On the wire
/// this is the top bit of the 16-bit length value.
pub const INHIBIT_FLAG: u8 = 0x4;

/// How the packet length field is represented on the wire.
///
/// A link uses one encoding for its whole lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LengthEncoding {
    /// Two byte little-endian count. The top 3 bits are flags.
    #[default]
    Binary,
    /// Four printable digits, most significant first, each the digit value plus
    /// [PRINTABLE_DIGIT_BASE]. The top 3 bits of the resulting 16-bit value are flags.
    Printable,
}

/// Decoded contents of the length field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LengthField {
    /// Total packet length, including the lead-in and header.
    pub len: usize,
    /// The 3 flag bits, right aligned.
    pub flags: u8,
}

impl LengthField {
    /// True when the sender asked for sequence checking to be skipped for this packet.
    #[must_use]
    pub fn inhibit(&self) -> bool {
        self.flags & INHIBIT_FLAG != 0
    }
}

impl LengthEncoding {
    /// Number of bytes used by the length field.
    #[must_use]
    pub const fn field_len(self) -> usize {
        match self {
            Self::Binary => 2,
            Self::Printable => 4,
        }
    }

    /// Total header length, lead-in through time code.
    #[must_use]
    pub const fn header_len(self) -> usize {
        LEAD_IN.len() + self.field_len() + 4 + TIME_CODE_LEN
    }

    /// Decode the length field from `dat`, which should start with the first byte of
    /// the field. Returns `None` if there are not enough bytes or a printable digit is
    /// not valid.
    #[must_use]
    pub fn decode(self, dat: &[u8]) -> Option<LengthField> {
        if dat.len() < self.field_len() {
            return None;
        }
        let raw = match self {
            Self::Binary => u16::from_le_bytes([dat[0], dat[1]]),
            Self::Printable => {
                let mut raw = 0u16;
                for b in &dat[..4] {
                    let digit = b.checked_sub(PRINTABLE_DIGIT_BASE)?;
                    if digit > 0xf {
                        return None;
                    }
                    raw = (raw << 4) | u16::from(digit);
                }
                raw
            }
        };
        Some(LengthField {
            len: usize::from(raw & LENGTH_MASK),
            flags: (raw >> 13) as u8,
        })
    }

    /// Encode a length field into `dst`, which must be exactly [Self::field_len] bytes.
    ///
    /// # Panics
    /// If `dst` is the wrong size.
    pub fn encode(self, field: LengthField, dst: &mut [u8]) {
        assert_eq!(dst.len(), self.field_len(), "bad length field size");
        // len is bounded by MAX_PACKET_LEN before we get here
        let raw = (u16::from(field.flags & 0x7) << 13) | (field.len as u16 & LENGTH_MASK);
        match self {
            Self::Binary => dst.copy_from_slice(&raw.to_le_bytes()),
            Self::Printable => {
                for (i, b) in dst.iter_mut().enumerate() {
                    let digit = (raw >> (12 - 4 * i)) & 0xf;
                    *b = PRINTABLE_DIGIT_BASE + digit as u8;
                }
            }
        }
    }

    /// Returns true if `len` is a packet length this encoding can carry, i.e., within
    /// [MIN_PACKET_LEN, MAX_PACKET_LEN] and large enough to hold the header.
    #[must_use]
    pub fn valid_len(self, len: usize) -> bool {
        len >= MIN_PACKET_LEN.max(self.header_len()) && len <= MAX_PACKET_LEN
    }
}

/// Packet header, excluding the lead-in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Header {
    /// Total packet length, including lead-in, header and payload.
    pub len: usize,
    /// The 3 flag bits from the length field.
    pub flags: u8,
    pub routing: u8,
    pub node: u8,
    pub channel: u8,
    pub sequence: u8,
    pub time_code: [u8; TIME_CODE_LEN],
}

impl Header {
    /// True if the inhibit sequence check flag is set.
    #[must_use]
    pub fn inhibit(&self) -> bool {
        self.flags & INHIBIT_FLAG != 0
    }

    /// Decode from bytes starting at the lead-in. Returns `None` if there are not
    /// enough bytes for a header using `encoding` or the length field is corrupt.
    ///
    /// The lead-in itself is not checked and the length is not validated.
    #[must_use]
    pub fn decode(dat: &[u8], encoding: LengthEncoding) -> Option<Self> {
        if dat.len() < encoding.header_len() {
            return None;
        }
        let LengthField { len, flags } = encoding.decode(&dat[LEAD_IN.len()..])?;
        let ids = LEAD_IN.len() + encoding.field_len();
        let mut time_code = [0u8; TIME_CODE_LEN];
        time_code.copy_from_slice(&dat[ids + 4..ids + 4 + TIME_CODE_LEN]);

        Some(Header {
            len,
            flags,
            routing: dat[ids],
            node: dat[ids + 1],
            channel: dat[ids + 2],
            sequence: dat[ids + 3],
            time_code,
        })
    }

    /// Encode this header, including the lead-in.
    ///
    /// # Errors
    /// [Error::InvalidLength] if the header length is not valid for `encoding`.
    pub fn encode(&self, encoding: LengthEncoding) -> Result<Vec<u8>> {
        if !encoding.valid_len(self.len) {
            return Err(Error::InvalidLength { len: self.len });
        }
        let mut buf = vec![0u8; encoding.header_len()];
        buf[..LEAD_IN.len()].copy_from_slice(&LEAD_IN);
        let ids = LEAD_IN.len() + encoding.field_len();
        encoding.encode(
            LengthField {
                len: self.len,
                flags: self.flags,
            },
            &mut buf[LEAD_IN.len()..ids],
        );
        buf[ids] = self.routing;
        buf[ids + 1] = self.node;
        buf[ids + 2] = self.channel;
        buf[ids + 3] = self.sequence;
        buf[ids + 4..].copy_from_slice(&self.time_code);
        Ok(buf)
    }
}
