use std::fmt::Display;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    missing_packets, Header, LengthEncoding, OverrunPolicy, Packet, RingBuffer, ESC, LEAD_IN,
    MAX_HEADER_LEN, MAX_PACKET_LEN, STX,
};
use crate::{Error, Result};

/// Default ring buffer capacity; room for several maximum length packets.
pub const DEFAULT_CAPACITY: usize = 4 * MAX_PACKET_LEN;

/// Options used to construct a [Framer].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FramerOpts {
    /// Ring buffer capacity in bytes. Must be at least [MAX_PACKET_LEN].
    pub capacity: usize,
    /// Length field encoding used by the link.
    pub encoding: LengthEncoding,
    /// What happens when bytes arrive faster than packets are taken out.
    pub overrun: OverrunPolicy,
}

impl Default for FramerOpts {
    fn default() -> Self {
        FramerOpts {
            capacity: DEFAULT_CAPACITY,
            encoding: LengthEncoding::default(),
            overrun: OverrunPolicy::default(),
        }
    }
}

impl FramerOpts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_encoding(mut self, encoding: LengthEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    #[must_use]
    pub fn with_overrun(mut self, overrun: OverrunPolicy) -> Self {
        self.overrun = overrun;
        self
    }
}

/// Synchronization mode of a [Framer].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Searching for a lead-in.
    Unsynced,
    /// The read position is at the start of a packet.
    Synced,
}

/// Why synchronization was lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResyncReason {
    /// An escape byte was not followed by the second lead-in byte, or a packet was not
    /// followed directly by another lead-in.
    BadLeadIn,
    /// The header length field was corrupt or outside the accepted range.
    LengthOutOfRange,
    /// Buffered bytes of a partial packet were overwritten by a ring buffer overrun.
    Overrun,
}

impl Display for ResyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::BadLeadIn => "bad lead-in",
            Self::LengthOutOfRange => "length out of range",
            Self::Overrun => "overrun",
        };
        write!(f, "{s}")
    }
}

/// Result of feeding bytes to a [Framer].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedResult {
    /// No complete packet is buffered.
    NeedMoreData,
    /// A packet was decoded. More packets may already be buffered.
    Packet(Packet),
    /// Synchronization was lost; the framer has already started to recover. This is
    /// diagnostic only.
    Resync(ResyncReason),
}

/// Running counters kept by a [Framer].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FramerStats {
    pub packets: usize,
    pub sequence_anomalies: usize,
    /// Total sequence numbers skipped, as computed by [missing_packets].
    pub missing_packets: usize,
    pub bad_lead_in: usize,
    pub length_out_of_range: usize,
    pub overruns: usize,
    /// Bytes dropped while searching for a lead-in.
    pub discarded_bytes: usize,
    /// Unread bytes overwritten due to ring buffer overrun.
    pub overrun_bytes: usize,
}

impl FramerStats {
    #[must_use]
    pub fn resyncs(&self) -> usize {
        self.bad_lead_in + self.length_out_of_range + self.overruns
    }
}

/// Recovers packets from an unreliable byte stream.
///
/// Bytes from the transport are passed to [Framer::feed], which buffers them and
/// returns at most one [FeedResult] per call. After a [FeedResult::Packet] or a
/// [FeedResult::Resync] there may be more to do with bytes that are already buffered,
/// so the caller should keep calling [Framer::poll] until it gets
/// [FeedResult::NeedMoreData] before reading more from the transport.
///
/// When synchronization is lost the framer discards bytes up to the next lead-in
/// and carries on; this never produces an error. Errors are reserved for misuse,
/// such as feeding more bytes at once than the buffer can hold.
///
/// # Example
/// ```
/// use tlmsync::framing::{FeedResult, Framer, Packet, LengthEncoding};
///
/// let dat = Packet::new(1, 4, 0x7e, 0, [0u8; 6], vec![0u8; 6])
///     .encode(LengthEncoding::Binary)
///     .unwrap();
/// let mut framer = Framer::default();
///
/// // Split the packet across two feeds
/// assert_eq!(framer.feed(&dat[..9]).unwrap(), FeedResult::NeedMoreData);
/// match framer.feed(&dat[9..]).unwrap() {
///     FeedResult::Packet(packet) => assert_eq!(packet.node(), 4),
///     other => panic!("expected packet, got {other:?}"),
/// }
/// assert_eq!(framer.poll().unwrap(), FeedResult::NeedMoreData);
/// ```
#[derive(Debug)]
pub struct Framer {
    ring: RingBuffer,
    encoding: LengthEncoding,
    mode: Mode,
    // Header of the packet currently being assembled, if it has been parsed
    pending: Option<Header>,
    // Sequence check is skipped for the pending packet
    inhibit: bool,
    last_sequence: Option<u8>,
    // Stream offset of the ring read position
    offset: usize,
    stats: FramerStats,
}

impl Default for Framer {
    fn default() -> Self {
        let opts = FramerOpts::default();
        Self::with_ring(RingBuffer::new(opts.capacity, opts.overrun), opts.encoding)
    }
}

impl Framer {
    /// Create a new framer.
    ///
    /// # Errors
    /// [Error::Capacity] if the capacity cannot hold a maximum length packet.
    pub fn new(opts: FramerOpts) -> Result<Self> {
        if opts.capacity < MAX_PACKET_LEN {
            return Err(Error::Capacity {
                capacity: opts.capacity,
                minimum: MAX_PACKET_LEN,
            });
        }
        Ok(Self::with_ring(
            RingBuffer::new(opts.capacity, opts.overrun),
            opts.encoding,
        ))
    }

    fn with_ring(ring: RingBuffer, encoding: LengthEncoding) -> Self {
        Framer {
            ring,
            encoding,
            mode: Mode::Unsynced,
            pending: None,
            inhibit: false,
            last_sequence: None,
            offset: 0,
            stats: FramerStats::default(),
        }
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.mode == Mode::Synced
    }

    #[must_use]
    pub fn encoding(&self) -> LengthEncoding {
        self.encoding
    }

    /// Number of bytes buffered but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.ring.available()
    }

    /// Number of bytes that can be fed without overrunning buffered data.
    #[must_use]
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Sequence number of the last packet produced since start-up or the last loss of
    /// synchronization.
    #[must_use]
    pub fn last_sequence(&self) -> Option<u8> {
        self.last_sequence
    }

    #[must_use]
    pub fn stats(&self) -> &FramerStats {
        &self.stats
    }

    /// Drop all buffered bytes and return to the initial unsynchronized state, e.g.,
    /// after the transport reconnects. Stream offsets start over at 0; stats are kept.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.offset = 0;
        self.mode = Mode::Unsynced;
        self.pending = None;
        self.inhibit = false;
        self.last_sequence = None;
    }

    /// Check for another result using only already buffered bytes. Same as feeding an
    /// empty slice.
    ///
    /// # Errors
    /// See [Framer::feed].
    pub fn poll(&mut self) -> Result<FeedResult> {
        self.feed(&[])
    }

    /// Buffer `dat` and advance the state machine as far as possible.
    ///
    /// # Errors
    /// [Error::ChunkTooLarge] if `dat` is larger than the buffer capacity, or
    /// [Error::Overrun] if the buffer is configured with [OverrunPolicy::Reject] and
    /// `dat` does not fit in the free space.
    pub fn feed(&mut self, dat: &[u8]) -> Result<FeedResult> {
        let lost = self.ring.append(dat)?;
        if lost > 0 {
            self.offset += lost;
            self.stats.overrun_bytes += lost;
            if self.mode == Mode::Synced {
                // The start of the packet being assembled is gone
                self.lose_sync(ResyncReason::Overrun);
                return Ok(FeedResult::Resync(ResyncReason::Overrun));
            }
        }

        loop {
            let step = match (self.mode, self.pending) {
                (Mode::Unsynced, _) => self.scan()?,
                (Mode::Synced, None) => self.parse_header()?,
                (Mode::Synced, Some(header)) => self.extract(&header)?,
            };
            if let Some(result) = step {
                return Ok(result);
            }
        }
    }

    // Search for a lead-in. Returns None when one was found and the state machine
    // should continue.
    fn scan(&mut self) -> Result<Option<FeedResult>> {
        let Some(idx) = self.ring.position(0, ESC) else {
            // None of the buffered bytes can be the start of a packet
            self.discard(self.ring.available())?;
            return Ok(Some(FeedResult::NeedMoreData));
        };
        self.discard(idx)?;

        match self.ring.byte_at(1) {
            // Escape is the last byte available; wait to see what follows
            None => Ok(Some(FeedResult::NeedMoreData)),
            Some(STX) => {
                trace!(offset = self.offset, "found lead-in");
                self.mode = Mode::Synced;
                self.pending = None;
                Ok(None)
            }
            Some(b) => {
                debug!(offset = self.offset, byte = b, "escape not followed by stx");
                self.discard(1)?;
                self.stats.bad_lead_in += 1;
                Ok(Some(FeedResult::Resync(ResyncReason::BadLeadIn)))
            }
        }
    }

    fn parse_header(&mut self) -> Result<Option<FeedResult>> {
        let mut lead_in = [0u8; LEAD_IN.len()];
        if !self.ring.peek(0, &mut lead_in) {
            return Ok(Some(FeedResult::NeedMoreData));
        }
        if lead_in != LEAD_IN {
            // Only happens for data following a packet, which must be another packet
            if lead_in[0] == ESC {
                self.discard(1)?;
            }
            self.lose_sync(ResyncReason::BadLeadIn);
            return Ok(Some(FeedResult::Resync(ResyncReason::BadLeadIn)));
        }

        let header_len = self.encoding.header_len();
        let mut buf = [0u8; MAX_HEADER_LEN];
        if !self.ring.peek(0, &mut buf[..header_len]) {
            return Ok(Some(FeedResult::NeedMoreData));
        }

        let header = match Header::decode(&buf[..header_len], self.encoding) {
            Some(header) if self.encoding.valid_len(header.len) => header,
            zult => {
                debug!(offset = self.offset, header = ?zult, "invalid packet length");
                // Step past the bad lead-in so the scan does not find it again
                self.discard(1)?;
                self.lose_sync(ResyncReason::LengthOutOfRange);
                return Ok(Some(FeedResult::Resync(ResyncReason::LengthOutOfRange)));
            }
        };

        self.inhibit = header.inhibit();
        if self.inhibit {
            trace!(sequence = header.sequence, "sequence check inhibited");
            self.last_sequence = Some(header.sequence.wrapping_sub(1));
        }
        self.pending = Some(header);
        Ok(None)
    }

    fn extract(&mut self, header: &Header) -> Result<Option<FeedResult>> {
        if self.ring.available() < header.len {
            return Ok(Some(FeedResult::NeedMoreData));
        }
        let header_len = self.encoding.header_len();
        let mut payload = vec![0u8; header.len - header_len];
        let copied = self.ring.peek(header_len, &mut payload);
        debug_assert!(copied, "packet bytes should be available");

        let anomaly = match self.last_sequence {
            Some(last) if !self.inhibit => {
                let missing = missing_packets(header.sequence, last);
                if missing != 0 {
                    debug!(
                        offset = self.offset,
                        sequence = header.sequence,
                        last,
                        missing,
                        "sequence anomaly"
                    );
                    self.stats.missing_packets += usize::from(missing);
                }
                missing != 0
            }
            _ => false,
        };

        let packet = Packet::decoded(header, payload, anomaly, self.offset);
        self.advance(header.len)?;
        self.pending = None;
        self.inhibit = false;
        self.last_sequence = Some(header.sequence);
        self.stats.packets += 1;
        if anomaly {
            self.stats.sequence_anomalies += 1;
        }

        Ok(Some(FeedResult::Packet(packet)))
    }

    fn lose_sync(&mut self, reason: ResyncReason) {
        debug!(offset = self.offset, %reason, "lost sync");
        match reason {
            ResyncReason::BadLeadIn => self.stats.bad_lead_in += 1,
            ResyncReason::LengthOutOfRange => self.stats.length_out_of_range += 1,
            ResyncReason::Overrun => self.stats.overruns += 1,
        }
        self.mode = Mode::Unsynced;
        self.pending = None;
        self.inhibit = false;
        self.last_sequence = None;
    }

    fn advance(&mut self, len: usize) -> Result<()> {
        self.ring.consume(len)?;
        self.offset += len;
        Ok(())
    }

    fn discard(&mut self, len: usize) -> Result<()> {
        if len > 0 {
            trace!(offset = self.offset, len, "discarding bytes");
            self.advance(len)?;
            self.stats.discarded_bytes += len;
        }
        Ok(())
    }
}
