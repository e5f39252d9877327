use std::cmp;
use std::io::{ErrorKind, Read};

use tracing::{debug, trace};

use super::{FeedResult, Framer, FramerOpts, Packet, ResyncReason};
use crate::Result;

/// Something of interest found in a stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Packet(Packet),
    Resync(ResyncReason),
}

/// Iterates over [Event]s framed from a reader. Created using [read_packets].
///
/// Reads are never larger than the free space in the framer's buffer, so no data is
/// lost to overrun regardless of the configured policy.
///
/// ## Errors
/// The iterator ends at EOF; any partial packet still buffered is dropped. Reads that
/// are interrupted are retried, any other read error is produced once and then the
/// iterator ends.
pub struct PacketReader<R>
where
    R: Read + Send,
{
    reader: R,
    framer: Framer,
    buf: Vec<u8>,
    // There may be more results available from bytes already in the framer
    draining: bool,
    done: bool,
}

impl<R> PacketReader<R>
where
    R: Read + Send,
{
    /// Maximum number of bytes read from the reader at a time.
    pub const READ_SIZE: usize = 4096;

    fn new(reader: R, framer: Framer) -> Self {
        PacketReader {
            reader,
            framer,
            buf: vec![0u8; Self::READ_SIZE],
            draining: false,
            done: false,
        }
    }

    /// The framer doing the work, e.g., to get its stats.
    #[must_use]
    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    #[must_use]
    pub fn into_framer(self) -> Framer {
        self.framer
    }

    fn handle(&mut self, zult: Result<FeedResult>) -> Option<Result<Event>> {
        match zult {
            Ok(FeedResult::NeedMoreData) => {
                self.draining = false;
                None
            }
            Ok(FeedResult::Packet(packet)) => {
                self.draining = true;
                Some(Ok(Event::Packet(packet)))
            }
            Ok(FeedResult::Resync(reason)) => {
                self.draining = true;
                Some(Ok(Event::Resync(reason)))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<R> Iterator for PacketReader<R>
where
    R: Read + Send,
{
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if self.draining {
                let zult = self.framer.poll();
                if let Some(event) = self.handle(zult) {
                    return Some(event);
                }
                continue;
            }

            // Free space is only 0 if the framer is holding a full buffer, which does
            // not happen once it has asked for more data.
            let len = cmp::min(self.buf.len(), self.framer.free()).max(1);
            match self.reader.read(&mut self.buf[..len]) {
                Ok(0) => {
                    trace!(buffered = self.framer.buffered(), "end of stream");
                    self.done = true;
                }
                Ok(n) => {
                    let zult = self.framer.feed(&self.buf[..n]);
                    if let Some(event) = self.handle(zult) {
                        return Some(event);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("read failed: {err}");
                    self.done = true;
                    return Some(Err(err.into()));
                }
            }
        }
    }
}

/// Creates an iterator that frames packets from `reader`.
///
/// `reader` is any ``std::io::Read`` implementation providing the raw link bytes, e.g.,
/// a file, serial device or socket. Both packets and loss of synchronization are
/// reported. To get only packets see [decode_packets].
///
/// # Errors
/// If a [Framer] cannot be created from `opts`.
pub fn read_packets<R>(reader: R, opts: FramerOpts) -> Result<PacketReader<R>>
where
    R: Read + Send,
{
    Ok(PacketReader::new(reader, Framer::new(opts)?))
}

/// Like [read_packets], but only produces packets.
///
/// # Errors
/// If a [Framer] cannot be created from `opts`.
pub fn decode_packets<'a, R>(
    reader: R,
    opts: FramerOpts,
) -> Result<impl Iterator<Item = Result<Packet>> + 'a>
where
    R: Read + Send + 'a,
{
    Ok(read_packets(reader, opts)?.filter_map(|zult| match zult {
        Ok(Event::Packet(packet)) => Some(Ok(packet)),
        Ok(Event::Resync(_)) => None,
        Err(err) => Some(Err(err)),
    }))
}
