//! Telemetry packet framing.
//!
//! Packets start with the two byte lead-in [LEAD_IN] followed by a header carrying the
//! total packet length, routing identifiers, a wrapping sequence number and a time code.
//! The payload follows the header. See [Header] for the layout.
//!
//! A [Framer] recovers packets from an arbitrarily chunked byte stream, resynchronizing
//! on the next lead-in whenever the stream is corrupt. To frame packets directly from
//! a ``std::io::Read`` see [read_packets].
mod framer;
mod header;
mod packet;
mod reader;
mod ring;

pub use framer::*;
pub use header::*;
pub use packet::*;
pub use reader::*;
pub use ring::*;
