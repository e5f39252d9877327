#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A single append was larger than the whole ring buffer.
    #[error("chunk of {len} bytes exceeds buffer capacity {capacity}")]
    ChunkTooLarge { len: usize, capacity: usize },

    /// Not enough free space and the buffer is configured to reject overruns.
    #[error("buffer overrun: {len} bytes offered, {free} free")]
    Overrun { len: usize, free: usize },

    #[error("cannot consume {len} bytes, only {available} available")]
    ConsumeOverflow { len: usize, available: usize },

    #[error("buffer capacity {capacity} is less than the minimum {minimum}")]
    Capacity { capacity: usize, minimum: usize },

    /// Packet length cannot be represented on the wire.
    #[error("invalid packet length {len}")]
    InvalidLength { len: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
