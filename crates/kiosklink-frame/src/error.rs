/// Errors that can occur while encoding or decoding wire units.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A datagram is not longer than the fragment header.
    #[error("datagram too short ({len} bytes, header is {header})")]
    TooShort { len: usize, header: usize },

    /// A fragment header announces zero fragments.
    #[error("fragment header announces zero fragments")]
    ZeroFragments,

    /// A payload would need more fragments than the header can express.
    #[error("payload needs {count} fragments (max {max})")]
    TooManyFragments { count: usize, max: usize },

    /// Nothing to fragment.
    #[error("cannot fragment an empty payload")]
    EmptyPayload,

    /// The packet size leaves no room for fragment bytes after the header.
    #[error("packet size {size} leaves no room for payload (header is {header})")]
    PacketTooSmall { size: usize, header: usize },

    /// A stream record announces more bytes than the configured maximum.
    #[error("record too large ({size} bytes, max {max})")]
    RecordTooLarge { size: usize, max: usize },

    /// A control line exceeded the configured maximum without a delimiter.
    #[error("control line too long ({size} bytes, max {max})")]
    LineTooLong { size: usize, max: usize },

    /// An I/O error occurred while reading or writing.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete unit was received.
    #[error("connection closed (incomplete unit)")]
    ConnectionClosed,

    /// The reader's stop signal was raised.
    #[error("reader stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, FrameError>;
