use thiserror::Error;

/// Per-tile failures produced while fetching or decoding a tile.
///
/// All of these are local to one tile: they mark that tile failed and free
/// its scheduler slot without touching sibling jobs or other cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    /// The fetch was rejected or aborted by the transport
    #[error("Network failure for {address}: {message}")]
    NetworkFailure { address: String, message: String },

    /// The job exceeded its deadline
    #[error("Tile {address} timed out after {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    /// The payload was fetched but is not a decodable image
    #[error("Failed to decode {address}: {message}")]
    DecodeFailure { address: String, message: String },

    /// The job was superseded (relevance loss, reset, eviction)
    #[error("Tile request cancelled")]
    Cancelled,
}

impl TileError {
    /// Whether this outcome should be reported as a failure.
    ///
    /// Cancellation is the normal result of a tile leaving the wanted set.
    pub fn is_failure(&self) -> bool {
        !matches!(self, TileError::Cancelled)
    }
}

/// Errors from [`crate::queue::PriorityQueue`] misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// `pop_min` was called on an empty queue
    #[error("Priority queue is empty")]
    EmptyQueue,
}

/// Errors raised while loading or validating a tile source descriptor.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Descriptor could not be read
    #[error("I/O error: {0}")]
    Io(String),

    /// Descriptor is not well-formed XML or JSON
    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// A required attribute is missing or not a number
    #[error("Missing or invalid attribute: {0}")]
    MissingAttribute(&'static str),

    /// The descriptor describes something other than a DZI image
    #[error("Unsupported descriptor: {reason}")]
    UnsupportedFormat { reason: String },
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err.to_string())
    }
}
