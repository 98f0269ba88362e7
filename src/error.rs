use std::io;

/// Constructs a [`TorrentError::Protocol`] from a format string.
#[macro_export]
macro_rules! protocol_error {
    ($($arg:tt)*) => {
        $crate::error::TorrentError::Protocol(format!($($arg)*))
    };
}

/// Crate-wide error type. The variants are the failure kinds the engine
/// distinguishes; what happens next depends on the kind, not the message.
#[derive(thiserror::Error, Debug)]
pub enum TorrentError {
    /// Dial, read, or write failure, including timeouts. Fatal to the worker
    /// that hit it; the piece in flight is requeued.
    #[error("network error: {0}")]
    Network(#[from] io::Error),

    /// The remote violated the wire protocol: bad handshake, mismatched
    /// info-hash, malformed payload, out-of-range block offsets. Fatal to
    /// the worker; the piece in flight is requeued.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A reassembled piece did not digest to its metainfo hash. The buffer
    /// is discarded and the piece requeued; the worker carries on.
    #[error("piece #{index} failed integrity check")]
    Integrity { index: u32 },

    #[error("download cancelled")]
    Cancelled,

    /// Anything that goes wrong before the engine starts: metainfo parsing,
    /// tracker exchange, file creation, an empty peer list.
    #[error("setup error: {0}")]
    Setup(String),
}

impl From<anyhow::Error> for TorrentError {
    fn from(err: anyhow::Error) -> Self {
        TorrentError::Setup(format!("{err:#}"))
    }
}

impl From<serde_bencode::Error> for TorrentError {
    fn from(err: serde_bencode::Error) -> Self {
        TorrentError::Setup(err.to_string())
    }
}

impl From<serde_json::Error> for TorrentError {
    fn from(err: serde_json::Error) -> Self {
        TorrentError::Setup(err.to_string())
    }
}

impl From<reqwest::Error> for TorrentError {
    fn from(err: reqwest::Error) -> Self {
        TorrentError::Setup(err.to_string())
    }
}
