use std::{path::PathBuf, time::Duration};

/// Tunables for the piece-fetch engine. Every worker gets a snapshot.
#[derive(Clone, Debug)]
pub struct Config {
    /// Request granularity. 16 KiB is the de-facto ceiling peers accept.
    pub block_size: u32,
    /// Maximum in-flight Requests per piece per worker.
    pub request_backlog: u32,
    /// Deadline for the handshake + bitfield exchange.
    pub handshake_timeout: Duration,
    /// Deadline for the initial TCP dial.
    pub tcp_timeout: Duration,
    /// Deadline for completing one whole piece.
    pub piece_timeout: Duration,
    /// HTTP timeout for the tracker announce.
    pub tracker_timeout: Duration,
    /// Port reported to the tracker.
    pub port: u16,
    /// Print verbose logging information.
    pub verbose: bool,
    /// Where to drop a best-effort snapshot if the download is cancelled.
    pub resume_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: 16384,
            request_backlog: 5,
            handshake_timeout: Duration::from_secs(15),
            tcp_timeout: Duration::from_secs(15),
            piece_timeout: Duration::from_secs(30),
            tracker_timeout: Duration::from_secs(30),
            port: 6881,
            verbose: false,
            resume_path: None,
        }
    }
}
