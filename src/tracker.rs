use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_bytes::ByteBuf;

use crate::{config::Config, error::TorrentError, info::MetaInfo};

/// Bencoded announce response. Trackers also return an `interval`; we accept
/// and ignore it, since we announce exactly once per run.
#[derive(Debug, Deserialize)]
pub struct TrackerResponse {
    #[allow(unused)]
    #[serde(default)]
    pub interval: Option<i64>,
    pub peers: ByteBuf,
}

impl TrackerResponse {
    /// Splits the compact peer list into socket addresses: 6-byte records of
    /// IPv4 followed by a big-endian port.
    pub fn peers(&self) -> Result<Vec<SocketAddr>, TorrentError> {
        if self.peers.len() % 6 != 0 {
            return Err(TorrentError::Setup(format!(
                "compact peer list length {} is not a multiple of 6",
                self.peers.len()
            )));
        }
        Ok(self
            .peers
            .chunks(6)
            .map(|chunk| {
                let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
                let port = u16::from_be_bytes([chunk[4], chunk[5]]);
                SocketAddr::V4(SocketAddrV4::new(ip, port))
            })
            .collect())
    }
}

/// Announces to the tracker and returns its response. Any HTTP status other
/// than 200 is an error.
pub fn query_tracker(
    meta_info: &MetaInfo,
    peer_id: &[u8; 20],
    config: &Config,
) -> Result<TrackerResponse, TorrentError> {
    let info_hash = meta_info.info.hash()?;
    let url = announce_url(
        &meta_info.announce,
        &info_hash,
        peer_id,
        config.port,
        meta_info.info.length,
    );

    let client = reqwest::blocking::Client::builder()
        .timeout(config.tracker_timeout)
        .build()?;
    let response = client.get(&url).send()?;
    if !response.status().is_success() {
        return Err(TorrentError::Setup(format!(
            "tracker returned status {}",
            response.status()
        )));
    }

    let body = response.bytes()?;
    let tracker_response = serde_bencode::from_bytes(&body)?;
    Ok(tracker_response)
}

// The info hash and peer id are raw bytes, which url builders insist on
// re-encoding; assembling the query string by hand keeps them intact.
fn announce_url(
    announce: &str,
    info_hash: &[u8; 20],
    peer_id: &[u8; 20],
    port: u16,
    left: u64,
) -> String {
    format!(
        "{announce}?info_hash={}&peer_id={}&port={port}&uploaded=0&downloaded=0&left={left}&compact=1",
        percent_encode(info_hash, NON_ALPHANUMERIC),
        percent_encode(peer_id, NON_ALPHANUMERIC),
    )
}
