use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::{error::TorrentError, util::sha1_hash};

/// Parsed `.torrent` metainfo descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct MetaInfo {
    pub announce: String,
    pub info: Info,
}

/// The `info` sub-dictionary. Fields are declared in canonical bencode key
/// order (lexicographic), so re-serializing reproduces the original bytes
/// and the info-hash comes out right.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Info {
    pub length: u64,
    pub name: String,
    #[serde(rename = "piece length")]
    pub piece_length: u32,
    pieces: ByteBuf,
}

impl MetaInfo {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TorrentError> {
        let content = fs::read(path.as_ref())
            .with_context(|| format!("error reading torrent file {}", path.as_ref().display()))?;
        let meta_info = serde_bencode::from_bytes(&content)?;
        Ok(meta_info)
    }
}

impl Info {
    /// SHA-1 of the canonical bencoding of this dictionary. Identifies the
    /// torrent; the tracker query and every peer handshake carry it.
    pub fn hash(&self) -> Result<[u8; 20], TorrentError> {
        let bencoded = serde_bencode::to_bytes(self)?;
        Ok(sha1_hash(&bencoded))
    }

    /// Per-piece SHA-1 digests, split out of the raw `pieces` byte string.
    pub fn piece_hashes(&self) -> Result<Vec<[u8; 20]>, TorrentError> {
        if self.pieces.len() % 20 != 0 {
            return Err(TorrentError::Setup(format!(
                "pieces length {} is not a multiple of 20",
                self.pieces.len()
            )));
        }
        Ok(self
            .pieces
            .chunks(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds the bencoding of a single-file metainfo by hand and returns
    /// `(whole file, info dictionary slice)`.
    fn sample_metainfo(announce: &str, name: &str, pieces: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut info_raw = Vec::new();
        info_raw.extend_from_slice(b"d6:lengthi3000e");
        info_raw.extend_from_slice(format!("4:name{}:{name}", name.len()).as_bytes());
        info_raw.extend_from_slice(b"12:piece lengthi2048e");
        info_raw.extend_from_slice(format!("6:pieces{}:", pieces.len()).as_bytes());
        info_raw.extend_from_slice(pieces);
        info_raw.push(b'e');

        let mut raw = Vec::new();
        raw.extend_from_slice(format!("d8:announce{}:{announce}", announce.len()).as_bytes());
        raw.extend_from_slice(b"4:info");
        raw.extend_from_slice(&info_raw);
        raw.push(b'e');
        (raw, info_raw)
    }

    #[test]
    fn test_parse_metainfo() {
        let mut pieces = Vec::new();
        pieces.extend_from_slice(&[0x11; 20]);
        pieces.extend_from_slice(&[0x22; 20]);
        let (raw, _) = sample_metainfo("http://tracker.example.com:6969/announce", "test.bin", &pieces);

        let meta_info: MetaInfo = serde_bencode::from_bytes(&raw).unwrap();

        assert_eq!(meta_info.announce, "http://tracker.example.com:6969/announce");
        assert_eq!(meta_info.info.name, "test.bin");
        assert_eq!(meta_info.info.length, 3000);
        assert_eq!(meta_info.info.piece_length, 2048);
        assert_eq!(
            meta_info.info.piece_hashes().unwrap(),
            vec![[0x11; 20], [0x22; 20]]
        );
    }

    #[test]
    fn test_info_reserializes_byte_identical() {
        let pieces = vec![0x5a; 40];
        let (raw, info_raw) = sample_metainfo("http://t/a", "x", &pieces);

        let meta_info: MetaInfo = serde_bencode::from_bytes(&raw).unwrap();
        let reencoded = serde_bencode::to_bytes(&meta_info.info).unwrap();

        assert_eq!(reencoded, info_raw);
    }

    #[test]
    fn test_info_hash_is_digest_of_info_dictionary() {
        let pieces = vec![0x5a; 20];
        let (raw, info_raw) = sample_metainfo("http://t/a", "x", &pieces);

        let meta_info: MetaInfo = serde_bencode::from_bytes(&raw).unwrap();

        assert_eq!(meta_info.info.hash().unwrap(), sha1_hash(&info_raw));
    }

    #[test]
    fn test_ragged_pieces_string_is_rejected() {
        let pieces = vec![0x5a; 30];
        let (raw, _) = sample_metainfo("http://t/a", "x", &pieces);

        let meta_info: MetaInfo = serde_bencode::from_bytes(&raw).unwrap();

        assert!(matches!(
            meta_info.info.piece_hashes(),
            Err(TorrentError::Setup(_))
        ));
    }
}
