use std::io::{Read, Write};

use crate::{error::TorrentError, protocol_error};

pub const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";

/// Fixed-layout prologue identifying the protocol, the torrent (info-hash),
/// and the remote (peer-id). 68 bytes on the wire for the canonical `pstr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(49 + PROTOCOL_ID.len());
        buf.push(PROTOCOL_ID.len() as u8);
        buf.extend_from_slice(PROTOCOL_ID);
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);
        buf
    }

    pub fn write_to(&self, stream: &mut impl Write) -> Result<(), TorrentError> {
        stream.write_all(&self.encode())?;
        Ok(())
    }

    /// Reads a handshake off the stream. The protocol identifier may be any
    /// non-empty string; the reserved bytes are ignored.
    pub fn read_from(stream: &mut impl Read) -> Result<Self, TorrentError> {
        let mut len_buf = [0u8; 1];
        stream.read_exact(&mut len_buf)?;
        let pstrlen = len_buf[0] as usize;
        if pstrlen == 0 {
            return Err(protocol_error!("handshake pstrlen cannot be zero"));
        }

        let mut rest = vec![0u8; pstrlen + 48];
        stream.read_exact(&mut rest)?;

        let mut info_hash = [0u8; 20];
        let mut peer_id = [0u8; 20];
        info_hash.copy_from_slice(&rest[pstrlen + 8..pstrlen + 28]);
        peer_id.copy_from_slice(&rest[pstrlen + 28..]);
        Ok(Self { info_hash, peer_id })
    }
}

/// One length-prefixed wire message. A zero-length frame decodes to
/// `Keepalive`; ids outside the base protocol decode to `Unknown`, which the
/// download loop treats as a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Keepalive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece(PieceData),
    Cancel { index: u32, begin: u32, length: u32 },
    Unknown(u8),
}

/// Payload of a Piece message: one block of a piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceData {
    pub index: u32,
    pub begin: u32,
    pub block: Vec<u8>,
}

impl PieceData {
    /// Copies this block into `buf` at its `begin` offset, after checking
    /// that it belongs to `expected_index` and fits the buffer. Returns the
    /// number of bytes copied.
    pub fn copy_into(&self, expected_index: u32, buf: &mut [u8]) -> Result<usize, TorrentError> {
        if self.index != expected_index {
            return Err(protocol_error!(
                "piece index {} does not match expected {expected_index}",
                self.index
            ));
        }
        let begin = self.begin as usize;
        if begin >= buf.len() {
            return Err(protocol_error!(
                "block offset {begin} out of range for piece of {} bytes",
                buf.len()
            ));
        }
        if begin + self.block.len() > buf.len() {
            return Err(protocol_error!(
                "block of {} bytes at offset {begin} overruns piece of {} bytes",
                self.block.len(),
                buf.len()
            ));
        }
        buf[begin..begin + self.block.len()].copy_from_slice(&self.block);
        Ok(self.block.len())
    }
}

impl Message {
    /// Decodes a message body (id byte plus payload, length prefix already
    /// stripped). An empty body is a keep-alive.
    pub fn decode(bytes: &[u8]) -> Result<Self, TorrentError> {
        let Some(&id) = bytes.first() else {
            return Ok(Self::Keepalive);
        };
        let payload = &bytes[1..];
        match id {
            0 => Ok(Self::Choke),
            1 => Ok(Self::Unchoke),
            2 => Ok(Self::Interested),
            3 => Ok(Self::NotInterested),
            4 => {
                if payload.len() != 4 {
                    return Err(protocol_error!(
                        "have payload must be 4 bytes, got {}",
                        payload.len()
                    ));
                }
                Ok(Self::Have(read_u32(payload)?))
            }
            5 => Ok(Self::Bitfield(payload.to_vec())),
            6 => {
                let (index, begin, length) = read_request_payload(payload)?;
                Ok(Self::Request {
                    index,
                    begin,
                    length,
                })
            }
            7 => {
                if payload.len() < 8 {
                    return Err(protocol_error!(
                        "piece payload too short: {} bytes",
                        payload.len()
                    ));
                }
                Ok(Self::Piece(PieceData {
                    index: read_u32(&payload[0..4])?,
                    begin: read_u32(&payload[4..8])?,
                    block: payload[8..].to_vec(),
                }))
            }
            8 => {
                let (index, begin, length) = read_request_payload(payload)?;
                Ok(Self::Cancel {
                    index,
                    begin,
                    length,
                })
            }
            id => Ok(Self::Unknown(id)),
        }
    }

    /// Encodes the full frame, length prefix included.
    pub fn encode(&self) -> Vec<u8> {
        let body: Vec<u8> = match self {
            Self::Keepalive => vec![],
            Self::Choke => vec![0],
            Self::Unchoke => vec![1],
            Self::Interested => vec![2],
            Self::NotInterested => vec![3],
            Self::Have(index) => vec![4].into_iter().chain(index.to_be_bytes()).collect(),
            Self::Bitfield(bits) => vec![5].into_iter().chain(bits.iter().copied()).collect(),
            Self::Request {
                index,
                begin,
                length,
            } => vec![6]
                .into_iter()
                .chain(index.to_be_bytes())
                .chain(begin.to_be_bytes())
                .chain(length.to_be_bytes())
                .collect(),
            Self::Piece(piece) => vec![7]
                .into_iter()
                .chain(piece.index.to_be_bytes())
                .chain(piece.begin.to_be_bytes())
                .chain(piece.block.iter().copied())
                .collect(),
            Self::Cancel {
                index,
                begin,
                length,
            } => vec![8]
                .into_iter()
                .chain(index.to_be_bytes())
                .chain(begin.to_be_bytes())
                .chain(length.to_be_bytes())
                .collect(),
            Self::Unknown(id) => vec![*id],
        };
        (body.len() as u32)
            .to_be_bytes()
            .into_iter()
            .chain(body)
            .collect()
    }

    /// Reads one length-prefixed frame off the stream.
    pub fn read_from(stream: &mut impl Read) -> Result<Self, TorrentError> {
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf)?;
        let length = u32::from_be_bytes(len_buf) as usize;
        if length == 0 {
            return Ok(Self::Keepalive);
        }
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body)?;
        Self::decode(&body)
    }
}

fn read_u32(bytes: &[u8]) -> Result<u32, TorrentError> {
    bytes
        .get(..4)
        .and_then(|slice| slice.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| protocol_error!("message payload truncated"))
}

fn read_request_payload(payload: &[u8]) -> Result<(u32, u32, u32), TorrentError> {
    if payload.len() != 12 {
        return Err(protocol_error!(
            "request payload must be 12 bytes, got {}",
            payload.len()
        ));
    }
    Ok((
        read_u32(&payload[0..4])?,
        read_u32(&payload[4..8])?,
        read_u32(&payload[8..12])?,
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_handshake_round_trip() {
        let handshake = Handshake::new([0xab; 20], *b"-BF0001-012345678901");
        let encoded = handshake.encode();

        assert_eq!(encoded.len(), 68);
        assert_eq!(encoded[0], 19);
        assert_eq!(&encoded[1..20], PROTOCOL_ID);
        assert_eq!(&encoded[20..28], &[0u8; 8]);

        let decoded = Handshake::read_from(&mut Cursor::new(encoded)).unwrap();
        assert_eq!(decoded, handshake);
    }

    #[test]
    fn test_handshake_rejects_zero_pstrlen() {
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(&[0u8; 67]);

        let result = Handshake::read_from(&mut Cursor::new(bytes));
        assert!(matches!(result, Err(TorrentError::Protocol(_))));
    }

    #[test]
    fn test_handshake_rejects_truncated_stream() {
        let handshake = Handshake::new([1; 20], [2; 20]);
        let encoded = handshake.encode();

        let result = Handshake::read_from(&mut Cursor::new(&encoded[..40]));
        assert!(matches!(result, Err(TorrentError::Network(_))));
    }

    #[test]
    fn test_message_round_trips() {
        let messages = vec![
            Message::Keepalive,
            Message::Choke,
            Message::Unchoke,
            Message::Interested,
            Message::NotInterested,
            Message::Have(42),
            Message::Bitfield(vec![0b10100000, 0b00000001]),
            Message::Request {
                index: 1,
                begin: 16384,
                length: 16384,
            },
            Message::Piece(PieceData {
                index: 3,
                begin: 32768,
                block: vec![0xaa; 64],
            }),
            Message::Cancel {
                index: 1,
                begin: 16384,
                length: 16384,
            },
        ];

        for message in messages {
            let decoded = Message::read_from(&mut Cursor::new(message.encode())).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_keepalive_is_four_zero_bytes() {
        assert_eq!(Message::Keepalive.encode(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_unknown_id_decodes_to_unknown() {
        let decoded = Message::decode(&[20, 1, 2, 3]).unwrap();
        assert_eq!(decoded, Message::Unknown(20));
    }

    #[test]
    fn test_have_requires_four_byte_payload() {
        assert!(Message::decode(&[4, 0, 0, 1]).is_err());
        assert!(Message::decode(&[4, 0, 0, 0, 1, 0]).is_err());
    }

    #[test]
    fn test_request_requires_twelve_byte_payload() {
        assert!(Message::decode(&[6, 0, 0, 0, 1]).is_err());
    }

    #[test]
    fn test_piece_requires_index_and_begin() {
        assert!(Message::decode(&[7, 0, 0, 0, 1, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_copy_into_fills_buffer_at_offset() {
        let piece = PieceData {
            index: 2,
            begin: 4,
            block: vec![1, 2, 3, 4],
        };
        let mut buf = vec![0u8; 10];

        let n = piece.copy_into(2, &mut buf).unwrap();

        assert_eq!(n, 4);
        assert_eq!(buf, vec![0, 0, 0, 0, 1, 2, 3, 4, 0, 0]);
    }

    #[test]
    fn test_copy_into_rejects_wrong_index() {
        let piece = PieceData {
            index: 2,
            begin: 0,
            block: vec![1],
        };
        let mut buf = vec![0u8; 10];

        assert!(piece.copy_into(3, &mut buf).is_err());
    }

    #[test]
    fn test_copy_into_rejects_offset_past_end() {
        let piece = PieceData {
            index: 0,
            begin: 10,
            block: vec![1],
        };
        let mut buf = vec![0u8; 10];

        assert!(piece.copy_into(0, &mut buf).is_err());
    }

    #[test]
    fn test_copy_into_rejects_overrun() {
        let piece = PieceData {
            index: 0,
            begin: 8,
            block: vec![1, 2, 3],
        };
        let mut buf = vec![0u8; 10];

        assert!(piece.copy_into(0, &mut buf).is_err());
    }
}
