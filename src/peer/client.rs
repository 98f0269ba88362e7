use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crate::{
    config::Config,
    error::TorrentError,
    peer::{
        bitfield::Bitfield,
        message::{Handshake, Message},
    },
    protocol_error,
};

/// How often a blocked socket read wakes up to look at the killswitch.
const READ_POLL: Duration = Duration::from_millis(250);

/// One live peer connection. Owns the socket from successful handshake until
/// drop; the remote's availability bitfield and choke state live here. The
/// socket is closed on every exit path when the client is dropped.
pub struct PeerClient {
    #[allow(unused)]
    pub address: SocketAddr,
    pub bitfield: Bitfield,
    pub choked: bool,
    stream: TcpStream,
    deadline: Option<Instant>,
    killswitch: Arc<AtomicBool>,
}

impl PeerClient {
    /// Dials the peer and runs the connection prologue: handshake exchange,
    /// then exactly one message which must be the peer's bitfield. Both steps
    /// run under `config.handshake_timeout`; the dial itself under
    /// `config.tcp_timeout`.
    pub fn connect(
        address: SocketAddr,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        config: &Config,
        killswitch: Arc<AtomicBool>,
    ) -> Result<Self, TorrentError> {
        let stream = TcpStream::connect_timeout(&address, config.tcp_timeout)?;
        stream.set_write_timeout(Some(config.handshake_timeout))?;

        let mut client = PeerClient {
            address,
            bitfield: Bitfield::default(),
            choked: true,
            stream,
            deadline: None,
            killswitch,
        };

        client.set_deadline(Some(Instant::now() + config.handshake_timeout));
        client.exchange_handshake(peer_id, info_hash)?;
        client.set_deadline(None);

        client.set_deadline(Some(Instant::now() + config.handshake_timeout));
        client.receive_bitfield()?;
        client.set_deadline(None);

        Ok(client)
    }

    /// Arms or clears the deadline that bounds every subsequent read.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Reads the next frame. `Keepalive` means the peer only sent a
    /// heartbeat; callers treat it as a no-op.
    pub fn read(&mut self) -> Result<Message, TorrentError> {
        Message::read_from(self)
    }

    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<(), TorrentError> {
        self.send(Message::Request {
            index,
            begin,
            length,
        })
    }

    pub fn send_interested(&mut self) -> Result<(), TorrentError> {
        self.send(Message::Interested)
    }

    #[allow(unused)]
    pub fn send_not_interested(&mut self) -> Result<(), TorrentError> {
        self.send(Message::NotInterested)
    }

    pub fn send_unchoke(&mut self) -> Result<(), TorrentError> {
        self.send(Message::Unchoke)
    }

    pub fn send_have(&mut self, index: u32) -> Result<(), TorrentError> {
        self.send(Message::Have(index))
    }

    fn send(&mut self, message: Message) -> Result<(), TorrentError> {
        self.stream.write_all(&message.encode())?;
        Ok(())
    }

    fn exchange_handshake(
        &mut self,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
    ) -> Result<(), TorrentError> {
        Handshake::new(info_hash, peer_id).write_to(&mut self.stream)?;
        let response = Handshake::read_from(self)?;
        if response.info_hash != info_hash {
            return Err(protocol_error!(
                "peer info hash does not match: expected {}, got {}",
                hex::encode(info_hash),
                hex::encode(response.info_hash)
            ));
        }
        Ok(())
    }

    fn receive_bitfield(&mut self) -> Result<(), TorrentError> {
        match self.read()? {
            Message::Bitfield(bytes) => {
                self.bitfield = Bitfield::new(bytes);
                Ok(())
            }
            message => Err(protocol_error!("expected bitfield, got {message:?}")),
        }
    }
}

// Reads poll in short slices so a stalled peer cannot hold the worker past
// its deadline, and so cancellation is observed even mid-read.
impl Read for PeerClient {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.killswitch.load(Ordering::Relaxed) {
                return Err(io::Error::new(io::ErrorKind::Other, "download cancelled"));
            }
            let timeout = match self.deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "peer deadline expired",
                        ));
                    }
                    remaining.min(READ_POLL)
                }
                None => READ_POLL,
            };
            self.stream.set_read_timeout(Some(timeout))?;
            match self.stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    continue
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread, time::Duration};

    use super::*;

    const LOCAL_ID: [u8; 20] = *b"-BF0001-aaaaaaaaaaaa";
    const REMOTE_ID: [u8; 20] = *b"-BF0001-bbbbbbbbbbbb";

    fn test_config() -> Config {
        Config {
            handshake_timeout: Duration::from_secs(2),
            tcp_timeout: Duration::from_secs(2),
            piece_timeout: Duration::from_secs(2),
            ..Config::default()
        }
    }

    fn spawn_remote(
        responder: impl FnOnce(&mut TcpStream) + Send + 'static,
    ) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                responder(&mut stream);
            }
        });
        address
    }

    fn read_handshake(stream: &mut TcpStream) -> Handshake {
        Handshake::read_from(stream).unwrap()
    }

    #[test]
    fn test_connect_receives_bitfield() {
        let info_hash = [0x11; 20];
        let address = spawn_remote(move |stream| {
            let received = read_handshake(stream);
            Handshake::new(received.info_hash, REMOTE_ID)
                .write_to(stream)
                .unwrap();
            stream
                .write_all(&Message::Bitfield(vec![0b10100000]).encode())
                .unwrap();
        });

        let killswitch = Arc::new(AtomicBool::new(false));
        let client =
            PeerClient::connect(address, LOCAL_ID, info_hash, &test_config(), killswitch).unwrap();

        assert!(client.choked);
        assert!(client.bitfield.has_piece(0));
        assert!(!client.bitfield.has_piece(1));
        assert!(client.bitfield.has_piece(2));
    }

    #[test]
    fn test_connect_rejects_info_hash_mismatch() {
        let address = spawn_remote(|stream| {
            let _ = read_handshake(stream);
            Handshake::new([0x99; 20], REMOTE_ID).write_to(stream).unwrap();
        });

        let killswitch = Arc::new(AtomicBool::new(false));
        let result =
            PeerClient::connect(address, LOCAL_ID, [0x11; 20], &test_config(), killswitch);

        assert!(matches!(result, Err(TorrentError::Protocol(_))));
    }

    #[test]
    fn test_connect_rejects_message_other_than_bitfield() {
        let info_hash = [0x11; 20];
        let address = spawn_remote(move |stream| {
            let received = read_handshake(stream);
            Handshake::new(received.info_hash, REMOTE_ID)
                .write_to(stream)
                .unwrap();
            stream.write_all(&Message::Unchoke.encode()).unwrap();
        });

        let killswitch = Arc::new(AtomicBool::new(false));
        let result =
            PeerClient::connect(address, LOCAL_ID, info_hash, &test_config(), killswitch);

        assert!(matches!(result, Err(TorrentError::Protocol(_))));
    }

    #[test]
    fn test_read_times_out_against_silent_peer() {
        let info_hash = [0x11; 20];
        let address = spawn_remote(move |stream| {
            let received = read_handshake(stream);
            Handshake::new(received.info_hash, REMOTE_ID)
                .write_to(stream)
                .unwrap();
            stream
                .write_all(&Message::Bitfield(vec![0b10000000]).encode())
                .unwrap();
            // then go quiet until the client gives up
            thread::sleep(Duration::from_secs(3));
        });

        let killswitch = Arc::new(AtomicBool::new(false));
        let mut client =
            PeerClient::connect(address, LOCAL_ID, info_hash, &test_config(), killswitch).unwrap();

        client.set_deadline(Some(Instant::now() + Duration::from_millis(400)));
        let result = client.read();

        assert!(matches!(result, Err(TorrentError::Network(_))));
    }
}
