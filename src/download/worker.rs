use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    config::Config,
    error::TorrentError,
    peer::{client::PeerClient, message::Message},
    util::{sha1_hash, timestr},
};

use super::{PieceResult, PieceWork, Torrent};

/// How often a worker blocked on the work queue wakes up to look at the
/// killswitch and the shutdown flag.
const QUEUE_POLL: Duration = Duration::from_millis(250);

/// Worker lifecycle events, reported through the engine's event callback.
#[derive(Clone, Debug)]
pub enum Event {
    HandshakeFailed,
    HandshakeSuccess,
    PieceFailed(u32),
    PieceDownloaded(u32),
}

/// Mutable state for the piece currently in flight: the reassembly buffer,
/// how much of it has arrived, how much has been asked for, and how many
/// requests are outstanding.
struct PieceProgress {
    buf: Vec<u8>,
    downloaded: u32,
    requested: u32,
    backlog: u32,
}

/// Drives one peer connection until the queue drains, the connection
/// poisons, or the engine shuts down. Any piece in flight when the worker
/// dies goes back on the queue for someone else.
#[allow(clippy::too_many_arguments)]
pub fn worker<F>(
    torrent: &Torrent,
    worker_id: usize,
    address: SocketAddr,
    work_send: Sender<PieceWork>,
    work_recv: Receiver<PieceWork>,
    result_send: mpsc::Sender<PieceResult>,
    cancel: Arc<AtomicBool>,
    shutdown: &AtomicBool,
    event_callback: F,
) where
    F: Fn(Event),
{
    let verbose = torrent.config.verbose;
    let log = |msg: String| {
        if verbose {
            println!("[{}][{worker_id}] {msg}", timestr());
        }
    };

    let result = run(
        torrent,
        address,
        &work_send,
        &work_recv,
        &result_send,
        &cancel,
        shutdown,
        &log,
        &event_callback,
    );
    match result {
        Ok(()) => log("Exiting".to_string()),
        Err(err) => log(format!("Exiting: {err}")),
    }
}

#[allow(clippy::too_many_arguments)]
fn run<F>(
    torrent: &Torrent,
    address: SocketAddr,
    work_send: &Sender<PieceWork>,
    work_recv: &Receiver<PieceWork>,
    result_send: &mpsc::Sender<PieceResult>,
    cancel: &Arc<AtomicBool>,
    shutdown: &AtomicBool,
    log: &impl Fn(String),
    event_callback: &F,
) -> Result<(), TorrentError>
where
    F: Fn(Event),
{
    let mut client = match PeerClient::connect(
        address,
        torrent.peer_id,
        torrent.info_hash,
        &torrent.config,
        cancel.clone(),
    ) {
        Ok(client) => client,
        Err(err) => {
            log(format!("Could not handshake with {address}: {err}"));
            event_callback(Event::HandshakeFailed);
            return Ok(());
        }
    };
    log(format!("Successful handshake with {address}"));
    event_callback(Event::HandshakeSuccess);

    client.send_unchoke()?;
    client.send_interested()?;

    loop {
        if cancel.load(Ordering::Relaxed) || shutdown.load(Ordering::Relaxed) {
            return Ok(());
        }
        let work = match work_recv.recv_timeout(QUEUE_POLL) {
            Ok(work) => work,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        };

        if !client.bitfield.has_piece(work.index as usize) {
            requeue(work_send, work);
            continue;
        }

        log(format!("Downloading piece #{} from {address}", work.index));
        let buf = match download_piece(&mut client, &work, &torrent.config) {
            Ok(buf) => buf,
            Err(err @ TorrentError::Integrity { index }) => {
                log(format!("Piece #{index} from {address}: {err}"));
                event_callback(Event::PieceFailed(index));
                requeue(work_send, work);
                continue;
            }
            Err(err) => {
                event_callback(Event::PieceFailed(work.index));
                requeue(work_send, work);
                return Err(err);
            }
        };

        if client.send_have(work.index).is_err() {
            log(format!("Could not announce piece #{} to {address}", work.index));
        }
        event_callback(Event::PieceDownloaded(work.index));
        if result_send
            .send(PieceResult {
                index: work.index,
                buf,
            })
            .is_err()
        {
            // the collector is gone; nothing left to deliver to
            return Ok(());
        }
    }
}

fn requeue(work_send: &Sender<PieceWork>, work: PieceWork) {
    // capacity equals the piece count, so this never blocks
    let _ = work_send.send(work);
}

/// Fetches one piece over an established connection, pipelining block
/// requests up to the configured backlog, and verifies the digest. The whole
/// exchange runs under a single deadline so a stalled peer cannot pin the
/// worker.
fn download_piece(
    client: &mut PeerClient,
    work: &PieceWork,
    config: &Config,
) -> Result<Vec<u8>, TorrentError> {
    let mut progress = PieceProgress {
        buf: vec![0u8; work.length as usize],
        downloaded: 0,
        requested: 0,
        backlog: 0,
    };

    client.set_deadline(Some(Instant::now() + config.piece_timeout));

    while progress.downloaded < work.length {
        if !client.choked {
            while progress.backlog < config.request_backlog && progress.requested < work.length {
                let block_size = config.block_size.min(work.length - progress.requested);
                client.send_request(work.index, progress.requested, block_size)?;
                progress.backlog += 1;
                progress.requested += block_size;
            }
        }

        match client.read()? {
            Message::Unchoke => client.choked = false,
            Message::Choke => client.choked = true,
            Message::Have(index) => client.bitfield.set_piece(index as usize),
            Message::Piece(piece) => {
                let n = piece.copy_into(work.index, &mut progress.buf)?;
                progress.downloaded += n as u32;
                progress.backlog = progress.backlog.saturating_sub(1);
            }
            _ => {}
        }
    }

    client.set_deadline(None);

    if sha1_hash(&progress.buf) != work.hash {
        return Err(TorrentError::Integrity { index: work.index });
    }

    Ok(progress.buf)
}
