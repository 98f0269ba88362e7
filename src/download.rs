use std::{
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};

use crossbeam::channel;

use crate::{
    config::Config, error::TorrentError, info::MetaInfo, rate::RateMeter, storage::ResumeData,
    util::timestr,
};

pub mod worker;

/// How often the collection loop wakes up to look at the killswitch.
const RESULT_POLL: Duration = Duration::from_millis(250);
/// Width of the rate meter's sliding window.
const RATE_WINDOW_SECS: u64 = 5;

/// One unit of work: a piece to fetch and verify. Returned to the queue on
/// any failure, so another worker can pick it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceWork {
    pub index: u32,
    pub hash: [u8; 20],
    pub length: u32,
}

/// A verified piece, handed back to the coordinator. Emitted at most once
/// per index.
#[derive(Debug)]
pub struct PieceResult {
    pub index: u32,
    pub buf: Vec<u8>,
}

/// Engine events, reported through the callback passed to
/// [`Torrent::download`]. Worker events carry the worker id that raised
/// them; `Progress` is emitted by the collection loop once per verified
/// piece.
#[derive(Clone, Debug)]
pub enum Event {
    Start,
    Worker(usize, worker::Event),
    Progress {
        percent: f64,
        piece_index: u32,
        active_peers: usize,
        rate: f64,
    },
    Finish,
}

/// Everything the engine needs to fetch one torrent: the metainfo digest
/// material, the swarm, and the configuration snapshot workers copy from.
pub struct Torrent {
    pub name: String,
    pub piece_hashes: Vec<[u8; 20]>,
    pub piece_length: u32,
    pub length: u64,
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub peers: Vec<SocketAddr>,
    pub config: Config,
}

impl Torrent {
    pub fn new(
        meta_info: &MetaInfo,
        peers: Vec<SocketAddr>,
        peer_id: [u8; 20],
        config: Config,
    ) -> Result<Self, TorrentError> {
        let piece_length = meta_info.info.piece_length;
        let length = meta_info.info.length;
        if piece_length == 0 {
            return Err(TorrentError::Setup("piece length cannot be zero".to_string()));
        }
        let piece_hashes = meta_info.info.piece_hashes()?;
        let expected = ((length + piece_length as u64 - 1) / piece_length as u64) as usize;
        if piece_hashes.len() != expected {
            return Err(TorrentError::Setup(format!(
                "{} piece hashes for a {length} byte file with {piece_length} byte pieces",
                piece_hashes.len()
            )));
        }
        Ok(Self {
            name: meta_info.info.name.clone(),
            piece_hashes,
            piece_length,
            length,
            info_hash: meta_info.info.hash()?,
            peer_id,
            peers,
            config,
        })
    }

    pub fn num_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte range `[begin, end)` that piece `index` occupies in the output.
    /// The last piece lands short of a full piece length.
    pub fn piece_bounds(&self, index: u32) -> (u64, u64) {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.length);
        (begin, end)
    }

    pub fn piece_size(&self, index: u32) -> u32 {
        let (begin, end) = self.piece_bounds(index);
        (end - begin) as u32
    }

    /// Runs the piece-fetch engine to completion and returns the assembled
    /// file. One worker per peer pulls [`PieceWork`] off a shared queue
    /// sized to hold every piece, so a dying worker can always hand its
    /// piece back without blocking. The collection loop owns the output
    /// buffer; each verified piece is copied into its disjoint range.
    ///
    /// Cancellation is cooperative: flipping `cancel` makes every worker
    /// close its socket and return, and the engine reports `Cancelled`
    /// (saving a resume snapshot first, when configured).
    pub fn download<F>(
        &self,
        cancel: Arc<AtomicBool>,
        event_callback: F,
    ) -> Result<Vec<u8>, TorrentError>
    where
        F: Fn(Event) + Send + Clone,
    {
        let verbose = self.config.verbose;
        let log = |msg: String| {
            if verbose {
                println!("[{}] {msg}", timestr());
            }
        };

        event_callback(Event::Start);
        log(format!(
            "Starting download for {} ({} pieces from {} peers)",
            self.name,
            self.num_pieces(),
            self.peers.len()
        ));

        let (work_send, work_recv) = channel::bounded::<PieceWork>(self.num_pieces());
        let (result_send, result_recv) = mpsc::channel::<PieceResult>();
        for (index, hash) in self.piece_hashes.iter().enumerate() {
            let work = PieceWork {
                index: index as u32,
                hash: *hash,
                length: self.piece_size(index as u32),
            };
            work_send.send(work).expect("work queue holds every piece");
        }

        let shutdown = AtomicBool::new(false);
        let active_workers = AtomicUsize::new(self.peers.len());

        let result = thread::scope(|scope| {
            for (worker_id, &address) in self.peers.iter().enumerate() {
                let work_send = work_send.clone();
                let work_recv = work_recv.clone();
                let result_send = result_send.clone();
                let cancel = cancel.clone();
                let shutdown = &shutdown;
                let active_workers = &active_workers;
                let event_callback = event_callback.clone();
                scope.spawn(move || {
                    worker::worker(
                        self,
                        worker_id,
                        address,
                        work_send,
                        work_recv,
                        result_send,
                        cancel,
                        shutdown,
                        |event| event_callback(Event::Worker(worker_id, event)),
                    );
                    active_workers.fetch_sub(1, Ordering::Relaxed);
                });
            }
            drop(result_send);

            self.collect(
                &result_recv,
                &cancel,
                &shutdown,
                &active_workers,
                &event_callback,
                &log,
            )
        });

        if result.is_ok() {
            log(format!("Finished downloading {}", self.name));
            event_callback(Event::Finish);
        }
        result
    }

    /// Receives verified pieces until the file is whole. Exclusive writer of
    /// the output buffer and the `completed` vector.
    fn collect<F>(
        &self,
        result_recv: &mpsc::Receiver<PieceResult>,
        cancel: &AtomicBool,
        shutdown: &AtomicBool,
        active_workers: &AtomicUsize,
        event_callback: &F,
        log: &impl Fn(String),
    ) -> Result<Vec<u8>, TorrentError>
    where
        F: Fn(Event) + Send + Clone,
    {
        let rate_meter = RateMeter::new(RATE_WINDOW_SECS);
        let mut buf = vec![0u8; self.length as usize];
        let mut completed = vec![false; self.num_pieces()];
        let mut done_pieces = 0usize;
        let mut downloaded_bytes = 0u64;

        while done_pieces < self.num_pieces() {
            if cancel.load(Ordering::Relaxed) {
                shutdown.store(true, Ordering::Relaxed);
                self.save_snapshot(&completed, downloaded_bytes, log);
                return Err(TorrentError::Cancelled);
            }
            let result = match result_recv.recv_timeout(RESULT_POLL) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    // every worker has exited with pieces still missing
                    shutdown.store(true, Ordering::Relaxed);
                    return Err(TorrentError::Network(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "all peer connections failed before the download finished",
                    )));
                }
            };

            let (begin, end) = self.piece_bounds(result.index);
            buf[begin as usize..end as usize].copy_from_slice(&result.buf);
            completed[result.index as usize] = true;
            done_pieces += 1;
            downloaded_bytes += result.buf.len() as u64;
            rate_meter.add(result.buf.len() as u64);

            let percent = done_pieces as f64 / self.num_pieces() as f64 * 100.0;
            let active_peers = active_workers.load(Ordering::Relaxed);
            log(format!(
                "({percent:.2}%) Downloaded piece #{} from {active_peers} peers",
                result.index
            ));
            event_callback(Event::Progress {
                percent,
                piece_index: result.index,
                active_peers,
                rate: rate_meter.rate(),
            });
        }

        shutdown.store(true, Ordering::Relaxed);
        Ok(buf)
    }

    fn save_snapshot(&self, completed: &[bool], downloaded_bytes: u64, log: &impl Fn(String)) {
        let Some(path) = &self.config.resume_path else {
            return;
        };
        let snapshot = ResumeData {
            info_hash: hex::encode(self.info_hash),
            completed_pieces: completed.to_vec(),
            downloaded_bytes,
        };
        match snapshot.save(path) {
            Ok(()) => log(format!("Saved resume snapshot to {}", path.display())),
            Err(err) => log(format!("Could not save resume snapshot: {err}")),
        }
    }
}
