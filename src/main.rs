use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use clap::{ArgAction, Parser};
use rand::{distributions::Alphanumeric, Rng};

use crate::{
    config::Config,
    download::{Event, Torrent},
    error::TorrentError,
    info::MetaInfo,
    storage::{write_output, ResumeData},
    tracker::query_tracker,
};

mod config;
mod download;
mod error;
mod info;
mod peer;
mod rate;
mod storage;
mod tracker;
mod util;

/// Single-file BitTorrent downloader
#[derive(Parser)]
#[clap(about, version)]
struct Args {
    /// File with torrent information
    #[arg(required = true)]
    torrent_file: PathBuf,

    /// Output file location
    #[arg(required = true)]
    output: PathBuf,

    /// Port reported to the tracker
    #[arg(short, long, default_value_t = 6881)]
    port: u16,

    /// Where to store a snapshot if the download is interrupted
    #[arg(short, long)]
    resume: Option<PathBuf>,

    /// Print verbose logging information
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<(), TorrentError> {
    let args = Args::parse();

    let config = Config {
        port: args.port,
        verbose: args.verbose,
        resume_path: args.resume,
        ..Config::default()
    };

    let meta_info = MetaInfo::from_file(&args.torrent_file)?;
    let peer_id = generate_peer_id();

    let response = query_tracker(&meta_info, &peer_id, &config)?;
    let peers = response.peers()?;
    if peers.is_empty() {
        return Err(TorrentError::Setup("tracker returned no peers".to_string()));
    }

    let torrent = Torrent::new(&meta_info, peers, peer_id, config)?;
    report_stale_snapshot(&torrent)?;

    println!("Downloading {}", torrent.name);
    let cancel = Arc::new(AtomicBool::new(false));
    let buf = torrent.download(cancel, |event| {
        if let Event::Progress {
            percent,
            piece_index,
            active_peers,
            rate,
        } = event
        {
            println!(
                "({percent:.2}%) Downloaded piece #{piece_index} from {active_peers} peers ({:.1} KiB/s)",
                rate / 1024.0
            );
        }
    })?;

    write_output(&args.output, &buf)?;
    println!(
        "Downloaded {} to {}.",
        args.torrent_file.display(),
        args.output.display()
    );
    Ok(())
}

/// A snapshot from an earlier cancelled run is informational only; report
/// what it held, then clear it so this run starts fresh.
fn report_stale_snapshot(torrent: &Torrent) -> Result<(), TorrentError> {
    let Some(path) = &torrent.config.resume_path else {
        return Ok(());
    };
    if !ResumeData::exists(path) {
        return Ok(());
    }
    if let Ok(snapshot) = ResumeData::load(path) {
        if snapshot.info_hash == hex::encode(torrent.info_hash) {
            let done = snapshot
                .completed_pieces
                .iter()
                .filter(|&&complete| complete)
                .count();
            println!(
                "Found snapshot with {done}/{} pieces verified; restarting from scratch",
                torrent.num_pieces()
            );
        }
    }
    ResumeData::delete(path)
}

fn generate_peer_id() -> [u8; 20] {
    let id: Vec<u8> = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .collect();
    id.try_into().expect("sampled exactly 20 bytes")
}
