//! # tinytorrent
//!
//! Command-line front end of the tinytorrent core.
//!
//! ## Usage
//!
//! ```bash
//! tinytorrent decode <bencoded value>
//! tinytorrent info <torrent_file>
//! tinytorrent peers <torrent_file>
//! tinytorrent handshake <torrent_file> <ip:port>
//! tinytorrent download_piece -o <output_file> <torrent_file> <piece_index>
//! ```

#[macro_use]
extern crate log;

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tinytorrent::bencode;
use tinytorrent::*;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "A minimal command-line BitTorrent client, written in Rust."
)]
struct Args {
    /// Timeout in seconds for tracker and peer I/O (default: wait forever)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// 20-character peer ID to announce (default: randomly generated)
    #[arg(long, global = true)]
    peer_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode { value: String },

    /// Print torrent metadata
    Info { torrent: PathBuf },

    /// Ask the tracker for peers
    Peers { torrent: PathBuf },

    /// Handshake with a peer and print its peer ID
    Handshake {
        torrent: PathBuf,
        /// Peer address as ip:port
        peer: String,
    },

    /// Download one piece from a peer returned by the tracker
    #[command(name = "download_piece")]
    DownloadPiece {
        /// Output filename
        #[arg(short = 'o', long)]
        output: PathBuf,

        torrent: PathBuf,

        index: u32,

        /// Position of the peer in the tracker's list
        #[arg(long, default_value_t = 0)]
        peer: usize,

        /// Check the piece against its SHA-1 hash before saving it
        #[arg(long)]
        verify: bool,
    },
}

fn open_torrent(path: &Path) -> Result<Torrent> {
    Torrent::open(path).with_context(|| format!("could not load torrent {:?}", path))
}

fn run(args: Args) -> Result<()> {
    let timeout = args.timeout.map(Duration::from_secs);
    let peer_id = match args.peer_id.as_deref() {
        Some(id) => id.parse::<PeerId>()?,
        None => PeerId::from_clock(),
    };

    match args.command {
        Command::Decode { value } => {
            let (decoded, _) = bencode::decode(value.as_bytes())?;
            println!("{}", serde_json::to_string(&decoded)?);
        }
        Command::Info { torrent } => {
            let torrent = open_torrent(&torrent)?;
            println!("Tracker URL: {}", torrent.announce);
            println!("Length: {}", torrent.length);
            println!("Info Hash: {}", torrent.info_hash_hex());
            println!("Piece Length: {}", torrent.piece_length);
            println!("Piece Hashes:");
            for hash in torrent.piece_hashes_hex() {
                println!("{}", hash);
            }
        }
        Command::Peers { torrent } => {
            let torrent = open_torrent(&torrent)?;
            let response = TrackerClient::new(timeout)?.discover_peers(&torrent, &peer_id)?;
            for peer in response.peers {
                println!("{}", peer);
            }
        }
        Command::Handshake { torrent, peer } => {
            let torrent = open_torrent(&torrent)?;
            let peer: PeerAddress = peer.parse()?;
            let mut client = Client::connect(peer, timeout)
                .with_context(|| format!("could not connect to peer {}", peer))?;
            let remote_id = client.handshake(torrent.info_hash, peer_id)?;
            println!("Peer ID: {}", remote_id.to_hex());
        }
        Command::DownloadPiece {
            output,
            torrent,
            index,
            peer,
            verify,
        } => {
            let torrent = open_torrent(&torrent)?;
            let response = TrackerClient::new(timeout)?.discover_peers(&torrent, &peer_id)?;
            let address = *response.peers.get(peer).ok_or_else(|| {
                anyhow!(
                    "tracker returned {} peers, no peer at position {}",
                    response.peers.len(),
                    peer
                )
            })?;

            let data = download_piece(&torrent, address, peer_id, index, timeout)
                .with_context(|| format!("could not download piece {} from {}", index, address))?;

            if verify {
                torrent.verify_piece(index, &data)?;
            }

            let mut output_file = File::create(&output)
                .with_context(|| format!("could not create output file {:?}", output))?;
            output_file
                .write_all(&data)
                .with_context(|| format!("could not write data to file {:?}", output))?;

            info!("Wrote {} bytes to {:?}", data.len(), output);
            println!("Piece {} downloaded to {}.", index, output.display());
        }
    }

    Ok(())
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}
