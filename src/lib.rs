//! # tinytorrent
//!
//! A minimal BitTorrent client core.
//!
//! ## Features
//!
//! - Bencode codec with canonical re-encoding
//! - Torrent metadata parsing and info-hash computation
//! - HTTP tracker announce with compact peer lists
//! - Peer wire handshake and single-piece download from one peer
//!
//! ## Architecture
//!
//! Data flows strictly downward, each step a blocking call:
//!
//! - **bencode**: raw bytes to [`bencode::Value`] and back
//! - **torrent**: [`Torrent`] metadata and info-hash
//! - **tracker**: announce, decompact the peer list
//! - **client** / **worker**: TCP session, handshake, piece download
//!
//! Nothing is shared between calls except the read-only [`Torrent`], so
//! downloads of different pieces may run on separate threads.

#[macro_use]
extern crate log;

pub mod bencode;
pub mod client;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece;
pub mod torrent;
pub mod tracker;
pub mod worker;

pub use client::Client;
pub use error::{Error, Result};
pub use peer::{PeerAddress, PeerId};
pub use torrent::Torrent;
pub use tracker::{TrackerClient, TrackerResponse};
pub use worker::{download_piece, Worker};
