//! # Torrent Metadata
//!
//! This module parses `.torrent` files into [`Torrent`] and derives the
//! info-hash that identifies the swarm.
//!
//! ## Torrent File Format
//!
//! Torrent files are bencoded dictionaries:
//!
//! - **announce**: Tracker URL for peer discovery
//! - **info**: Dictionary with file information and piece hashes
//!   - **name**: Suggested filename
//!   - **length**: Total file size
//!   - **piece length**: Size of each piece (the last one may be shorter)
//!   - **pieces**: Concatenated 20-byte SHA-1 hashes, one per piece
//!
//! ## Info Hash
//!
//! The info-hash is the SHA-1 of the *re-encoded* info dictionary, never of
//! the raw slice of the source file. Decoding sorts dictionary keys, so a
//! file written by a sloppy encoder still hashes to what the tracker and the
//! peers expect.

use crate::bencode::{self, Value};
use crate::error::{Error, Result};

use sha1::{Digest, Sha1};
use url::Url;

use std::fs;
use std::path::Path;

// Size of SHA-1 hash in bytes
pub const SHA1_HASH_SIZE: usize = 20;

/// Metadata of a single-file torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Torrent {
    /// Tracker URL
    pub announce: String,
    /// Suggested filename, lossily decoded as UTF-8
    pub name: String,
    /// Size of each piece in bytes (except possibly the last)
    pub piece_length: u64,
    /// Total size of the file in bytes
    pub length: u64,
    /// One SHA-1 hash per piece
    pub piece_hashes: Vec<[u8; SHA1_HASH_SIZE]>,
    /// SHA-1 hash of the bencoded info dictionary
    pub info_hash: [u8; SHA1_HASH_SIZE],
}

impl Torrent {
    /// Reads and parses a torrent file.
    pub fn open<P: AsRef<Path>>(filepath: P) -> Result<Torrent> {
        let filepath = filepath.as_ref();
        let buf = fs::read(filepath)?;
        debug!("Read {} bytes from {:?}", buf.len(), filepath);
        Torrent::from_bytes(&buf)
    }

    /// Parses the bencoded content of a torrent file.
    pub fn from_bytes(buf: &[u8]) -> Result<Torrent> {
        let (root, rest) = bencode::decode(buf)?;
        if !rest.is_empty() {
            debug!("Ignoring {} bytes after torrent dictionary", rest.len());
        }
        root.dict()?;

        let announce = root.require("announce")?.str()?.to_string();
        if Url::parse(&announce).is_err() {
            return Err(Error::format(format!("invalid announce url {:?}", announce)));
        }

        let info = root.require("info")?;
        info.dict()?;

        // Legacy torrents may carry non-UTF-8 names
        let name = String::from_utf8_lossy(info.require("name")?.bytes()?).into_owned();

        let length = info.require("length")?.integer()?;
        let length = u64::try_from(length)
            .map_err(|_| Error::format(format!("negative length {}", length)))?;

        let piece_length = info.require("piece length")?.integer()?;
        if piece_length <= 0 {
            return Err(Error::format(format!(
                "piece length must be positive, got {}",
                piece_length
            )));
        }
        let piece_length = piece_length as u64;
        if piece_length > u32::MAX as u64 {
            return Err(Error::format(format!("piece length {} too large", piece_length)));
        }

        let piece_hashes = split_pieces_hashes(info.require("pieces")?.bytes()?)?;

        let expected = length.div_ceil(piece_length);
        if piece_hashes.len() as u64 != expected {
            return Err(Error::format(format!(
                "torrent has {} piece hashes, expected {}",
                piece_hashes.len(),
                expected
            )));
        }

        let info_hash = hash_info(info);

        Ok(Torrent {
            announce,
            name,
            piece_length,
            length,
            piece_hashes,
            info_hash,
        })
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Size in bytes of the piece at `index`.
    ///
    /// Every piece is `piece_length` long except the last, which holds the
    /// remainder of the file. If the length divides evenly the last piece is
    /// a full `piece_length`, not zero.
    pub fn piece_size(&self, index: u32) -> Result<u32> {
        let count = self.piece_count();
        if index >= count {
            return Err(Error::format(format!(
                "piece index {} out of range (torrent has {} pieces)",
                index, count
            )));
        }

        if index == count - 1 {
            let remainder = self.length % self.piece_length;
            if remainder != 0 {
                return Ok(remainder as u32);
            }
        }

        Ok(self.piece_length as u32)
    }

    /// Byte offset of the piece at `index` within the file.
    pub fn piece_offset(&self, index: u32) -> u64 {
        index as u64 * self.piece_length
    }

    pub fn info_hash_hex(&self) -> String {
        hex::encode(self.info_hash)
    }

    pub fn piece_hashes_hex(&self) -> Vec<String> {
        self.piece_hashes.iter().map(hex::encode).collect()
    }

    /// Checks downloaded piece data against its SHA-1 hash.
    pub fn verify_piece(&self, index: u32, data: &[u8]) -> Result<()> {
        let expected = self.piece_hashes.get(index as usize).ok_or_else(|| {
            Error::format(format!("piece index {} out of range", index))
        })?;

        let hash: [u8; SHA1_HASH_SIZE] = Sha1::digest(data).into();
        if &hash != expected {
            return Err(Error::protocol(format!(
                "piece {} hash mismatch: expected {}, got {}",
                index,
                hex::encode(expected),
                hex::encode(hash)
            )));
        }

        info!("Successfully verified integrity of piece {:?}", index);

        Ok(())
    }
}

/// Hashes the canonical encoding of the info dictionary.
fn hash_info(info: &Value) -> [u8; SHA1_HASH_SIZE] {
    Sha1::digest(bencode::encode(info)).into()
}

/// Split concatenated pieces hashes into 20-byte SHA-1 hashes.
fn split_pieces_hashes(pieces: &[u8]) -> Result<Vec<[u8; SHA1_HASH_SIZE]>> {
    if pieces.len() % SHA1_HASH_SIZE != 0 {
        return Err(Error::format(format!(
            "pieces length {} is not a multiple of {}",
            pieces.len(),
            SHA1_HASH_SIZE
        )));
    }

    Ok(pieces
        .chunks_exact(SHA1_HASH_SIZE)
        .map(|chunk| {
            let mut hash = [0u8; SHA1_HASH_SIZE];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect())
}
