//! # BitTorrent Piece Management
//!
//! Pieces are the verification units of the torrent data. They are
//! downloaded in smaller blocks of at most 16 KiB; the last block of a piece
//! carries whatever is left.
//!
//! ## Block Chunking
//!
//! ```text
//! block_count = ceil(piece_size / 16384)
//! last block  = piece_size - (block_count - 1) * 16384
//! ```

use crate::error::{Error, Result};

// Standard block size for piece downloads (16KB)
pub const BLOCK_SIZE_MAX: u32 = 16384;

/// A request for one block of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    /// Zero-based piece index
    pub index: u32,
    /// Byte offset within the piece
    pub begin: u32,
    /// Number of bytes requested
    pub length: u32,
}

/// Splits a piece into block requests, in ascending offset order.
pub fn blocks(index: u32, piece_size: u32) -> Vec<BlockRequest> {
    let block_count = piece_size.div_ceil(BLOCK_SIZE_MAX);

    (0..block_count)
        .map(|i| {
            let begin = i * BLOCK_SIZE_MAX;
            let length = if i == block_count - 1 {
                piece_size - (block_count - 1) * BLOCK_SIZE_MAX
            } else {
                BLOCK_SIZE_MAX
            };
            BlockRequest {
                index,
                begin,
                length,
            }
        })
        .collect()
}

/// Tracks the download state of a single piece.
///
/// Blocks are appended in request order; the buffer is complete once
/// `downloaded == length`.
#[derive(Default, Debug, Clone)]
pub struct PieceWork {
    /// Zero-based index of this piece in the torrent
    pub index: u32,
    /// Total length of the piece in bytes
    pub length: u32,
    /// Piece data received so far
    pub data: Vec<u8>,
    /// Total bytes successfully downloaded and stored
    pub downloaded: u32,
}

impl PieceWork {
    pub fn new(index: u32, length: u32) -> PieceWork {
        PieceWork {
            index,
            length,
            data: Vec::with_capacity(length as usize),
            downloaded: 0,
        }
    }

    /// Appends the data answering `request`.
    ///
    /// The block must be the next one expected and exactly as long as
    /// requested.
    pub fn append_block(&mut self, request: &BlockRequest, block: &[u8]) -> Result<()> {
        if request.index != self.index || request.begin != self.downloaded {
            return Err(Error::protocol(format!(
                "block {}:{} does not continue piece {} at offset {}",
                request.index, request.begin, self.index, self.downloaded
            )));
        }

        if block.len() != request.length as usize {
            return Err(Error::protocol(format!(
                "received {} bytes for block of {} bytes",
                block.len(),
                request.length
            )));
        }

        let downloaded = self
            .downloaded
            .checked_add(request.length)
            .filter(|&end| end <= self.length)
            .ok_or_else(|| Error::protocol("received invalid byte offset within piece from peer"))?;

        self.data.extend_from_slice(block);
        self.downloaded = downloaded;

        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded == self.length
    }
}
