//! # BitTorrent Peer Wire Messages
//!
//! This module defines the message types and framing of the peer wire
//! protocol.
//!
//! ## Message Structure
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length Prefix**: 4 bytes (big-endian u32) - Length of message ID + payload
//! - **Message ID**: 1 byte - Identifies the message type
//! - **Payload**: `length - 1` bytes - Message-specific data
//!
//! A length prefix of 0 is a keep-alive: no ID, no payload.
//!
//! ## Message Types
//!
//! | ID | Name | Payload |
//! |----|------|---------|
//! | 0 | CHOKE | none |
//! | 1 | UNCHOKE | none |
//! | 2 | INTERESTED | none |
//! | 3 | NOT INTERESTED | none |
//! | 4 | HAVE | piece index |
//! | 5 | BITFIELD | bitfield |
//! | 6 | REQUEST | index, begin, length |
//! | 7 | PIECE | index, begin, block |
//! | 8 | CANCEL | index, begin, length |

use crate::error::{Error, Result};
use crate::piece::BlockRequest;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use std::io::Cursor;

pub type MessageId = u8;
type MessagePayload = Vec<u8>;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_CANCEL: MessageId = 8;

// Largest frame accepted from a peer: a 16 KiB block plus headers fits with
// plenty of room, as does the bitfield of a very large torrent.
pub const MAX_MESSAGE_LEN: usize = 1 << 21;

/// Human-readable name of a message id, for logging.
pub fn message_name(id: MessageId) -> &'static str {
    match id {
        MESSAGE_CHOKE => "CHOKE",
        MESSAGE_UNCHOKE => "UNCHOKE",
        MESSAGE_INTERESTED => "INTERESTED",
        MESSAGE_NOT_INTERESTED => "NOT_INTERESTED",
        MESSAGE_HAVE => "HAVE",
        MESSAGE_BITFIELD => "BITFIELD",
        MESSAGE_REQUEST => "REQUEST",
        MESSAGE_PIECE => "PIECE",
        MESSAGE_CANCEL => "CANCEL",
        _ => "UNKNOWN",
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type identifier
    pub id: MessageId,
    /// Message payload data
    pub payload: MessagePayload,
}

/// Payload of a PIECE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PieceBlock {
    /// Zero-based piece index
    pub index: u32,
    /// Byte offset within the piece
    pub begin: u32,
    /// Block data
    pub data: Vec<u8>,
}

impl Message {
    /// Build a new message without payload.
    pub fn new(id: MessageId) -> Self {
        Message {
            id,
            payload: vec![],
        }
    }

    pub fn new_with_payload(id: MessageId, payload: MessagePayload) -> Self {
        Message { id, payload }
    }

    /// Build a REQUEST message for a block.
    pub fn request(block: &BlockRequest) -> Result<Self> {
        let mut payload: Vec<u8> = Vec::with_capacity(12);
        payload.write_u32::<BigEndian>(block.index)?;
        payload.write_u32::<BigEndian>(block.begin)?;
        payload.write_u32::<BigEndian>(block.length)?;

        Ok(Message::new_with_payload(MESSAGE_REQUEST, payload))
    }

    /// Serialize message with its length prefix.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let message_len = 1 + self.payload.len();

        let mut serialized: Vec<u8> = Vec::with_capacity(4 + message_len);
        serialized.write_u32::<BigEndian>(message_len as u32)?;
        serialized.push(self.id);
        serialized.extend_from_slice(&self.payload);

        Ok(serialized)
    }

    /// Parse the payload of a REQUEST message.
    pub fn parse_request(&self) -> Result<BlockRequest> {
        if self.id != MESSAGE_REQUEST || self.payload.len() != 12 {
            return Err(Error::protocol("received invalid MESSAGE_REQUEST"));
        }

        let mut cursor = Cursor::new(&self.payload);
        Ok(BlockRequest {
            index: cursor.read_u32::<BigEndian>()?,
            begin: cursor.read_u32::<BigEndian>()?,
            length: cursor.read_u32::<BigEndian>()?,
        })
    }

    /// Parse the payload of a PIECE message.
    pub fn parse_piece(self) -> Result<PieceBlock> {
        if self.id != MESSAGE_PIECE || self.payload.len() < 8 {
            return Err(Error::protocol("received invalid MESSAGE_PIECE"));
        }

        let mut cursor = Cursor::new(&self.payload[0..8]);
        let index = cursor.read_u32::<BigEndian>()?;
        let begin = cursor.read_u32::<BigEndian>()?;

        let mut data = self.payload;
        data.drain(0..8);

        Ok(PieceBlock { index, begin, data })
    }
}

/// Deserialize a message body (the bytes after the length prefix).
pub fn deserialize_message(message_buf: &[u8]) -> Result<Message> {
    match message_buf.split_first() {
        Some((&id, payload)) => Ok(Message::new_with_payload(id, payload.to_vec())),
        None => Err(Error::protocol("empty message body")),
    }
}
