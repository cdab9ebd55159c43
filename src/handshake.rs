//! # BitTorrent Handshake Protocol
//!
//! The handshake is the first exchange on a fresh peer connection. Both
//! sides send the same fixed 68-byte message:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte - Length of protocol string (19)
//! - **pstr**: 19 bytes - Protocol identifier ("BitTorrent protocol")
//! - **reserved**: 8 bytes - All zeros (no extensions are negotiated)
//! - **info_hash**: 20 bytes - SHA-1 hash of torrent info dictionary
//! - **peer_id**: 20 bytes - Unique identifier for the peer

use crate::error::Result;
use crate::peer::PeerId;
use crate::torrent::SHA1_HASH_SIZE;

const PROTOCOL_ID: &[u8; 19] = b"BitTorrent protocol";
const RESERVED_SIZE: usize = 8;

pub const HANDSHAKE_LEN: usize = 1 + PROTOCOL_ID.len() + RESERVED_SIZE + SHA1_HASH_SIZE + 20;

/// A BitTorrent handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// 8 reserved bytes for protocol extensions
    pub reserved: [u8; RESERVED_SIZE],
    /// 20-byte SHA-1 hash of the torrent's info dictionary
    pub info_hash: [u8; SHA1_HASH_SIZE],
    /// 20-byte identifier of the sending peer
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: [u8; SHA1_HASH_SIZE], peer_id: PeerId) -> Self {
        Handshake {
            reserved: [0; RESERVED_SIZE],
            info_hash,
            peer_id,
        }
    }

    /// Serializes the handshake into its 68-byte wire form.
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut serialized = [0u8; HANDSHAKE_LEN];
        let (pstrlen, rest) = serialized.split_at_mut(1);
        pstrlen[0] = PROTOCOL_ID.len() as u8;
        let (pstr, rest) = rest.split_at_mut(PROTOCOL_ID.len());
        pstr.copy_from_slice(PROTOCOL_ID);
        let (reserved, rest) = rest.split_at_mut(RESERVED_SIZE);
        reserved.copy_from_slice(&self.reserved);
        let (info_hash, peer_id) = rest.split_at_mut(SHA1_HASH_SIZE);
        info_hash.copy_from_slice(&self.info_hash);
        peer_id.copy_from_slice(self.peer_id.as_bytes());

        serialized
    }

    /// Parses a 68-byte handshake received from a peer.
    ///
    /// Fields are read at their fixed offsets. A foreign protocol header is
    /// logged but not rejected, and the echoed info-hash is returned as is
    /// for the caller to compare.
    pub fn deserialize(buf: &[u8; HANDSHAKE_LEN]) -> Result<Handshake> {
        let header_len = 1 + PROTOCOL_ID.len();
        if buf[0] as usize != PROTOCOL_ID.len() || &buf[1..header_len] != PROTOCOL_ID {
            warn!(
                "Unexpected handshake header {:?}",
                String::from_utf8_lossy(&buf[..header_len])
            );
        }

        let mut offset = header_len;
        let mut reserved = [0u8; RESERVED_SIZE];
        reserved.copy_from_slice(&buf[offset..offset + RESERVED_SIZE]);
        offset += RESERVED_SIZE;

        let mut info_hash = [0u8; SHA1_HASH_SIZE];
        info_hash.copy_from_slice(&buf[offset..offset + SHA1_HASH_SIZE]);
        offset += SHA1_HASH_SIZE;

        let peer_id = PeerId::from_bytes(&buf[offset..])?;

        Ok(Handshake {
            reserved,
            info_hash,
            peer_id,
        })
    }
}
