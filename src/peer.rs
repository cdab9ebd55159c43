//! # BitTorrent Peer Information
//!
//! This module defines the address of a remote peer, as handed out by a
//! tracker, and the 20-byte peer ID this client identifies itself with.
//!
//! ## Compact Peer Format
//!
//! Trackers answer `compact=1` requests with a byte string of 6-byte entries:
//!
//! ```text
//! <IP: 4 bytes><Port: 2 bytes>
//! ```
//!
//! - IP address in network byte order (big-endian)
//! - Port number in network byte order (big-endian)
//!
//! ## Peer ID
//!
//! The peer ID is 20 characters drawn from `[a-zA-Z0-9]`. It only has to be
//! unique within the swarm, so the random source does not need to be
//! cryptographic. Callers pass the generator explicitly; tests use a seeded
//! one to get deterministic IDs.

use crate::error::{Error, Result};

use byteorder::{BigEndian, ReadBytesExt};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use std::fmt;
use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

const PEER_SIZE: usize = 6;
pub const PEER_ID_SIZE: usize = 20;

/// Network address of a remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    /// IPv4 address of the peer
    pub ip: Ipv4Addr,
    /// Port number for connecting to the peer
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        PeerAddress { ip, port }
    }

    /// Parses a compact peer list into addresses.
    ///
    /// Records are read in order; a trailing partial record (fewer than 6
    /// bytes) is dropped.
    pub fn from_compact(tracker_peers: &[u8]) -> Vec<PeerAddress> {
        if tracker_peers.len() % PEER_SIZE != 0 {
            debug!(
                "Dropping {} trailing bytes of compact peer list",
                tracker_peers.len() % PEER_SIZE
            );
        }

        tracker_peers
            .chunks_exact(PEER_SIZE)
            .map(|record| {
                let ip = Ipv4Addr::new(record[0], record[1], record[2], record[3]);
                let mut port_cursor = Cursor::new(&record[4..6]);
                // A 2-byte slice always holds a u16
                let port = port_cursor.read_u16::<BigEndian>().unwrap_or_default();
                PeerAddress { ip, port }
            })
            .collect()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let addr = SocketAddrV4::from_str(s)
            .map_err(|_| Error::format(format!("invalid peer address {:?}", s)))?;
        Ok(PeerAddress::new(*addr.ip(), addr.port()))
    }
}

impl From<SocketAddrV4> for PeerAddress {
    fn from(addr: SocketAddrV4) -> Self {
        PeerAddress::new(*addr.ip(), addr.port())
    }
}

/// A 20-byte peer identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; PEER_ID_SIZE]);

impl PeerId {
    /// Draws 20 alphanumeric characters from `rng`.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let mut id = [0u8; PEER_ID_SIZE];
        for (x, c) in id.iter_mut().zip(rng.sample_iter(Alphanumeric)) {
            *x = c;
        }
        PeerId(id)
    }

    /// Generates an ID from a generator seeded with the wall clock.
    pub fn from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        PeerId::generate(&mut StdRng::seed_from_u64(seed))
    }

    /// Builds a peer ID from a slice that must be exactly 20 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let id: [u8; PEER_ID_SIZE] = bytes.try_into().map_err(|_| {
            Error::format(format!(
                "peer id must be {} bytes, got {}",
                PEER_ID_SIZE,
                bytes.len()
            ))
        })?;
        Ok(PeerId(id))
    }

    pub fn as_bytes(&self) -> &[u8; PEER_ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PeerId::from_bytes(s.as_bytes())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decompacts_peer_records() {
        let peers = PeerAddress::from_compact(&[178, 62, 82, 89, 0xC8, 0xCE]);
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].to_string(), "178.62.82.89:51406");
    }

    #[test]
    fn keeps_record_order_and_drops_partial_tail() {
        let data = [
            192, 168, 1, 1, 0x1A, 0xE1, // 192.168.1.1:6881
            10, 0, 0, 2, 0x00, 0x50, // 10.0.0.2:80
            1, 2, 3, // partial
        ];
        let peers = PeerAddress::from_compact(&data);
        assert_eq!(
            peers,
            vec![
                PeerAddress::new(Ipv4Addr::new(192, 168, 1, 1), 6881),
                PeerAddress::new(Ipv4Addr::new(10, 0, 0, 2), 80),
            ]
        );
        assert!(PeerAddress::from_compact(&[]).is_empty());
    }

    #[test]
    fn parses_peer_address() {
        let addr: PeerAddress = "127.0.0.1:6881".parse().unwrap();
        assert_eq!(addr, PeerAddress::new(Ipv4Addr::LOCALHOST, 6881));
        assert!("localhost".parse::<PeerAddress>().unwrap_err().is_format());
    }

    #[test]
    fn generates_alphanumeric_ids() {
        let id = PeerId::generate(&mut StdRng::seed_from_u64(42));
        assert!(id.as_bytes().iter().all(u8::is_ascii_alphanumeric));
        assert_eq!(id, PeerId::generate(&mut StdRng::seed_from_u64(42)));
        assert_ne!(id, PeerId::generate(&mut StdRng::seed_from_u64(43)));
        assert!(PeerId::from_clock()
            .as_bytes()
            .iter()
            .all(u8::is_ascii_alphanumeric));
    }

    #[test]
    fn peer_id_requires_twenty_bytes() {
        let id: PeerId = "abcdefghij0123456789".parse().unwrap();
        assert_eq!(&id.0[..4], b"abcd");
        assert_eq!(id.to_hex().len(), 40);
        assert!("short".parse::<PeerId>().is_err());
    }
}
