//! # BitTorrent Peer Client
//!
//! This module owns the TCP connection to one remote peer and implements the
//! wire-level operations on it: the handshake, framed message reads and the
//! few messages this client sends.
//!
//! ## Reading
//!
//! Every read goes through [`Client::read_exact`]: it loops on short reads
//! until exactly `n` bytes arrived, or fails if the peer closes first. The
//! handshake reads 68 bytes with it; a framed message reads the 4-byte length
//! prefix and then exactly that many bytes. A truncated payload is never
//! returned.
//!
//! ## Timeouts
//!
//! None by default: a silent peer blocks the caller. [`Client::connect`]
//! takes an optional timeout that bounds connect, read and write.
//!
//! ## Closing
//!
//! The connection is shut down when the client is dropped. Another thread can
//! close it early through a [`ShutdownHandle`], which makes a pending read
//! fail with an I/O error.

use crate::error::{Error, Result};
use crate::handshake::*;
use crate::message::*;
use crate::peer::*;
use crate::piece::BlockRequest;

use byteorder::{BigEndian, ReadBytesExt};

use std::io::{Cursor, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// A connection to a remote BitTorrent peer.
pub struct Client {
    /// Address of the remote peer
    peer: PeerAddress,
    /// TCP stream connection to the peer
    conn: TcpStream,
}

/// Closes a client's connection from another thread.
pub struct ShutdownHandle {
    conn: TcpStream,
}

impl ShutdownHandle {
    pub fn close(&self) -> Result<()> {
        self.conn.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

impl Client {
    /// Opens a TCP connection to a peer.
    ///
    /// # Arguments
    ///
    /// * `peer` - Address of the remote peer
    /// * `timeout` - Bound on connecting and on every later read or write;
    ///   `None` blocks indefinitely
    ///
    /// # Returns
    ///
    /// Returns a `Client` owning the connection, ready for the handshake.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the connection is refused, times out, or the
    /// socket timeouts cannot be set.
    pub fn connect(peer: PeerAddress, timeout: Option<Duration>) -> Result<Client> {
        let peer_socket = peer.socket_addr();
        let conn = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&peer_socket, timeout)?,
            None => TcpStream::connect(peer_socket)?,
        };
        conn.set_read_timeout(timeout)?;
        conn.set_write_timeout(timeout)?;

        info!("Connected to peer {}", peer);

        Ok(Client { peer, conn })
    }

    /// Wraps an already connected stream.
    pub fn from_stream(conn: TcpStream) -> Result<Client> {
        let peer = match conn.peer_addr()? {
            std::net::SocketAddr::V4(addr) => PeerAddress::from(addr),
            std::net::SocketAddr::V6(addr) => {
                return Err(Error::format(format!("unsupported IPv6 peer {}", addr)))
            }
        };
        Ok(Client { peer, conn })
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        Ok(ShutdownHandle {
            conn: self.conn.try_clone()?,
        })
    }

    /// Performs the handshake and returns the remote peer ID.
    ///
    /// A remote info-hash different from ours is logged but not rejected.
    pub fn handshake(&mut self, info_hash: [u8; 20], peer_id: PeerId) -> Result<PeerId> {
        let handshake = Handshake::new(info_hash, peer_id);
        self.write_all(&handshake.serialize())?;
        debug!("Send HANDSHAKE to peer {}", self.peer);

        let mut buf = [0u8; HANDSHAKE_LEN];
        self.read_into(&mut buf)?;
        let remote = Handshake::deserialize(&buf)?;

        if remote.info_hash != info_hash {
            warn!(
                "Peer {} answered with info hash {}",
                self.peer,
                hex::encode(remote.info_hash)
            );
        }

        info!("Receive HANDSHAKE from peer {} ({})", self.peer, remote.peer_id.to_hex());

        Ok(remote.peer_id)
    }

    /// Reads exactly `n` bytes, looping on short reads.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.conn.read_exact(buf)?;
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.conn.write_all(buf)?;
        self.conn.flush()?;
        Ok(())
    }

    /// Reads one framed message.
    ///
    /// Returns `None` for a keep-alive.
    pub fn read_message(&mut self) -> Result<Option<Message>> {
        let message_len = self.read_message_len()?;

        if message_len == 0 {
            debug!("Receive KEEP_ALIVE from peer {}", self.peer);
            return Ok(None);
        }

        if message_len > MAX_MESSAGE_LEN {
            return Err(Error::protocol(format!(
                "message of {} bytes exceeds limit of {}",
                message_len, MAX_MESSAGE_LEN
            )));
        }

        let message_buf = self.read_exact(message_len)?;
        let message = deserialize_message(&message_buf)?;

        debug!(
            "Receive MESSAGE_{} ({} bytes) from peer {}",
            message_name(message.id),
            message.payload.len(),
            self.peer
        );

        Ok(Some(message))
    }

    fn read_message_len(&mut self) -> Result<usize> {
        let buf = self.read_exact(4)?;
        let mut cursor = Cursor::new(buf);
        let message_len = cursor.read_u32::<BigEndian>()?;

        Ok(message_len as usize)
    }

    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        let message_encoded = message.serialize()?;
        self.write_all(&message_encoded)?;
        debug!("Send MESSAGE_{} to peer {}", message_name(message.id), self.peer);
        Ok(())
    }

    pub fn send_interested(&mut self) -> Result<()> {
        self.send_message(&Message::new(MESSAGE_INTERESTED))
    }

    pub fn send_request(&mut self, block: &BlockRequest) -> Result<()> {
        debug!(
            "Send MESSAGE_REQUEST for piece {} [{}:{}] to peer {}",
            block.index,
            block.begin,
            block.begin + block.length,
            self.peer
        );
        self.send_message(&Message::request(block)?)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Err(e) = self.conn.shutdown(Shutdown::Both) {
            // Already closed by the peer or through a ShutdownHandle
            debug!("Shutdown of connection to {} failed: {}", self.peer, e);
        }
    }
}
