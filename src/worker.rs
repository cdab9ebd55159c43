//! # Piece Download
//!
//! A [`Worker`] downloads one piece from one peer over an already
//! handshaken [`Client`]. It walks a strictly linear sequence of states:
//!
//! ```text
//! AwaitBitfield -> SendInterested -> AwaitUnchoke -> (RequestBlock -> AwaitPiece)* -> Done
//! ```
//!
//! ## Failure Semantics
//!
//! Any unexpected message id, malformed payload or I/O error aborts the whole
//! download: there is no retry and no partial result. Keep-alives are the
//! only frames skipped while waiting. The worker owns the client, so the
//! connection is closed whenever `download_piece` returns.

use crate::client::*;
use crate::error::{Error, Result};
use crate::message::*;
use crate::peer::*;
use crate::piece::*;
use crate::torrent::Torrent;

use std::fmt;
use std::time::Duration;

/// States of the piece download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitBitfield,
    SendInterested,
    AwaitUnchoke,
    RequestBlock(usize),
    AwaitPiece(usize),
    Done,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::AwaitBitfield => f.write_str("AwaitBitfield"),
            State::SendInterested => f.write_str("SendInterested"),
            State::AwaitUnchoke => f.write_str("AwaitUnchoke"),
            State::RequestBlock(i) => write!(f, "RequestBlock({})", i),
            State::AwaitPiece(i) => write!(f, "AwaitPiece({})", i),
            State::Done => f.write_str("Done"),
        }
    }
}

/// Downloads a single piece from a single peer.
pub struct Worker<'a> {
    /// Metadata of the torrent being downloaded
    torrent: &'a Torrent,
    /// Connection to the remote peer, handshake already done
    client: Client,
}

impl<'a> Worker<'a> {
    pub fn new(torrent: &'a Torrent, client: Client) -> Self {
        Worker { torrent, client }
    }

    /// Runs the download state machine for piece `index`.
    ///
    /// # Arguments
    ///
    /// * `index` - Zero-based index of the piece to download
    ///
    /// # Returns
    ///
    /// Returns the piece bytes, exactly `torrent.piece_size(index)` long.
    /// They are not checked against the piece hash.
    ///
    /// # Errors
    ///
    /// Returns a format error if `index` is out of range, `Error::Io` if the
    /// peer closes the connection or a timeout elapses, and
    /// `Error::Protocol` if the peer sends an unexpected message or a block
    /// that does not answer the pending request.
    pub fn download_piece(mut self, index: u32) -> Result<Vec<u8>> {
        let piece_size = self.torrent.piece_size(index)?;
        let requests = blocks(index, piece_size);
        let mut piece_work = PieceWork::new(index, piece_size);
        let peer = self.client.peer();

        info!(
            "Downloading piece {} ({} bytes, {} blocks) from peer {}",
            index,
            piece_size,
            requests.len(),
            peer
        );

        let mut state = State::AwaitBitfield;
        loop {
            debug!("Piece {} from peer {}: {}", index, peer, state);

            state = match state {
                State::AwaitBitfield => {
                    self.wait_for(MESSAGE_BITFIELD)?;
                    State::SendInterested
                }
                State::SendInterested => {
                    self.client.send_interested()?;
                    State::AwaitUnchoke
                }
                State::AwaitUnchoke => {
                    self.wait_for(MESSAGE_UNCHOKE)?;
                    next_block(&requests, 0)
                }
                State::RequestBlock(i) => {
                    self.client.send_request(&requests[i])?;
                    State::AwaitPiece(i)
                }
                State::AwaitPiece(i) => {
                    let request = &requests[i];
                    let block = self.wait_for(MESSAGE_PIECE)?.parse_piece()?;
                    if block.index != request.index || block.begin != request.begin {
                        return Err(Error::protocol(format!(
                            "requested block {}:{}, received {}:{}",
                            request.index, request.begin, block.index, block.begin
                        )));
                    }
                    piece_work.append_block(request, &block.data)?;
                    next_block(&requests, i + 1)
                }
                State::Done => break,
            };
        }

        if !piece_work.is_complete() {
            return Err(Error::protocol(format!(
                "piece {} incomplete: {} of {} bytes",
                index, piece_work.downloaded, piece_work.length
            )));
        }

        info!("Successfully downloaded piece {:?}", index);

        Ok(piece_work.data)
    }

    /// Waits for the next message, which must carry `id`.
    fn wait_for(&mut self, id: MessageId) -> Result<Message> {
        loop {
            match self.client.read_message()? {
                None => continue,
                Some(message) if message.id == id => return Ok(message),
                Some(message) => {
                    return Err(Error::protocol(format!(
                        "expected MESSAGE_{} from peer {}, received MESSAGE_{} (id {})",
                        message_name(id),
                        self.client.peer(),
                        message_name(message.id),
                        message.id
                    )))
                }
            }
        }
    }
}

fn next_block(requests: &[BlockRequest], i: usize) -> State {
    if i < requests.len() {
        State::RequestBlock(i)
    } else {
        State::Done
    }
}

/// Connects to `peer`, handshakes, and downloads piece `index`.
pub fn download_piece(
    torrent: &Torrent,
    peer: PeerAddress,
    peer_id: PeerId,
    index: u32,
    timeout: Option<Duration>,
) -> Result<Vec<u8>> {
    // Fail on a bad index before touching the network
    torrent.piece_size(index)?;

    let mut client = Client::connect(peer, timeout)?;
    client.handshake(torrent.info_hash, peer_id)?;

    Worker::new(torrent, client).download_piece(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{frame, scripted_peer};
    use crate::handshake::{Handshake, HANDSHAKE_LEN};
    use crate::torrent::tests::sample_torrent;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use std::io::{Read, Write};
    use std::net::TcpStream;

    fn read_frame(stream: &mut TcpStream) -> Message {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
        stream.read_exact(&mut body).unwrap();
        deserialize_message(&body).unwrap()
    }

    fn block_payload(request: &BlockRequest) -> Vec<u8> {
        (0..request.length)
            .map(|i| ((request.begin + i) % 251) as u8)
            .collect()
    }

    /// A well-behaved seeder: bitfield, unchoke after interested, then one
    /// piece message per request. Returns the blocks it served.
    fn seeder(mut stream: TcpStream) -> Vec<Vec<u8>> {
        stream.write_all(&frame(MESSAGE_BITFIELD, &[0xff])).unwrap();
        assert_eq!(read_frame(&mut stream).id, MESSAGE_INTERESTED);
        stream.write_all(&[0, 0, 0, 0]).unwrap();
        stream.write_all(&frame(MESSAGE_UNCHOKE, &[])).unwrap();

        let mut served = vec![];
        loop {
            let mut len = [0u8; 4];
            if stream.read_exact(&mut len).is_err() {
                return served;
            }
            let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
            stream.read_exact(&mut body).unwrap();
            let request = deserialize_message(&body).unwrap().parse_request().unwrap();

            let data = block_payload(&request);
            let mut payload = request.index.to_be_bytes().to_vec();
            payload.extend_from_slice(&request.begin.to_be_bytes());
            payload.extend_from_slice(&data);
            stream.write_all(&frame(MESSAGE_PIECE, &payload)).unwrap();
            served.push(data);
        }
    }

    fn run(
        torrent: &Torrent,
        index: u32,
        peer: impl FnOnce(TcpStream) + Send + 'static,
    ) -> Result<Vec<u8>> {
        let (addr, handle) = scripted_peer(peer);
        let client = Client::connect(addr, Some(Duration::from_secs(5))).unwrap();
        let result = Worker::new(torrent, client).download_piece(index);
        handle.join().unwrap();
        result
    }

    #[test]
    fn downloads_full_piece_from_scripted_peer() {
        let torrent = Torrent::from_bytes(&sample_torrent("http://t/", 92063, 32768)).unwrap();
        let (addr, handle) = scripted_peer(|stream| {
            let served = seeder(stream);
            assert_eq!(served.len(), 2);
        });
        let client = Client::connect(addr, Some(Duration::from_secs(5))).unwrap();
        let data = Worker::new(&torrent, client).download_piece(1).unwrap();
        handle.join().unwrap();

        let expected: Vec<u8> = blocks(1, 32768).iter().flat_map(block_payload).collect();
        assert_eq!(data.len(), 32768);
        assert_eq!(data, expected);
    }

    #[test]
    fn downloads_truncated_last_piece() {
        let torrent = Torrent::from_bytes(&sample_torrent("http://t/", 92063, 32768)).unwrap();
        let data = run(&torrent, 2, |stream| {
            let served = seeder(stream);
            let lengths: Vec<usize> = served.iter().map(Vec::len).collect();
            assert_eq!(lengths, vec![16384, 92063 - 65536 - 16384]);
        })
        .unwrap();
        assert_eq!(data.len(), 92063 - 65536);
    }

    #[test]
    fn aborts_when_bitfield_missing() {
        let torrent = Torrent::from_bytes(&sample_torrent("http://t/", 92063, 32768)).unwrap();
        let err = run(&torrent, 0, |mut stream| {
            stream.write_all(&frame(MESSAGE_UNCHOKE, &[])).unwrap();
        })
        .unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn aborts_when_choked() {
        let torrent = Torrent::from_bytes(&sample_torrent("http://t/", 92063, 32768)).unwrap();
        let err = run(&torrent, 0, |mut stream| {
            stream.write_all(&frame(MESSAGE_BITFIELD, &[0xff])).unwrap();
            assert_eq!(read_frame(&mut stream).id, MESSAGE_INTERESTED);
            stream.write_all(&frame(MESSAGE_CHOKE, &[])).unwrap();
        })
        .unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn aborts_when_peer_disconnects_mid_piece() {
        let torrent = Torrent::from_bytes(&sample_torrent("http://t/", 92063, 32768)).unwrap();
        let err = run(&torrent, 0, |mut stream| {
            stream.write_all(&frame(MESSAGE_BITFIELD, &[0xff])).unwrap();
            assert_eq!(read_frame(&mut stream).id, MESSAGE_INTERESTED);
            stream.write_all(&frame(MESSAGE_UNCHOKE, &[])).unwrap();
            let request = read_frame(&mut stream).parse_request().unwrap();
            assert_eq!(request.begin, 0);
            // Announce a full block but send only part of it
            let mut payload = vec![0u8; 8];
            payload.extend_from_slice(&[1; 100]);
            let mut message = frame(MESSAGE_PIECE, &payload);
            message[0..4].copy_from_slice(&(9u32 + 16384).to_be_bytes());
            stream.write_all(&message).unwrap();
        })
        .unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn aborts_on_wrong_block_offset() {
        let torrent = Torrent::from_bytes(&sample_torrent("http://t/", 92063, 32768)).unwrap();
        let err = run(&torrent, 0, |mut stream| {
            stream.write_all(&frame(MESSAGE_BITFIELD, &[0xff])).unwrap();
            assert_eq!(read_frame(&mut stream).id, MESSAGE_INTERESTED);
            stream.write_all(&frame(MESSAGE_UNCHOKE, &[])).unwrap();
            read_frame(&mut stream);
            let mut payload = vec![0, 0, 0, 0, 0, 0, 0x40, 0];
            payload.extend_from_slice(&[0; 16384]);
            stream.write_all(&frame(MESSAGE_PIECE, &payload)).unwrap();
            // Drain until the client hangs up
            let mut sink = vec![];
            let _ = stream.read_to_end(&mut sink);
        })
        .unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn rejects_out_of_range_piece_before_connecting() {
        let torrent = Torrent::from_bytes(&sample_torrent("http://t/", 92063, 32768)).unwrap();
        let peer_id = PeerId::generate(&mut StdRng::seed_from_u64(5));
        // Nothing listens on port 1; the index check must fail first
        let peer = PeerAddress::new(std::net::Ipv4Addr::LOCALHOST, 1);
        let err = download_piece(&torrent, peer, peer_id, 3, None).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn download_piece_handshakes_then_downloads() {
        let torrent = Torrent::from_bytes(&sample_torrent("http://t/", 20000, 32768)).unwrap();
        let info_hash = torrent.info_hash;
        let (addr, handle) = scripted_peer(move |mut stream| {
            let mut buf = [0u8; HANDSHAKE_LEN];
            stream.read_exact(&mut buf).unwrap();
            assert_eq!(Handshake::deserialize(&buf).unwrap().info_hash, info_hash);
            let remote: PeerId = "-RM0001-000000000000".parse().unwrap();
            stream
                .write_all(&Handshake::new(info_hash, remote).serialize())
                .unwrap();
            seeder(stream);
        });

        let peer_id = PeerId::generate(&mut StdRng::seed_from_u64(6));
        let data = download_piece(&torrent, addr, peer_id, 0, Some(Duration::from_secs(5))).unwrap();
        handle.join().unwrap();
        assert_eq!(data.len(), 20000);
    }
}
