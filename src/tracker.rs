//! # HTTP Tracker
//!
//! The tracker is asked for peers with a single HTTP GET on the announce URL:
//!
//! ```text
//! GET <announce>?info_hash=<raw20>&peer_id=<raw20>&port=6881&uploaded=0&downloaded=0&left=<N>&compact=1
//! ```
//!
//! `info_hash` and `peer_id` are raw 20-byte strings, every byte
//! percent-encoded (not hex). The answer is a bencoded dictionary with an
//! `interval` and a compact `peers` byte string, or a `failure reason`.
//! Only the compact peer form is understood.

use crate::bencode::{self, Value};
use crate::error::{Error, Result};
use crate::peer::*;
use crate::torrent::Torrent;

use url::Url;

use std::time::Duration;

// Default port for BitTorrent client connections
pub const PORT: u16 = 6881;

/// Tracker answer to an announce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerResponse {
    /// Interval time to refresh the list of peers in seconds
    pub interval: i64,
    /// Peers, in the order the tracker listed them
    pub peers: Vec<PeerAddress>,
}

impl TrackerResponse {
    /// Parses a bencoded tracker response body.
    pub fn from_bytes(body: &[u8]) -> Result<TrackerResponse> {
        let (root, _) = bencode::decode(body)?;
        root.dict()?;

        if let Some(reason) = root.get("failure reason") {
            let reason = String::from_utf8_lossy(reason.bytes()?).into_owned();
            return Err(Error::Tracker(reason));
        }

        let interval = root.require("interval")?.integer()?;
        let peers = match root.require("peers")? {
            Value::Bytes(compact) => PeerAddress::from_compact(compact),
            other => {
                return Err(Error::format(format!(
                    "expected compact peer list, found {}",
                    other.kind()
                )))
            }
        };

        Ok(TrackerResponse { interval, peers })
    }
}

/// Blocking HTTP client for tracker announces.
pub struct TrackerClient {
    http: reqwest::blocking::Client,
    port: u16,
}

impl TrackerClient {
    /// Builds a tracker client.
    ///
    /// Without a `timeout` a silent tracker blocks the caller indefinitely.
    pub fn new(timeout: Option<Duration>) -> Result<TrackerClient> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(TrackerClient { http, port: PORT })
    }

    /// Announces to the torrent's tracker and returns the peers it knows.
    ///
    /// # Arguments
    ///
    /// * `torrent` - Torrent whose announce URL, info-hash and length are sent
    /// * `peer_id` - Identifier this client announces itself with
    ///
    /// # Returns
    ///
    /// Returns the decoded `TrackerResponse`. An empty peer list is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Http` if the request fails or the status is not 2xx,
    /// `Error::Tracker` if the tracker answers with a `failure reason`, and a
    /// format error if the body is not a valid tracker response.
    pub fn discover_peers(&self, torrent: &Torrent, peer_id: &PeerId) -> Result<TrackerResponse> {
        let url = build_tracker_url(
            &torrent.announce,
            &torrent.info_hash,
            peer_id,
            self.port,
            torrent.length,
        )?;
        info!("Requesting peers from {}", torrent.announce);
        debug!("GET {}", url);

        let body = self.http.get(url).send()?.error_for_status()?.bytes()?;
        let response = TrackerResponse::from_bytes(&body)?;

        info!(
            "Tracker returned {} peers (interval {}s)",
            response.peers.len(),
            response.interval
        );

        Ok(response)
    }
}

/// Each byte is encoded as %XX where XX is the hexadecimal representation.
fn percent_encode_binary(data: &[u8]) -> String {
    const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
    let mut encoded = String::with_capacity(data.len() * 3);

    for &byte in data {
        encoded.push('%');
        encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
        encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
    }

    encoded
}

/// Builds the announce URL with its query string.
///
/// The query is assembled by hand so that the binary fields keep their exact
/// bytes; an announce URL that already has a query is extended with `&`.
pub fn build_tracker_url(
    announce: &str,
    info_hash: &[u8; 20],
    peer_id: &PeerId,
    port: u16,
    left: u64,
) -> Result<Url> {
    let mut url = Url::parse(announce)
        .map_err(|e| Error::format(format!("could not parse tracker url {:?}: {}", announce, e)))?;

    let query = format!(
        "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
        percent_encode_binary(info_hash),
        percent_encode_binary(peer_id.as_bytes()),
        port,
        left
    );

    let full_query = match url.query() {
        Some(existing) if !existing.is_empty() => format!("{}&{}", existing, query),
        _ => query,
    };
    url.set_query(Some(&full_query));

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::tests::sample_torrent;

    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener};
    use std::sync::mpsc;
    use std::thread;

    fn peer_id() -> PeerId {
        "abcdefghij0123456789".parse().unwrap()
    }

    #[test]
    fn builds_percent_encoded_url() {
        let mut info_hash = [0u8; 20];
        info_hash[0] = 0xd6;
        info_hash[1] = b'a';
        info_hash[19] = 0xff;
        let url = build_tracker_url("http://tracker.test/announce", &info_hash, &peer_id(), 6881, 92063)
            .unwrap();
        let url = url.as_str();

        assert!(url.starts_with("http://tracker.test/announce?info_hash=%D6%61%00"));
        assert!(url.contains("%00%FF&peer_id=%61%62%63"));
        assert!(url.ends_with("&port=6881&uploaded=0&downloaded=0&left=92063&compact=1"));
    }

    #[test]
    fn extends_existing_query() {
        let url = build_tracker_url("http://t.test/a?key=1", &[0; 20], &peer_id(), 6881, 1).unwrap();
        assert!(url.as_str().starts_with("http://t.test/a?key=1&info_hash=%00"));
    }

    #[test]
    fn rejects_bad_announce_url() {
        let err = build_tracker_url("not a url", &[0; 20], &peer_id(), 6881, 1).unwrap_err();
        assert!(err.is_format());
    }

    #[test]
    fn parses_compact_response() {
        let body = b"d8:intervali60e5:peers12:\xb2\x3e\x52\x59\xc8\xce\x7f\x00\x00\x01\x1a\xe1e";
        let response = TrackerResponse::from_bytes(body).unwrap();
        assert_eq!(response.interval, 60);
        let peers: Vec<String> = response.peers.iter().map(|p| p.to_string()).collect();
        assert_eq!(peers, vec!["178.62.82.89:51406", "127.0.0.1:6881"]);
    }

    #[test]
    fn empty_peer_list_is_not_an_error() {
        let response = TrackerResponse::from_bytes(b"d8:intervali60e5:peers0:e").unwrap();
        assert!(response.peers.is_empty());
    }

    #[test]
    fn reports_tracker_failures() {
        let err = TrackerResponse::from_bytes(b"d14:failure reason12:unregisterede").unwrap_err();
        assert!(err.is_protocol());
        assert!(matches!(err, Error::Tracker(ref reason) if reason == "unregistered"));
        assert!(TrackerResponse::from_bytes(b"d8:intervali60ee").unwrap_err().is_format());
        assert!(TrackerResponse::from_bytes(b"d8:intervali60e5:peerslee")
            .unwrap_err()
            .is_format());
        assert!(TrackerResponse::from_bytes(b"<html>").unwrap_err().is_format());
    }

    /// Serves one HTTP request with `body` and reports the request line.
    fn one_shot_tracker(body: &'static [u8]) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = vec![];
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let request = String::from_utf8_lossy(&request).into_owned();
            let line = request.lines().next().unwrap_or_default().to_string();
            tx.send(line).unwrap();

            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(header.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
        });
        (format!("http://127.0.0.1:{}/announce", port), rx)
    }

    #[test]
    fn discovers_peers_over_http() {
        let (announce, rx) =
            one_shot_tracker(b"d8:intervali1800e5:peers6:\x0a\x00\x00\x02\x1a\xe1e");
        let torrent = Torrent::from_bytes(&sample_torrent(&announce, 92063, 32768)).unwrap();

        let client = TrackerClient::new(Some(Duration::from_secs(5))).unwrap();
        let response = client.discover_peers(&torrent, &peer_id()).unwrap();

        assert_eq!(response.interval, 1800);
        assert_eq!(
            response.peers,
            vec![PeerAddress::new(Ipv4Addr::new(10, 0, 0, 2), 6881)]
        );

        let request_line = rx.recv().unwrap();
        assert!(request_line.starts_with("GET /announce?info_hash=%"));
        assert!(request_line.contains("&peer_id=%61%62%63"));
        assert!(request_line.contains("&left=92063&compact=1"));
    }

    #[test]
    fn surfaces_network_failures() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let announce = format!("http://127.0.0.1:{}/announce", port);
        let torrent = Torrent::from_bytes(&sample_torrent(&announce, 10, 16)).unwrap();

        let client = TrackerClient::new(Some(Duration::from_secs(5))).unwrap();
        let err = client.discover_peers(&torrent, &peer_id()).unwrap_err();
        assert!(err.is_io());
    }
}
