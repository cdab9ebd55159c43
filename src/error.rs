//! # Error Types
//!
//! Every fallible operation of the crate returns [`Result`]. Variants fall into
//! three families:
//!
//! - **Format**: malformed bencode or torrent structure ([`Error::Bencode`], [`Error::Format`])
//! - **I/O**: filesystem, socket or tracker transport failure ([`Error::Io`], [`Error::Http`])
//! - **Protocol**: the remote side answered but refused or broke the protocol ([`Error::Tracker`], [`Error::Protocol`])
//!
//! Nothing is retried or swallowed: an operation either returns a complete
//! result or one of these errors.

use crate::bencode::BencodeError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Bencode(#[from] BencodeError),

    #[error("invalid format: {0}")]
    Format(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tracker returned failure: {0}")]
    Tracker(String),

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Error {
    pub(crate) fn format(reason: impl Into<String>) -> Self {
        Error::Format(reason.into())
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        Error::Protocol(reason.into())
    }

    /// Malformed bencode or torrent structure.
    pub fn is_format(&self) -> bool {
        matches!(self, Error::Bencode(_) | Error::Format(_))
    }

    /// Filesystem, socket or HTTP transport failure.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Http(_))
    }

    /// A tracker refusal, or a peer that sent something the session did not
    /// expect.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Tracker(_) | Error::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert!(Error::format("missing key").is_format());
        assert!(Error::protocol("bad id").is_protocol());
        let io = Error::from(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(io.is_io());
        assert!(!io.is_format());
        let refused = Error::Tracker("unregistered torrent".into());
        assert!(refused.is_protocol());
        assert!(!refused.is_io());
    }
}
