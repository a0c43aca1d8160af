use std::fmt;

use thiserror::Error;

/// Errors surfaced by the DTLS engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Not enough bytes to parse a complete structure.
    #[error("parse incomplete")]
    ParseIncomplete,

    /// Malformed input.
    #[error("parse error: {0}")]
    ParseError(String),

    /// A message arrived that the current state cannot accept.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// Failure inside a cryptographic primitive.
    #[error("crypto error: {0}")]
    CryptoError(String),

    /// A protected record failed authentication.
    #[error("security error: {0}")]
    SecurityError(String),

    /// Certificate or private key could not be used.
    #[error("certificate error: {0}")]
    CertificateError(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    ConfigError(String),

    /// Protocol version without a known PRF.
    #[error("unsupported version: {0:04x}")]
    UnsupportedVersion(u16),

    /// Application data was sent before the handshake completed.
    #[error("not connected")]
    NotConnected,

    /// The outgoing datagram queue is at capacity.
    #[error("transmit queue full")]
    TransmitQueueFull,

    /// Application data does not fit in a single record.
    #[error("record too large: {0}")]
    RecordTooLarge(usize),

    /// A flight or the whole handshake ran out of time.
    #[error("timeout: {0}")]
    Timeout(&'static str),
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::ParseError(format!("{:?} at {} remaining bytes", e.code, e.input.len()))
            }
        }
    }
}

impl From<rsa::Error> for Error {
    fn from(value: rsa::Error) -> Self {
        Error::CryptoError(value.to_string())
    }
}

pub(crate) fn crypto_err(what: impl fmt::Display) -> Error {
    Error::CryptoError(what.to_string())
}
