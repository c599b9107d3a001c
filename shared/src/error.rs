//! Error types shared by the server and client

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// A payload did not match the fixed record layout it was expected to carry.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("{record} record must be {expected} bytes, got {actual}")]
    WrongLength {
        record: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("world snapshot of {actual} bytes is not a multiple of the {record_size}-byte record size")]
    Misaligned { record_size: usize, actual: usize },

    #[error("{record} field {field} is not a finite number")]
    NonFinite {
        record: &'static str,
        field: &'static str,
    },

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Networking error type
#[derive(Debug, Error)]
pub enum NetError {
    /// Socket or host creation failed; startup cannot continue
    #[error("failed to create transport host on {addr}: {source}")]
    TransportInit {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid address {0}")]
    InvalidAddress(String),

    #[error("connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connection reset by peer")]
    PeerReset,

    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl NetError {
    /// Connection-level failures the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            NetError::ConnectTimeout { .. } | NetError::Refused(_) | NetError::PeerReset
        )
    }
}
