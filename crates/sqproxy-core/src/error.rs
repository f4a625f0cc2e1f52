//! Error taxonomy for the proxy core, grouped by the behavior they drive
//! rather than by originating module (see spec §7).

use std::net::SocketAddr;

use thiserror::Error;

/// Failure decoding or validating an A2S message body.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("buffer exhausted before message was fully decoded")]
    BufferExhausted,
    #[error("broken message: {0}")]
    BrokenMessage(String),
}

/// Failure in the datagram transport layer (send/recv/reassembly).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("timed out waiting for a packet")]
    Timeout,
    #[error("broken packet from {addr}")]
    BrokenPacket { raw: Vec<u8>, addr: SocketAddr },
}

/// Failure talking to the upstream game server from a refresh loop.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("upstream timed out")]
    Timeout,
    #[error("upstream refused the connection")]
    ConnectionRefused,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for RefreshError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => RefreshError::Timeout,
            TransportError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
                RefreshError::ConnectionRefused
            }
            TransportError::Io(io) => RefreshError::Io(io),
            TransportError::BrokenPacket { .. } => RefreshError::Timeout,
        }
    }
}
