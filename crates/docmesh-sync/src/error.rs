//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur while moving entries between replicas.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Protocol version mismatch with the sender.
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Wire message could not be encoded.
    #[error("encode error: {0}")]
    Encode(String),

    /// Wire message could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Message violates a size limit.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The node is disconnected from the network.
    #[error("transport offline")]
    Offline,

    /// Timeout waiting for the network.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The subscription's topic was closed.
    #[error("subscription closed")]
    Closed,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
