//! Error types for the QUIC transport.

use qumbed_proto::ProtoError;
use thiserror::Error;

/// Errors raised while dialing, listening, or exchanging frames.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The address string could not be resolved to a socket address.
    #[error("invalid address {addr:?}: {reason}")]
    InvalidAddress {
        /// The offending address string.
        addr: String,
        /// Why resolution failed.
        reason: String,
    },

    /// TLS configuration or certificate generation failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// Establishing the session or its stream failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The peer closed its side of the stream.
    #[error("connection closed")]
    Closed,

    /// Reading or writing the stream failed mid-frame.
    #[error("stream error: {0}")]
    Stream(String),

    /// A frame announced a body larger than the wire limit.
    #[error("frame too large: {size} bytes (limit: {limit} bytes)")]
    FrameTooLarge {
        /// The announced body size.
        size: usize,
        /// Maximum accepted body size.
        limit: usize,
    },

    /// Frame encoding or decoding failed.
    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// Socket-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
