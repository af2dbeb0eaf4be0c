//! Error types for node operations.

use qumbed_proto::ProtoError;
use qumbed_transport::TransportError;
use thiserror::Error;

use crate::crypto::CryptoError;

/// Errors surfaced by [`Node`](crate::Node) operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// The node has been closed; no further operations are possible.
    #[error("node closed")]
    Closed,

    /// Subscribe was called but no relay is configured.
    #[error("no relay configured")]
    NoRelay,

    /// Schema validation or frame encoding failed. Match on the inner
    /// [`ProtoError`] to distinguish unknown schemas, invalid payloads, and
    /// oversized frames.
    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// Dialing, TLS, or stream I/O failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Building the encrypted envelope failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A dial or acknowledgement deadline elapsed.
    #[error("operation timed out")]
    Timeout,

    /// The relay answered with an error or an unexpected frame.
    #[error("relay rejected request: {0}")]
    Rejected(String),
}
