//! Error types for the Qumbed wire protocol.

use thiserror::Error;

/// Wire error code: a publish or subscribe named a schema nobody registered.
pub const CODE_SCHEMA_UNKNOWN: &str = "SCHEMA_UNKNOWN";
/// Wire error code: a payload did not decode as its declared schema.
pub const CODE_SCHEMA_INVALID: &str = "SCHEMA_INVALID";
/// Wire error code: a frame body exceeded the 1 MiB limit.
pub const CODE_FRAME_TOO_LARGE: &str = "FRAME_TOO_LARGE";

/// Errors produced by the frame codec and schema validation.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Frame body exceeds the wire limit.
    #[error("frame too large: {size} bytes (limit: {limit} bytes)")]
    FrameTooLarge {
        /// Size of the offending body.
        size: usize,
        /// Maximum accepted body size.
        limit: usize,
    },

    /// JSON encoding or decoding failed.
    #[error("frame codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The `t` discriminator names a frame type this build does not know.
    ///
    /// The frame was still fully consumed from the stream, so callers may
    /// skip it and keep reading.
    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),

    /// The frame's discriminator and populated variant do not match.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),

    /// Schema ID is not registered.
    #[error("unknown schema: {0:?}")]
    SchemaUnknown(String),

    /// Payload bytes do not decode as the schema struct.
    #[error("invalid payload for {schema_id}: {reason}")]
    SchemaInvalid {
        /// The schema the payload was validated against.
        schema_id: String,
        /// Why decoding failed.
        reason: String,
    },
}

impl ProtoError {
    /// The wire error code for this error, for errors that have one.
    pub fn wire_code(&self) -> Option<&'static str> {
        match self {
            ProtoError::FrameTooLarge { .. } => Some(CODE_FRAME_TOO_LARGE),
            ProtoError::SchemaUnknown(_) => Some(CODE_SCHEMA_UNKNOWN),
            ProtoError::SchemaInvalid { .. } => Some(CODE_SCHEMA_INVALID),
            _ => None,
        }
    }
}
