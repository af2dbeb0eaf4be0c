//! # qumbed-proto
//!
//! Wire format types for the Qumbed pub/sub protocol.
//!
//! This crate provides the foundational pieces shared by every Qumbed
//! endpoint:
//! - [`Frame`] - the tagged union carried on the wire, one JSON object per
//!   frame with a numeric `t` discriminator
//! - [`SchemaRegistry`] - built-in payload schemas and validation
//! - [`ProtoError`] - codec and schema errors, with their wire error codes
//!
//! Frames are serialized as JSON and length-prefixed on the stream by the
//! transport layer. Byte fields travel as base64 strings.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frame;
mod schema;

pub use error::{ProtoError, CODE_FRAME_TOO_LARGE, CODE_SCHEMA_INVALID, CODE_SCHEMA_UNKNOWN};
pub use frame::{
    AckFrame, DiscoveryFrame, ErrorFrame, Frame, FrameType, MessageFrame, PublishFrame,
    SubscribeFrame, UnsubscribeFrame, MAX_FRAME_SIZE,
};
pub use schema::{
    registry, validate_payload, Command, Humidity, SchemaRegistry, Temperature, SCHEMA_COMMAND,
    SCHEMA_HUMIDITY, SCHEMA_TEMPERATURE,
};
