//! # qumbed-relay
//!
//! Zero-knowledge pub/sub relay for Qumbed.
//!
//! The relay accepts QUIC sessions from nodes, maintains a per-topic
//! subscriber table, and fans publications out to subscribers. It routes by
//! topic only: payloads are end-to-end encrypted between nodes and the relay
//! forwards them byte-for-byte, without validating or opening anything.
//!
//! ## Architecture
//!
//! ```text
//! publisher ──(Publish)──► ┌──────────────┐ ──(Message)──► subscriber
//!                          │ qumbed-relay │
//! subscriber ◄─(Message)── │  TopicTable  │ ◄─(Subscribe)─ subscriber
//!                          └──────────────┘
//! ```
//!
//! ## Protocol
//!
//! One handler task per connection, dispatching on frame type:
//! - `Subscribe` → insert into the topic table, answer `Ack`
//! - `Unsubscribe` → remove from the topic table (idempotent, no answer)
//! - `Publish` → forward as `Message` to every subscriber, then `Ack`
//! - everything else → ignored
//!
//! On disconnect the handler removes the connection from every topic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod server;
pub mod table;

pub use config::{Config, ConfigError, ServerConfig, MIN_IDLE_TIMEOUT_SECS};
pub use error::RelayError;
pub use server::{RelayEngine, RelayMetrics};
pub use table::{Subscription, TopicTable};
