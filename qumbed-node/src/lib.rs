//! # qumbed-node
//!
//! The Qumbed node engine: an endpoint that publishes and subscribes over a
//! zero-knowledge relay.
//!
//! A [`Node`] owns a long-lived X25519 key pair; the public key is the
//! node's identity. Every payload is validated against its schema, sealed
//! end-to-end for the intended recipient, and only then handed to the
//! transport. The relay forwards ciphertext it cannot open.
//!
//! ```ignore
//! let node = Node::new(NodeConfig::new("sensor-1").with_relay("relay:6121")).await?;
//! node.subscribe("sensors/temp", SCHEMA_TEMPERATURE).await?;
//!
//! let messages = node.messages();
//! while let Some(msg) = messages.recv().await {
//!     println!("{}: {} bytes", msg.topic, msg.payload.len());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod crypto;
mod error;
mod hints;
mod node;
mod queue;

pub use crypto::{key_id, CryptoError, KeyPair, KEY_ID_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE, TAG_SIZE};
pub use error::NodeError;
pub use hints::{PeerHint, PeerHintSink, PeerHintSource};
pub use node::{Node, NodeConfig};
pub use queue::{Messages, ReceivedMessage, DEFAULT_QUEUE_CAPACITY};
