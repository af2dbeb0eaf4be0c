//! # qumbed-transport
//!
//! QUIC transport for Qumbed endpoints.
//!
//! Every session carries a single bidirectional stream. Frames are
//! length-prefixed JSON bodies ([`qumbed_proto::Frame`]), delivered in order
//! within the stream. Sessions are TLS-authenticated with ALPN `qumbed/1`
//! and kept alive through long idle periods, because subscriptions may sit
//! silent for minutes between messages.
//!
//! - [`Server::listen`] binds a listener and hands each inbound session to a
//!   handler as a [`Conn`]
//! - [`dial`] opens an outbound session and returns its [`Conn`]
//! - [`TlsIdentityProvider`] supplies the listener certificate and the
//!   client-side trust policy ([`DevIdentity`] for self-signed development
//!   setups)

#![warn(missing_docs)]
#![warn(clippy::all)]

mod conn;
mod endpoint;
mod error;
mod tls;

pub use conn::Conn;
pub use endpoint::{dial, Server, IDLE_TIMEOUT};
pub use error::TransportError;
pub use tls::{DevIdentity, TlsIdentityProvider, TlsMode, ALPN};
