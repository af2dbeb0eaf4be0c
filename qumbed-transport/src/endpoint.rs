//! Listener and dialer for Qumbed sessions.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use crate::conn::Conn;
use crate::error::TransportError;
use crate::tls::{self, TlsIdentityProvider, TlsMode};

/// Default session idle timeout. QUIC's default of tens of seconds would
/// reap quiet subscribers; subscriptions must survive minutes of silence.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Keep-alive ping interval, so NAT bindings stay warm on idle sessions.
pub(crate) const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// A bound listener accepting Qumbed sessions.
pub struct Server {
    endpoint: quinn::Endpoint,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind `addr` and invoke `handler` once per inbound session.
    ///
    /// Each session carries a single bidirectional stream, opened by the
    /// dialer; the handler owns the resulting [`Conn`] until it returns.
    /// Accepting continues until [`Server::close`] is called. `idle_timeout`
    /// is how long a session may sit silent before it is reaped; pass
    /// [`IDLE_TIMEOUT`] unless the caller carries its own setting.
    pub async fn listen<H, Fut>(
        addr: &str,
        identity: &dyn TlsIdentityProvider,
        idle_timeout: Duration,
        handler: H,
    ) -> Result<Self, TransportError>
    where
        H: Fn(Conn) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let addr = resolve(addr)?;
        let config = tls::server_config(identity, idle_timeout)?;
        let endpoint = quinn::Endpoint::server(config, addr)?;
        let local_addr = endpoint.local_addr()?;

        let accept_endpoint = endpoint.clone();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Some(incoming) = accept_endpoint.accept().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    let connection = match incoming.await {
                        Ok(connection) => connection,
                        Err(e) => {
                            tracing::debug!(error = %e, "handshake failed");
                            return;
                        }
                    };
                    let remote = connection.remote_address();
                    match connection.accept_bi().await {
                        Ok((send, recv)) => handler(Conn::new(connection, send, recv)).await,
                        Err(e) => {
                            tracing::debug!(%remote, error = %e, "session ended before stream");
                        }
                    }
                });
            }
        });

        Ok(Self {
            endpoint,
            local_addr,
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and tear down every session on this endpoint.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"shutdown");
    }
}

/// Dial `addr`, open the session's bidirectional stream, and return the
/// connection.
///
/// The session is released when the returned [`Conn`] is closed or dropped,
/// on every exit path.
pub async fn dial(addr: &str, mode: &TlsMode) -> Result<Conn, TransportError> {
    let remote = resolve(addr)?;
    let bind = match remote {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let mut endpoint = quinn::Endpoint::client(bind)?;
    endpoint.set_default_client_config(tls::client_config(mode, IDLE_TIMEOUT)?);

    let connecting = endpoint
        .connect(remote, &server_name(addr))
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    let connection = connecting
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    let (send, recv) = connection
        .open_bi()
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    Ok(Conn::new(connection, send, recv))
}

fn resolve(addr: &str) -> Result<SocketAddr, TransportError> {
    let mut addrs = addr.to_socket_addrs().map_err(|e| {
        TransportError::InvalidAddress {
            addr: addr.to_string(),
            reason: e.to_string(),
        }
    })?;
    addrs.next().ok_or_else(|| TransportError::InvalidAddress {
        addr: addr.to_string(),
        reason: "no addresses resolved".to_string(),
    })
}

/// TLS server name for a dialed address: the host part when it is a
/// hostname, a fixed placeholder for bare IPs (which only occur with
/// self-signed development certificates).
fn server_name(addr: &str) -> String {
    let host = addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        "localhost".to_string()
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::DevIdentity;
    use qumbed_proto::{Frame, SubscribeFrame};

    #[test]
    fn idle_timeout_covers_long_lived_subscriptions() {
        assert!(IDLE_TIMEOUT >= Duration::from_secs(300));
        assert!(KEEP_ALIVE_INTERVAL < IDLE_TIMEOUT);
    }

    #[test]
    fn server_name_prefers_hostnames() {
        assert_eq!(server_name("relay.example.com:6121"), "relay.example.com");
        assert_eq!(server_name("127.0.0.1:6121"), "localhost");
        assert_eq!(server_name("[::1]:6121"), "localhost");
    }

    #[test]
    fn resolve_rejects_garbage() {
        assert!(matches!(
            resolve("not an address"),
            Err(TransportError::InvalidAddress { .. })
        ));
    }

    #[tokio::test]
    async fn dial_and_echo_one_frame() {
        let server = Server::listen("127.0.0.1:0", &DevIdentity, IDLE_TIMEOUT, |conn| async move {
            // echo whatever arrives back on the same stream
            while let Ok(frame) = conn.recv_frame().await {
                if conn.send_frame(&frame).await.is_err() {
                    break;
                }
            }
        })
        .await
        .unwrap();

        let addr = format!("127.0.0.1:{}", server.local_addr().port());
        let conn = dial(&addr, &TlsMode::Dev).await.unwrap();

        let frame = Frame::Subscribe(SubscribeFrame {
            topic: "t/echo".into(),
            schema_id: String::new(),
            public_key: vec![1; 32],
        });
        conn.send_frame(&frame).await.unwrap();
        let echoed = conn.recv_frame().await.unwrap();
        assert_eq!(echoed, frame);

        conn.close();
        server.close();
    }

    #[tokio::test]
    async fn remote_addr_is_ip_port() {
        let server = Server::listen("127.0.0.1:0", &DevIdentity, IDLE_TIMEOUT, |conn| async move {
            let _ = conn.recv_frame().await;
        })
        .await
        .unwrap();

        let addr = format!("127.0.0.1:{}", server.local_addr().port());
        let conn = dial(&addr, &TlsMode::Dev).await.unwrap();
        let remote: SocketAddr = conn.remote_addr().parse().unwrap();
        assert_eq!(remote.port(), server.local_addr().port());

        conn.close();
        server.close();
    }

    #[tokio::test]
    async fn dial_without_listener_fails() {
        // port 1 on localhost is almost certainly closed; the handshake times out
        let result = tokio::time::timeout(
            Duration::from_secs(15),
            dial("127.0.0.1:1", &TlsMode::Dev),
        )
        .await;
        match result {
            Ok(Err(_)) => {}
            Ok(Ok(_)) => panic!("dial unexpectedly succeeded"),
            Err(_) => {} // timed out waiting, also a failure to connect
        }
    }
}
