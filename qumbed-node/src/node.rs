//! The node engine: key ownership, relay sessions, publish and subscribe.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use qumbed_proto::{
    registry, validate_payload, Frame, MessageFrame, ProtoError, PublishFrame, SubscribeFrame,
    CODE_SCHEMA_UNKNOWN,
};
use qumbed_transport::{
    dial, Conn, DevIdentity, Server, TlsIdentityProvider, TransportError, IDLE_TIMEOUT,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::crypto::{KeyPair, KEY_ID_SIZE, PUBLIC_KEY_SIZE};
use crate::error::NodeError;
use crate::hints::{PeerHint, PeerHintSink, PeerHintStore};
use crate::queue::{delivery_queue, Messages, QueueSender, ReceivedMessage, DEFAULT_QUEUE_CAPACITY};

/// Configuration for a [`Node`].
#[derive(Clone)]
pub struct NodeConfig {
    /// Local listen address for inbound sessions (`0.0.0.0:0` for any port).
    pub addr: String,
    /// Human-readable identifier for this node, used in logs and discovery.
    pub node_id: String,
    /// Relay address. `None` disables relay pub/sub: publishes become no-ops
    /// and subscribes fail.
    pub relay_addr: Option<String>,
    /// Delivery queue capacity.
    pub message_buffer: usize,
    /// Deadline for dialing the relay.
    pub connect_timeout: Duration,
    /// Deadline for the publish acknowledgement.
    pub ack_timeout: Duration,
    /// TLS identity for the local listener and trust policy for dialing.
    pub identity: Arc<dyn TlsIdentityProvider>,
}

impl NodeConfig {
    /// A configuration with development TLS and default timeouts.
    pub fn new(node_id: &str) -> Self {
        Self {
            addr: "0.0.0.0:0".to_string(),
            node_id: node_id.to_string(),
            relay_addr: None,
            message_buffer: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            identity: Arc::new(DevIdentity),
        }
    }

    /// Set the relay address.
    pub fn with_relay(mut self, addr: &str) -> Self {
        self.relay_addr = Some(addr.to_string());
        self
    }

    /// Set the local listen address.
    pub fn with_listen_addr(mut self, addr: &str) -> Self {
        self.addr = addr.to_string();
        self
    }

    /// Set the delivery queue capacity.
    pub fn with_message_buffer(mut self, capacity: usize) -> Self {
        self.message_buffer = capacity;
        self
    }

    /// Set the TLS identity provider.
    pub fn with_identity(mut self, identity: Arc<dyn TlsIdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    /// Set the dial and acknowledgement deadlines.
    pub fn with_timeouts(mut self, connect: Duration, ack: Duration) -> Self {
        self.connect_timeout = connect;
        self.ack_timeout = ack;
        self
    }
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("addr", &self.addr)
            .field("node_id", &self.node_id)
            .field("relay_addr", &self.relay_addr)
            .field("message_buffer", &self.message_buffer)
            .finish_non_exhaustive()
    }
}

/// State shared with the listener handler and the relay receive loop.
struct Shared {
    node_id: String,
    keys: KeyPair,
    /// Taken (and thereby closed) when the node closes.
    queue: std::sync::Mutex<Option<QueueSender>>,
    /// Subscribers that registered directly with this node's listener:
    /// `topic -> { connection key -> subscriber public key }`.
    subs: DashMap<String, DashMap<String, Vec<u8>>>,
    hints: PeerHintStore,
}

#[derive(Default)]
struct NodeState {
    closed: bool,
    relay_conn: Option<Arc<Conn>>,
    recv_task: Option<JoinHandle<()>>,
}

/// A pub/sub endpoint owning a key pair and at most one live relay session.
///
/// Created in the open state; [`Node::subscribe`] attaches the persistent
/// relay session; [`Node::close`] is terminal and idempotent. Once closed,
/// every operation fails with [`NodeError::Closed`].
pub struct Node {
    config: NodeConfig,
    shared: Arc<Shared>,
    listener: Server,
    state: Mutex<NodeState>,
    messages: Messages,
}

impl Node {
    /// Create a node: generate its key pair and bind the local listener.
    pub async fn new(config: NodeConfig) -> Result<Self, NodeError> {
        let keys = KeyPair::generate();
        let (queue, messages) = delivery_queue(config.message_buffer.max(1));
        let shared = Arc::new(Shared {
            node_id: config.node_id.clone(),
            keys,
            queue: std::sync::Mutex::new(Some(queue)),
            subs: DashMap::new(),
            hints: PeerHintStore::new(),
        });

        let handler_shared = Arc::clone(&shared);
        let listener = Server::listen(
            &config.addr,
            config.identity.as_ref(),
            IDLE_TIMEOUT,
            move |conn| {
                let shared = Arc::clone(&handler_shared);
                async move { shared.handle_inbound(conn).await }
            },
        )
        .await?;
        tracing::info!(
            node_id = %config.node_id,
            addr = %listener.local_addr(),
            "node listening"
        );

        Ok(Self {
            config,
            shared,
            listener,
            state: Mutex::new(NodeState::default()),
            messages,
        })
    }

    /// The node's 32-byte public key, its identity.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.shared.keys.public_bytes()
    }

    /// The node's routing key ID.
    pub fn key_id(&self) -> [u8; KEY_ID_SIZE] {
        self.shared.keys.key_id()
    }

    /// The local listen address.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// A read handle on the delivery queue.
    pub fn messages(&self) -> Messages {
        self.messages.clone()
    }

    /// A sink that records peer hints from a discovery source.
    pub fn peer_hint_sink(&self) -> PeerHintSink {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |hint| shared.hints.insert(hint))
    }

    /// Peer hints observed so far.
    pub fn peer_hints(&self) -> Vec<PeerHint> {
        self.shared.hints.all()
    }

    /// Validate, encrypt, and publish `plaintext` on `topic` for the holder
    /// of `recipient_pub`.
    ///
    /// With a relay configured, this opens a short-lived session, awaits the
    /// relay's acknowledgement, and tears the session down. Without a relay
    /// the publish succeeds as a no-op.
    pub async fn publish(
        &self,
        topic: &str,
        schema_id: &str,
        plaintext: &[u8],
        recipient_pub: &[u8],
    ) -> Result<(), NodeError> {
        self.ensure_open().await?;
        validate_payload(schema_id, plaintext)?;

        let envelope = self.shared.keys.seal(plaintext, recipient_pub)?;
        let frame = Frame::Publish(PublishFrame {
            topic: topic.to_string(),
            payload: envelope,
            schema_id: schema_id.to_string(),
            recipient_key_id: recipient_pub[..KEY_ID_SIZE].to_vec(),
            sender_public_key: self.shared.keys.public_bytes().to_vec(),
        });

        let Some(relay_addr) = &self.config.relay_addr else {
            // direct peer delivery is not wired up yet
            tracing::debug!(topic, "no relay configured, publish dropped");
            return Ok(());
        };

        let conn = timeout(
            self.config.connect_timeout,
            dial(relay_addr, &self.config.identity.mode()),
        )
        .await
        .map_err(|_| NodeError::Timeout)??;

        let result = self.await_publish_ack(&conn, &frame).await;
        conn.close();
        result
    }

    async fn await_publish_ack(&self, conn: &Conn, frame: &Frame) -> Result<(), NodeError> {
        conn.send_frame(frame).await?;
        let reply = timeout(self.config.ack_timeout, conn.recv_frame())
            .await
            .map_err(|_| NodeError::Timeout)??;
        match reply {
            Frame::Ack(ack) if ack.ok => Ok(()),
            Frame::Ack(_) => Err(NodeError::Rejected("publish not acknowledged".to_string())),
            Frame::Error(e) => Err(NodeError::Rejected(format!("{}: {}", e.code, e.message))),
            other => Err(NodeError::Rejected(format!(
                "unexpected reply: {:?}",
                other.frame_type()
            ))),
        }
    }

    /// Register for `topic` on the relay.
    ///
    /// The first subscribe dials the relay, keeps the session as the
    /// persistent relay connection, and starts the receive loop; later
    /// subscribes reuse the same session. Returns as soon as the subscribe
    /// frame is sent; the relay's acknowledgement is consumed by the
    /// receive loop.
    pub async fn subscribe(&self, topic: &str, schema_id: &str) -> Result<(), NodeError> {
        let relay_addr = self
            .config
            .relay_addr
            .clone()
            .ok_or(NodeError::NoRelay)?;
        let frame = Frame::Subscribe(SubscribeFrame {
            topic: topic.to_string(),
            schema_id: schema_id.to_string(),
            public_key: self.shared.keys.public_bytes().to_vec(),
        });

        {
            let state = self.state.lock().await;
            if state.closed {
                return Err(NodeError::Closed);
            }
            if let Some(conn) = &state.relay_conn {
                conn.send_frame(&frame).await?;
                return Ok(());
            }
        }

        let conn = timeout(
            self.config.connect_timeout,
            dial(&relay_addr, &self.config.identity.mode()),
        )
        .await
        .map_err(|_| NodeError::Timeout)??;
        let conn = Arc::new(conn);

        let mut state = self.state.lock().await;
        if state.closed {
            conn.close();
            return Err(NodeError::Closed);
        }
        if let Some(existing) = &state.relay_conn {
            // another subscribe won the race; use its session
            existing.send_frame(&frame).await?;
            conn.close();
            return Ok(());
        }
        if let Err(e) = conn.send_frame(&frame).await {
            conn.close();
            return Err(e.into());
        }
        let task = tokio::spawn(Shared::relay_recv_loop(
            Arc::clone(&self.shared),
            Arc::clone(&conn),
        ));
        state.relay_conn = Some(conn);
        state.recv_task = Some(task);
        Ok(())
    }

    /// Shut the node down: close the relay session, wait for the receive
    /// loop, close the listener, and close the delivery queue. Idempotent.
    pub async fn close(&self) {
        let (conn, task) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            (state.relay_conn.take(), state.recv_task.take())
        };

        if let Some(conn) = conn {
            conn.close();
        }
        if let Some(task) = task {
            let _ = task.await;
        }
        self.listener.close();
        if let Ok(mut queue) = self.shared.queue.lock() {
            queue.take();
        }
        tracing::info!(node_id = %self.shared.node_id, "node closed");
    }

    async fn ensure_open(&self) -> Result<(), NodeError> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(NodeError::Closed);
        }
        Ok(())
    }
}

impl Shared {
    /// Loop over the persistent relay session until it ends.
    async fn relay_recv_loop(shared: Arc<Shared>, conn: Arc<Conn>) {
        loop {
            let frame = match conn.recv_frame().await {
                Ok(frame) => frame,
                Err(TransportError::Proto(ProtoError::UnknownFrameType(t))) => {
                    tracing::debug!(frame_type = t, "ignoring unknown frame type");
                    continue;
                }
                Err(TransportError::Closed) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "relay receive loop ended");
                    break;
                }
            };
            match frame {
                Frame::Message(message) => shared.deliver(message),
                Frame::Ack(ack) => tracing::debug!(ok = ack.ok, "relay ack"),
                Frame::Error(error) => {
                    tracing::warn!(code = %error.code, message = %error.message, "relay error");
                }
                _ => {}
            }
        }
        conn.close();
    }

    /// Decrypt an inbound message and enqueue the plaintext.
    ///
    /// Forged or misaddressed envelopes are dropped without surfacing
    /// anything to the application.
    fn deliver(&self, message: MessageFrame) {
        if message.sender_public_key.len() != PUBLIC_KEY_SIZE {
            return;
        }
        let plaintext = match self
            .keys
            .open(&message.encrypted_payload, &message.sender_public_key)
        {
            Ok(plaintext) => plaintext,
            Err(_) => {
                tracing::debug!(topic = %message.topic, "discarding undecryptable message");
                return;
            }
        };
        if let Ok(queue) = self.queue.lock() {
            if let Some(queue) = queue.as_ref() {
                queue.push(ReceivedMessage {
                    topic: message.topic,
                    payload: plaintext,
                });
            }
        }
    }

    /// Serve one session accepted by the node's own listener.
    async fn handle_inbound(&self, conn: Conn) {
        let conn_key = conn.remote_addr().to_string();
        loop {
            let frame = match conn.recv_frame().await {
                Ok(frame) => frame,
                Err(TransportError::Proto(ProtoError::UnknownFrameType(t))) => {
                    tracing::debug!(%conn_key, frame_type = t, "ignoring unknown frame type");
                    continue;
                }
                Err(TransportError::Closed) => break,
                Err(e) => {
                    tracing::debug!(%conn_key, error = %e, "inbound session ended");
                    break;
                }
            };
            match frame {
                Frame::Subscribe(subscribe) => {
                    if !subscribe.schema_id.is_empty() && !registry().contains(&subscribe.schema_id)
                    {
                        let reply = Frame::error(
                            CODE_SCHEMA_UNKNOWN,
                            format!("unknown schema: {}", subscribe.schema_id),
                        );
                        if let Err(e) = conn.send_frame(&reply).await {
                            tracing::debug!(%conn_key, error = %e, "error reply failed");
                        }
                        continue;
                    }
                    self.subs
                        .entry(subscribe.topic)
                        .or_default()
                        .insert(conn_key.clone(), subscribe.public_key);
                    if let Err(e) = conn.send_frame(&Frame::ack(true)).await {
                        tracing::debug!(%conn_key, error = %e, "subscribe ack failed");
                    }
                }
                Frame::Unsubscribe(unsubscribe) => {
                    if let Some(subscribers) = self.subs.get(&unsubscribe.topic) {
                        subscribers.remove(&conn_key);
                    }
                }
                Frame::Message(message) => self.deliver(message),
                Frame::Discovery(discovery) => {
                    let addr = if discovery.addr.is_empty() {
                        conn_key.clone()
                    } else {
                        discovery.addr
                    };
                    self.hints.insert(PeerHint {
                        addr,
                        public_key: discovery.public_key,
                    });
                }
                // inbound publishes are not routed by nodes
                Frame::Publish(_) | Frame::Ack(_) | Frame::Error(_) => {}
            }
        }

        for subscribers in self.subs.iter() {
            subscribers.value().remove(&conn_key);
        }
        conn.close();
    }
}
