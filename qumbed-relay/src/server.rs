//! The relay engine: per-connection dispatch and topic fan-out.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qumbed_proto::{Frame, MessageFrame, ProtoError, PublishFrame, SubscribeFrame};
use qumbed_transport::{Conn, Server, TlsIdentityProvider, TransportError};

use crate::error::RelayError;
use crate::table::{Subscription, TopicTable};

/// Operational counters for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart) and
/// lock-free via `AtomicU64`.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Sessions accepted.
    pub connections_total: AtomicU64,
    /// Subscribe frames applied.
    pub subscribes_total: AtomicU64,
    /// Publish frames handled.
    pub publishes_total: AtomicU64,
    /// Message frames delivered to subscribers.
    pub messages_forwarded: AtomicU64,
    /// Per-subscriber delivery failures.
    pub forward_failures: AtomicU64,
    /// Frames dropped because the relay does not consume them.
    pub frames_ignored: AtomicU64,
}

/// The zero-knowledge broker: routes frames by topic and never opens
/// payloads.
///
/// Payload bytes pass through `handle_publish` untouched. The relay has no
/// schema registry and no key material, so a compromised relay learns only
/// topics and routing hints.
#[derive(Default)]
pub struct RelayEngine {
    table: TopicTable<Arc<Conn>>,
    metrics: RelayMetrics,
}

impl RelayEngine {
    /// A relay with an empty topic table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The topic table, for inspection.
    pub fn table(&self) -> &TopicTable<Arc<Conn>> {
        &self.table
    }

    /// The operational counters.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Bind `addr` and serve until the returned [`Server`] is closed.
    ///
    /// `idle_timeout` comes from [`ServerConfig::idle_timeout`]
    /// (or [`IDLE_TIMEOUT`] when there is no config to honor).
    ///
    /// [`ServerConfig::idle_timeout`]: crate::config::ServerConfig::idle_timeout
    /// [`IDLE_TIMEOUT`]: qumbed_transport::IDLE_TIMEOUT
    pub async fn listen(
        self: &Arc<Self>,
        addr: &str,
        identity: &dyn TlsIdentityProvider,
        idle_timeout: Duration,
    ) -> Result<Server, RelayError> {
        let engine = Arc::clone(self);
        let server = Server::listen(addr, identity, idle_timeout, move |conn| {
            let engine = Arc::clone(&engine);
            async move { engine.handle_conn(conn).await }
        })
        .await?;
        tracing::info!(
            addr = %server.local_addr(),
            idle_timeout_secs = idle_timeout.as_secs(),
            "relay listening"
        );
        Ok(server)
    }

    /// Serve one inbound connection until its stream ends, then remove it
    /// from every topic. Cleanup runs exactly once, here.
    pub async fn handle_conn(&self, conn: Conn) {
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(conn);
        let conn_key = conn.remote_addr().to_string();
        tracing::debug!(%conn_key, "connection accepted");

        loop {
            let frame = match conn.recv_frame().await {
                Ok(frame) => frame,
                Err(TransportError::Proto(ProtoError::UnknownFrameType(t))) => {
                    // fully consumed off the stream; safe to skip
                    tracing::debug!(%conn_key, frame_type = t, "ignoring unknown frame type");
                    self.metrics.frames_ignored.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Err(TransportError::Closed) => break,
                Err(e) => {
                    tracing::debug!(%conn_key, error = %e, "receive failed");
                    break;
                }
            };

            match frame {
                Frame::Subscribe(subscribe) => {
                    self.handle_subscribe(&conn, &conn_key, subscribe).await;
                }
                Frame::Unsubscribe(unsubscribe) => {
                    self.table.unsubscribe(&unsubscribe.topic, &conn_key);
                }
                Frame::Publish(publish) => {
                    self.handle_publish(&conn, publish).await;
                }
                Frame::Message(_) | Frame::Ack(_) | Frame::Error(_) | Frame::Discovery(_) => {
                    self.metrics.frames_ignored.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        self.table.remove_connection(&conn_key);
        conn.close();
        tracing::debug!(%conn_key, "connection cleaned up");
    }

    async fn handle_subscribe(&self, conn: &Arc<Conn>, conn_key: &str, subscribe: SubscribeFrame) {
        // no schema check: the relay is schema-agnostic
        let SubscribeFrame {
            topic,
            schema_id,
            public_key,
        } = subscribe;
        self.table.subscribe(
            &topic,
            conn_key,
            Subscription {
                schema_id,
                public_key,
                handle: Arc::clone(conn),
            },
        );
        self.metrics.subscribes_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%conn_key, %topic, "subscribed");

        if let Err(e) = conn.send_frame(&Frame::ack(true)).await {
            tracing::debug!(%conn_key, error = %e, "subscribe ack failed");
        }
    }

    async fn handle_publish(&self, conn: &Arc<Conn>, publish: PublishFrame) {
        self.metrics.publishes_total.fetch_add(1, Ordering::Relaxed);

        // The payload is copied into the message byte-for-byte; only the
        // recipient holds the key that opens it.
        let message = Frame::Message(MessageFrame {
            topic: publish.topic.clone(),
            encrypted_payload: publish.payload,
            sender_key_id: publish.recipient_key_id,
            sender_public_key: publish.sender_public_key,
        });

        let subscribers = self.table.subscribers(&publish.topic);
        let total = subscribers.len();
        let mut delivered = 0usize;
        for (subscriber_key, subscription) in subscribers {
            match subscription.handle.send_frame(&message).await {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.messages_forwarded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    // failed subscribers stay in the table until their own
                    // handler observes the broken stream and cleans up
                    self.metrics.forward_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        topic = %publish.topic,
                        subscriber = %subscriber_key,
                        error = %e,
                        "failed to forward to subscriber"
                    );
                }
            }
        }
        tracing::info!(topic = %publish.topic, delivered, total, "publish forwarded");

        if let Err(e) = conn.send_frame(&Frame::ack(true)).await {
            tracing::debug!(publisher = %conn.remote_addr(), error = %e, "publish ack failed");
        }
    }
}

impl std::fmt::Debug for RelayEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayEngine")
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qumbed_proto::{AckFrame, UnsubscribeFrame};
    use qumbed_transport::{dial, DevIdentity, TlsMode};
    use std::time::Duration;

    async fn start_relay() -> (Arc<RelayEngine>, Server, String) {
        let engine = Arc::new(RelayEngine::new());
        let server = engine
            .listen("127.0.0.1:0", &DevIdentity, qumbed_transport::IDLE_TIMEOUT)
            .await
            .unwrap();
        let addr = format!("127.0.0.1:{}", server.local_addr().port());
        (engine, server, addr)
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached in time");
    }

    fn subscribe_frame(topic: &str) -> Frame {
        Frame::Subscribe(SubscribeFrame {
            topic: topic.to_string(),
            schema_id: String::new(),
            public_key: vec![1; 32],
        })
    }

    #[tokio::test]
    async fn subscribe_is_acked_and_registered() {
        let (engine, server, addr) = start_relay().await;
        let conn = dial(&addr, &TlsMode::Dev).await.unwrap();

        conn.send_frame(&subscribe_frame("t/sub")).await.unwrap();
        let reply = conn.recv_frame().await.unwrap();
        assert_eq!(
            reply,
            Frame::Ack(AckFrame {
                message_id: String::new(),
                ok: true
            })
        );
        assert_eq!(engine.table().subscriber_count("t/sub"), 1);

        conn.close();
        server.close();
    }

    #[tokio::test]
    async fn publish_fans_out_payload_verbatim() {
        let (engine, server, addr) = start_relay().await;

        let subscriber = dial(&addr, &TlsMode::Dev).await.unwrap();
        subscriber.send_frame(&subscribe_frame("t/zk")).await.unwrap();
        assert!(matches!(
            subscriber.recv_frame().await.unwrap(),
            Frame::Ack(_)
        ));

        // an arbitrary byte string: the relay must not care what it is
        let payload: Vec<u8> = (0..=255u8).collect();
        let publisher = dial(&addr, &TlsMode::Dev).await.unwrap();
        publisher
            .send_frame(&Frame::Publish(PublishFrame {
                topic: "t/zk".into(),
                payload: payload.clone(),
                schema_id: "sensor.Temperature".into(),
                recipient_key_id: vec![9; 8],
                sender_public_key: vec![7; 32],
            }))
            .await
            .unwrap();
        assert!(matches!(
            publisher.recv_frame().await.unwrap(),
            Frame::Ack(AckFrame { ok: true, .. })
        ));

        match subscriber.recv_frame().await.unwrap() {
            Frame::Message(message) => {
                assert_eq!(message.topic, "t/zk");
                assert_eq!(message.encrypted_payload, payload);
                assert_eq!(message.sender_key_id, vec![9; 8]);
                assert_eq!(message.sender_public_key, vec![7; 32]);
            }
            other => panic!("expected Message, got {:?}", other),
        }
        assert_eq!(engine.metrics().messages_forwarded.load(Ordering::Relaxed), 1);

        subscriber.close();
        publisher.close();
        server.close();
    }

    #[tokio::test]
    async fn publish_without_subscribers_still_acks() {
        let (engine, server, addr) = start_relay().await;
        let publisher = dial(&addr, &TlsMode::Dev).await.unwrap();

        publisher
            .send_frame(&Frame::Publish(PublishFrame {
                topic: "t/empty".into(),
                payload: vec![1, 2, 3],
                schema_id: String::new(),
                recipient_key_id: vec![0; 8],
                sender_public_key: vec![0; 32],
            }))
            .await
            .unwrap();
        assert!(matches!(
            publisher.recv_frame().await.unwrap(),
            Frame::Ack(AckFrame { ok: true, .. })
        ));
        assert_eq!(engine.metrics().messages_forwarded.load(Ordering::Relaxed), 0);

        publisher.close();
        server.close();
    }

    #[tokio::test]
    async fn unsubscribe_removes_entry_without_reply() {
        let (engine, server, addr) = start_relay().await;
        let conn = dial(&addr, &TlsMode::Dev).await.unwrap();

        conn.send_frame(&subscribe_frame("t/u")).await.unwrap();
        assert!(matches!(conn.recv_frame().await.unwrap(), Frame::Ack(_)));

        conn.send_frame(&Frame::Unsubscribe(UnsubscribeFrame {
            topic: "t/u".into(),
        }))
        .await
        .unwrap();
        wait_for(|| engine.table().subscriber_count("t/u") == 0).await;

        // unsubscribing a topic never subscribed is fine too
        conn.send_frame(&Frame::Unsubscribe(UnsubscribeFrame {
            topic: "t/never".into(),
        }))
        .await
        .unwrap();

        conn.close();
        server.close();
    }

    #[tokio::test]
    async fn disconnect_cleans_up_all_topics() {
        let (engine, server, addr) = start_relay().await;
        let conn = dial(&addr, &TlsMode::Dev).await.unwrap();

        for i in 0..10 {
            conn.send_frame(&subscribe_frame(&format!("t/clean/{i}")))
                .await
                .unwrap();
            assert!(matches!(conn.recv_frame().await.unwrap(), Frame::Ack(_)));
        }
        let conn_key = {
            let subscribers = engine.table().subscribers("t/clean/0");
            subscribers[0].0.clone()
        };

        conn.close();
        wait_for(|| !engine.table().references(&conn_key)).await;

        for i in 0..10 {
            assert_eq!(engine.table().subscriber_count(&format!("t/clean/{i}")), 0);
        }
        server.close();
    }

    #[tokio::test]
    async fn node_direction_frames_are_ignored() {
        let (engine, server, addr) = start_relay().await;
        let conn = dial(&addr, &TlsMode::Dev).await.unwrap();

        conn.send_frame(&Frame::Message(MessageFrame {
            topic: "t/x".into(),
            encrypted_payload: vec![1],
            sender_key_id: vec![0; 8],
            sender_public_key: vec![0; 32],
        }))
        .await
        .unwrap();
        conn.send_frame(&Frame::ack(true)).await.unwrap();
        conn.send_frame(&Frame::error("X", "nope")).await.unwrap();

        wait_for(|| engine.metrics().frames_ignored.load(Ordering::Relaxed) >= 3).await;

        // the connection is still healthy after the ignored frames
        conn.send_frame(&subscribe_frame("t/alive")).await.unwrap();
        assert!(matches!(conn.recv_frame().await.unwrap(), Frame::Ack(_)));

        conn.close();
        server.close();
    }
}
