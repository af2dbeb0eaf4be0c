//! The per-topic subscriber table.

use dashmap::DashMap;

/// A single subscriber entry under a topic.
#[derive(Debug, Clone)]
pub struct Subscription<H> {
    /// Schema filter announced at subscribe time; empty means "any payload".
    pub schema_id: String,
    /// Subscriber's public key as announced in the subscribe frame.
    pub public_key: Vec<u8>,
    /// Delivery handle for forwarding messages to this subscriber.
    pub handle: H,
}

/// Concurrent mapping `topic -> { connection key -> subscription }`.
///
/// Access is linearizable per topic. Topics themselves are never pruned;
/// inner entries are removed on unsubscribe or when the owning connection
/// goes away, so every entry's lifetime is bounded by its connection's.
#[derive(Debug)]
pub struct TopicTable<H> {
    topics: DashMap<String, DashMap<String, Subscription<H>>>,
}

impl<H> Default for TopicTable<H> {
    fn default() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }
}

impl<H: Clone> TopicTable<H> {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the subscription for `(topic, conn_key)`.
    ///
    /// A connection re-subscribing to the same topic supersedes its previous
    /// entry.
    pub fn subscribe(&self, topic: &str, conn_key: &str, subscription: Subscription<H>) {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(conn_key.to_string(), subscription);
    }

    /// Remove `(topic, conn_key)`. Removing an absent entry is a no-op.
    pub fn unsubscribe(&self, topic: &str, conn_key: &str) {
        if let Some(subscribers) = self.topics.get(topic) {
            subscribers.remove(conn_key);
        }
    }

    /// Snapshot the current subscribers for `topic`.
    pub fn subscribers(&self, topic: &str) -> Vec<(String, Subscription<H>)> {
        match self.topics.get(topic) {
            Some(subscribers) => subscribers
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of subscribers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Remove `conn_key` from every topic. Called once when the owning
    /// connection's handler exits.
    pub fn remove_connection(&self, conn_key: &str) {
        for subscribers in self.topics.iter() {
            subscribers.value().remove(conn_key);
        }
    }

    /// Whether any topic still references `conn_key`.
    pub fn references(&self, conn_key: &str) -> bool {
        self.topics
            .iter()
            .any(|subscribers| subscribers.value().contains_key(conn_key))
    }
}
