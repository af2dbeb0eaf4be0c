//! Peer hints from local discovery.
//!
//! A hint source (an mDNS browser, a static list, a test fixture) reports
//! peers it has observed. The node records them for future direct
//! connections but never dials a hint on its own.

use std::sync::Arc;

use dashmap::DashMap;

/// An observed peer: transport address plus announced public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHint {
    /// Address the peer can be reached at (`ip:port`).
    pub addr: String,
    /// The peer's announced public key.
    pub public_key: Vec<u8>,
}

/// Callback handle a hint source drives; each call records one peer.
pub type PeerHintSink = Arc<dyn Fn(PeerHint) + Send + Sync>;

/// Anything that can feed peer hints into a sink.
pub trait PeerHintSource {
    /// Start reporting observed peers to `sink`. Implementations own their
    /// browsing lifecycle.
    fn watch(&self, sink: PeerHintSink);
}

/// Hints observed so far, keyed by address. A re-announced address replaces
/// the prior entry.
#[derive(Debug, Default)]
pub(crate) struct PeerHintStore {
    hints: DashMap<String, PeerHint>,
}

impl PeerHintStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, hint: PeerHint) {
        tracing::debug!(addr = %hint.addr, "peer hint recorded");
        self.hints.insert(hint.addr.clone(), hint);
    }

    pub(crate) fn all(&self) -> Vec<PeerHint> {
        self.hints.iter().map(|entry| entry.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reannounced_addr_replaces_entry() {
        let store = PeerHintStore::new();
        store.insert(PeerHint {
            addr: "192.168.1.5:6121".into(),
            public_key: vec![1; 32],
        });
        store.insert(PeerHint {
            addr: "192.168.1.5:6121".into(),
            public_key: vec![2; 32],
        });

        let hints = store.all();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].public_key, vec![2; 32]);
    }
}
