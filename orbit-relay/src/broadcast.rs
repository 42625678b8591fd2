//! Fan-out of encoded frames to the connections of one room.
//!
//! Each connection owns a bounded mpsc queue drained by its socket task.
//! Broadcasting clones one `Arc<str>` per recipient; a recipient whose
//! queue is full or closed simply misses the frame (at-most-once).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{ConnectionId, Frame};

/// Default per-connection queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Atomic broadcast stats, updated without taking the peer lock for writing.
#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// The live connections of a room and their outbound queues.
pub struct BroadcastGroup {
    peers: RwLock<HashMap<ConnectionId, mpsc::Sender<Frame>>>,
    /// Frames buffered per connection before drops start
    capacity: usize,
    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            atomic_stats: AtomicBroadcastStats::default(),
        }
    }

    /// Register a connection and return the receiving end of its queue.
    ///
    /// `greeting` is the one unicast the relay makes. It is queued before
    /// the connection becomes visible to [`broadcast`](Self::broadcast), so
    /// it is always the first frame the connection sees. Re-registering an
    /// id replaces the old queue.
    pub async fn add_peer(&self, id: ConnectionId, greeting: Option<Frame>) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if let Some(frame) = greeting {
            // Fresh channel with capacity >= 1: cannot be full.
            if tx.try_send(frame).is_ok() {
                self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
        let mut peers = self.peers.write().await;
        if peers.insert(id.clone(), tx).is_some() {
            log::warn!("Connection {id} registered twice; previous queue closed");
        }
        rx
    }

    /// Unregister a connection. Returns whether it was registered.
    pub async fn remove_peer(&self, id: &ConnectionId) -> bool {
        self.peers.write().await.remove(id).is_some()
    }

    /// Send a frame to every connection not in `exclude`.
    ///
    /// Returns the number of queues that accepted the frame.
    pub async fn broadcast(&self, frame: Frame, exclude: &[ConnectionId]) -> usize {
        let peers = self.peers.read().await;
        let mut delivered = 0;
        for (id, tx) in peers.iter() {
            if exclude.contains(id) {
                continue;
            }
            if self.deliver(id, tx, frame.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    fn deliver(&self, id: &ConnectionId, tx: &mpsc::Sender<Frame>, frame: Frame) -> bool {
        match tx.try_send(frame) {
            Ok(()) => {
                self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!("Connection {id} lagging; frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                // Socket task is gone; leave() will unregister it shortly
                self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peer_ids(&self) -> Vec<ConnectionId> {
        self.peers.read().await.keys().cloned().collect()
    }

    pub async fn stats(&self) -> BroadcastStats {
        let peers = self.peers.read().await;
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: peers.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> Frame {
        Frame::from(text)
    }

    #[tokio::test]
    async fn test_add_remove_peer() {
        let group = BroadcastGroup::new(16);
        let alice = ConnectionId::from("alice");

        let _rx = group.add_peer(alice.clone(), None).await;
        assert_eq!(group.peer_count().await, 1);
        assert_eq!(group.peer_ids().await, vec![alice.clone()]);

        assert!(group.remove_peer(&alice).await);
        assert!(!group.remove_peer(&alice).await);
        assert_eq!(group.peer_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let group = BroadcastGroup::new(16);
        let mut rx_a = group.add_peer("a".into(), None).await;
        let mut rx_b = group.add_peer("b".into(), None).await;
        let mut rx_c = group.add_peer("c".into(), None).await;

        let count = group.broadcast(frame("hello"), &["a".into()]).await;
        assert_eq!(count, 2);

        assert_eq!(&*rx_b.recv().await.unwrap(), "hello");
        assert_eq!(&*rx_c.recv().await.unwrap(), "hello");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_greeting_is_first() {
        let group = BroadcastGroup::new(16);
        let _rx_a = group.add_peer("a".into(), None).await;
        let mut rx_b = group.add_peer("b".into(), Some(frame("init"))).await;
        group.broadcast(frame("later"), &[]).await;

        assert_eq!(&*rx_b.recv().await.unwrap(), "init");
        assert_eq!(&*rx_b.recv().await.unwrap(), "later");
    }

    #[tokio::test]
    async fn test_full_queue_drops() {
        let group = BroadcastGroup::new(2);
        let mut rx = group.add_peer("slow".into(), None).await;

        assert_eq!(group.broadcast(frame("1"), &[]).await, 1);
        assert_eq!(group.broadcast(frame("2"), &[]).await, 1);
        assert_eq!(group.broadcast(frame("3"), &[]).await, 0);

        let stats = group.stats().await;
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_dropped, 1);
        assert_eq!(stats.active_peers, 1);

        assert_eq!(&*rx.recv().await.unwrap(), "1");
        assert_eq!(&*rx.recv().await.unwrap(), "2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_receiver_counts_as_dropped() {
        let group = BroadcastGroup::new(4);
        let rx = group.add_peer("gone".into(), None).await;
        drop(rx);

        assert_eq!(group.broadcast(frame("x"), &[]).await, 0);
        assert_eq!(group.stats().await.messages_dropped, 1);
    }

    #[tokio::test]
    async fn test_zero_capacity_still_greets() {
        let group = BroadcastGroup::new(0);
        let mut rx = group.add_peer("a".into(), Some(frame("init"))).await;

        // Queue holds exactly one frame
        assert_eq!(group.broadcast(frame("late"), &[]).await, 0);
        assert_eq!(&*rx.recv().await.unwrap(), "init");
        assert_eq!(group.broadcast(frame("next"), &[]).await, 1);
    }
}
