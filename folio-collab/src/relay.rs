//! Room-scoped fan-out of change units.
//!
//! Each document id maps to one [`RelayChannel`]. A channel holds one bounded
//! outbox per member session; a broadcast encodes the frame once and pushes
//! the shared bytes into every outbox except the sender's.
//!
//! Delivery is best-effort: a full or closed outbox drops the frame and the
//! drop is counted, never retried. Per-sender order holds because each outbox
//! is FIFO and a session broadcasts sequentially.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{ProtocolError, SessionId, SyncMessage};

/// Pre-encoded frame shared by every recipient.
pub type Frame = Arc<Vec<u8>>;

/// Sending half of a session's outbound queue.
pub type Outbox = mpsc::Sender<Frame>;

/// Relay failures.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to encode relay frame: {0}")]
    Encode(#[from] ProtocolError),
}

/// Outcome of a single broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Statistics for monitoring relay health.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

struct AtomicRelayStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

impl AtomicRelayStats {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }
}

/// Fan-out group for a single document room.
pub struct RelayChannel {
    peers: RwLock<HashMap<SessionId, Outbox>>,
    stats: AtomicRelayStats,
}

impl RelayChannel {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            stats: AtomicRelayStats::new(),
        }
    }

    /// Add a member. Returns `false` if it was already present, in which
    /// case its original outbox is kept.
    pub async fn add_peer(&self, session_id: SessionId, outbox: Outbox) -> bool {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&session_id) {
            return false;
        }
        peers.insert(session_id, outbox);
        true
    }

    /// Remove a member. Returns `false` for non-members.
    pub async fn remove_peer(&self, session_id: &SessionId) -> bool {
        self.peers.write().await.remove(session_id).is_some()
    }

    /// Push `frame` to every member except `sender`.
    pub async fn broadcast_from(&self, sender: SessionId, frame: Frame) -> Delivery {
        let peers = self.peers.read().await;
        let mut delivery = Delivery::default();

        for (session_id, outbox) in peers.iter() {
            if *session_id == sender {
                continue;
            }
            match outbox.try_send(frame.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Outbox of session {session_id} is full, dropping frame");
                    delivery.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Outbox of session {session_id} is closed, dropping frame");
                    delivery.dropped += 1;
                }
            }
        }

        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .messages_dropped
            .fetch_add(delivery.dropped as u64, Ordering::Relaxed);
        delivery
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn has_peer(&self, session_id: &SessionId) -> bool {
        self.peers.read().await.contains_key(session_id)
    }

    pub async fn peers(&self) -> Vec<SessionId> {
        self.peers.read().await.keys().copied().collect()
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.read().await.len(),
        }
    }
}

impl Default for RelayChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps document ids to their relay channels.
///
/// Rooms are created on first join and discarded as soon as their last
/// member leaves. Join and leave hold the registry write lock for the whole
/// membership change, so a room is never dropped under a concurrent joiner.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Arc<RelayChannel>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Admit `session_id` to the room for `doc_id`. Idempotent.
    pub async fn join(&self, doc_id: &str, session_id: SessionId, outbox: Outbox) -> bool {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(doc_id.to_string())
            .or_insert_with(|| Arc::new(RelayChannel::new()));
        let added = room.add_peer(session_id, outbox).await;
        if added {
            log::debug!("Session {session_id} joined room {doc_id}");
        }
        added
    }

    /// Remove `session_id` from the room for `doc_id`. No-op for non-members.
    pub async fn leave(&self, doc_id: &str, session_id: SessionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(doc_id) else {
            return false;
        };
        let removed = room.remove_peer(&session_id).await;
        if room.peer_count().await == 0 {
            rooms.remove(doc_id);
            log::info!("Room {doc_id} removed (empty)");
        }
        removed
    }

    /// Encode `msg` once and fan it out to the room, skipping `sender`.
    pub async fn broadcast(
        &self,
        doc_id: &str,
        sender: SessionId,
        msg: &SyncMessage,
    ) -> Result<Delivery, RelayError> {
        let frame = Arc::new(msg.encode()?);
        Ok(self.broadcast_raw(doc_id, sender, frame).await)
    }

    /// Fan out pre-encoded bytes. A missing room delivers to nobody.
    pub async fn broadcast_raw(&self, doc_id: &str, sender: SessionId, frame: Frame) -> Delivery {
        let room = self.room(doc_id).await;
        match room {
            Some(room) => room.broadcast_from(sender, frame).await,
            None => Delivery::default(),
        }
    }

    pub async fn room(&self, doc_id: &str) -> Option<Arc<RelayChannel>> {
        self.rooms.read().await.get(doc_id).cloned()
    }

    /// Current members of a room (empty if the room does not exist).
    pub async fn members(&self, doc_id: &str) -> Vec<SessionId> {
        match self.room(doc_id).await {
            Some(room) => room.peers().await,
            None => Vec::new(),
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn active_documents(&self) -> Vec<String> {
        self.rooms.read().await.keys().cloned().collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};
    use uuid::Uuid;

    fn outbox(capacity: usize) -> (Outbox, mpsc::Receiver<Frame>) {
        mpsc::channel(capacity)
    }

    #[tokio::test]
    async fn test_channel_add_remove() {
        let channel = RelayChannel::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = outbox(4);

        assert!(channel.add_peer(id, tx.clone()).await);
        assert!(!channel.add_peer(id, tx).await);
        assert_eq!(channel.peer_count().await, 1);

        assert!(channel.remove_peer(&id).await);
        assert!(!channel.remove_peer(&id).await);
        assert!(!channel.has_peer(&id).await);
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let channel = RelayChannel::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, mut rx_a) = outbox(4);
        let (tx_b, mut rx_b) = outbox(4);
        let (tx_c, mut rx_c) = outbox(4);
        channel.add_peer(a, tx_a).await;
        channel.add_peer(b, tx_b).await;
        channel.add_peer(c, tx_c).await;

        let delivery = channel.broadcast_from(a, Arc::new(vec![1, 2, 3])).await;
        assert_eq!(delivery, Delivery { delivered: 2, dropped: 0 });

        assert_eq!(*rx_b.recv().await.unwrap(), vec![1, 2, 3]);
        assert_eq!(*rx_c.recv().await.unwrap(), vec![1, 2, 3]);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_outbox_drops_without_blocking() {
        let channel = RelayChannel::new();
        let sender = Uuid::new_v4();
        let (tx, _rx) = outbox(1);
        channel.add_peer(Uuid::new_v4(), tx).await;

        let first = channel.broadcast_from(sender, Arc::new(vec![1])).await;
        let second = channel.broadcast_from(sender, Arc::new(vec![2])).await;

        assert_eq!(first.delivered, 1);
        assert_eq!(second.dropped, 1);
        let stats = channel.stats().await;
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.messages_dropped, 1);
    }

    #[tokio::test]
    async fn test_closed_outbox_counts_as_dropped() {
        let channel = RelayChannel::new();
        let (tx, rx) = outbox(4);
        channel.add_peer(Uuid::new_v4(), tx).await;
        drop(rx);

        let delivery = channel.broadcast_from(Uuid::new_v4(), Arc::new(vec![9])).await;
        assert_eq!(delivery, Delivery { delivered: 0, dropped: 1 });
    }

    #[tokio::test]
    async fn test_registry_join_is_idempotent() {
        let registry = RoomRegistry::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = outbox(4);

        assert!(registry.join("doc", id, tx.clone()).await);
        assert!(!registry.join("doc", id, tx).await);
        assert_eq!(registry.members("doc").await, vec![id]);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_registry_leave_discards_empty_room() {
        let registry = RoomRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, _rx_a) = outbox(4);
        let (tx_b, _rx_b) = outbox(4);
        registry.join("doc", a, tx_a).await;
        registry.join("doc", b, tx_b).await;

        assert!(registry.leave("doc", a).await);
        assert_eq!(registry.room_count().await, 1);
        assert!(registry.leave("doc", b).await);
        assert_eq!(registry.room_count().await, 0);

        // Leaving again, or leaving an unknown room, is a no-op.
        assert!(!registry.leave("doc", b).await);
        assert!(!registry.leave("other", a).await);
    }

    #[tokio::test]
    async fn test_registry_isolates_rooms() {
        let registry = RoomRegistry::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, _rx_a) = outbox(4);
        let (tx_b, mut rx_b) = outbox(4);
        let (tx_c, mut rx_c) = outbox(4);
        registry.join("doc1", a, tx_a).await;
        registry.join("doc1", b, tx_b).await;
        registry.join("doc2", c, tx_c).await;

        let msg = SyncMessage::receive_changes(a, "doc1", 1, b"{}".to_vec());
        let delivery = registry.broadcast("doc1", a, &msg).await.unwrap();
        assert_eq!(delivery.delivered, 1);

        let frame = rx_b.recv().await.unwrap();
        assert_eq!(SyncMessage::decode(&frame).unwrap().session_id, a);
        assert!(timeout(Duration::from_millis(50), rx_c.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_missing_room() {
        let registry = RoomRegistry::new();
        let delivery = registry
            .broadcast_raw("nobody", Uuid::new_v4(), Arc::new(vec![1]))
            .await;
        assert_eq!(delivery, Delivery::default());
    }

    #[tokio::test]
    async fn test_independent_registries() {
        let first = RoomRegistry::new();
        let second = RoomRegistry::new();
        let (tx, _rx) = outbox(4);
        first.join("doc", Uuid::new_v4(), tx).await;

        assert_eq!(first.room_count().await, 1);
        assert_eq!(second.room_count().await, 0);
    }
}
