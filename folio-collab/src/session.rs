//! Per-connection session state machine.
//!
//! ```text
//!  Unbound ──bind(id)──► Bound(id) ──close──► Closed
//!     │                   │    ▲
//!     └──────close────────┼────┼──────────────► Closed
//!                         └────┘ relay / save
//! ```
//!
//! A session binds to exactly one document for its lifetime. Relay and save
//! are only accepted while bound. Store and relay failures come back as
//! [`SessionError`] for the transport to report; they never end the session.

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::document::{ChangeUnit, Content, Document};
use crate::protocol::{SessionId, SyncMessage};
use crate::relay::{Delivery, Outbox, RelayError, RoomRegistry};
use crate::store::{DocumentStore, StoreError};

/// Session lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    Bound(String),
    Closed,
}

/// Session-level failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid session state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Relay failed: {0}")]
    Transport(#[from] RelayError),
}

/// Binds one viewer connection to one document room.
pub struct SessionCoordinator {
    session_id: SessionId,
    state: SessionState,
    store: Arc<dyn DocumentStore>,
    rooms: Arc<RoomRegistry>,
    outbox: Outbox,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, rooms: Arc<RoomRegistry>, outbox: Outbox) -> Self {
        Self::with_id(Uuid::new_v4(), store, rooms, outbox)
    }

    pub fn with_id(
        session_id: SessionId,
        store: Arc<dyn DocumentStore>,
        rooms: Arc<RoomRegistry>,
        outbox: Outbox,
    ) -> Self {
        Self {
            session_id,
            state: SessionState::Unbound,
            store,
            rooms,
            outbox,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Bound document id, if any.
    pub fn doc_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Bound(id) => Some(id),
            _ => None,
        }
    }

    /// Load (or create) the document, then join its room.
    ///
    /// A failed load leaves the session unbound.
    pub async fn bind(&mut self, doc_id: &str) -> Result<Document, SessionError> {
        match self.state {
            SessionState::Unbound => {}
            SessionState::Bound(_) => return Err(SessionError::InvalidState("session already bound")),
            SessionState::Closed => return Err(SessionError::InvalidState("session closed")),
        }

        let document = self.store.load_or_create(doc_id)?;
        self.rooms
            .join(doc_id, self.session_id, self.outbox.clone())
            .await;
        self.state = SessionState::Bound(doc_id.to_string());

        log::info!("Session {} bound to document {doc_id}", self.session_id);
        Ok(document)
    }

    /// Relay a change unit to every other member of the room.
    pub async fn relay(&self, clock: u64, change: &ChangeUnit) -> Result<Delivery, SessionError> {
        self.relay_payload(clock, change.to_bytes()).await
    }

    /// Relay an already-encoded change payload without decoding it.
    pub async fn relay_payload(&self, clock: u64, payload: Vec<u8>) -> Result<Delivery, SessionError> {
        let doc_id = self.require_bound("relay")?;
        let msg = SyncMessage::receive_changes(self.session_id, doc_id, clock, payload);
        let delivery = self.rooms.broadcast(doc_id, self.session_id, &msg).await?;
        log::debug!(
            "Session {} relayed change {clock} to {} peer(s) ({} dropped)",
            self.session_id,
            delivery.delivered,
            delivery.dropped
        );
        Ok(delivery)
    }

    /// Persist full content. Does not relay anything.
    ///
    /// Synchronous: the store call runs on the caller's task.
    pub fn save(&self, content: &Content) -> Result<(), SessionError> {
        let doc_id = self.require_bound("save")?;
        self.store.save(doc_id, content)?;
        log::debug!("Session {} saved document {doc_id}", self.session_id);
        Ok(())
    }

    /// Leave the room (if bound) and enter the terminal state.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Bound(doc_id) = previous {
            self.rooms.leave(&doc_id, self.session_id).await;
            log::info!("Session {} left document {doc_id}", self.session_id);
        }
    }

    /// Bound document id, or `InvalidState` naming why `op` is refused.
    pub fn require_bound(&self, op: &'static str) -> Result<&str, SessionError> {
        match &self.state {
            SessionState::Bound(id) => Ok(id),
            SessionState::Unbound => {
                log::warn!("Session {} attempted {op} before binding", self.session_id);
                Err(SessionError::InvalidState("session not bound to a document"))
            }
            SessionState::Closed => Err(SessionError::InvalidState("session closed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Frame;
    use crate::store::MemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        store: Arc<MemoryStore>,
        rooms: Arc<RoomRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                rooms: Arc::new(RoomRegistry::new()),
            }
        }

        fn session(&self) -> (SessionCoordinator, mpsc::Receiver<Frame>) {
            let (tx, rx) = mpsc::channel(16);
            let session = SessionCoordinator::new(self.store.clone(), self.rooms.clone(), tx);
            (session, rx)
        }
    }

    /// Store whose backend is always down.
    struct DownStore;

    impl DocumentStore for DownStore {
        fn get(&self, _id: &str) -> Result<Option<Content>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn create_if_absent(&self, _id: &str, _content: &Content) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn save(&self, _id: &str, _content: &Content) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        fn metadata(&self, _id: &str) -> Result<Option<crate::store::DocumentMetadata>, StoreError> {
            Ok(None)
        }
        fn list_documents(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_bind_loads_and_joins() {
        let h = Harness::new();
        let (mut session, _rx) = h.session();

        let doc = session.bind("doc42").await.unwrap();
        assert_eq!(doc.content, Content::empty());
        assert_eq!(session.state(), &SessionState::Bound("doc42".into()));
        assert_eq!(h.rooms.members("doc42").await, vec![session.session_id()]);
        assert_eq!(h.store.creations(), 1);
    }

    #[tokio::test]
    async fn test_second_bind_rejected() {
        let h = Harness::new();
        let (mut session, _rx) = h.session();
        session.bind("doc1").await.unwrap();

        let err = session.bind("doc2").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert_eq!(session.doc_id(), Some("doc1"));
        assert!(h.rooms.members("doc2").await.is_empty());
    }

    #[tokio::test]
    async fn test_unbound_session_cannot_relay_or_save() {
        let h = Harness::new();
        let (session, _rx) = h.session();

        let change = ChangeUnit::new(json!({ "ops": [] }));
        assert!(matches!(
            session.relay(1, &change).await,
            Err(SessionError::InvalidState(_))
        ));
        assert!(matches!(
            session.save(&Content::text("x")),
            Err(SessionError::InvalidState(_))
        ));
        assert_eq!(h.store.creations(), 0);
    }

    #[tokio::test]
    async fn test_relay_reaches_peer_not_sender() {
        let h = Harness::new();
        let (mut a, mut rx_a) = h.session();
        let (mut b, mut rx_b) = h.session();
        a.bind("doc").await.unwrap();
        b.bind("doc").await.unwrap();

        let change = ChangeUnit::new(json!({ "ops": [{ "insert": "hi" }] }));
        let delivery = a.relay(1, &change).await.unwrap();
        assert_eq!(delivery.delivered, 1);

        let frame = rx_b.recv().await.unwrap();
        let msg = SyncMessage::decode(&frame).unwrap();
        assert_eq!(msg.session_id, a.session_id());
        assert_eq!(msg.change_unit().unwrap(), change);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_save_does_not_relay() {
        let h = Harness::new();
        let (mut a, _rx_a) = h.session();
        let (mut b, mut rx_b) = h.session();
        a.bind("doc").await.unwrap();
        b.bind("doc").await.unwrap();

        a.save(&Content::text("snapshot")).unwrap();

        assert!(rx_b.try_recv().is_err());
        assert_eq!(h.store.get("doc").unwrap(), Some(Content::text("snapshot")));
    }

    #[tokio::test]
    async fn test_close_leaves_room_and_is_terminal() {
        let h = Harness::new();
        let (mut a, _rx_a) = h.session();
        let (mut b, _rx_b) = h.session();
        a.bind("doc").await.unwrap();
        b.bind("doc").await.unwrap();

        a.close().await;
        assert_eq!(a.state(), &SessionState::Closed);
        assert_eq!(h.rooms.members("doc").await, vec![b.session_id()]);

        assert!(a.bind("doc").await.is_err());
        assert!(a.save(&Content::empty()).is_err());
    }

    #[tokio::test]
    async fn test_close_unbound_session() {
        let h = Harness::new();
        let (mut session, _rx) = h.session();
        session.close().await;
        assert_eq!(session.state(), &SessionState::Closed);
        assert_eq!(h.rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_session_unbound() {
        let rooms = Arc::new(RoomRegistry::new());
        let (tx, _rx) = mpsc::channel(4);
        let mut session = SessionCoordinator::new(Arc::new(DownStore), rooms.clone(), tx);

        let err = session.bind("doc").await.unwrap_err();
        assert!(matches!(err, SessionError::Store(StoreError::Unavailable(_))));
        assert_eq!(session.state(), &SessionState::Unbound);
        assert_eq!(rooms.room_count().await, 0);
    }
}
