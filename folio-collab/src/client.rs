//! WebSocket client for the push transport.
//!
//! Provides:
//! - Connection lifecycle (connect, bind to one document, disconnect)
//! - Change-unit send/receive
//! - Full-content saves with server acknowledgment
//!
//! Edits made while disconnected are rejected, not queued. Dropping the
//! client closes its connection.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::document::{ChangeUnit, Content};
use crate::protocol::{MessageType, ProtocolError, SessionId, SyncMessage};

/// Client-side failures, shared by both transports.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("Not connected")]
    ConnectionClosed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Server error: {0}")]
    Server(String),
    #[error("Event receiver already taken")]
    EventsTaken,
    #[error("Save {request} was not acknowledged in time")]
    AckTimeout { request: u64 },
}

/// How long [`SyncClient::save_document`] waits for the server's reply.
pub const SAVE_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome reported by the server for one save request.
type SaveAck = oneshot::Sender<Result<(), String>>;
type PendingSaves = Mutex<HashMap<u64, SaveAck>>;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connection established
    Connected,
    /// Connection lost
    Disconnected,
    /// Initial content; the session is now a member of the room
    Loaded {
        session_id: SessionId,
        content: Content,
    },
    /// Change unit relayed from another session
    RemoteChange {
        session_id: SessionId,
        clock: u64,
        change: ChangeUnit,
    },
    /// A full-content save was persisted
    Saved,
    /// User-visible failure reported by the server
    Error(String),
}

/// The sync client.
///
/// Binds one WebSocket connection to one document. Edits go out as
/// `SendChanges`, peers' edits come back as [`SyncEvent::RemoteChange`].
pub struct SyncClient {
    /// Document we're editing
    doc_id: String,

    /// Server URL (`ws://host:port`)
    server_url: String,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Id assigned by the server once the document is loaded
    session_id: Arc<RwLock<Option<SessionId>>>,

    /// Per-sender sequence number for outgoing changes
    clock: Arc<RwLock<u64>>,

    /// Save requests awaiting `Saved` / `Error`, keyed by request number
    pending_saves: Arc<PendingSaves>,

    /// Last save request number handed out
    save_seq: AtomicU64,

    /// Channel to the WebSocket writer task. The only strong sender: once
    /// it is dropped the writer closes the socket.
    outgoing_tx: Option<mpsc::Sender<Message>>,

    /// Reader task, aborted on drop
    reader: Option<JoinHandle<()>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<SyncEvent>>,

    /// Event sender (held by connection task)
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncClient {
    pub fn new(doc_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            doc_id: doc_id.into(),
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            session_id: Arc::new(RwLock::new(None)),
            clock: Arc::new(RwLock::new(0)),
            pending_saves: Arc::new(Mutex::new(HashMap::new())),
            save_seq: AtomicU64::new(0),
            outgoing_tx: None,
            reader: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect and request the document.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages. The
    /// loaded content arrives as [`SyncEvent::Loaded`] (or [`SyncEvent::Error`]).
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(&self.server_url).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ClientError::Connect {
                    url: self.server_url.clone(),
                    reason: e.to_string(),
                });
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if ws_writer.send(msg).await.is_err() || closing {
                    break;
                }
            }
        });

        let get = SyncMessage::get_document(&self.doc_id).encode()?;
        out_tx
            .send(Message::Binary(get.into()))
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        // The reader only needs the writer to answer pings
        let pong_tx = out_tx.downgrade();
        self.outgoing_tx = Some(out_tx);

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(SyncEvent::Connected).await;

        // Reader task: process incoming WebSocket messages
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let session_id = self.session_id.clone();
        let pending = self.pending_saves.clone();
        self.reader = Some(tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Binary(data)) => {
                        let sync_msg = match SyncMessage::decode(&data) {
                            Ok(sync_msg) => sync_msg,
                            Err(e) => {
                                log::warn!("Dropping undecodable frame from server: {e}");
                                continue;
                            }
                        };
                        if let Some(event) = Self::to_event(sync_msg, &session_id, &pending, &pong_tx).await {
                            let _ = event_tx.send(event).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost; waiting saves fail with ConnectionClosed
            pending.lock().clear();
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(SyncEvent::Disconnected).await;
        }));

        Ok(())
    }

    async fn to_event(
        msg: SyncMessage,
        session_id: &RwLock<Option<SessionId>>,
        pending: &PendingSaves,
        pong_tx: &mpsc::WeakSender<Message>,
    ) -> Option<SyncEvent> {
        match msg.msg_type {
            MessageType::LoadDocument => match msg.content() {
                Ok(content) => {
                    *session_id.write().await = Some(msg.session_id);
                    Some(SyncEvent::Loaded {
                        session_id: msg.session_id,
                        content,
                    })
                }
                Err(e) => Some(SyncEvent::Error(e.to_string())),
            },
            MessageType::ReceiveChanges => {
                // The server never echoes, but a stale frame could still carry our id
                if *session_id.read().await == Some(msg.session_id) {
                    return None;
                }
                match msg.change_unit() {
                    Ok(change) => Some(SyncEvent::RemoteChange {
                        session_id: msg.session_id,
                        clock: msg.clock,
                        change,
                    }),
                    Err(e) => {
                        log::warn!("Dropping malformed change from {}: {e}", msg.session_id);
                        None
                    }
                }
            }
            MessageType::Saved => {
                let ack = pending.lock().remove(&msg.clock);
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(()));
                }
                Some(SyncEvent::Saved)
            }
            MessageType::Error => {
                let message = msg.error_message().ok()?;
                // Request number 0 is never handed out, so unrelated errors match nothing
                let ack = pending.lock().remove(&msg.clock);
                if let Some(ack) = ack {
                    let _ = ack.send(Err(message.clone()));
                }
                Some(SyncEvent::Error(message))
            }
            MessageType::Ping => {
                let Some(tx) = pong_tx.upgrade() else {
                    return None;
                };
                if let Ok(pong) = SyncMessage::pong().encode() {
                    let _ = tx.send(Message::Binary(pong.into())).await;
                }
                None
            }
            _ => None,
        }
    }

    /// Send a local change unit. Returns the clock it was stamped with.
    pub async fn send_changes(&self, change: &ChangeUnit) -> Result<u64, ClientError> {
        let tx = self.connected_tx().await?;
        let mut clock = self.clock.write().await;
        *clock += 1;

        let msg = SyncMessage::send_changes(&self.doc_id, *clock, change);
        tx.send(Message::Binary(msg.encode()?.into()))
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        Ok(*clock)
    }

    /// Persist full content and wait for the server's verdict.
    ///
    /// Returns `ClientError::Server` when the server rejects the save. The
    /// reply is also delivered as [`SyncEvent::Saved`] or [`SyncEvent::Error`].
    pub async fn save_document(&self, content: &Content) -> Result<(), ClientError> {
        let tx = self.connected_tx().await?;
        let request = self.save_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = SyncMessage::save_document(&self.doc_id, request, content).encode()?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending_saves.lock().insert(request, ack_tx);
        if tx.send(Message::Binary(frame.into())).await.is_err() {
            self.pending_saves.lock().remove(&request);
            return Err(ClientError::ConnectionClosed);
        }

        match timeout(SAVE_ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(ClientError::Server(message)),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.pending_saves.lock().remove(&request);
                Err(ClientError::AckTimeout { request })
            }
        }
    }

    /// Send a ping to the server.
    pub async fn send_ping(&self) -> Result<(), ClientError> {
        let tx = self.connected_tx().await?;
        tx.send(Message::Binary(SyncMessage::ping().encode()?.into()))
            .await
            .map_err(|_| ClientError::ConnectionClosed)
    }

    /// Close the connection. The server removes the session from its room.
    pub async fn disconnect(&self) {
        if let Some(tx) = &self.outgoing_tx {
            let _ = tx.send(Message::Close(None)).await;
        }
        *self.state.write().await = ConnectionState::Disconnected;
    }

    async fn connected_tx(&self) -> Result<&mpsc::Sender<Message>, ClientError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ClientError::ConnectionClosed);
        }
        self.outgoing_tx.as_ref().ok_or(ClientError::ConnectionClosed)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Server-assigned session id, known once the document has loaded.
    pub async fn session_id(&self) -> Option<SessionId> {
        *self.session_id.read().await
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    pub async fn clock(&self) -> u64 {
        *self.clock.read().await
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(tx) = self.outgoing_tx.take() {
            let _ = tx.try_send(Message::Close(None));
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
