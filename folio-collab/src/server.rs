//! Collaboration server: WebSocket push transport plus the HTTP document API.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── RoomRegistry ── RelayChannel (doc_id)
//!            ├── SessionCoordinator ──┤                        │
//! Client B ──┘   (one per connection) └── DocumentStore        ├──► outbox A
//!                                          │                   └──► outbox B
//! HTTP PUT/GET ── ApiState ────────────────┘ (RocksDB or memory)
//! ```
//!
//! Each connection runs in its own task: inbound frames are dispatched to the
//! session, and frames queued in the session's outbox by peers are written
//! back to the socket. Store or relay failures are answered with an `Error`
//! frame; they never end the connection.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

use crate::config::ServerConfig;
use crate::http::{self, ApiState};
use crate::protocol::{MessageType, SyncMessage, LOAD_FAILED, SAVE_FAILED};
use crate::relay::{Frame, RoomRegistry};
use crate::session::{SessionCoordinator, SessionError};
use crate::store::{DocumentStore, MemoryStore, RocksStore, StoreConfig, StoreError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub active_rooms: usize,
    pub relayed_changes: u64,
    pub saves: u64,
    pub failed_saves: u64,
}

/// The collaboration server.
pub struct SyncServer {
    config: ServerConfig,
    /// Document rooms: doc_id → RelayChannel
    rooms: Arc<RoomRegistry>,
    store: Arc<dyn DocumentStore>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a server, opening RocksDB storage when a path is configured.
    pub fn new(config: ServerConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn DocumentStore> = match &config.storage_path {
            Some(path) => {
                let store = RocksStore::open(StoreConfig::new(path))?;
                let documents = store.list_documents()?.len();
                log::info!("{documents} stored document(s) available");
                Arc::new(store)
            }
            None => {
                log::info!("No storage path configured, documents are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_store(config, store))
    }

    /// Create with an explicit store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            config,
            rooms: Arc::new(RoomRegistry::new()),
            store,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::with_store(ServerConfig::default(), Arc::new(MemoryStore::new()))
    }

    /// Bind both configured addresses and serve until either listener fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let ws_listener = TcpListener::bind(&self.config.ws_addr).await?;
        let http_listener = TcpListener::bind(&self.config.http_addr).await?;
        log::info!("WebSocket transport listening on {}", self.config.ws_addr);
        log::info!("HTTP transport listening on {}", self.config.http_addr);

        tokio::try_join!(self.serve_ws(ws_listener), self.serve_http(http_listener))?;
        Ok(())
    }

    /// Accept WebSocket connections on `listener`, one task per connection.
    pub async fn serve_ws(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let store = self.store.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, rooms, store, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Serve the HTTP document API on `listener`.
    pub async fn serve_http(&self, listener: TcpListener) -> std::io::Result<()> {
        axum::serve(listener, self.router()).await
    }

    /// HTTP router sharing this server's store, rooms and statistics.
    pub fn router(&self) -> axum::Router {
        http::router(ApiState::with_stats(
            self.store.clone(),
            self.rooms.clone(),
            self.stats.clone(),
        ))
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        rooms: Arc<RoomRegistry>,
        store: Arc<dyn DocumentStore>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), BoxError> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let (outbox, inbox) = mpsc::channel::<Frame>(config.outbox_capacity.max(1));
        let mut session = SessionCoordinator::new(store, rooms, outbox);
        let heartbeat = config.heartbeat_interval().map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });

        let result = Self::pump(ws_stream, addr, &mut session, inbox, heartbeat, &stats).await;

        // Cleanup: leave the room whatever ended the connection
        session.close().await;
        {
            let mut s = stats.write().await;
            s.active_connections = s.active_connections.saturating_sub(1);
        }
        log::info!("Session {} from {addr} closed", session.session_id());

        result
    }

    async fn pump(
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        addr: SocketAddr,
        session: &mut SessionCoordinator,
        mut inbox: mpsc::Receiver<Frame>,
        mut heartbeat: Option<Interval>,
        stats: &RwLock<ServerStats>,
    ) -> Result<(), BoxError> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += data.len() as u64;
                            }
                            match SyncMessage::decode(&data) {
                                Ok(sync_msg) => {
                                    if let Some(reply) = Self::dispatch(session, sync_msg, stats).await {
                                        ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                                    }
                                }
                                Err(e) => {
                                    log::warn!("Failed to decode message from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Frames relayed by peers
                frame = inbox.recv() => {
                    match frame {
                        Some(frame) => {
                            ws_sender.send(Message::Binary(frame.to_vec().into())).await?;
                        }
                        None => break,
                    }
                }

                _ = async {
                    match heartbeat.as_mut() {
                        Some(ticker) => { ticker.tick().await; }
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    ws_sender.send(Message::Binary(SyncMessage::ping().encode()?.into())).await?;
                }
            }
        }

        Ok(())
    }

    /// Route one decoded frame to the session; returns the direct reply, if any.
    async fn dispatch(
        session: &mut SessionCoordinator,
        msg: SyncMessage,
        stats: &RwLock<ServerStats>,
    ) -> Option<SyncMessage> {
        match msg.msg_type {
            MessageType::GetDocument => match session.bind(&msg.doc_id).await {
                Ok(doc) => Some(SyncMessage::load_document(session.session_id(), &doc.id, &doc.content)),
                Err(SessionError::InvalidState(reason)) => {
                    log::warn!("Session {} rejected bind to {}: {reason}", session.session_id(), msg.doc_id);
                    Some(SyncMessage::error(&msg.doc_id, reason))
                }
                Err(e) => {
                    log::error!("Failed to load document {}: {e}", msg.doc_id);
                    Some(SyncMessage::error(&msg.doc_id, LOAD_FAILED))
                }
            },

            MessageType::SendChanges => match session.relay_payload(msg.clock, msg.payload).await {
                Ok(_) => {
                    stats.write().await.relayed_changes += 1;
                    None
                }
                Err(SessionError::InvalidState(reason)) => Some(SyncMessage::error(&msg.doc_id, reason)),
                Err(e) => {
                    log::warn!("Relay from session {} failed: {e}", session.session_id());
                    None
                }
            },

            MessageType::SaveDocument => {
                let request = msg.clock;
                let doc_id = match session.require_bound("save") {
                    Ok(doc_id) => doc_id.to_string(),
                    Err(e) => return Some(Self::rejection(&msg.doc_id, request, e, SAVE_FAILED)),
                };
                let content = match msg.content() {
                    Ok(content) => content,
                    Err(e) => {
                        log::warn!("Undecodable save payload for {doc_id}: {e}");
                        stats.write().await.failed_saves += 1;
                        return Some(SyncMessage::save_failed(&doc_id, request, SAVE_FAILED));
                    }
                };
                match session.save(&content) {
                    Ok(()) => {
                        stats.write().await.saves += 1;
                        Some(SyncMessage::saved(&doc_id, request))
                    }
                    Err(e) => {
                        if !matches!(e, SessionError::InvalidState(_)) {
                            log::error!("Failed to save document {doc_id}: {e}");
                            stats.write().await.failed_saves += 1;
                        }
                        Some(Self::rejection(&doc_id, request, e, SAVE_FAILED))
                    }
                }
            }

            MessageType::Ping => Some(SyncMessage::pong()),

            MessageType::Pong => {
                log::trace!("Heartbeat pong from session {}", session.session_id());
                None
            }

            other => {
                log::debug!("Unhandled message type from client: {other:?}");
                None
            }
        }
    }

    /// Error frame for a failed request: state violations report their
    /// reason, anything else the user-visible `fallback`.
    fn rejection(doc_id: &str, request: u64, err: SessionError, fallback: &str) -> SyncMessage {
        match err {
            SessionError::InvalidState(reason) => SyncMessage::save_failed(doc_id, request, reason),
            _ => SyncMessage::save_failed(doc_id, request, fallback),
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_rooms = self.rooms.room_count().await;
        stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }
}
