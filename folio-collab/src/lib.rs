//! # folio-collab: Real-time collaborative document editing
//!
//! Relays editor change units between viewers of the same document and
//! checkpoints full content to durable storage, last writer wins.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   WebSocket (bincode)   ┌──────────────────────┐
//! │ EditorBinding │ ◄─────────────────────► │ SyncServer           │
//! │  SyncClient   │                         │  SessionCoordinator  │
//! │  Autosave     │   HTTP /api/documents   │  (one per connection)│
//! │  Editor       │ ◄─────────────────────► │  ApiState            │
//! └───────────────┘                         └──────────┬───────────┘
//!                                                      │
//!                                      ┌───────────────┴──────────────┐
//!                                      ▼                              ▼
//!                               ┌──────────────┐             ┌───────────────┐
//!                               │ RoomRegistry │             │ DocumentStore │
//!                               │ (fan-out)    │             │ RocksDB/memory│
//!                               └──────────────┘             └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`document`]: Opaque content and change-unit values
//! - [`protocol`]: Binary wire protocol (bincode-encoded SyncMessage)
//! - [`relay`]: Room registry with best-effort fan-out
//! - [`store`]: Load-or-create / last-writer-wins persistence
//! - [`session`]: Per-connection state machine
//! - [`server`]: WebSocket server plus the HTTP surface in [`http`]
//! - [`client`], [`http_client`]: Clients for both transports
//! - [`editor`], [`autosave`], [`binding`]: Client-side editing context
//! - [`config`]: Server configuration

pub mod autosave;
pub mod binding;
pub mod client;
pub mod config;
pub mod document;
pub mod editor;
pub mod http;
pub mod http_client;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use autosave::{AutosaveHandle, AutosaveScheduler, AutosaveStatus, SaveSink, DEFAULT_AUTOSAVE_INTERVAL};
pub use binding::EditorBinding;
pub use client::{ClientError, ConnectionState, SyncClient, SyncEvent};
pub use config::{ConfigError, ServerConfig};
pub use document::{ChangeUnit, Content, Document};
pub use editor::{ChangeListener, EditorAdapter, JournalEditor, Origin, Subscription};
pub use http::ApiState;
pub use http_client::DocumentClient;
pub use protocol::{MessageType, ProtocolError, SessionId, SyncMessage};
pub use relay::{Delivery, RelayChannel, RelayError, RelayStats, RoomRegistry};
pub use server::{ServerStats, SyncServer};
pub use session::{SessionCoordinator, SessionError, SessionState};
pub use store::{DocumentMetadata, DocumentStore, MemoryStore, RocksStore, StoreConfig, StoreError};
