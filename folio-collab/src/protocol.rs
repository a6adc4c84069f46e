//! Binary protocol for the push transport.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬────────────┬──────────┬──────────┬──────────┐
//! │ msg_type │ session_id │ doc_id   │ clock    │ payload  │
//! │ 1 byte   │ 16 bytes   │ variable │ varint   │ variable │
//! └──────────┴────────────┴──────────┴──────────┴──────────┘
//! ```
//!
//! Payloads are JSON bytes for content and change units; the server
//! forwards them without decoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::document::{ChangeUnit, Content};

/// Identifier the server assigns to each connection.
pub type SessionId = Uuid;

/// User-visible text sent when a document cannot be loaded.
pub const LOAD_FAILED: &str = "Failed to load document";
/// User-visible text sent when a save is rejected.
pub const SAVE_FAILED: &str = "Failed to save document";

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// Client asks to open a document and join its room
    GetDocument = 1,
    /// Server answers with the stored content
    LoadDocument = 2,
    /// Client emits a local change unit
    SendChanges = 3,
    /// Server forwards a peer's change unit
    ReceiveChanges = 4,
    /// Client asks to persist full content
    SaveDocument = 5,
    /// Save acknowledgment
    Saved = 6,
    /// User-visible failure report
    Error = 7,
    /// Heartbeat ping
    Ping = 8,
    /// Heartbeat pong
    Pong = 9,
}

/// Top-level protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    /// Originating session (nil for server-originated frames)
    pub session_id: SessionId,
    pub doc_id: String,
    /// Per-sender sequence number for changes; request number for saves
    /// and their replies
    pub clock: u64,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, session_id: SessionId, doc_id: &str, clock: u64, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            session_id,
            doc_id: doc_id.to_string(),
            clock,
            payload,
        }
    }

    /// Request to bind the connection to a document.
    pub fn get_document(doc_id: &str) -> Self {
        Self::new(MessageType::GetDocument, Uuid::nil(), doc_id, 0, Vec::new())
    }

    /// Initial content, addressed to the session that asked for it.
    pub fn load_document(session_id: SessionId, doc_id: &str, content: &Content) -> Self {
        Self::new(MessageType::LoadDocument, session_id, doc_id, 0, content.to_bytes())
    }

    pub fn send_changes(doc_id: &str, clock: u64, change: &ChangeUnit) -> Self {
        Self::new(MessageType::SendChanges, Uuid::nil(), doc_id, clock, change.to_bytes())
    }

    /// Relay frame built from an already-encoded change payload.
    pub fn receive_changes(sender: SessionId, doc_id: &str, clock: u64, payload: Vec<u8>) -> Self {
        Self::new(MessageType::ReceiveChanges, sender, doc_id, clock, payload)
    }

    /// Save request; `request` is echoed by the `Saved` or `Error` reply.
    pub fn save_document(doc_id: &str, request: u64, content: &Content) -> Self {
        Self::new(MessageType::SaveDocument, Uuid::nil(), doc_id, request, content.to_bytes())
    }

    pub fn saved(doc_id: &str, request: u64) -> Self {
        Self::new(MessageType::Saved, Uuid::nil(), doc_id, request, Vec::new())
    }

    /// Error not tied to a save request.
    pub fn error(doc_id: &str, message: &str) -> Self {
        Self::save_failed(doc_id, 0, message)
    }

    /// Rejection of save request `request`.
    pub fn save_failed(doc_id: &str, request: u64, message: &str) -> Self {
        Self::new(MessageType::Error, Uuid::nil(), doc_id, request, message.as_bytes().to_vec())
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, Uuid::nil(), "", 0, Vec::new())
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, Uuid::nil(), "", 0, Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse a content payload (`LoadDocument`, `SaveDocument`).
    pub fn content(&self) -> Result<Content, ProtocolError> {
        match self.msg_type {
            MessageType::LoadDocument | MessageType::SaveDocument => Content::from_bytes(&self.payload),
            _ => Err(ProtocolError::InvalidMessageType),
        }
    }

    /// Parse a change payload (`SendChanges`, `ReceiveChanges`).
    pub fn change_unit(&self) -> Result<ChangeUnit, ProtocolError> {
        match self.msg_type {
            MessageType::SendChanges | MessageType::ReceiveChanges => ChangeUnit::from_bytes(&self.payload),
            _ => Err(ProtocolError::InvalidMessageType),
        }
    }

    pub fn error_message(&self) -> Result<String, ProtocolError> {
        if self.msg_type != MessageType::Error {
            return Err(ProtocolError::InvalidMessageType);
        }
        Ok(String::from_utf8_lossy(&self.payload).into_owned())
    }
}

/// Protocol errors.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Invalid message type")]
    InvalidMessageType,
    #[error("Connection closed")]
    ConnectionClosed,
}
