//! Document content and change units.
//!
//! Both are opaque to the collaboration layer: they are produced and
//! interpreted only by the editor, and are moved around as JSON values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::ProtocolError;

/// Full document state as serialized by the editor.
///
/// A freshly created document holds the empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Content(Value);

impl Content {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Content of a document that has never been saved.
    pub fn empty() -> Self {
        Self(Value::String(String::new()))
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self(Value::String(text.into()))
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::String(s) => s.is_empty(),
            Value::Null => true,
            _ => false,
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// JSON bytes, as carried in frames and stored on disk.
    pub fn to_bytes(&self) -> Vec<u8> {
        // A `Value` always serializes.
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for Content {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// An incremental edit (delta) emitted by the editor.
///
/// Carries no identity or ordering metadata of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeUnit(Value);

impl ChangeUnit {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.0).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl From<Value> for ChangeUnit {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A document as held by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub content: Content,
}

impl Document {
    pub fn new(id: impl Into<String>, content: Content) -> Self {
        Self {
            id: id.into(),
            content,
        }
    }
}
