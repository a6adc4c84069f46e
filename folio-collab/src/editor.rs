//! Editor adapter contract.
//!
//! The rich-text widget is external: the collaboration layer only needs to
//! observe user edits as change units, apply peers' change units, and read or
//! replace the full content. Every change carries an [`Origin`]; listeners
//! registered with [`EditorAdapter::on_local_change`] only ever see
//! [`Origin::Local`] changes, which is what keeps a relayed change from being
//! relayed again by the receiver.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::{Arc, Weak};

use crate::document::{ChangeUnit, Content};

/// Where a mutation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Typed by the user in this editor
    Local,
    /// Received from another session
    Remote,
}

/// Callback invoked synchronously for each local change.
pub type ChangeListener = Box<dyn Fn(&ChangeUnit) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(u64, Arc<dyn Fn(&ChangeUnit) + Send + Sync>)>,
}

/// Registry of local-change listeners shared by an editor and its
/// subscriptions.
#[derive(Clone, Default)]
pub struct ListenerSet {
    inner: Arc<Mutex<ListenerTable>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: ChangeListener) -> Subscription {
        let mut table = self.inner.lock();
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, Arc::from(listener)));
        Subscription {
            id,
            table: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every listener. Listeners run outside the table lock, so they
    /// may subscribe or cancel.
    pub fn emit(&self, change: &ChangeUnit) {
        let listeners: Vec<_> = self
            .inner
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(change);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for a registered listener. Dropping it unregisters the listener.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl Subscription {
    /// Unregister now.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.lock().entries.retain(|(id, _)| *id != self.id);
        }
    }
}

/// What the collaboration layer needs from an editor.
pub trait EditorAdapter: Send + Sync {
    /// Register a listener for user-originated changes.
    fn on_local_change(&self, listener: ChangeListener) -> Subscription;

    /// Apply a change, notifying local-change listeners only for
    /// [`Origin::Local`].
    fn apply_change(&self, change: &ChangeUnit, origin: Origin);

    /// Apply a peer's change without firing local-change listeners.
    fn apply_remote_change(&self, change: &ChangeUnit) {
        self.apply_change(change, Origin::Remote);
    }

    fn get_full_content(&self) -> Content;

    /// Replace the whole content. Never fires local-change listeners.
    fn set_full_content(&self, content: Content);

    /// Lock or unlock user input.
    fn set_editable(&self, editable: bool);

    fn is_editable(&self) -> bool;
}

struct JournalState {
    content: Content,
    editable: bool,
}

/// In-memory editor whose content is the journal of applied change units.
///
/// Applying a change appends it to a JSON array; empty content starts a new
/// array and any other content becomes the array's first entry.
pub struct JournalEditor {
    state: RwLock<JournalState>,
    listeners: ListenerSet,
}

impl JournalEditor {
    pub fn new() -> Self {
        Self::with_content(Content::empty())
    }

    pub fn with_content(content: Content) -> Self {
        Self {
            state: RwLock::new(JournalState {
                content,
                editable: true,
            }),
            listeners: ListenerSet::new(),
        }
    }

    /// Simulate the user typing. Ignored (returns `false`) while locked.
    pub fn edit(&self, change: ChangeUnit) -> bool {
        if !self.is_editable() {
            log::debug!("Ignoring user edit on locked editor");
            return false;
        }
        self.apply_change(&change, Origin::Local);
        true
    }

    /// Change units applied since the content was last replaced.
    pub fn journal(&self) -> Vec<ChangeUnit> {
        match self.state.read().content.as_value() {
            Value::Array(items) => items.iter().cloned().map(ChangeUnit::new).collect(),
            _ => Vec::new(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for JournalEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorAdapter for JournalEditor {
    fn on_local_change(&self, listener: ChangeListener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    fn apply_change(&self, change: &ChangeUnit, origin: Origin) {
        {
            let mut state = self.state.write();
            let current = std::mem::take(&mut state.content);
            let journal = match current.into_value() {
                Value::Array(mut items) => {
                    items.push(change.as_value().clone());
                    items
                }
                Value::Null => vec![change.as_value().clone()],
                Value::String(s) if s.is_empty() => vec![change.as_value().clone()],
                other => vec![other, change.as_value().clone()],
            };
            state.content = Content::new(Value::Array(journal));
        }

        if origin == Origin::Local {
            self.listeners.emit(change);
        }
    }

    fn get_full_content(&self) -> Content {
        self.state.read().content.clone()
    }

    fn set_full_content(&self, content: Content) {
        self.state.write().content = content;
    }

    fn set_editable(&self, editable: bool) {
        self.state.write().editable = editable;
    }

    fn is_editable(&self) -> bool {
        self.state.read().editable
    }
}
