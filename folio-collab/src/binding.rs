//! Client-side wiring of an editor to a push-transport connection.
//!
//! ```text
//!  editor ──on_local_change──► forwarder task ──send_changes──► server
//!  editor ◄─apply_remote_change── event task ◄──RemoteChange─── server
//!  editor ──get_full_content──► autosave ──save_document──────► server
//! ```
//!
//! The editor stays locked until the document loads. If the load fails it
//! shows an error text and stays locked.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::autosave::{AutosaveHandle, AutosaveScheduler, AutosaveStatus};
use crate::client::{ClientError, SyncClient, SyncEvent};
use crate::document::{ChangeUnit, Content};
use crate::editor::{EditorAdapter, Subscription};
use crate::protocol::SessionId;

/// Placeholder shown while the document loads.
pub const LOADING_TEXT: &str = "Loading...";
/// Text shown when the document cannot be loaded.
pub const LOAD_ERROR_TEXT: &str = "Error loading document";

/// A live editing context. Dropping it closes the connection without
/// flushing queued changes; prefer [`EditorBinding::detach`].
pub struct EditorBinding {
    client: Arc<SyncClient>,
    session_id: SessionId,
    subscription: Option<Subscription>,
    forwarder: Option<JoinHandle<()>>,
    remote: Option<JoinHandle<()>>,
    autosave: Option<AutosaveHandle>,
}

impl EditorBinding {
    /// Connect `client`, load its document into `editor` and start relaying
    /// and autosaving.
    pub async fn attach(
        editor: Arc<dyn EditorAdapter>,
        mut client: SyncClient,
        scheduler: AutosaveScheduler,
    ) -> Result<Self, ClientError> {
        editor.set_editable(false);
        editor.set_full_content(Content::text(LOADING_TEXT));

        let mut events = client.take_event_rx().ok_or(ClientError::EventsTaken)?;
        if let Err(e) = client.connect().await {
            editor.set_full_content(Content::text(LOAD_ERROR_TEXT));
            return Err(e);
        }

        let (session_id, content) = match Self::await_load(&mut events).await {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("Failed to load document {}: {e}", client.doc_id());
                editor.set_full_content(Content::text(LOAD_ERROR_TEXT));
                client.disconnect().await;
                return Err(e);
            }
        };
        editor.set_full_content(content);
        editor.set_editable(true);
        log::info!("Document {} loaded as session {session_id}", client.doc_id());

        let client = Arc::new(client);

        // Local edits are queued synchronously and sent in order by one task
        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<ChangeUnit>();
        let subscription = editor.on_local_change(Box::new(move |change| {
            let _ = change_tx.send(change.clone());
        }));
        let sender = client.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(change) = change_rx.recv().await {
                if let Err(e) = sender.send_changes(&change).await {
                    log::warn!("Failed to send local change: {e}");
                }
            }
        });

        let target = editor.clone();
        let remote = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SyncEvent::RemoteChange { session_id, clock, change } => {
                        log::trace!("Applying change {clock} from {session_id}");
                        target.apply_remote_change(&change);
                    }
                    SyncEvent::Saved => log::debug!("Document saved"),
                    SyncEvent::Error(message) => log::warn!("Server reported: {message}"),
                    SyncEvent::Disconnected => log::info!("Disconnected from server"),
                    _ => {}
                }
            }
        });

        let autosave = scheduler.spawn(editor, client.clone());

        Ok(Self {
            client,
            session_id,
            subscription: Some(subscription),
            forwarder: Some(forwarder),
            remote: Some(remote),
            autosave: Some(autosave),
        })
    }

    async fn await_load(
        events: &mut mpsc::Receiver<SyncEvent>,
    ) -> Result<(SessionId, Content), ClientError> {
        while let Some(event) = events.recv().await {
            match event {
                SyncEvent::Loaded { session_id, content } => return Ok((session_id, content)),
                SyncEvent::Error(message) => return Err(ClientError::Server(message)),
                SyncEvent::Disconnected => return Err(ClientError::ConnectionClosed),
                other => log::debug!("Ignoring {other:?} before load"),
            }
        }
        Err(ClientError::ConnectionClosed)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn client(&self) -> &Arc<SyncClient> {
        &self.client
    }

    pub fn autosave_status(&self) -> AutosaveStatus {
        self.autosave
            .as_ref()
            .map(AutosaveHandle::status)
            .unwrap_or_default()
    }

    /// Stop listening, flush queued local changes, stop autosave and close
    /// the connection.
    pub async fn detach(mut self) -> AutosaveStatus {
        drop(self.subscription.take());
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.await;
        }
        let status = match self.autosave.take() {
            Some(autosave) => autosave.stop().await,
            None => AutosaveStatus::default(),
        };
        self.client.disconnect().await;
        if let Some(remote) = self.remote.take() {
            remote.abort();
        }
        status
    }
}

impl Drop for EditorBinding {
    fn drop(&mut self) {
        if let Some(remote) = self.remote.take() {
            remote.abort();
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}
