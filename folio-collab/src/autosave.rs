//! Periodic full-content checkpointing.
//!
//! Independent of change relay: every period the scheduler snapshots the
//! editor and hands the content to a [`SaveSink`]. Saves run inside the
//! scheduler task, so they never overlap; ticks missed while a slow save is
//! in flight are skipped. A failed save is logged and retried implicitly by
//! the next tick.

use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::client::{ClientError, SyncClient};
use crate::document::Content;
use crate::editor::EditorAdapter;
use crate::http_client::DocumentClient;

/// Default checkpoint period.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_millis(2000);

/// Destination for full-content saves.
pub trait SaveSink: Send + Sync + 'static {
    fn save(&self, content: Content) -> impl Future<Output = Result<(), ClientError>> + Send;
}

impl SaveSink for SyncClient {
    async fn save(&self, content: Content) -> Result<(), ClientError> {
        self.save_document(&content).await
    }
}

impl SaveSink for DocumentClient {
    async fn save(&self, content: Content) -> Result<(), ClientError> {
        // Push-transport clients relay separately; never piggy-back here.
        DocumentClient::save(self, &content, None).await
    }
}

/// Counters reported by a running scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutosaveStatus {
    pub saves: u64,
    pub failures: u64,
    pub last_saved: Option<SystemTime>,
    pub last_error: Option<String>,
}

/// Spawns autosave tasks with a fixed period.
#[derive(Debug, Clone, Copy)]
pub struct AutosaveScheduler {
    period: Duration,
}

impl AutosaveScheduler {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start saving `editor`'s content to `sink` every period. The first
    /// save happens one full period after the call.
    pub fn spawn<S: SaveSink>(&self, editor: Arc<dyn EditorAdapter>, sink: Arc<S>) -> AutosaveHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let status = Arc::new(RwLock::new(AutosaveStatus::default()));
        let period = self.period;

        let task_status = status.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    // Fires on explicit stop and when the handle is dropped
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let content = editor.get_full_content();
                        match sink.save(content).await {
                            Ok(()) => {
                                let mut s = task_status.write();
                                s.saves += 1;
                                s.last_saved = Some(SystemTime::now());
                                log::debug!("Autosave #{} complete", s.saves);
                            }
                            Err(e) => {
                                log::warn!("Autosave failed: {e}");
                                let mut s = task_status.write();
                                s.failures += 1;
                                s.last_error = Some(e.to_string());
                            }
                        }
                    }
                }
            }
            log::debug!("Autosave stopped");
        });

        AutosaveHandle {
            stop_tx,
            task,
            status,
        }
    }
}

impl Default for AutosaveScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOSAVE_INTERVAL)
    }
}

/// Running autosave task. Dropping the handle stops the task.
pub struct AutosaveHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
    status: Arc<RwLock<AutosaveStatus>>,
}

impl AutosaveHandle {
    /// Stop and wait for the task; an in-flight save completes first.
    pub async fn stop(self) -> AutosaveStatus {
        let _ = self.stop_tx.send(());
        let _ = self.task.await;
        let status = self.status.read().clone();
        status
    }

    pub fn status(&self) -> AutosaveStatus {
        self.status.read().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}
