//! The replication queue.
//!
//! A single worker task owns the pending queue, the running set, the set of
//! tasks backing off before a retry, and the history ring. Every structural
//! mutation happens on that worker; callers and finished transfers talk to it
//! through an unbounded channel, so enqueueing never waits.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::task::{QueueStatus, Task, TaskId, TaskKind, TaskState};
use crate::timer::{Timer, TimerHandle, TokioTimer};
use crate::transfer::{RsyncTransfer, Transfer};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

/// Queue tuning, fixed for the lifetime of the worker.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Automatic retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub retry_base_delay: Duration,
    /// Maximum transfers in flight.
    pub max_concurrent: usize,
    /// Finished tasks kept in history.
    pub max_history_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_millis(5000),
            max_concurrent: 3,
            max_history_size: 1000,
        }
    }
}

impl From<&SyncConfig> for QueueConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay(),
            max_concurrent: config.max_concurrent.max(1),
            max_history_size: config.max_history_size.max(1),
        }
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}

/// Full copy of the queue contents.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// Ready tasks in admission order, then tasks backing off.
    pub pending: Vec<Task>,
    /// Tasks with a transfer in flight.
    pub running: Vec<Task>,
    /// Finished tasks, newest first.
    pub history: Vec<Task>,
}

enum Command {
    Enqueue(Task),
    Finished {
        id: TaskId,
        outcome: std::result::Result<(), String>,
    },
    Requeue {
        id: TaskId,
    },
    Status(oneshot::Sender<QueueStatus>),
    History {
        limit: usize,
        reply: oneshot::Sender<Vec<Task>>,
    },
    Snapshot(oneshot::Sender<QueueSnapshot>),
    Retry {
        task_id: TaskId,
        reply: oneshot::Sender<Option<TaskId>>,
    },
    Shutdown,
}

struct Worker {
    config: QueueConfig,
    transfer: Arc<dyn Transfer>,
    timer: Arc<dyn Timer>,
    tx: mpsc::WeakUnboundedSender<Command>,
    status_tx: watch::Sender<QueueStatus>,
    pending: VecDeque<Task>,
    delayed: HashMap<TaskId, (Task, TimerHandle)>,
    running: HashMap<TaskId, Task>,
    history: VecDeque<Task>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Enqueue(task) => {
                    self.pending.push_back(task);
                    self.drain();
                }
                Command::Finished { id, outcome } => self.on_finished(id, outcome),
                Command::Requeue { id } => self.on_requeue(id),
                Command::Status(reply) => {
                    let _ = reply.send(self.status());
                }
                Command::History { limit, reply } => {
                    let _ = reply.send(self.history.iter().take(limit).cloned().collect());
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Retry { task_id, reply } => {
                    let _ = reply.send(self.on_retry(&task_id));
                }
                Command::Shutdown => break,
            }
            self.status_tx.send_replace(self.status());
        }

        for (_, (_, handle)) in self.delayed.drain() {
            handle.cancel();
        }
        tracing::info!(
            "Sync queue stopped ({} pending and {} running tasks dropped)",
            self.pending.len(),
            self.running.len()
        );
    }

    /// Admit pending tasks until the concurrency limit is reached.
    fn drain(&mut self) {
        while self.running.len() < self.config.max_concurrent {
            let Some(mut task) = self.pending.pop_front() else {
                break;
            };
            task.mark_running();
            tracing::debug!(
                task_id = %task.id,
                attempt = task.retry_count + 1,
                "Starting {} of {}",
                task.kind,
                task.object_name
            );
            self.dispatch(&task);
            self.running.insert(task.id.clone(), task);
        }
    }

    fn dispatch(&self, task: &Task) {
        let transfer = self.transfer.clone();
        let tx = self.tx.clone();
        let id = task.id.clone();
        let kind = task.kind;
        let object_name = task.object_name.clone();

        tokio::spawn(async move {
            // The inner task turns a panicking transfer into an ordinary failure.
            let attempt =
                tokio::spawn(async move { transfer.transfer(kind, &object_name).await });
            let outcome = match attempt.await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(format!("transfer aborted: {}", e)),
            };
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Finished { id, outcome });
            }
        });
    }

    fn on_finished(&mut self, id: TaskId, outcome: std::result::Result<(), String>) {
        let Some(mut task) = self.running.remove(&id) else {
            tracing::warn!(task_id = %id, "Completion for unknown task");
            return;
        };

        match outcome {
            Ok(()) => {
                task.mark_completed();
                tracing::info!(task_id = %task.id, "Synced {} of {}", task.kind, task.object_name);
                self.push_history(task);
            }
            Err(error) if task.retry_count < self.config.max_retries => {
                task.mark_retrying(error);
                let delay = backoff_delay(self.config.retry_base_delay, task.retry_count);
                tracing::warn!(
                    task_id = %task.id,
                    retry = task.retry_count,
                    max_retries = self.config.max_retries,
                    "Sync of {} failed, retrying in {:?}: {}",
                    task.object_name,
                    delay,
                    task.last_error.as_deref().unwrap_or_default()
                );
                let tx = self.tx.clone();
                let requeue_id = task.id.clone();
                let handle = self.timer.schedule(
                    delay,
                    Box::new(move || {
                        if let Some(tx) = tx.upgrade() {
                            let _ = tx.send(Command::Requeue { id: requeue_id });
                        }
                    }),
                );
                self.delayed.insert(task.id.clone(), (task, handle));
            }
            Err(error) => {
                tracing::error!(
                    task_id = %task.id,
                    retries = task.retry_count,
                    "Sync of {} failed permanently: {}",
                    task.object_name,
                    error
                );
                task.mark_failed(error);
                self.push_history(task);
            }
        }
        self.drain();
    }

    fn on_requeue(&mut self, id: TaskId) {
        if let Some((task, _)) = self.delayed.remove(&id) {
            self.pending.push_back(task);
            self.drain();
        }
    }

    fn on_retry(&mut self, task_id: &str) -> Option<TaskId> {
        let fresh = self
            .history
            .iter()
            .find(|t| t.id == task_id && t.state == TaskState::Failed)
            .map(Task::resubmit)?;
        tracing::info!(
            task_id = %fresh.id,
            retry_of = task_id,
            "Manual retry of {}",
            fresh.object_name
        );
        let id = fresh.id.clone();
        self.pending.push_back(fresh);
        self.drain();
        Some(id)
    }

    fn push_history(&mut self, task: Task) {
        self.history.push_front(task);
        self.history.truncate(self.config.max_history_size);
    }

    fn status(&self) -> QueueStatus {
        let (failed, completed) =
            self.history
                .iter()
                .fold((0, 0), |(failed, completed), t| match t.state {
                    TaskState::Failed => (failed + 1, completed),
                    TaskState::Completed => (failed, completed + 1),
                    _ => (failed, completed),
                });
        QueueStatus::new(
            self.running.len(),
            self.pending.len() + self.delayed.len(),
            failed,
            completed,
        )
    }

    fn snapshot(&self) -> QueueSnapshot {
        let mut pending: Vec<Task> = self.pending.iter().cloned().collect();
        pending.extend(self.delayed.values().map(|(t, _)| t.clone()));
        QueueSnapshot {
            pending,
            running: self.running.values().cloned().collect(),
            history: self.history.iter().cloned().collect(),
        }
    }
}

struct Inner {
    tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<QueueStatus>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the replication queue. Cheap to clone; all clones share one worker.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Option<Arc<Inner>>,
}

impl SyncQueue {
    /// A queue for a disabled feature: every operation is a no-op.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn start(config: QueueConfig, transfer: Arc<dyn Transfer>, timer: Arc<dyn Timer>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(QueueStatus::default());
        let worker = Worker {
            config,
            transfer,
            timer,
            tx: tx.downgrade(),
            status_tx,
            pending: VecDeque::new(),
            delayed: HashMap::new(),
            running: HashMap::new(),
            history: VecDeque::new(),
        };
        let handle = tokio::spawn(worker.run(rx));
        Self {
            inner: Some(Arc::new(Inner {
                tx,
                status_rx,
                worker: Mutex::new(Some(handle)),
            })),
        }
    }

    /// Build the queue described by `config`, using rsync over ssh.
    ///
    /// Fails when the feature is enabled but the remote endpoint is incomplete.
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        config.validate()?;
        if !config.enabled {
            tracing::info!("File sync is disabled");
            return Ok(Self::disabled());
        }
        tracing::info!(
            remote = %config.remote_target(),
            max_concurrent = config.max_concurrent,
            "File sync service initialized"
        );
        Ok(Self::start(
            QueueConfig::from(config),
            Arc::new(RsyncTransfer::new(config)),
            Arc::new(TokioTimer),
        ))
    }

    /// Whether replication is switched on.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Queue an upload of `object_name`. Returns the task id, or `None` when
    /// the feature is disabled or the queue has shut down.
    pub fn enqueue_upload(&self, object_name: &str) -> Option<TaskId> {
        self.enqueue(object_name, TaskKind::Upload)
    }

    /// Queue a remote delete of `object_name`.
    pub fn enqueue_delete(&self, object_name: &str) -> Option<TaskId> {
        self.enqueue(object_name, TaskKind::Delete)
    }

    fn enqueue(&self, object_name: &str, kind: TaskKind) -> Option<TaskId> {
        let inner = self.inner.as_ref()?;
        let task = Task::new(object_name, kind);
        let id = task.id.clone();
        if inner.tx.send(Command::Enqueue(task)).is_err() {
            tracing::warn!("Queue stopped, dropping {} of {}", kind, object_name);
            return None;
        }
        tracing::info!(task_id = %id, "Queued {} of {}", kind, object_name);
        Some(id)
    }

    async fn request<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let inner = self.inner.as_ref().ok_or(SyncError::Disabled)?;
        let (reply, rx) = oneshot::channel();
        inner
            .tx
            .send(make(reply))
            .map_err(|_| SyncError::Shutdown)?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }

    /// Current counts.
    pub async fn status(&self) -> Result<QueueStatus> {
        self.request(Command::Status).await
    }

    /// Up to `limit` most recent history entries, newest first.
    pub async fn history(&self, limit: usize) -> Result<Vec<Task>> {
        self.request(|reply| Command::History { limit, reply }).await
    }

    /// Full copy of pending, running and history.
    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Re-run a failed task as a brand-new task.
    ///
    /// Returns the new task id, or `None` when `task_id` is unknown or not failed.
    pub async fn retry(&self, task_id: &str) -> Result<Option<TaskId>> {
        let task_id = task_id.to_string();
        self.request(|reply| Command::Retry { task_id, reply }).await
    }

    /// Resolve once nothing is pending, backing off, or running.
    pub async fn wait_idle(&self) -> Result<()> {
        // The round trip guarantees every earlier command is reflected in the watch.
        let status = self.status().await?;
        if status.running_tasks == 0 && status.pending_tasks == 0 {
            return Ok(());
        }
        let inner = self.inner.as_ref().ok_or(SyncError::Disabled)?;
        let mut rx = inner.status_rx.clone();
        rx.wait_for(|s| s.running_tasks == 0 && s.pending_tasks == 0)
            .await
            .map_err(|_| SyncError::Shutdown)?;
        Ok(())
    }

    /// Stop the worker. Pending and backing-off tasks are dropped; in-flight
    /// transfers run to completion but their outcome is discarded.
    pub async fn shutdown(&self) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        let _ = inner.tx.send(Command::Shutdown);
        if let Some(handle) = inner.worker.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!("Sync queue worker ended abnormally: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Notifications from the storage layer that drive replication.
pub trait StorageEvents: Send + Sync {
    /// An object was written to primary storage.
    fn on_object_uploaded(&self, object_name: &str);
    /// An object was removed from primary storage.
    fn on_object_deleted(&self, object_name: &str);
}

impl StorageEvents for SyncQueue {
    fn on_object_uploaded(&self, object_name: &str) {
        self.enqueue_upload(object_name);
    }

    fn on_object_deleted(&self, object_name: &str) {
        self.enqueue_delete(object_name);
    }
}
