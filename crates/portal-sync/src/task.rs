//! Replication task: identity plus lifecycle state of one request.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique task identifier, `<unix-millis>-<7 base36 chars>`.
pub type TaskId = String;

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 7;

/// Generate a fresh task id.
pub fn generate_task_id() -> TaskId {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

/// Remote operation a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Copy the object to the remote node.
    Upload,
    /// Remove the object from the remote node.
    Delete,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => f.write_str("upload"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for admission, or backing off before a retry.
    Pending,
    /// Transfer in flight.
    Running,
    /// Transfer succeeded.
    Completed,
    /// Retry budget exhausted; only a manual retry re-runs it.
    Failed,
}

impl TaskState {
    /// True for states that place the task in history.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One unit of replication work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Immutable identity.
    pub id: TaskId,
    /// Storage-relative object key.
    pub object_name: String,
    /// Upload or delete.
    pub kind: TaskKind,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Retries already consumed.
    pub retry_count: u32,
    /// Message of the last failed attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Start of the most recent attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// End of the most recent attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task with a fresh id.
    pub fn new(object_name: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: generate_task_id(),
            object_name: object_name.into(),
            kind,
            state: TaskState::Pending,
            retry_count: 0,
            last_error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// New pending task for the same object and kind, as a manual retry.
    pub fn resubmit(&self) -> Self {
        Self::new(self.object_name.clone(), self.kind)
    }

    pub(crate) fn mark_running(&mut self) {
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    pub(crate) fn mark_completed(&mut self) {
        self.state = TaskState::Completed;
        self.last_error = None;
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_retrying(&mut self, error: String) {
        self.state = TaskState::Pending;
        self.retry_count += 1;
        self.last_error = Some(error);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.state = TaskState::Failed;
        self.last_error = Some(error);
        self.finished_at = Some(Utc::now());
    }
}

/// Point-in-time counts of the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Sum of the other four counts.
    pub total_tasks: usize,
    /// Transfers in flight.
    pub running_tasks: usize,
    /// Waiting for admission or backing off.
    pub pending_tasks: usize,
    /// Failed entries in history.
    pub failed_tasks: usize,
    /// Completed entries in history.
    pub completed_tasks: usize,
}

impl QueueStatus {
    pub(crate) fn new(running: usize, pending: usize, failed: usize, completed: usize) -> Self {
        Self {
            total_tasks: running + pending + failed + completed,
            running_tasks: running,
            pending_tasks: pending,
            failed_tasks: failed,
            completed_tasks: completed,
        }
    }
}
