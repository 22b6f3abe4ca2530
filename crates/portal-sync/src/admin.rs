//! Read/administrative view of the queue: status, history and manual retry.

use crate::error::{Result, SyncError};
use crate::queue::SyncQueue;
use crate::task::{QueueStatus, Task, TaskId};
use serde::{Deserialize, Serialize};

/// History entries returned when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

const DISABLED_MESSAGE: &str = "File sync is not enabled";

/// Queue status, or a notice that sync is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Whether replication is switched on.
    pub enabled: bool,
    /// Counts, present when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<QueueStatus>,
    /// Explanation, present when disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Recent history, empty when sync is disabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryReport {
    /// Whether replication is switched on.
    pub enabled: bool,
    /// Finished tasks, newest first.
    pub history: Vec<Task>,
    /// Explanation, present when disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Administrative façade over a [`SyncQueue`]. Never touches transfers directly.
#[derive(Debug, Clone)]
pub struct SyncAdmin {
    queue: SyncQueue,
}

impl SyncAdmin {
    /// Wrap the process's queue.
    pub fn new(queue: SyncQueue) -> Self {
        Self { queue }
    }

    /// Whether replication is switched on.
    pub fn is_enabled(&self) -> bool {
        self.queue.is_enabled()
    }

    /// Current queue counts.
    pub async fn status(&self) -> Result<StatusReport> {
        if !self.is_enabled() {
            return Ok(StatusReport {
                enabled: false,
                status: None,
                message: Some(DISABLED_MESSAGE.to_string()),
            });
        }
        Ok(StatusReport {
            enabled: true,
            status: Some(self.queue.status().await?),
            message: None,
        })
    }

    /// Up to `limit` (default [`DEFAULT_HISTORY_LIMIT`]) entries, newest first.
    pub async fn history(&self, limit: Option<usize>) -> Result<HistoryReport> {
        if !self.is_enabled() {
            return Ok(HistoryReport {
                enabled: false,
                history: Vec::new(),
                message: Some(DISABLED_MESSAGE.to_string()),
            });
        }
        let history = self
            .queue
            .history(limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await?;
        Ok(HistoryReport {
            enabled: true,
            history,
            message: None,
        })
    }

    /// Re-run the failed task `task_id` as a new task and return the new id.
    pub async fn retry(&self, task_id: &str) -> Result<TaskId> {
        if !self.is_enabled() {
            return Err(SyncError::Disabled);
        }
        self.queue
            .retry(task_id)
            .await?
            .ok_or_else(|| SyncError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }
}
