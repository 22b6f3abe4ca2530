#![warn(missing_docs)]

//! Portal sync subsystem: replication queue mirroring stored objects to a secondary node

pub mod admin;
pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod queue;
pub mod task;
pub mod timer;
pub mod transfer;

pub use admin::{HistoryReport, StatusReport, SyncAdmin};
pub use api::SyncApi;
pub use config::SyncConfig;
pub use error::{Result, SyncError, TransferError};
pub use queue::{QueueConfig, QueueSnapshot, StorageEvents, SyncQueue};
pub use task::{QueueStatus, Task, TaskId, TaskKind, TaskState};
pub use timer::{ManualTimer, Timer, TimerHandle, TokioTimer};
pub use transfer::{RsyncTransfer, Transfer};
