//! Command-line entry point: daemon mode and one-shot operator pushes.

use crate::admin::SyncAdmin;
use crate::api::SyncApi;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::queue::SyncQueue;
use crate::task::{Task, TaskId, TaskState};
use clap::{Args, Parser, Subcommand};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "portal-sync")]
#[command(about = "Mirror portal uploads to a secondary node", long_about = None)]
pub struct Cli {
    /// Base config file (.toml or .json); flags and environment override it.
    #[arg(short, long, env = "SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Per-setting overrides.
    #[command(flatten)]
    pub overrides: ConfigOverrides,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Settings that replace values from the config file when given.
#[derive(Args, Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Turn replication on or off.
    #[arg(long, env = "SYNC_ENABLED")]
    pub enabled: Option<bool>,

    /// Secondary node hostname.
    #[arg(long, env = "SYNC_REMOTE_HOST")]
    pub remote_host: Option<String>,

    /// Login user on the secondary node.
    #[arg(long, env = "SYNC_REMOTE_USER")]
    pub remote_user: Option<String>,

    /// Base directory on the secondary node.
    #[arg(long, env = "SYNC_REMOTE_PATH")]
    pub remote_path: Option<String>,

    /// Private key passed to ssh.
    #[arg(long, env = "SYNC_SSH_KEY_PATH")]
    pub ssh_key_path: Option<PathBuf>,

    /// Local directory object names are relative to.
    #[arg(long, env = "SYNC_UPLOAD_DIR")]
    pub upload_dir: Option<PathBuf>,

    /// Automatic retries per task.
    #[arg(long, env = "SYNC_RETRY_TIMES")]
    pub retry_times: Option<u32>,

    /// Base retry delay in milliseconds.
    #[arg(long, env = "SYNC_RETRY_DELAY")]
    pub retry_delay: Option<u64>,

    /// Transfers in flight at once.
    #[arg(long, env = "SYNC_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,

    /// Finished tasks kept in history.
    #[arg(long, env = "SYNC_MAX_HISTORY")]
    pub max_history: Option<usize>,

    /// Admin API listen address.
    #[arg(long, env = "SYNC_BIND_ADDR")]
    pub bind_addr: Option<SocketAddr>,
}

impl ConfigOverrides {
    /// Write every given value onto `config`.
    pub fn apply(self, config: &mut SyncConfig) {
        if let Some(v) = self.enabled {
            config.enabled = v;
        }
        if let Some(v) = self.remote_host {
            config.remote_host = v;
        }
        if let Some(v) = self.remote_user {
            config.remote_user = v;
        }
        if let Some(v) = self.remote_path {
            config.remote_base_path = v;
        }
        if let Some(v) = self.ssh_key_path {
            config.key_path = Some(v);
        }
        if let Some(v) = self.upload_dir {
            config.upload_root = v;
        }
        if let Some(v) = self.retry_times {
            config.max_retries = v;
        }
        if let Some(v) = self.retry_delay {
            config.retry_base_delay_ms = v;
        }
        if let Some(v) = self.max_concurrent {
            config.max_concurrent = v;
        }
        if let Some(v) = self.max_history {
            config.max_history_size = v;
        }
        if let Some(v) = self.bind_addr {
            config.bind_addr = v;
        }
    }
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Run the queue and the admin API until interrupted.
    Serve,
    /// Upload objects to the remote node and wait for the outcome.
    Push {
        /// Object names relative to the upload directory.
        #[arg(required = true)]
        objects: Vec<String>,
    },
    /// Delete objects on the remote node and wait for the outcome.
    Remove {
        /// Object names relative to the remote base path.
        #[arg(required = true)]
        objects: Vec<String>,
    },
}

impl Cli {
    /// Resolve file, flags and environment into a validated config.
    pub fn load_config(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::from_file(path)?,
            None => SyncConfig::default(),
        };
        self.overrides.clone().apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Execute the selected subcommand.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.load_config()?;
        match self.command {
            Command::Serve => serve(config).await,
            Command::Push { objects } => push(config, objects, false).await,
            Command::Remove { objects } => push(config, objects, true).await,
        }
    }
}

async fn serve(config: SyncConfig) -> anyhow::Result<()> {
    let queue = SyncQueue::from_config(&config)?;
    let api = SyncApi::new(SyncAdmin::new(queue.clone()));

    let result = api.serve(config.bind_addr, shutdown_signal()).await;
    queue.shutdown().await;
    result
}

async fn push(config: SyncConfig, objects: Vec<String>, delete: bool) -> anyhow::Result<()> {
    if !config.enabled {
        anyhow::bail!("file sync is not enabled");
    }
    let queue = SyncQueue::from_config(&config)?;
    let finished = sync_objects(&queue, &objects, delete, config.max_history_size).await;
    queue.shutdown().await;
    let finished = finished?;

    println!("{}", serde_json::to_string_pretty(&finished)?);

    let failed = finished
        .iter()
        .filter(|t| t.state == TaskState::Failed)
        .count();
    if failed > 0 {
        anyhow::bail!("{} of {} objects failed to sync", failed, finished.len());
    }
    Ok(())
}

/// Sync `objects` in batches that fit in history, so no outcome is evicted
/// before it is collected. Returns the finished tasks in submission order.
async fn sync_objects(
    queue: &SyncQueue,
    objects: &[String],
    delete: bool,
    batch_size: usize,
) -> Result<Vec<Task>> {
    let mut finished = Vec::with_capacity(objects.len());
    for batch in objects.chunks(batch_size.max(1)) {
        let ids: Vec<TaskId> = batch
            .iter()
            .filter_map(|name| {
                if delete {
                    queue.enqueue_delete(name)
                } else {
                    queue.enqueue_upload(name)
                }
            })
            .collect();
        queue.wait_idle().await?;

        let mut outcomes: HashMap<TaskId, Task> = queue
            .history(ids.len())
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        for id in &ids {
            let task = outcomes.remove(id).ok_or_else(|| SyncError::TaskNotFound {
                task_id: id.clone(),
            })?;
            finished.push(task);
        }
    }
    Ok(finished)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}
