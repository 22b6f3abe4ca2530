//! Transfer executors: perform one remote operation for one object.

use crate::config::SyncConfig;
use crate::error::TransferError;
use crate::task::TaskKind;
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const MAX_DIAGNOSTIC_LEN: usize = 4096;

/// A remote-copy mechanism the queue dispatches tasks to.
///
/// Implementations must not block the runtime; the queue awaits the returned
/// future from a spawned task, so several transfers run concurrently.
#[async_trait]
pub trait Transfer: Send + Sync + 'static {
    /// Perform `kind` for `object_name` against the remote endpoint.
    async fn transfer(&self, kind: TaskKind, object_name: &str) -> Result<(), TransferError>;
}

/// Mirrors objects with `rsync` and removes them with `ssh rm -f`.
///
/// Host key checking is disabled so unattended runs do not stall on a prompt.
/// This trusts whatever answers at `remote_host`.
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    remote_host: String,
    remote_user: String,
    remote_base_path: String,
    key_path: Option<PathBuf>,
    upload_root: PathBuf,
    transfer_timeout_secs: u64,
    connect_timeout_secs: u64,
    ssh_program: String,
    rsync_program: String,
}

impl RsyncTransfer {
    /// Build an executor for the endpoint described by `config`.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            remote_host: config.remote_host.clone(),
            remote_user: config.remote_user.clone(),
            remote_base_path: config.remote_base_path.clone(),
            key_path: config.key_path.clone(),
            upload_root: config.upload_root.clone(),
            transfer_timeout_secs: config.transfer_timeout_secs,
            connect_timeout_secs: config.connect_timeout_secs,
            ssh_program: "ssh".to_string(),
            rsync_program: "rsync".to_string(),
        }
    }

    /// Use `ssh` and `rsync` binaries other than the ones found on `PATH`.
    pub fn with_programs(mut self, ssh: impl Into<String>, rsync: impl Into<String>) -> Self {
        self.ssh_program = ssh.into();
        self.rsync_program = rsync.into();
        self
    }

    fn login(&self) -> String {
        format!("{}@{}", self.remote_user, self.remote_host)
    }

    fn ssh_options(&self) -> Vec<String> {
        let mut opts = Vec::with_capacity(6);
        if let Some(key) = &self.key_path {
            opts.push("-i".to_string());
            opts.push(key.display().to_string());
        }
        opts.push("-o".to_string());
        opts.push("StrictHostKeyChecking=no".to_string());
        opts.push("-o".to_string());
        opts.push(format!("ConnectTimeout={}", self.connect_timeout_secs));
        opts
    }

    /// Remote shell for `rsync -e`, which rsync splits on spaces itself.
    fn rsync_shell(&self) -> String {
        let mut parts = vec![rsync_quote(&self.ssh_program)];
        parts.extend(self.ssh_options().iter().map(|o| rsync_quote(o)));
        parts.join(" ")
    }

    fn remote_path(&self, object_name: &str) -> Result<String, TransferError> {
        validate_object_name(object_name)?;
        Ok(format!(
            "{}/{}",
            self.remote_base_path.trim_end_matches('/'),
            object_name
        ))
    }

    fn ssh_args(&self, remote_command: String) -> Vec<String> {
        let mut args = self.ssh_options();
        args.push(self.login());
        args.push(remote_command);
        args
    }

    pub(crate) fn mkdir_args(&self, object_name: &str) -> Result<Vec<String>, TransferError> {
        let remote = self.remote_path(object_name)?;
        let dir = match remote.rsplit_once('/') {
            Some(("", _)) => "/".to_string(),
            Some((dir, _)) => dir.to_string(),
            None => ".".to_string(),
        };
        Ok(self.ssh_args(format!("mkdir -p -- {}", shell_quote(&dir))))
    }

    pub(crate) fn rsync_args(&self, object_name: &str) -> Result<Vec<String>, TransferError> {
        let remote = self.remote_path(object_name)?;
        let local = self.upload_root.join(object_name);
        Ok(vec![
            "-avz".to_string(),
            "--protect-args".to_string(),
            format!("--timeout={}", self.transfer_timeout_secs),
            "-e".to_string(),
            self.rsync_shell(),
            local.display().to_string(),
            format!("{}:{}", self.login(), remote),
        ])
    }

    pub(crate) fn remove_args(&self, object_name: &str) -> Result<Vec<String>, TransferError> {
        let remote = self.remote_path(object_name)?;
        Ok(self.ssh_args(format!("rm -f -- {}", shell_quote(&remote))))
    }

    fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs + self.transfer_timeout_secs)
    }
}

#[async_trait]
impl Transfer for RsyncTransfer {
    async fn transfer(&self, kind: TaskKind, object_name: &str) -> Result<(), TransferError> {
        match kind {
            TaskKind::Upload => {
                let mkdir = self.mkdir_args(object_name)?;
                run_command(&self.ssh_program, &mkdir, Some(self.control_timeout())).await?;
                // rsync enforces its own I/O timeout; large objects may legitimately
                // take longer than any fixed wall-clock bound.
                let rsync = self.rsync_args(object_name)?;
                run_command(&self.rsync_program, &rsync, None).await
            }
            TaskKind::Delete => {
                let rm = self.remove_args(object_name)?;
                run_command(&self.ssh_program, &rm, Some(self.control_timeout())).await
            }
        }
    }
}

/// Object names must be relative paths made only of normal components.
pub fn validate_object_name(name: &str) -> Result<(), TransferError> {
    let valid = !name.is_empty()
        && Path::new(name)
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(TransferError::InvalidObjectName {
            name: name.to_string(),
        })
    }
}

/// Quote `s` for a POSIX shell.
pub(crate) fn shell_quote(s: &str) -> String {
    if is_plain_word(s) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Quote `s` for rsync's `-e` splitter, which honours quotes but not
/// backslashes; a doubled quote inside a quoted word stands for one quote.
fn rsync_quote(s: &str) -> String {
    if is_plain_word(s) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "''"))
}

fn is_plain_word(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:@,+".contains(&b))
}

/// Run an external command, capturing its output without blocking the runtime.
pub async fn run_command(
    program: &str,
    args: &[String],
    limit: Option<Duration>,
) -> Result<(), TransferError> {
    tracing::debug!(program, ?args, "running external command");

    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
    let child = cmd.output();

    let output = match limit {
        Some(limit) => match tokio::time::timeout(limit, child).await {
            Ok(result) => result,
            Err(_) => {
                return Err(TransferError::Timeout {
                    program: program.to_string(),
                    secs: limit.as_secs(),
                })
            }
        },
        None => child.await,
    }
    .map_err(|source| TransferError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let diagnostic = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    Err(TransferError::ExitStatus {
        program: program.to_string(),
        code: output.status.code(),
        output: truncate(diagnostic, MAX_DIAGNOSTIC_LEN),
    })
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}
