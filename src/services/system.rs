//! External collaborators driven by the restart sequence: the service manager
//! and the backup tool.

use crate::models::InstanceConfig;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Default time limit for a `systemctl` invocation.
pub const SERVICE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default time limit for the backup command.
pub const BACKUP_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("{command} exited with status {code}")]
    Failed { command: String, code: i32 },
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("No backup command configured")]
    NotConfigured,

    #[error("Failed to run backup command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Backup timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backup command exited with status {0}")]
    Failed(i32),
}

/// Stops and starts the managed game server.
#[allow(async_fn_in_trait)]
pub trait ServiceControl {
    async fn stop(&mut self, config: &InstanceConfig) -> Result<(), ServiceError>;

    async fn start(&mut self, config: &InstanceConfig) -> Result<(), ServiceError>;
}

/// Creates a backup of the instance before it restarts.
///
/// Rotation and restore are the backup tool's business.
#[allow(async_fn_in_trait)]
pub trait BackupRunner {
    async fn run_backup(&mut self, config: &InstanceConfig) -> Result<(), BackupError>;
}

/// `systemctl stop|start <service>`, optionally through `sudo`.
#[derive(Debug, Clone)]
pub struct SystemdService {
    timeout: Duration,
}

impl SystemdService {
    pub fn new() -> Self {
        Self {
            timeout: SERVICE_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Program and arguments for `action` on the configured service.
    pub fn command_line(config: &InstanceConfig, action: &str) -> Vec<String> {
        let mut args = Vec::with_capacity(4);
        if config.use_sudo {
            args.push("sudo".to_string());
        }
        args.push("systemctl".to_string());
        args.push(action.to_string());
        args.push(config.service_name.clone());
        args
    }

    async fn run(&self, config: &InstanceConfig, action: &str) -> Result<(), ServiceError> {
        let args = Self::command_line(config, action);
        let command = args.join(" ");
        tracing::info!("Executing: {}", command);

        let start = Instant::now();
        let mut cmd = Command::new(&args[0]);
        cmd.args(&args[1..]).kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ServiceError::Spawn {
            command: command.clone(),
            source,
        })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                tracing::warn!("{} timed out after {:?}", command, self.timeout);
                ServiceError::Timeout {
                    command: command.clone(),
                    timeout: self.timeout,
                }
            })?
            .map_err(|source| ServiceError::Spawn {
                command: command.clone(),
                source,
            })?;

        tracing::info!(
            "{} completed in {:.2}s with {}",
            command,
            start.elapsed().as_secs_f32(),
            output.status
        );
        check_status(output.status).map_err(|code| ServiceError::Failed { command, code })
    }
}

impl Default for SystemdService {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceControl for SystemdService {
    async fn stop(&mut self, config: &InstanceConfig) -> Result<(), ServiceError> {
        self.run(config, "stop").await
    }

    async fn start(&mut self, config: &InstanceConfig) -> Result<(), ServiceError> {
        self.run(config, "start").await
    }
}

/// Runs the configured `backup_command` through `sh -c`.
///
/// The command sees the instance through `PZKEEPER_INSTALL_DIR`,
/// `PZKEEPER_BACKUP_DIR`, `PZKEEPER_SERVER_NAME` and
/// `PZKEEPER_BACKUP_RETENTION`.
#[derive(Debug, Clone)]
pub struct CommandBackup {
    timeout: Duration,
}

impl CommandBackup {
    pub fn new() -> Self {
        Self {
            timeout: BACKUP_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for CommandBackup {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupRunner for CommandBackup {
    async fn run_backup(&mut self, config: &InstanceConfig) -> Result<(), BackupError> {
        let script = config
            .backup_command
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(BackupError::NotConfigured)?;

        tracing::info!("Running backup: {}", script);
        let start = Instant::now();

        let child = Command::new("sh")
            .args(["-c", script])
            .env("PZKEEPER_INSTALL_DIR", config.install_dir.as_str())
            .env("PZKEEPER_BACKUP_DIR", config.backup_dir.as_str())
            .env("PZKEEPER_SERVER_NAME", &config.server_name)
            .env(
                "PZKEEPER_BACKUP_RETENTION",
                config.backup_retention.to_string(),
            )
            .kill_on_drop(true)
            .spawn()?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BackupError::Timeout(self.timeout))??;

        tracing::info!(
            "Backup completed in {:.2}s with {}",
            start.elapsed().as_secs_f32(),
            output.status
        );
        check_status(output.status).map_err(BackupError::Failed)
    }
}

fn check_status(status: ExitStatus) -> Result<(), i32> {
    if status.success() {
        Ok(())
    } else {
        Err(status.code().unwrap_or(-1))
    }
}
