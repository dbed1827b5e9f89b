// src/repair/executor.rs
use crate::config::RepairConfig;
use crate::models::RepairStrategy;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("strategy `{0}` has nothing to execute")]
    Unsupported(RepairStrategy),

    #[error("failed to launch repair command: {0}")]
    Launch(#[from] std::io::Error),

    #[error("repair command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },

    #[error("{0}")]
    Other(String),
}

/// Performs the actual restart or rebuild. Owned outside this subsystem.
#[async_trait]
pub trait RepairExecutor: Send + Sync {
    async fn execute(&self, service: &str, strategy: RepairStrategy) -> Result<(), ExecutorError>;
}

/// Delegates to external command templates, e.g. `docker compose restart {service}`.
/// The child is killed if the caller's timeout drops the future.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    restart: Vec<String>,
    rebuild: Vec<String>,
}

impl CommandExecutor {
    pub fn new(restart: Vec<String>, rebuild: Vec<String>) -> Self {
        Self { restart, rebuild }
    }

    pub fn from_config(config: &RepairConfig) -> Self {
        Self::new(config.restart_command.clone(), config.rebuild_command.clone())
    }

    fn command_for(&self, service: &str, strategy: RepairStrategy) -> Option<Vec<String>> {
        let template = match strategy {
            RepairStrategy::Restart => &self.restart,
            RepairStrategy::Rebuild => &self.rebuild,
            RepairStrategy::None => return None,
        };
        if template.is_empty() {
            return None;
        }
        Some(template.iter().map(|arg| arg.replace("{service}", service)).collect())
    }
}

#[async_trait]
impl RepairExecutor for CommandExecutor {
    async fn execute(&self, service: &str, strategy: RepairStrategy) -> Result<(), ExecutorError> {
        let argv = self
            .command_for(service, strategy)
            .ok_or(ExecutorError::Unsupported(strategy))?;
        let (program, args) = argv
            .split_first()
            .ok_or(ExecutorError::Unsupported(strategy))?;

        info!(service, %strategy, command = %argv.join(" "), "running repair command");
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            debug!(service, %strategy, "repair command succeeded");
            Ok(())
        } else {
            Err(ExecutorError::CommandFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
