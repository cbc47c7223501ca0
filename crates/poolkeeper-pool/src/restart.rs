//! Hook run after the drive configuration changes.

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::error::{PoolError, PoolResult};

/// Restarts whatever serves the pool so it picks up a configuration change.
pub trait RestartHook: Send + Sync {
    /// Runs the hook.
    fn restart(&self) -> PoolResult<()>;
}

/// Does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRestartHook;

impl RestartHook for NoopRestartHook {
    fn restart(&self) -> PoolResult<()> {
        debug!("restart hook not configured");
        Ok(())
    }
}

/// Runs an external command and requires it to succeed.
#[derive(Debug, Clone)]
pub struct CommandRestartHook {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandRestartHook {
    /// Creates a hook running `program args...`.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl RestartHook for CommandRestartHook {
    fn restart(&self) -> PoolResult<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .map_err(|e| PoolError::RestartHook(format!("{}: {}", self.program.display(), e)))?;
        if !status.success() {
            return Err(PoolError::RestartHook(format!(
                "{} exited with {}",
                self.program.display(),
                status
            )));
        }
        debug!(program = %self.program.display(), "restart hook ran");
        Ok(())
    }
}
