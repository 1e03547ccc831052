//! Local shell backend

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::{randomize_script_path, Communicator, ConnectionInfo};
use crate::exec::{BoundedExecutor, Invocation};
use crate::session::{self, Cmd};
use crate::Result;

/// Runs commands with `sh -c` on this machine
#[derive(Debug, Clone)]
pub struct LocalCommunicator {
    info: ConnectionInfo,
    executor: BoundedExecutor,
}

impl LocalCommunicator {
    /// Create a local backend
    pub fn new(info: ConnectionInfo, executor: BoundedExecutor) -> Self {
        Self { info, executor }
    }
}

#[async_trait]
impl Communicator for LocalCommunicator {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.info.timeout
    }

    fn script_path(&self) -> String {
        randomize_script_path(&self.info.script_path)
    }

    async fn start(&self, cmd: &Cmd) -> Result<()> {
        info!(command = %cmd.command(), "starting local command");
        let invocation = Invocation::new("sh").arg("-c").arg(cmd.command());
        session::drive(&self.executor, invocation, cmd, self.info.timeout)
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, data).await?;
        Ok(())
    }
}
