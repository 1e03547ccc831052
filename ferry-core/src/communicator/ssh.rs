//! SSH backend built on the system `ssh` binary
//!
//! Authentication and host-key handling are left to the user's ssh
//! configuration; `BatchMode=yes` makes ssh fail instead of prompting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    randomize_script_path, shell_quote, Communicator, ConnectionInfo, ConnectionPool,
    DEFAULT_PING_TIMEOUT,
};
use crate::exec::{BoundedExecutor, Invocation, Outcome};
use crate::session::{self, Cmd};
use crate::{Error, Result};

/// Runs commands on a remote host through `ssh`
#[derive(Debug, Clone)]
pub struct SshCommunicator {
    info: ConnectionInfo,
    executor: BoundedExecutor,
    pool: Arc<ConnectionPool>,
    ssh_path: String,
    ping_timeout: Duration,
}

impl SshCommunicator {
    /// Create an ssh backend
    pub fn new(info: ConnectionInfo, executor: BoundedExecutor, pool: Arc<ConnectionPool>) -> Self {
        Self {
            info,
            executor,
            pool,
            ssh_path: "ssh".to_string(),
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    /// Use a custom path to the ssh executable
    pub fn with_ssh_path(mut self, path: impl Into<String>) -> Self {
        self.ssh_path = path.into();
        self
    }

    /// Use `timeout` for the connect probe
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.ping_timeout = timeout;
        }
        self
    }

    /// `user@host`, or just `host` without a user
    fn destination(&self) -> String {
        match self.info.user {
            Some(ref user) => format!("{}@{}", user, self.info.host),
            None => self.info.host.clone(),
        }
    }

    /// ssh invocation up to and including the destination
    fn base_invocation(&self, connect_timeout: Duration) -> Invocation {
        let mut invocation = Invocation::new(&self.ssh_path)
            .args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)));

        if let Some(port) = self.info.port {
            invocation = invocation.arg("-p").arg(port.to_string());
        }

        invocation.arg(self.destination())
    }

    /// Run a remote command to completion
    async fn exec_ssh(&self, invocation: Invocation, timeout: Duration) -> Result<String> {
        match self.executor.run(invocation, timeout, None).await? {
            Outcome::Completed(completion) => Ok(completion.check()?.stdout),
            Outcome::Killed { program, after } => Err(Error::Remote(format!(
                "'{}' killed as timeout of {:?} reached",
                program, after
            ))),
            Outcome::StillRunning(_) => Err(Error::Remote(
                "ssh command detached unexpectedly".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Communicator for SshCommunicator {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn connect(&self) -> Result<()> {
        if self.pool.is_fresh(&self.info.host) {
            debug!(host = %self.info.host, "ssh host used recently, skipping probe");
            return Ok(());
        }

        let probe = self.base_invocation(self.ping_timeout).arg("true");
        self.exec_ssh(probe, self.ping_timeout).await?;
        self.pool.touch(&self.info.host);
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
        if cmd.command().is_empty() {
            return Err(Error::Remote("command is empty".to_string()));
        }

        info!(host = %self.info.host, command = %cmd.command(), "starting remote command");
        let invocation = self.base_invocation(self.ping_timeout).arg(cmd.command());
        session::drive(&self.executor, invocation, cmd, self.info.timeout)?;

        self.pool.touch(&self.info.host);
        Ok(())
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        let remote = format!("cat > {}", shell_quote(path));
        let invocation = self
            .base_invocation(self.ping_timeout)
            .arg(remote)
            .stdin(data.to_vec());

        self.exec_ssh(invocation, self.info.timeout)
            .await
            .map_err(|e| Error::Remote(format!("upload to {} failed: {}", path, e)))?;
        Ok(())
    }
}
