//! Remote-execution backends
//!
//! Every backend implements [`Communicator`]: commands are started with a
//! [`Cmd`] that the caller later waits on, and all process work goes through
//! the [`BoundedExecutor`].

mod conn_info;
mod local;
mod pool;
mod salt;
mod ssh;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::exec::BoundedExecutor;
use crate::session::Cmd;
use crate::{Error, Result};

pub use conn_info::{ConnInfo, ConnectionInfo, ConnectionType, DEFAULT_SCRIPT_PATH, DEFAULT_TIMEOUT};
pub use local::LocalCommunicator;
pub use pool::{ConnectionPool, DEFAULT_KEEP_TIME};
pub use salt::SaltCommunicator;
pub use ssh::SshCommunicator;

/// Shebang added to uploaded scripts that lack one
pub const DEFAULT_SHEBANG: &str = "#!/bin/sh\n";

/// Timeout for liveness probes run by `connect`
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Trait for remote-execution backends
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Get the name of this backend
    fn name(&self) -> &'static str;

    /// Make sure the target is reachable
    async fn connect(&self) -> Result<()>;

    /// Tear down the connection
    async fn disconnect(&self) -> Result<()>;

    /// Hard timeout applied to remote commands
    fn timeout(&self) -> Duration;

    /// Script path with every `%RAND%` replaced by a random number
    fn script_path(&self) -> String;

    /// Start `cmd` without waiting for it; use [`Cmd::wait`] for the result
    async fn start(&self, cmd: &Cmd) -> Result<()>;

    /// Write `data` to `path` on the target
    async fn upload(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Upload an executable script, adding a shebang when it has none
    async fn upload_script(&self, path: &str, script: &[u8]) -> Result<()> {
        self.upload(path, &with_shebang(script)).await?;

        let cmd = Cmd::new(format!("chmod 0777 {}", shell_quote(path)));
        self.start(&cmd)
            .await
            .map_err(|e| Error::Remote(format!("Error chmodding script file to 0777: {}", e)))?;

        let status = cmd.wait().await;
        if status != 0 {
            return Err(Error::Remote(format!(
                "Error chmodding script file to 0777 ({}): {} {}",
                status,
                cmd.stdout().to_string_lossy(),
                cmd.stderr().to_string_lossy()
            )));
        }

        Ok(())
    }
}

/// Builds communicators that share one executor and one freshness pool
#[derive(Debug, Clone)]
pub struct CommunicatorFactory {
    executor: BoundedExecutor,
    pool: Arc<ConnectionPool>,
    ping_timeout: Duration,
}

impl CommunicatorFactory {
    /// Create a factory around `executor`
    pub fn new(executor: BoundedExecutor) -> Self {
        Self {
            executor,
            pool: Arc::new(ConnectionPool::default()),
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    /// Keep hosts fresh for `keep_time` after a successful use
    pub fn with_keep_time(mut self, keep_time: Duration) -> Self {
        self.pool = Arc::new(ConnectionPool::new(keep_time));
        self
    }

    /// Use `timeout` for liveness probes
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// The shared freshness pool
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Build the backend named by the `type` key of `info`
    pub fn create(&self, info: &ConnInfo) -> Result<Box<dyn Communicator>> {
        let info = ConnectionInfo::parse(info)?;
        let executor = self.executor.clone();
        let pool = Arc::clone(&self.pool);

        Ok(match info.kind {
            ConnectionType::Ssh => Box::new(
                SshCommunicator::new(info, executor, pool).with_ping_timeout(self.ping_timeout),
            ),
            ConnectionType::Salt => Box::new(
                SaltCommunicator::new(info, executor, pool).with_ping_timeout(self.ping_timeout),
            ),
            ConnectionType::Local => Box::new(LocalCommunicator::new(info, executor)),
        })
    }
}

/// Replace every `%RAND%` in `template` with a non-negative random number
pub fn randomize_script_path(template: &str) -> String {
    let n: i32 = rand::thread_rng().gen_range(0..i32::MAX);
    template.replace("%RAND%", &n.to_string())
}

/// Quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn with_shebang(script: &[u8]) -> Vec<u8> {
    if script.starts_with(b"#!") {
        return script.to_vec();
    }

    let mut out = Vec::with_capacity(DEFAULT_SHEBANG.len() + script.len());
    out.extend_from_slice(DEFAULT_SHEBANG.as_bytes());
    out.extend_from_slice(script);
    out
}
