//! Salt backend: commands run on a minion through the salt master CLI

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info};

use super::{randomize_script_path, Communicator, ConnectionInfo, ConnectionPool, DEFAULT_PING_TIMEOUT};
use crate::exec::{BoundedExecutor, Invocation, Outcome};
use crate::session::{self, Cmd};
use crate::{Error, Result};

/// Runs commands on one salt minion via `salt -L <host> cmd.run`
#[derive(Debug, Clone)]
pub struct SaltCommunicator {
    info: ConnectionInfo,
    executor: BoundedExecutor,
    pool: Arc<ConnectionPool>,
    salt_path: String,
    ping_timeout: Duration,
}

impl SaltCommunicator {
    /// Create a salt backend
    pub fn new(info: ConnectionInfo, executor: BoundedExecutor, pool: Arc<ConnectionPool>) -> Self {
        Self {
            info,
            executor,
            pool,
            salt_path: "salt".to_string(),
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }

    /// Use a custom path to the salt executable
    pub fn with_salt_path(mut self, path: impl Into<String>) -> Self {
        self.salt_path = path.into();
        self
    }

    /// Use `timeout` for `test.ping`
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.ping_timeout = timeout;
        }
        self
    }

    fn host(&self) -> Result<&str> {
        if self.info.host.is_empty() {
            return Err(Error::Remote(
                "host is empty, please specify a host to exec on".to_string(),
            ));
        }
        Ok(&self.info.host)
    }

    fn file_root(&self) -> Result<&PathBuf> {
        self.info
            .salt_file_root
            .as_ref()
            .ok_or_else(|| Error::Config("saltFileRoot is not configured".to_string()))
    }

    /// Run a salt command to completion and return its stdout
    async fn exec_salt(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let invocation = Invocation::new(&self.salt_path).args(args);
        match self.executor.run(invocation, timeout, None).await? {
            Outcome::Completed(completion) => Ok(completion.check()?.stdout),
            Outcome::Killed { program, after } => Err(Error::Remote(format!(
                "'{}' killed as timeout of {:?} reached",
                program, after
            ))),
            Outcome::StillRunning(_) => Err(Error::Remote(
                "salt command detached unexpectedly".to_string(),
            )),
        }
    }

    /// Ask the minion to fetch `name` from the salt file server into `dst`
    async fn fetch_file(&self, name: &str, dst: &str) -> Result<()> {
        let host = self.host()?;
        let src = format!("salt://{}", name);
        debug!(%src, %dst, "uploading file through salt file server");

        let out = self
            .exec_salt(
                &[
                    "--out=text",
                    "-L",
                    host,
                    "cp.get_file",
                    src.as_str(),
                    dst,
                    "gzip=5",
                    "makedirs=True",
                ],
                self.info.timeout,
            )
            .await
            .map_err(|e| Error::Remote(format!("upload file err: {}", e)))?;
        debug!(output = %out.trim(), "cp.get_file finished");
        Ok(())
    }
}

#[async_trait]
impl Communicator for SaltCommunicator {
    fn name(&self) -> &'static str {
        "salt"
    }

    async fn connect(&self) -> Result<()> {
        let host = self.host()?;
        if self.pool.is_fresh(host) {
            debug!(%host, "salt minion used recently, skipping ping");
            return Ok(());
        }

        self.exec_salt(&["-L", host, "test.ping"], self.ping_timeout)
            .await?;
        self.pool.touch(host);
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
        let host = self.host()?;
        if cmd.command().is_empty() {
            return Err(Error::Remote("command is empty".to_string()));
        }

        info!(%host, command = %cmd.command(), "starting remote command");
        let invocation = Invocation::new(&self.salt_path)
            .args(["-L", host, "--out=text", "cmd.run"])
            .arg(cmd.command());
        session::drive(&self.executor, invocation, cmd, self.info.timeout)?;

        self.pool.touch(host);
        Ok(())
    }

    async fn upload(&self, path: &str, data: &[u8]) -> Result<()> {
        let root = self.file_root()?;
        let name = format!("ferry-upload-{}", rand::thread_rng().gen::<u32>());
        let staged = root.join(&name);

        tokio::fs::write(&staged, data).await.map_err(|e| {
            Error::Remote(format!("Error creating temporary file for upload: {}", e))
        })?;

        let result = self.fetch_file(&name, path).await;
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            debug!(path = %staged.display(), error = %e, "failed to remove staged upload");
        }
        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::communicator::ConnectionType;
    use tempfile::TempDir;

    fn salt(root: Option<PathBuf>) -> SaltCommunicator {
        let info = ConnectionInfo {
            kind: ConnectionType::Salt,
            host: "minion-1".to_string(),
            user: None,
            port: None,
            timeout: Duration::from_secs(10),
            script_path: "/tmp/ferry_%RAND%.sh".to_string(),
            salt_file_root: root,
        };
        SaltCommunicator::new(info, BoundedExecutor::new(), Arc::new(ConnectionPool::default()))
    }

    #[tokio::test]
    async fn test_start_builds_salt_command_line() {
        // `echo` stands in for salt and prints the arguments it was given.
        let comm = salt(None).with_salt_path("echo");
        let cmd = Cmd::new("uptime");
        comm.start(&cmd).await.unwrap();

        assert_eq!(cmd.wait().await, 0);
        assert_eq!(
            cmd.stdout().to_string_lossy().trim(),
            "-L minion-1 --out=text cmd.run uptime"
        );
        assert!(comm.pool.is_fresh("minion-1"));
    }

    #[tokio::test]
    async fn test_connect_skips_ping_when_fresh() {
        // A salt binary that cannot run proves the ping was skipped.
        let comm = salt(None).with_salt_path("/nonexistent/salt-12345");
        assert!(comm.connect().await.is_err());

        comm.pool.touch("minion-1");
        comm.connect().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_salt_binary_exits_255() {
        let comm = salt(None).with_salt_path("/nonexistent/salt-12345");
        let cmd = Cmd::new("uptime");
        comm.start(&cmd).await.unwrap();
        assert_eq!(cmd.wait().await, crate::session::UNKNOWN_EXIT_STATUS);
        assert!(!cmd.stderr().is_empty());
    }

    #[tokio::test]
    async fn test_upload_stages_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let comm = salt(Some(root.path().to_path_buf())).with_salt_path("true");

        comm.upload("/srv/target.txt", b"payload").await.unwrap();

        let leftovers = std::fs::read_dir(root.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_upload_requires_file_root() {
        let comm = salt(None).with_salt_path("true");
        assert!(matches!(
            comm.upload("/srv/target.txt", b"payload").await,
            Err(Error::Config(_))
        ));
    }
}
