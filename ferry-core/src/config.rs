//! Configuration management for Ferry
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (FERRY_*)
//! 3. Config file (~/.config/ferry/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::communicator::{CommunicatorFactory, DEFAULT_KEEP_TIME, DEFAULT_PING_TIMEOUT};
use crate::exec::{BoundedExecutor, DEFAULT_HARD_TIMEOUT, DEFAULT_REGISTRY_CAPACITY};
use crate::repo::{RepoSync, DEFAULT_PROBE_TIMEOUT};
use crate::{Error, Result};

/// Bounded execution settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Hard timeout substituted when a caller passes zero
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Detached runs remembered for inspection
    pub registry_capacity: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_HARD_TIMEOUT,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }
}

/// Repository sync settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Path to the git executable
    pub git_path: String,

    /// Hard timeout for clone, fetch, reset and checkout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Wait budget after which sync returns while git keeps running
    #[serde(with = "humantime_serde")]
    pub wait: Option<Duration>,

    /// Timeout for read-only git probes
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            git_path: "git".to_string(),
            timeout: DEFAULT_HARD_TIMEOUT,
            wait: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

/// Remote execution settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// How long a host stays "recently used" and skips its connect probe
    #[serde(with = "humantime_serde")]
    pub connection_keep_time: Duration,

    /// Timeout for connect probes (`test.ping`, `ssh true`)
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connection_keep_time: DEFAULT_KEEP_TIME,
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Bounded execution configuration
    pub exec: ExecConfig,

    /// Repository sync configuration
    pub sync: SyncConfig,

    /// Remote execution configuration
    pub remote: RemoteConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/ferry/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ferry").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - FERRY_GIT_PATH: Path to git executable
    /// - FERRY_TIMEOUT: Hard timeout for git commands (e.g. "90s", "5m")
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(git_path) = lookup("FERRY_GIT_PATH") {
            self.sync.git_path = git_path;
        }

        if let Some(raw) = lookup("FERRY_TIMEOUT") {
            match humantime::parse_duration(&raw) {
                Ok(timeout) => self.sync.timeout = timeout,
                Err(e) => warn!(value = %raw, error = %e, "ignoring invalid FERRY_TIMEOUT"),
            }
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(
        mut self,
        git_path: Option<String>,
        timeout: Option<Duration>,
        wait: Option<Duration>,
    ) -> Self {
        if let Some(path) = git_path {
            self.sync.git_path = path;
        }

        if let Some(t) = timeout {
            self.sync.timeout = t;
        }

        if let Some(w) = wait {
            self.sync.wait = Some(w);
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        git_path: Option<String>,
        timeout: Option<Duration>,
        wait: Option<Duration>,
    ) -> Result<Self> {
        Ok(Self::load()?
            .with_env_overrides()
            .with_cli_overrides(git_path, timeout, wait))
    }

    /// Executor configured from `[exec]`
    pub fn executor(&self) -> BoundedExecutor {
        BoundedExecutor::new()
            .with_default_timeout(self.exec.default_timeout)
            .with_registry_capacity(self.exec.registry_capacity)
    }

    /// Repository syncer configured from `[sync]`
    pub fn repo_sync(&self, executor: BoundedExecutor) -> RepoSync {
        RepoSync::new(executor)
            .with_git_path(&self.sync.git_path)
            .with_timeout(self.sync.timeout)
            .with_wait_budget(self.sync.wait)
            .with_probe_timeout(self.sync.probe_timeout)
    }

    /// Remote backend factory configured from `[remote]`
    pub fn communicator_factory(&self, executor: BoundedExecutor) -> CommunicatorFactory {
        CommunicatorFactory::new(executor)
            .with_keep_time(self.remote.connection_keep_time)
            .with_ping_timeout(self.remote.ping_timeout)
    }
}
