//! Connection info decoding for remote backends

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// Flat connection description as handed over by callers
pub type ConnInfo = HashMap<String, String>;

/// Default remote command timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default remote script path; `%RAND%` is replaced per call
pub const DEFAULT_SCRIPT_PATH: &str = "/tmp/ferry_%RAND%.sh";

/// Which backend a connection uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// System `ssh` binary (the default)
    Ssh,
    /// Salt master CLI targeting one minion
    Salt,
    /// Plain local shell
    Local,
}

impl ConnectionType {
    /// Parse the `type` key; empty means ssh
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "" | "ssh" => Ok(Self::Ssh),
            "salt" => Ok(Self::Salt),
            "local" => Ok(Self::Local),
            other => Err(Error::Config(format!(
                "connection type '{}' not supported",
                other
            ))),
        }
    }

    /// Key used in connection info
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Salt => "salt",
            Self::Local => "local",
        }
    }
}

/// Validated and defaulted connection info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Backend to use
    pub kind: ConnectionType,
    /// Target host or minion id
    pub host: String,
    /// Remote user (ssh only)
    pub user: Option<String>,
    /// Remote port (ssh only)
    pub port: Option<u16>,
    /// Hard timeout for remote commands
    pub timeout: Duration,
    /// Script path template, may contain `%RAND%`
    pub script_path: String,
    /// Salt file server root used for uploads (salt only)
    pub salt_file_root: Option<PathBuf>,
}

impl ConnectionInfo {
    /// Decode and validate a flat connection description
    pub fn parse(info: &ConnInfo) -> Result<Self> {
        let get = |key: &str| info.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let kind = ConnectionType::parse(get("type").unwrap_or(""))?;
        let host = get("host").unwrap_or("").to_string();

        let timeout = match get("timeout") {
            Some(raw) => humantime::parse_duration(raw)
                .map_err(|e| Error::Config(format!("invalid timeout '{}': {}", raw, e)))?,
            None => DEFAULT_TIMEOUT,
        };

        let port = get("port")
            .map(|raw| {
                raw.parse::<u16>()
                    .map_err(|e| Error::Config(format!("invalid port '{}': {}", raw, e)))
            })
            .transpose()?;

        let parsed = Self {
            kind,
            host,
            user: get("user").map(str::to_string),
            port,
            timeout: if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout },
            script_path: get("scriptPath").unwrap_or(DEFAULT_SCRIPT_PATH).to_string(),
            salt_file_root: get("saltFileRoot").map(PathBuf::from),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    fn validate(&self) -> Result<()> {
        if self.kind != ConnectionType::Local && self.host.is_empty() {
            return Err(Error::Config(format!(
                "host is empty, please specify a host for {} connections",
                self.kind.as_str()
            )));
        }

        if self.kind == ConnectionType::Salt && self.salt_file_root.is_none() {
            return Err(Error::Config(
                "saltFileRoot is required for salt connections".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(pairs: &[(&str, &str)]) -> ConnInfo {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_unknown_type() {
        let err = ConnectionInfo::parse(&info(&[("type", "telnet")])).unwrap_err();
        assert!(err.to_string().contains("'telnet' not supported"));
    }

    #[test]
    fn test_salt_requires_host_and_root() {
        assert!(ConnectionInfo::parse(&info(&[("type", "salt")])).is_err());
        assert!(ConnectionInfo::parse(&info(&[("type", "salt"), ("host", "abcd")])).is_err());

        let parsed = ConnectionInfo::parse(&info(&[
            ("type", "salt"),
            ("host", "abcd"),
            ("saltFileRoot", "/tmp"),
        ]))
        .unwrap();
        assert_eq!(parsed.kind, ConnectionType::Salt);
        assert_eq!(parsed.salt_file_root, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_ssh_is_default() {
        let parsed = ConnectionInfo::parse(&info(&[("host", "abcd")])).unwrap();
        assert_eq!(parsed.kind, ConnectionType::Ssh);
        assert_eq!(parsed.timeout, DEFAULT_TIMEOUT);
        assert_eq!(parsed.script_path, DEFAULT_SCRIPT_PATH);
    }

    #[test]
    fn test_timeout_and_port() {
        let parsed = ConnectionInfo::parse(&info(&[
            ("type", "ssh"),
            ("host", "abcd"),
            ("timeout", "30s"),
            ("port", "2222"),
            ("user", "deploy"),
        ]))
        .unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(30));
        assert_eq!(parsed.port, Some(2222));
        assert_eq!(parsed.user.as_deref(), Some("deploy"));

        assert!(ConnectionInfo::parse(&info(&[("host", "a"), ("timeout", "soon")])).is_err());
        assert!(ConnectionInfo::parse(&info(&[("host", "a"), ("port", "99999")])).is_err());
    }

    #[test]
    fn test_local_needs_no_host() {
        let parsed = ConnectionInfo::parse(&info(&[("type", "local")])).unwrap();
        assert_eq!(parsed.kind, ConnectionType::Local);
        assert!(parsed.host.is_empty());
    }
}
