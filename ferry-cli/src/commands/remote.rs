//! Remote command execution through ssh, salt or the local shell

use clap::{Args, Subcommand};
use ferry_core::{Cmd, Config, ConnInfo};

/// Remote execution commands
#[derive(Args, Debug)]
pub struct RemoteArgs {
    #[command(subcommand)]
    pub command: RemoteCommand,
}

#[derive(Subcommand, Debug)]
pub enum RemoteCommand {
    /// Run a shell command on a target and wait for its exit status
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Upload the command as a script and run that instead
        #[arg(long)]
        script: bool,

        /// Command line to run
        command: String,
    },
}

/// Where and how to connect
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// Connection type: ssh, salt or local
    #[arg(long = "type", default_value = "ssh")]
    kind: String,

    /// Target host or minion id
    #[arg(long)]
    host: Option<String>,

    /// Remote user (ssh)
    #[arg(long)]
    user: Option<String>,

    /// Remote port (ssh)
    #[arg(long)]
    port: Option<u16>,

    /// Hard timeout for the command (e.g. "90s", "5m")
    #[arg(long)]
    timeout: Option<String>,

    /// Extra connection settings as key=value (e.g. saltFileRoot=/srv/salt)
    #[arg(long = "opt", value_parser = parse_key_value)]
    opts: Vec<(String, String)>,
}

impl TargetArgs {
    fn conn_info(&self) -> ConnInfo {
        let mut info: ConnInfo = self.opts.iter().cloned().collect();
        info.insert("type".to_string(), self.kind.clone());
        if let Some(ref host) = self.host {
            info.insert("host".to_string(), host.clone());
        }
        if let Some(ref user) = self.user {
            info.insert("user".to_string(), user.clone());
        }
        if let Some(port) = self.port {
            info.insert("port".to_string(), port.to_string());
        }
        if let Some(ref timeout) = self.timeout {
            info.insert("timeout".to_string(), timeout.clone());
        }
        info
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

impl RemoteArgs {
    /// Execute the remote command, returning the remote exit status
    pub async fn execute(&self, verbose: bool, config: &Config) -> anyhow::Result<i32> {
        match &self.command {
            RemoteCommand::Run {
                target,
                script,
                command,
            } => run(config, target, *script, command, verbose).await,
        }
    }
}

async fn run(
    config: &Config,
    target: &TargetArgs,
    script: bool,
    command: &str,
    verbose: bool,
) -> anyhow::Result<i32> {
    let factory = config.communicator_factory(config.executor());
    let comm = factory.create(&target.conn_info())?;
    comm.connect().await?;

    let cmd = if script {
        let path = comm.script_path();
        comm.upload_script(&path, command.as_bytes()).await?;
        if verbose {
            tracing::info!(backend = comm.name(), %path, "uploaded script");
        }
        Cmd::new(path)
    } else {
        Cmd::new(command)
    };

    comm.start(&cmd).await?;
    let status = cmd.wait().await;

    print!("{}", cmd.stdout().to_string_lossy());
    eprint!("{}", cmd.stderr().to_string_lossy());

    if let Err(e) = comm.disconnect().await {
        tracing::warn!(error = %e, "disconnect failed");
    }

    if verbose {
        tracing::info!(backend = comm.name(), status, "remote command finished");
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("saltFileRoot=/srv/salt").unwrap(),
            ("saltFileRoot".to_string(), "/srv/salt".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
    }

    #[test]
    fn test_conn_info_flags_override_opts() {
        let target = TargetArgs {
            kind: "salt".to_string(),
            host: Some("minion-1".to_string()),
            user: None,
            port: None,
            timeout: Some("90s".to_string()),
            opts: vec![
                ("host".to_string(), "ignored".to_string()),
                ("saltFileRoot".to_string(), "/srv/salt".to_string()),
            ],
        };

        let info = target.conn_info();
        assert_eq!(info["type"], "salt");
        assert_eq!(info["host"], "minion-1");
        assert_eq!(info["timeout"], "90s");
        assert_eq!(info["saltFileRoot"], "/srv/salt");
        assert!(!info.contains_key("user"));
    }
}
