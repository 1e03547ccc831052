//! Repository sync commands

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use ferry_core::session::UNKNOWN_EXIT_STATUS;
use ferry_core::{Config, Head, RepoState, RepoSync, SyncStatus, WAIT_SENTINEL};
use serde::Serialize;

use super::exec::detached_exit_code;

/// Repository sync commands
#[derive(Args, Debug)]
pub struct RepoArgs {
    #[command(subcommand)]
    pub command: RepoCommand,
}

#[derive(Subcommand, Debug)]
pub enum RepoCommand {
    /// Clone or fetch a working copy
    Sync {
        /// Remote URL
        url: String,

        /// Local working copy path
        path: PathBuf,

        /// Return once this budget elapses, leaving git running
        #[arg(long, value_parser = humantime::parse_duration)]
        wait: Option<Duration>,
    },

    /// Force a working copy onto a branch, tag or commit
    Switch {
        /// Local working copy path
        path: PathBuf,

        /// Branch, tag or commit
        reference: String,
    },

    /// Show the state of a working copy
    Status {
        /// Local working copy path
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct StatusReport {
    path: PathBuf,
    state: RepoState,
    #[serde(skip_serializing_if = "Option::is_none")]
    head: Option<Head>,
}

impl RepoArgs {
    /// Execute the repo command, returning the process exit code
    pub async fn execute(&self, verbose: bool, config: &Config) -> anyhow::Result<i32> {
        let sync = config.repo_sync(config.executor());

        match &self.command {
            RepoCommand::Sync { url, path, wait } => {
                sync_repo(&sync, config, url, path, *wait, verbose).await
            }
            RepoCommand::Switch { path, reference } => {
                sync.switch_to_branch(path, reference).await?;
                println!("{}: {}", path.display(), sync.current_head(path).await?);
                Ok(0)
            }
            RepoCommand::Status { path, json } => {
                show_status(&sync, path, *json).await?;
                Ok(0)
            }
        }
    }
}

async fn sync_repo(
    sync: &RepoSync,
    config: &Config,
    url: &str,
    path: &Path,
    wait: Option<Duration>,
    verbose: bool,
) -> anyhow::Result<i32> {
    let wait = wait.or(config.sync.wait);
    if verbose {
        tracing::info!(path = %path.display(), timeout = ?config.sync.timeout, ?wait, "syncing");
    }

    let status = sync
        .update_repo(path, url, config.sync.timeout, wait)
        .await?;

    match status {
        SyncStatus::Cloned => println!("Cloned into {}", path.display()),
        SyncStatus::Fetched => println!("Fetched origin in {}", path.display()),
        SyncStatus::StillRunning => {
            println!("{}", WAIT_SENTINEL);
            // git is killed if this process exits, so let it finish.
            let code = finish_background(sync).await;
            tracing::info!(path = %path.display(), code, "background sync done");
            return Ok(code);
        }
    }

    Ok(0)
}

/// Wait for the detached git command and map how it ended to an exit code
async fn finish_background(sync: &RepoSync) -> i32 {
    sync.wait_idle().await;
    let last = sync
        .executor()
        .registry()
        .snapshot()
        .pop()
        .and_then(|run| run.result());
    match last {
        Some(result) => detached_exit_code(&result),
        None => UNKNOWN_EXIT_STATUS,
    }
}

async fn show_status(sync: &RepoSync, path: &Path, json: bool) -> anyhow::Result<()> {
    let state = sync.state(path).await?;
    let head = match state {
        RepoState::PresentRepo => Some(sync.current_head(path).await?),
        _ => None,
    };

    if json {
        let report = StatusReport {
            path: path.to_path_buf(),
            state,
            head,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Path:  {}", path.display());
    println!("State: {:?}", state);
    if let Some(head) = head {
        println!("HEAD:  {}", head);
    }
    Ok(())
}
