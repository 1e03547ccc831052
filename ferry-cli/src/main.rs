//! Ferry CLI - bounded commands, remote sessions and repository sync
//!
//! Runs commands under a hard timeout with an optional wait budget, executes
//! commands on remote hosts, and keeps git working copies up to date.

mod commands;

use std::time::Duration;

use clap::{Parser, Subcommand};
use ferry_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{ExecArgs, RemoteArgs, RepoArgs};

/// Ferry: bounded command execution and repository sync
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to git executable (overrides config and env)
    #[arg(long, global = true, env = "FERRY_GIT_PATH")]
    git_path: Option<String>,

    /// Hard timeout for git commands (overrides config and env)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    git_timeout: Option<Duration>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show version information
    Version,

    /// Run a local command under a hard timeout
    #[command(visible_alias = "x")]
    Exec(ExecArgs),

    /// Clone, fetch and switch git working copies
    Repo(RepoArgs),

    /// Run commands on ssh, salt or local targets
    Remote(RemoteArgs),

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.verbose {
        tracing::info!("Verbose mode enabled");
    }

    // Load configuration with overrides
    let config = Config::load_with_overrides(cli.git_path.clone(), cli.git_timeout, None)?;

    if cli.verbose {
        tracing::info!(
            git_path = %config.sync.git_path,
            timeout = ?config.sync.timeout,
            "Configuration loaded"
        );
    }

    let code = match cli.command {
        Some(Commands::Version) => {
            println!("ferry {}", env!("CARGO_PKG_VERSION"));
            0
        }
        Some(Commands::Exec(args)) => args.execute(cli.verbose, &config).await?,
        Some(Commands::Repo(args)) => args.execute(cli.verbose, &config).await?,
        Some(Commands::Remote(args)) => args.execute(cli.verbose, &config).await?,
        Some(Commands::Config) => {
            print_config(&config);
            0
        }
        None => {
            println!("Ferry - bounded command execution and repository sync");
            println!();
            println!("Use --help for usage information");
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("Ferry Configuration");
    println!("===================");
    println!();
    println!("Exec Settings:");
    println!("  default_timeout: {}", humantime::format_duration(config.exec.default_timeout));
    println!("  registry_capacity: {}", config.exec.registry_capacity);
    println!();
    println!("Sync Settings:");
    println!("  git_path: {}", config.sync.git_path);
    println!("  timeout: {}", humantime::format_duration(config.sync.timeout));
    println!(
        "  wait: {}",
        config
            .sync
            .wait
            .map(|w| humantime::format_duration(w).to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!("  probe_timeout: {}", humantime::format_duration(config.sync.probe_timeout));
    println!();
    println!("Remote Settings:");
    println!(
        "  connection_keep_time: {}",
        humantime::format_duration(config.remote.connection_keep_time)
    );
    println!("  ping_timeout: {}", humantime::format_duration(config.remote.ping_timeout));
    println!();
    if let Some(path) = Config::default_config_path() {
        println!("Config file: {}", path.display());
        if path.exists() {
            println!("  (exists)");
        } else {
            println!("  (not found - using defaults)");
        }
    }
}
