//! Exec command - run a local command under a hard timeout and wait budget

use std::io::Write;
use std::time::Duration;

use clap::Args;
use ferry_core::exec::{DetachedResult, OutputBuffer};
use ferry_core::session::UNKNOWN_EXIT_STATUS;
use ferry_core::{Config, Invocation, Outcome, WAIT_SENTINEL};

/// Exit code for a command killed at its hard timeout, as coreutils `timeout`
pub const TIMED_OUT_EXIT_CODE: i32 = 124;

/// Run a command with a hard timeout and an optional wait budget
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Hard timeout after which the command is killed (e.g. "30s", "5m")
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Print the wait sentinel once this budget elapses
    #[arg(long, value_parser = humantime::parse_duration)]
    wait: Option<Duration>,

    /// Working directory for the command
    #[arg(short = 'C', long)]
    dir: Option<std::path::PathBuf>,

    /// Program and arguments
    #[arg(required = true, last = true)]
    command: Vec<String>,
}

impl ExecArgs {
    /// Execute the exec command, returning the process exit code
    pub async fn execute(&self, verbose: bool, config: &Config) -> anyhow::Result<i32> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow::anyhow!("no command given"))?;

        let stdout = OutputBuffer::new();
        let stderr = OutputBuffer::new();
        let mut invocation = Invocation::new(program)
            .args(args)
            .stdout(stdout.clone())
            .stderr(stderr.clone());
        if let Some(ref dir) = self.dir {
            invocation = invocation.current_dir(dir);
        }

        let executor = config.executor();
        let hard_timeout = self.timeout.unwrap_or(config.exec.default_timeout);
        if verbose {
            tracing::info!(command = %invocation.describe(), ?hard_timeout, wait = ?self.wait, "running");
        }

        match executor.run(invocation, hard_timeout, self.wait).await? {
            Outcome::Completed(completion) => {
                print!("{}", completion.stdout);
                eprint!("{}", completion.stderr);
                Ok(completion.code().unwrap_or(UNKNOWN_EXIT_STATUS))
            }
            Outcome::Killed { program, after } => {
                eprintln!("'{}' killed as timeout of {:?} reached", program, after);
                Ok(TIMED_OUT_EXIT_CODE)
            }
            Outcome::StillRunning(run) => {
                println!("{}", WAIT_SENTINEL);
                std::io::stdout().flush()?;

                // Exiting would kill the process; keep supervising it instead.
                let result = run.finished().await;
                print!("{}", stdout.to_string_lossy());
                eprint!("{}", stderr.to_string_lossy());
                if let DetachedResult::Failed(ref reason) = result {
                    eprintln!("{}", reason);
                }
                Ok(detached_exit_code(&result))
            }
        }
    }
}

/// Exit code for a command that outlived its wait budget
///
/// A process ended by a signal has no code of its own and maps to
/// [`UNKNOWN_EXIT_STATUS`].
pub fn detached_exit_code(result: &DetachedResult) -> i32 {
    match result {
        DetachedResult::Exited(status) => status.code().unwrap_or(UNKNOWN_EXIT_STATUS),
        DetachedResult::Killed | DetachedResult::Cancelled => TIMED_OUT_EXIT_CODE,
        DetachedResult::Failed(_) => UNKNOWN_EXIT_STATUS,
    }
}
