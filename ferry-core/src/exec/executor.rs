//! Bounded execution of one external command
//!
//! [`BoundedExecutor::run`] races three events against each other: the hard
//! timeout, the optional wait budget, and process completion. Exactly one of
//! them reaches the caller, as an [`Outcome`].

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::detached::{DetachedRegistry, DetachedRun, DEFAULT_REGISTRY_CAPACITY};
use super::invocation::Invocation;
use super::process::{waiter_gone, ProcessExit, RunningProcess};

/// Hard timeout used when the caller passes a zero duration
pub const DEFAULT_HARD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Literal that shell-level tooling and logs use for "wait budget exceeded"
pub const WAIT_SENTINEL: &str = "waitTimeout";

/// Errors from running a bounded command
#[derive(Error, Debug)]
pub enum ExecError {
    /// The process could not be started
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process could not be killed; fatal for the invocation
    #[error("failed to kill '{program}' (pid {pid:?}): {source}")]
    Kill {
        program: String,
        pid: Option<u32>,
        #[source]
        source: io::Error,
    },

    /// Waiting for the process failed
    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    /// The process finished unsuccessfully
    #[error("'{program}' failed ({status}): {stderr}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    /// The process was killed at its hard timeout
    #[error("'{program}' killed as timeout of {after:?} reached")]
    TimedOut { program: String, after: Duration },
}

/// A process that ran to completion
#[derive(Debug, Clone)]
pub struct Completion {
    /// Command line that was run
    pub program: String,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Exit status reported by the OS
    pub status: ExitStatus,
}

impl Completion {
    /// Whether the process exited successfully
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// The process exit code, when it exited with one
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Turn a non-zero exit into an [`ExecError::Exit`]
    pub fn check(self) -> Result<Self, ExecError> {
        if self.status.success() {
            Ok(self)
        } else {
            Err(ExecError::Exit {
                program: self.program,
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// What the caller of [`BoundedExecutor::run`] observes
#[derive(Debug)]
pub enum Outcome {
    /// The process finished before any timer fired
    Completed(Completion),
    /// The hard timeout fired first and the process was force killed
    Killed { program: String, after: Duration },
    /// The wait budget fired first; the process keeps running in the
    /// background until it finishes or its hard timeout elapses
    StillRunning(DetachedRun),
}

impl Outcome {
    /// Whether the caller was released before the process finished
    pub fn is_still_running(&self) -> bool {
        matches!(self, Outcome::StillRunning(_))
    }

    /// The wait sentinel literal for [`Outcome::StillRunning`]
    pub fn sentinel(&self) -> Option<&'static str> {
        self.is_still_running().then_some(WAIT_SENTINEL)
    }

    /// The completion, if the process finished in the foreground
    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Outcome::Completed(c) => Some(c),
            _ => None,
        }
    }
}

/// Runs external commands under a hard timeout and an optional wait budget
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    default_timeout: Duration,
    registry: DetachedRegistry,
}

impl BoundedExecutor {
    /// Create an executor with the default hard timeout and registry size
    pub fn new() -> Self {
        Self {
            default_timeout: DEFAULT_HARD_TIMEOUT,
            registry: DetachedRegistry::new(DEFAULT_REGISTRY_CAPACITY),
        }
    }

    /// Use `timeout` when a caller passes a zero hard timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.default_timeout = timeout;
        }
        self
    }

    /// Remember at most `capacity` detached runs
    pub fn with_registry_capacity(mut self, capacity: usize) -> Self {
        self.registry = DetachedRegistry::new(capacity);
        self
    }

    /// Hard timeout substituted for zero
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Detached runs started by this executor (and its clones)
    pub fn registry(&self) -> &DetachedRegistry {
        &self.registry
    }

    /// Run `invocation` under `hard_timeout`, releasing the caller after
    /// `wait_budget` if the process is still going by then
    ///
    /// A wait budget that is zero, or not shorter than the hard timeout, is
    /// ignored and the call degenerates to plain bounded execution.
    pub async fn run(
        &self,
        invocation: Invocation,
        hard_timeout: Duration,
        wait_budget: Option<Duration>,
    ) -> Result<Outcome, ExecError> {
        let hard_timeout = if hard_timeout.is_zero() {
            self.default_timeout
        } else {
            hard_timeout
        };
        let wait_budget = effective_wait_budget(hard_timeout, wait_budget);

        let mut process = RunningProcess::spawn(invocation)?;
        let program = process.program.clone();

        let hard = tokio::time::sleep(hard_timeout);
        let wait = async {
            match wait_budget {
                Some(budget) => tokio::time::sleep(budget).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(hard, wait);

        tokio::select! {
            biased;
            exit = &mut process.done => match exit {
                Ok(Ok(ProcessExit::Exited(status))) => Ok(Outcome::Completed(completed(&process, status))),
                Ok(Ok(ProcessExit::Killed)) => Ok(Outcome::Killed { program, after: hard_timeout }),
                Ok(Err(source)) => {
                    warn!(%program, error = %source, "process wait failed");
                    Err(ExecError::Wait { program, source })
                }
                Err(_) => Err(waiter_gone(program)),
            },
            _ = &mut hard => {
                let stdout = process.stdout.clone();
                let stderr = process.stderr.clone();
                match process.kill().await? {
                    ProcessExit::Killed => {
                        warn!(%program, timeout = ?hard_timeout, "process killed as timeout reached");
                        Ok(Outcome::Killed { program, after: hard_timeout })
                    }
                    // Finished between the timer firing and the kill landing.
                    ProcessExit::Exited(status) => Ok(Outcome::Completed(Completion {
                        program,
                        stdout: stdout.to_string_lossy(),
                        stderr: stderr.to_string_lossy(),
                        status,
                    })),
                }
            }
            _ = &mut wait => {
                // Only reachable with a budget, which is shorter than the timeout.
                let remaining = hard_timeout.saturating_sub(wait_budget.unwrap_or_default());
                warn!(%program, ?remaining, "wait timeout, process continues until hard timeout");
                Ok(Outcome::StillRunning(self.registry.detach(process, remaining)))
            }
        }
    }
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn effective_wait_budget(hard_timeout: Duration, wait_budget: Option<Duration>) -> Option<Duration> {
    match wait_budget {
        Some(budget) if budget.is_zero() => None,
        Some(budget) if budget >= hard_timeout => {
            debug!(?budget, ?hard_timeout, "wait budget not below hard timeout, ignoring it");
            None
        }
        other => other,
    }
}

fn completed(process: &RunningProcess, status: ExitStatus) -> Completion {
    if status.success() {
        debug!(program = %process.program, "process done gracefully without error");
    } else {
        warn!(program = %process.program, %status, "process done with error");
    }

    Completion {
        program: process.program.clone(),
        stdout: process.stdout.to_string_lossy(),
        stderr: process.stderr.to_string_lossy(),
        status,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::DetachedResult;
    use std::time::Instant;

    fn is_alive(pid: u32) -> bool {
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_effective_wait_budget() {
        let hard = Duration::from_secs(5);
        assert_eq!(effective_wait_budget(hard, None), None);
        assert_eq!(effective_wait_budget(hard, Some(Duration::ZERO)), None);
        assert_eq!(effective_wait_budget(hard, Some(hard)), None);
        assert_eq!(effective_wait_budget(hard, Some(Duration::from_secs(6))), None);
        assert_eq!(
            effective_wait_budget(hard, Some(Duration::from_secs(1))),
            Some(Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn test_fast_command_completes_without_sentinel() {
        let executor = BoundedExecutor::new();
        let outcome = executor
            .run(
                Invocation::new("sh").args(["-c", "echo hello"]),
                Duration::from_secs(5),
                Some(Duration::from_secs(2)),
            )
            .await
            .unwrap();

        assert!(outcome.sentinel().is_none());
        let completion = outcome.completion().unwrap();
        assert!(completion.success());
        assert_eq!(completion.stdout.trim(), "hello");
        assert!(executor.registry().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_reported() {
        let executor = BoundedExecutor::new();
        let outcome = executor
            .run(
                Invocation::new("sh").args(["-c", "echo oops >&2; exit 3"]),
                Duration::from_secs(5),
                None,
            )
            .await
            .unwrap();

        let completion = match outcome {
            Outcome::Completed(c) => c,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(completion.code(), Some(3));
        let err = completion.check().unwrap_err();
        assert!(matches!(err, ExecError::Exit { ref stderr, .. } if stderr == "oops"));
    }

    #[tokio::test]
    async fn test_hard_timeout_kills() {
        let executor = BoundedExecutor::new();
        let stdout = crate::exec::OutputBuffer::new();
        let start = Instant::now();
        let outcome = executor
            .run(
                Invocation::new("sh")
                    .args(["-c", "echo $$; exec sleep 10"])
                    .stdout(stdout.clone()),
                Duration::from_secs(1),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, Outcome::Killed { .. }));
        assert!(start.elapsed() < Duration::from_secs(3));

        // `exec` keeps the pid, so this is the sleep itself.
        let pid: u32 = stdout.to_string_lossy().trim().parse().unwrap();
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_wait_budget_detaches_then_kills() {
        let executor = BoundedExecutor::new();
        let start = Instant::now();
        let outcome = executor
            .run(
                Invocation::new("sleep").arg("10"),
                Duration::from_secs(3),
                Some(Duration::from_secs(1)),
            )
            .await
            .unwrap();

        assert_eq!(outcome.sentinel(), Some(WAIT_SENTINEL));
        assert!(start.elapsed() < Duration::from_secs(2));

        let run = match outcome {
            Outcome::StillRunning(run) => run,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let pid = run.pid().unwrap();
        assert!(is_alive(pid));
        assert_eq!(executor.registry().outstanding(), 1);

        let result = tokio::time::timeout(Duration::from_secs(5), run.finished())
            .await
            .unwrap();
        assert_eq!(result, DetachedResult::Killed);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!is_alive(pid));
        assert_eq!(executor.registry().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_detached_run_can_finish_on_its_own() {
        let executor = BoundedExecutor::new();
        let outcome = executor
            .run(
                Invocation::new("sleep").arg("1"),
                Duration::from_secs(5),
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        let run = match outcome {
            Outcome::StillRunning(run) => run,
            other => panic!("unexpected outcome: {:?}", other),
        };
        match run.finished().await {
            DetachedResult::Exited(status) => assert!(status.success()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detached_run_cancel() {
        let executor = BoundedExecutor::new();
        let outcome = executor
            .run(
                Invocation::new("sleep").arg("10"),
                Duration::from_secs(30),
                Some(Duration::from_millis(100)),
            )
            .await
            .unwrap();

        let Outcome::StillRunning(run) = outcome else {
            panic!("expected detached run");
        };
        run.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), run.finished())
            .await
            .unwrap();
        assert_eq!(result, DetachedResult::Cancelled);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let executor = BoundedExecutor::new();
        let result = executor
            .run(
                Invocation::new("/nonexistent/ferry-binary-12345"),
                Duration::from_secs(1),
                None,
            )
            .await;
        assert!(matches!(result, Err(ExecError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_stdin_and_caller_buffers() {
        let executor = BoundedExecutor::new();
        let stdout = crate::exec::OutputBuffer::new();
        let outcome = executor
            .run(
                Invocation::new("cat").stdin("piped input").stdout(stdout.clone()),
                Duration::from_secs(5),
                None,
            )
            .await
            .unwrap();

        assert!(outcome.completion().unwrap().success());
        assert_eq!(stdout.to_string_lossy(), "piped input");
    }

    #[tokio::test]
    async fn test_registry_is_bounded() {
        let executor = BoundedExecutor::new().with_registry_capacity(1);
        for _ in 0..2 {
            let outcome = executor
                .run(
                    Invocation::new("sleep").arg("5"),
                    Duration::from_secs(2),
                    Some(Duration::from_millis(50)),
                )
                .await
                .unwrap();
            assert!(outcome.is_still_running());
        }

        let runs = executor.registry().snapshot();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id(), 2);
        for run in runs {
            run.cancel();
            run.finished().await;
        }
    }
}
