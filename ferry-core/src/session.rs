//! Remote sessions: one in-flight command and its exit status
//!
//! A [`Cmd`] is created by the caller, handed to a backend's `start`, and
//! later awaited with [`Cmd::wait`]. The exit status is a single-assignment
//! cell with a broadcast wakeup, so any number of waiters, early or late,
//! observe the same code.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::exec::{BoundedExecutor, ExecError, Invocation, Outcome, OutputBuffer};
use crate::{Error, Result};

/// Exit status used when the real code cannot be determined
pub const UNKNOWN_EXIT_STATUS: i32 = 255;

/// One remote command execution
///
/// Clones refer to the same execution. A `Cmd` must not be started twice.
#[derive(Debug, Clone)]
pub struct Cmd {
    command: String,
    stdin: Option<Vec<u8>>,
    stdout: OutputBuffer,
    stderr: OutputBuffer,
    started: Arc<AtomicBool>,
    exit: Arc<watch::Sender<Option<i32>>>,
}

impl Cmd {
    /// Create a command that has not been started yet
    pub fn new(command: impl Into<String>) -> Self {
        let (exit, _) = watch::channel(None);
        Self {
            command: command.into(),
            stdin: None,
            stdout: OutputBuffer::new(),
            stderr: OutputBuffer::new(),
            started: Arc::new(AtomicBool::new(false)),
            exit: Arc::new(exit),
        }
    }

    /// Bytes to feed to the command's stdin
    pub fn with_stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// The command text
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Stdin bytes, if any
    pub fn stdin(&self) -> Option<&[u8]> {
        self.stdin.as_deref()
    }

    /// Buffer receiving the command's stdout
    pub fn stdout(&self) -> &OutputBuffer {
        &self.stdout
    }

    /// Buffer receiving the command's stderr
    pub fn stderr(&self) -> &OutputBuffer {
        &self.stderr
    }

    /// Move to the started state; fails if this command was started before
    pub fn mark_started(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Session(format!(
                "command already started: {}",
                self.command
            )));
        }
        Ok(())
    }

    /// Whether the command has been handed to a backend
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Record the exit status and wake every waiter
    ///
    /// Only the first call has any effect; it returns `true`. Later calls
    /// leave the recorded status alone and return `false`.
    pub fn set_exited(&self, code: i32) -> bool {
        let set = self.exit.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(code);
            true
        });

        if set {
            debug!(command = %self.command, code, "command exited");
        } else {
            warn!(command = %self.command, code, "ignoring second exit for command");
        }
        set
    }

    /// Exit status, once the command has exited
    pub fn exit_status(&self) -> Option<i32> {
        *self.exit.borrow()
    }

    /// Whether the command has exited
    pub fn is_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Wait until the command has exited and return its status
    pub async fn wait(&self) -> i32 {
        let mut rx = self.exit.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let code = match rx.wait_for(Option::is_some).await {
            Ok(code) => code.unwrap_or(UNKNOWN_EXIT_STATUS),
            Err(_) => UNKNOWN_EXIT_STATUS,
        };
        code
    }
}

/// Translate an executor result into a POSIX-style exit status
///
/// 0 on success, the real exit code when the process exited with one, and
/// [`UNKNOWN_EXIT_STATUS`] when no code is available (signal, kill, or an
/// error that is not an exit status).
pub fn exit_code(result: &std::result::Result<Outcome, ExecError>) -> i32 {
    match result {
        Ok(Outcome::Completed(completion)) => match completion.code() {
            Some(0) if completion.success() => 0,
            Some(code) if code != 0 => code,
            _ => UNKNOWN_EXIT_STATUS,
        },
        Ok(Outcome::Killed { .. }) | Ok(Outcome::StillRunning(_)) => UNKNOWN_EXIT_STATUS,
        Err(ExecError::Exit { status, .. }) => status
            .code()
            .filter(|code| *code != 0)
            .unwrap_or(UNKNOWN_EXIT_STATUS),
        Err(_) => UNKNOWN_EXIT_STATUS,
    }
}

/// Run `invocation` for `cmd` in the background and record its exit
///
/// Marks the command started, then returns as soon as the work is spawned.
/// The spawned task runs the invocation under `timeout` and calls
/// [`Cmd::set_exited`] with the translated status. The command's own stdin
/// and output buffers are wired into the invocation.
pub fn drive(
    executor: &BoundedExecutor,
    invocation: Invocation,
    cmd: &Cmd,
    timeout: Duration,
) -> Result<()> {
    cmd.mark_started()?;

    let mut invocation = invocation
        .stdout(cmd.stdout.clone())
        .stderr(cmd.stderr.clone());
    if let Some(ref input) = cmd.stdin {
        invocation = invocation.stdin(input.clone());
    }

    let executor = executor.clone();
    let cmd = cmd.clone();
    tokio::spawn(async move {
        let result = executor.run(invocation, timeout, None).await;
        match &result {
            Err(e) => {
                warn!(command = %cmd.command, error = %e, "process done with error");
                cmd.stderr.append(format!("{}\n", e).as_bytes());
            }
            Ok(Outcome::Killed { after, .. }) => {
                cmd.stderr
                    .append(format!("process killed as timeout of {:?} reached\n", after).as_bytes());
            }
            Ok(_) => {}
        }
        cmd.set_exited(exit_code(&result));
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_exited_once() {
        let cmd = Cmd::new("true");
        assert!(!cmd.is_exited());
        assert!(cmd.set_exited(7));
        assert!(!cmd.set_exited(9));
        assert_eq!(cmd.exit_status(), Some(7));
        assert_eq!(cmd.wait().await, 7);
    }

    #[tokio::test]
    async fn test_many_waiters_see_same_code() {
        let cmd = Cmd::new("true");
        let mut waiters = Vec::new();
        for _ in 0..8 {
            let cmd = cmd.clone();
            waiters.push(tokio::spawn(async move { cmd.wait().await }));
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        cmd.set_exited(42);

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), 42);
        }
        // Late waiter returns immediately.
        assert_eq!(cmd.wait().await, 42);
    }

    #[test]
    fn test_mark_started_twice_fails() {
        let cmd = Cmd::new("echo hi");
        assert!(!cmd.is_started());
        cmd.mark_started().unwrap();
        assert!(cmd.is_started());
        assert!(matches!(cmd.mark_started(), Err(Error::Session(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drive_reports_exit_codes() {
        let executor = BoundedExecutor::new();

        let ok = Cmd::new("echo foo");
        drive(
            &executor,
            Invocation::new("sh").args(["-c", ok.command()]),
            &ok,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(ok.wait().await, 0);
        assert_eq!(ok.stdout().to_string_lossy().trim(), "foo");

        let failing = Cmd::new("exit 4");
        drive(
            &executor,
            Invocation::new("sh").args(["-c", failing.command()]),
            &failing,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(failing.wait().await, 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drive_late_wait_matches_early_wait() {
        let executor = BoundedExecutor::new();
        let cmd = Cmd::new("exit 2");
        drive(
            &executor,
            Invocation::new("sh").args(["-c", cmd.command()]),
            &cmd,
            Duration::from_secs(5),
        )
        .unwrap();

        let early = cmd.clone();
        let early = tokio::spawn(async move { early.wait().await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(cmd.wait().await, 2);
        assert_eq!(early.await.unwrap(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_killed_session_exits_255() {
        let executor = BoundedExecutor::new();
        let cmd = Cmd::new("sleep 10");
        drive(
            &executor,
            Invocation::new("sleep").arg("10"),
            &cmd,
            Duration::from_millis(300),
        )
        .unwrap();
        assert_eq!(cmd.wait().await, UNKNOWN_EXIT_STATUS);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drive_rejects_reuse() {
        let executor = BoundedExecutor::new();
        let cmd = Cmd::new("true");
        drive(&executor, Invocation::new("true"), &cmd, Duration::from_secs(5)).unwrap();
        let again = drive(&executor, Invocation::new("true"), &cmd, Duration::from_secs(5));
        assert!(again.is_err());
        assert_eq!(cmd.wait().await, 0);
    }

    #[test]
    fn test_exit_code_for_spawn_error() {
        let result: std::result::Result<Outcome, ExecError> = Err(ExecError::Spawn {
            program: "missing".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(exit_code(&result), UNKNOWN_EXIT_STATUS);
    }
}
