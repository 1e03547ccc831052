//! Spawned process plumbing: the waiter task and its one-shot channels

use std::io;
use std::process::ExitStatus;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::executor::ExecError;
use super::invocation::{Invocation, OutputBuffer};

/// How the waiter task saw the process end
#[derive(Debug, Clone, Copy)]
pub(crate) enum ProcessExit {
    /// The process exited on its own
    Exited(ExitStatus),
    /// The process was force killed on request
    Killed,
}

type Completion = io::Result<ProcessExit>;

/// A process started by the executor
///
/// The child itself lives in a waiter task. This handle only holds the two
/// channels used to talk to it: one to request a kill, one that fires once
/// the process is gone.
pub(crate) struct RunningProcess {
    pub program: String,
    pub pid: Option<u32>,
    pub stdout: OutputBuffer,
    pub stderr: OutputBuffer,
    kill_tx: Option<oneshot::Sender<()>>,
    pub done: oneshot::Receiver<Completion>,
}

impl RunningProcess {
    /// Spawn the invocation and its waiter task
    pub fn spawn(invocation: Invocation) -> Result<Self, ExecError> {
        let program = invocation.describe();
        let (mut cmd, stdin, stdout, stderr) = invocation.into_parts();

        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(%program, ?pid, "process started");

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    debug!(error = %e, "failed to write process stdin");
                }
            });
        }

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain(out, stdout.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain(err, stderr.clone())));

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<Completion>();

        tokio::spawn(async move {
            let result = tokio::select! {
                status = child.wait() => status.map(ProcessExit::Exited),
                // A dropped handle counts as a kill request.
                _ = kill_rx => child.kill().await.map(|()| ProcessExit::Killed),
            };

            // Pipes close on exit, so the drains finish; after a kill a
            // grandchild may still hold them open.
            for task in [stdout_task, stderr_task].into_iter().flatten() {
                if matches!(result, Ok(ProcessExit::Exited(_))) {
                    let _ = task.await;
                } else {
                    task.abort();
                }
            }

            let _ = done_tx.send(result);
        });

        Ok(Self {
            program,
            pid,
            stdout,
            stderr,
            kill_tx: Some(kill_tx),
            done: done_rx,
        })
    }

    /// Force kill the process and wait until it has been reaped
    ///
    /// If the process already exited on its own, that exit is returned
    /// instead. A failed kill is a fatal fault for this invocation.
    pub async fn kill(mut self) -> Result<ProcessExit, ExecError> {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }

        match self.done.await {
            Ok(Ok(exit)) => Ok(exit),
            Ok(Err(source)) => {
                error!(program = %self.program, pid = ?self.pid, error = %source, "failed to kill process");
                Err(ExecError::Kill {
                    program: self.program,
                    pid: self.pid,
                    source,
                })
            }
            Err(_) => Err(waiter_gone(self.program)),
        }
    }
}

/// Error for a waiter task that went away without reporting
pub(crate) fn waiter_gone(program: String) -> ExecError {
    ExecError::Wait {
        program,
        source: io::Error::other("process waiter task dropped"),
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, sink: OutputBuffer) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => sink.append(&chunk[..n]),
            Err(e) => {
                debug!(error = %e, "stopped reading process output");
                break;
            }
        }
    }
}
