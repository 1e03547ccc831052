//! Background supervision of processes that outlived their wait budget

use std::collections::VecDeque;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use super::process::{ProcessExit, RunningProcess};

/// Default number of detached runs remembered by a registry
pub const DEFAULT_REGISTRY_CAPACITY: usize = 64;

/// Final state of a detached run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetachedResult {
    /// The process finished on its own before the hard timeout
    Exited(ExitStatus),
    /// The hard timeout elapsed and the process was force killed
    Killed,
    /// The run was cancelled through its handle and force killed
    Cancelled,
    /// Waiting for or killing the process failed
    Failed(String),
}

/// Handle to a process still running after its caller was released
///
/// Clones share the same state. Nobody is required to look at it: the
/// supervisor enforces the remaining budget regardless.
#[derive(Debug, Clone)]
pub struct DetachedRun {
    id: u64,
    program: String,
    pid: Option<u32>,
    remaining: Duration,
    detached_at: Instant,
    cancel: Arc<Notify>,
    result: watch::Receiver<Option<DetachedResult>>,
}

impl DetachedRun {
    /// Registry-assigned identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Command line of the process
    pub fn program(&self) -> &str {
        &self.program
    }

    /// OS process id, if the platform reported one
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Budget left for the process when it was detached
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// When the caller was released
    pub fn detached_at(&self) -> Instant {
        self.detached_at
    }

    /// Whether the background phase has resolved
    pub fn is_finished(&self) -> bool {
        self.result.borrow().is_some()
    }

    /// Final result, if the background phase has resolved
    pub fn result(&self) -> Option<DetachedResult> {
        self.result.borrow().clone()
    }

    /// Wait for the background phase to resolve
    pub async fn finished(&self) -> DetachedResult {
        let mut rx = self.result.clone();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(result) => result.clone().unwrap_or_else(|| {
                DetachedResult::Failed("supervisor reported no result".to_string())
            }),
            Err(_) => DetachedResult::Failed("supervisor dropped".to_string()),
        };
        result
    }

    /// Kill the process now instead of at the end of its budget
    pub fn cancel(&self) {
        self.cancel.notify_one();
    }
}

/// Spawn the supervisor for a process whose wait budget elapsed
///
/// The supervisor races the remaining budget against process completion and
/// the run's cancellation token. Its outcome is logged and published to the
/// returned handle, never to the original caller.
pub(crate) fn supervise(id: u64, mut process: RunningProcess, remaining: Duration) -> DetachedRun {
    let (result_tx, result_rx) = watch::channel(None);
    let cancel = Arc::new(Notify::new());
    let run = DetachedRun {
        id,
        program: process.program.clone(),
        pid: process.pid,
        remaining,
        detached_at: Instant::now(),
        cancel: Arc::clone(&cancel),
        result: result_rx,
    };

    tokio::spawn(async move {
        let program = process.program.clone();
        let result = tokio::select! {
            biased;
            exit = &mut process.done => match exit {
                Ok(Ok(ProcessExit::Exited(status))) => {
                    if status.success() {
                        debug!(id, %program, "detached process done gracefully");
                    } else {
                        warn!(id, %program, %status, "detached process done with error");
                    }
                    DetachedResult::Exited(status)
                }
                Ok(Ok(ProcessExit::Killed)) => DetachedResult::Killed,
                Ok(Err(e)) => DetachedResult::Failed(e.to_string()),
                Err(_) => DetachedResult::Failed("process waiter task dropped".to_string()),
            },
            _ = tokio::time::sleep(remaining) => {
                finish_with_kill(process, DetachedResult::Killed).await
            }
            _ = cancel.notified() => {
                info!(id, %program, "detached process cancelled");
                finish_with_kill(process, DetachedResult::Cancelled).await
            }
        };

        result_tx.send_replace(Some(result));
    });

    run
}

async fn finish_with_kill(process: RunningProcess, on_kill: DetachedResult) -> DetachedResult {
    let program = process.program.clone();
    match process.kill().await {
        Ok(ProcessExit::Killed) => {
            warn!(%program, "process killed as timeout reached");
            on_kill
        }
        Ok(ProcessExit::Exited(status)) => DetachedResult::Exited(status),
        // Already logged as fatal by the kill itself.
        Err(e) => DetachedResult::Failed(e.to_string()),
    }
}

#[derive(Debug)]
struct RegistryInner {
    capacity: usize,
    next_id: u64,
    runs: VecDeque<DetachedRun>,
}

/// Bounded record of detached runs, oldest evicted first
#[derive(Debug, Clone)]
pub struct DetachedRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl DetachedRegistry {
    /// Create a registry remembering at most `capacity` runs
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                capacity: capacity.max(1),
                next_id: 1,
                runs: VecDeque::new(),
            })),
        }
    }

    pub(crate) fn detach(&self, process: RunningProcess, remaining: Duration) -> DetachedRun {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;

        let run = supervise(id, process, remaining);
        if inner.runs.len() == inner.capacity {
            inner.runs.pop_front();
        }
        inner.runs.push_back(run.clone());
        run
    }

    /// Every remembered run, oldest first
    pub fn snapshot(&self) -> Vec<DetachedRun> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.runs.iter().cloned().collect()
    }

    /// Number of remembered runs that have not resolved yet
    pub fn outstanding(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.runs.iter().filter(|r| !r.is_finished()).count()
    }

    /// Look up a remembered run by id
    pub fn get(&self, id: u64) -> Option<DetachedRun> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.runs.iter().find(|r| r.id == id).cloned()
    }

    /// Maximum number of remembered runs
    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).capacity
    }
}

impl Default for DetachedRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}
