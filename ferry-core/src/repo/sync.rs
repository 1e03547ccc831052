//! Clone/fetch state machine for one local working copy

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::error::{RepoError, RepoErrorCode};
use super::remote::redact_url;
use crate::exec::{
    BoundedExecutor, DetachedRun, ExecError, Invocation, Outcome, DEFAULT_HARD_TIMEOUT,
    WAIT_SENTINEL,
};

/// Timeout for read-only probes (`git branch`, `git log`, `git rev-parse`)
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// What currently sits at a working-copy path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoState {
    /// Nothing at the path
    Absent,
    /// Something is there, but git does not recognize it as a repository
    PresentNotRepo,
    /// A git working copy
    PresentRepo,
}

/// Result of a clone or fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    /// A fresh clone completed
    Cloned,
    /// `git fetch origin` completed
    Fetched,
    /// The wait budget elapsed; git keeps running under its hard timeout
    StillRunning,
}

impl SyncStatus {
    /// Whether the operation finished in the foreground
    pub fn is_complete(&self) -> bool {
        !matches!(self, SyncStatus::StillRunning)
    }

    /// Treat [`SyncStatus::StillRunning`] as a `wait-timeout` error
    pub fn require_complete(self) -> Result<Self, RepoError> {
        match self {
            SyncStatus::StillRunning => Err(RepoError::new(
                RepoErrorCode::WaitTimeout,
                format!("{}: git is still running in the background", WAIT_SENTINEL),
            )),
            done => Ok(done),
        }
    }
}

enum GitRun {
    Done(String),
    StillRunning(DetachedRun),
}

/// Keeps local working copies in sync with their remotes
///
/// Every operation that mutates a working copy (clone, fetch, reset,
/// checkout, removal of a corrupt copy) holds a lock shared by all clones of
/// the `RepoSync`, so at most one of them runs at a time.
#[derive(Debug, Clone)]
pub struct RepoSync {
    executor: BoundedExecutor,
    git_path: String,
    timeout: Duration,
    wait: Option<Duration>,
    probe_timeout: Duration,
    pub(super) lock: Arc<Mutex<()>>,
}

impl RepoSync {
    /// Create a syncer that runs `git` from `PATH`
    pub fn new(executor: BoundedExecutor) -> Self {
        Self {
            executor,
            git_path: "git".to_string(),
            timeout: DEFAULT_HARD_TIMEOUT,
            wait: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Use a custom git executable
    pub fn with_git_path(mut self, path: impl Into<String>) -> Self {
        self.git_path = path.into();
        self
    }

    /// Hard timeout for mutating commands when callers pass zero
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Wait budget used by [`RepoSync::sync`]
    pub fn with_wait_budget(mut self, wait: Option<Duration>) -> Self {
        self.wait = wait;
        self
    }

    /// Timeout for read-only probes
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.probe_timeout = timeout;
        }
        self
    }

    /// The git executable
    pub fn git_path(&self) -> &str {
        &self.git_path
    }

    /// Default hard timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Default wait budget
    pub fn wait_budget(&self) -> Option<Duration> {
        self.wait
    }

    /// The executor git commands run under
    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    /// Wait until no mutating git command is running, including ones that
    /// outlived their wait budget
    pub async fn wait_idle(&self) {
        let _guard = self.lock.lock().await;
    }

    /// Classify what is at `path`
    ///
    /// Only a git answer of "not a repository" yields
    /// [`RepoState::PresentNotRepo`]; a missing git binary or a probe timeout
    /// is an error, so a healthy working copy is never mistaken for garbage.
    pub async fn state(&self, path: &Path) -> Result<RepoState, RepoError> {
        match tokio::fs::metadata(path).await {
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RepoState::Absent),
            Err(e) => {
                return Err(RepoError::with_source(
                    RepoErrorCode::Unknown,
                    format!("error occurred during stat dir {}", path.display()),
                    e,
                ))
            }
            Ok(meta) if !meta.is_dir() => return Ok(RepoState::PresentNotRepo),
            Ok(_) => {}
        }

        match self.probe(path, &["branch"]).await {
            Ok(_) => Ok(RepoState::PresentRepo),
            Err(ExecError::Exit { stderr, .. }) => {
                debug!(path = %path.display(), %stderr, "path is not a git repository");
                Ok(RepoState::PresentNotRepo)
            }
            Err(e) => Err(RepoError::with_source(
                RepoErrorCode::Unknown,
                format!("cannot probe {}", path.display()),
                e,
            )),
        }
    }

    /// Clone `url` into `path`
    ///
    /// Parent directories are created first. When `wait` elapses before git
    /// finishes, returns [`SyncStatus::StillRunning`] and the clone carries
    /// on in the background, still holding the lock.
    pub async fn init_repo(
        &self,
        url: &str,
        path: &Path,
        timeout: Duration,
        wait: Option<Duration>,
    ) -> Result<SyncStatus, RepoError> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        self.clone_locked(guard, url, path, timeout, wait).await
    }

    /// Bring `path` up to date with `url`
    ///
    /// Clones when nothing is there, replaces a directory that is not a
    /// repository, and fetches `origin` otherwise. The path is classified
    /// under the lock, so a clone still running from an earlier call is seen
    /// as a repository once it finishes.
    pub async fn update_repo(
        &self,
        path: &Path,
        url: &str,
        timeout: Duration,
        wait: Option<Duration>,
    ) -> Result<SyncStatus, RepoError> {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        match self.state(path).await? {
            RepoState::Absent => self.clone_locked(guard, url, path, timeout, wait).await,
            RepoState::PresentNotRepo => {
                warn!(path = %path.display(), "path is not a git repository, removing it");
                remove_path(path).await.map_err(|e| {
                    RepoError::with_source(
                        RepoErrorCode::RemoveDirFailure,
                        format!("cannot remove {}", path.display()),
                        e,
                    )
                })?;
                self.clone_locked(guard, url, path, timeout, wait).await
            }
            RepoState::PresentRepo => self.fetch_locked(guard, path, timeout, wait).await,
        }
    }

    /// [`RepoSync::update_repo`] with the configured timeout and wait budget
    pub async fn sync(&self, path: &Path, url: &str) -> Result<SyncStatus, RepoError> {
        self.update_repo(path, url, self.timeout, self.wait).await
    }

    async fn clone_locked(
        &self,
        guard: OwnedMutexGuard<()>,
        url: &str,
        path: &Path,
        timeout: Duration,
        wait: Option<Duration>,
    ) -> Result<SyncStatus, RepoError> {
        let remote = redact_url(url);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RepoError::with_source(
                    RepoErrorCode::PermissionError,
                    format!("cannot create parent directory {}", parent.display()),
                    e,
                )
            })?;
        }

        info!(%remote, path = %path.display(), "cloning repository");
        let invocation = Invocation::new(&self.git_path)
            .arg("clone")
            .arg(url)
            .arg(path)
            .env("GIT_TERMINAL_PROMPT", "0");

        match self.run_git(invocation, timeout, wait).await {
            Ok(GitRun::Done(_)) => {
                info!(%remote, path = %path.display(), "clone finished");
                Ok(SyncStatus::Cloned)
            }
            Ok(GitRun::StillRunning(run)) => {
                warn!(%remote, path = %path.display(), "wait timeout, clone continues in background");
                hold_until_finished(guard, run);
                Ok(SyncStatus::StillRunning)
            }
            Err(e) => Err(RepoError::with_source(
                RepoErrorCode::CloneFailure,
                format!("failed to clone {} into {}", remote, path.display()),
                e,
            )),
        }
    }

    async fn fetch_locked(
        &self,
        guard: OwnedMutexGuard<()>,
        path: &Path,
        timeout: Duration,
        wait: Option<Duration>,
    ) -> Result<SyncStatus, RepoError> {
        info!(path = %path.display(), "fetching origin");
        let invocation = self
            .git(path)
            .args(["fetch", "origin"])
            .env("GIT_TERMINAL_PROMPT", "0");

        match self.run_git(invocation, timeout, wait).await {
            Ok(GitRun::Done(_)) => Ok(SyncStatus::Fetched),
            Ok(GitRun::StillRunning(run)) => {
                warn!(path = %path.display(), "wait timeout, fetch continues in background");
                hold_until_finished(guard, run);
                Ok(SyncStatus::StillRunning)
            }
            Err(e) => Err(RepoError::with_source(
                RepoErrorCode::FetchFailure,
                format!("error occurred when fetch origin in {}", path.display()),
                e,
            )),
        }
    }

    /// git with `dir` as its working directory
    pub(super) fn git(&self, dir: &Path) -> Invocation {
        Invocation::new(&self.git_path).current_dir(dir)
    }

    /// Read-only git command confined to the repository at `path`
    pub(super) async fn probe(&self, path: &Path, args: &[&str]) -> Result<String, ExecError> {
        let mut invocation = self.git(path).args(args);
        // Stop discovery at the parent so an enclosing repository never answers.
        if let Some(parent) = std::path::absolute(path)
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
        {
            invocation = invocation.env("GIT_CEILING_DIRECTORIES", parent);
        }
        self.run_to_end(invocation, self.probe_timeout).await
    }

    /// Mutating git command in `path`, under the default hard timeout
    pub(super) async fn mutate(&self, path: &Path, args: &[&str]) -> Result<String, ExecError> {
        self.run_to_end(self.git(path).args(args), self.timeout).await
    }

    async fn run_to_end(&self, invocation: Invocation, timeout: Duration) -> Result<String, ExecError> {
        match self.run_git(invocation, timeout, None).await? {
            GitRun::Done(stdout) => Ok(stdout),
            // No wait budget was given, so the executor never detaches.
            GitRun::StillRunning(run) => {
                run.cancel();
                Err(ExecError::TimedOut {
                    program: run.program().to_string(),
                    after: timeout,
                })
            }
        }
    }

    async fn run_git(
        &self,
        invocation: Invocation,
        timeout: Duration,
        wait: Option<Duration>,
    ) -> Result<GitRun, ExecError> {
        let timeout = if timeout.is_zero() { self.timeout } else { timeout };
        match self.executor.run(invocation, timeout, wait).await? {
            Outcome::Completed(completion) => Ok(GitRun::Done(completion.check()?.stdout)),
            Outcome::Killed { program, after } => Err(ExecError::TimedOut { program, after }),
            Outcome::StillRunning(run) => Ok(GitRun::StillRunning(run)),
        }
    }
}

/// Keep the repo lock until a detached git command resolves
fn hold_until_finished(guard: OwnedMutexGuard<()>, run: DetachedRun) {
    tokio::spawn(async move {
        let result = run.finished().await;
        debug!(program = %run.program(), ?result, "background git command resolved, releasing repo lock");
        drop(guard);
    });
}

async fn remove_path(path: &Path) -> io::Result<()> {
    let meta = tokio::fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    }
}
