//! Branch inspection and switching

use std::fmt;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use super::error::{RepoError, RepoErrorCode};
use super::sync::RepoSync;

/// Where HEAD points in a working copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Head {
    /// HEAD is a named local branch
    Branch(String),
    /// HEAD points directly at a commit
    Detached,
}

impl Head {
    fn from_abbrev_ref(output: &str) -> Self {
        match output.trim() {
            "HEAD" => Head::Detached,
            name => Head::Branch(name.to_string()),
        }
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Head::Branch(name) => write!(f, "{}", name),
            Head::Detached => write!(f, "(detached HEAD)"),
        }
    }
}

impl RepoSync {
    /// Check that `reference` resolves to a commit in `repo`
    ///
    /// Read-only, so it does not take the lock.
    pub async fn branch_exists(&self, repo: &Path, reference: &str) -> Result<(), RepoError> {
        require_path(repo).await?;

        if reference.is_empty() || reference.starts_with('-') {
            return Err(RepoError::new(
                RepoErrorCode::BranchNotFound,
                format!("branch not exists: {:?}", reference),
            ));
        }

        self.probe(repo, &["log", "-1", reference])
            .await
            .map_err(|e| {
                RepoError::with_source(
                    RepoErrorCode::BranchNotFound,
                    format!("branch not exists: {}", reference),
                    e,
                )
            })?;
        Ok(())
    }

    /// Report whether HEAD is on a named branch or detached
    pub async fn current_head(&self, repo: &Path) -> Result<Head, RepoError> {
        let output = self
            .probe(repo, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
            .map_err(|e| {
                RepoError::with_source(
                    RepoErrorCode::NotARepo,
                    format!("error when rev-parse --abbrev-ref HEAD in {}", repo.display()),
                    e,
                )
            })?;
        Ok(Head::from_abbrev_ref(&output))
    }

    /// Force the working copy at `repo` onto `reference`
    ///
    /// Local modifications are discarded. On a named branch this resets to
    /// HEAD and checks out `reference`; on a detached HEAD it resets straight
    /// to `reference`. A missing ref is reported before anything is touched.
    pub async fn switch_to_branch(&self, repo: &Path, reference: &str) -> Result<(), RepoError> {
        self.branch_exists(repo, reference).await?;

        let _guard = self.lock.lock().await;
        match self.current_head(repo).await? {
            Head::Branch(current) => {
                debug!(repo = %repo.display(), %current, "discarding local changes");
                self.mutate(repo, &["reset", "--hard", "HEAD"])
                    .await
                    .map_err(|e| {
                        RepoError::with_source(
                            RepoErrorCode::Unknown,
                            format!("error when reset --hard HEAD in {}", repo.display()),
                            e,
                        )
                    })?;
                self.mutate(repo, &["checkout", reference])
                    .await
                    .map_err(|e| {
                        RepoError::with_source(
                            RepoErrorCode::Unknown,
                            format!("error when checkout {} in {}", reference, repo.display()),
                            e,
                        )
                    })?;
            }
            Head::Detached => {
                self.mutate(repo, &["reset", "--hard", reference])
                    .await
                    .map_err(|e| {
                        RepoError::with_source(
                            RepoErrorCode::Unknown,
                            format!("error when reset --hard {} in {}", reference, repo.display()),
                            e,
                        )
                    })?;
            }
        }

        info!(repo = %repo.display(), %reference, "switched working copy");
        Ok(())
    }
}

async fn require_path(repo: &Path) -> Result<(), RepoError> {
    match tokio::fs::metadata(repo).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(RepoError::with_source(
            RepoErrorCode::PathNotFound,
            format!("repo path not found: {}", repo.display()),
            e,
        )),
        Err(e) => Err(RepoError::with_source(
            RepoErrorCode::Unknown,
            format!("error occurred during stat dir {}", repo.display()),
            e,
        )),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::exec::BoundedExecutor;
    use crate::repo::fixtures::{fake_git, git, upstream, working_copy};
    use tempfile::TempDir;

    fn syncer() -> RepoSync {
        RepoSync::new(BoundedExecutor::new())
    }

    #[test]
    fn test_head_parsing() {
        assert_eq!(Head::from_abbrev_ref("main\n"), Head::Branch("main".to_string()));
        assert_eq!(Head::from_abbrev_ref("HEAD\n"), Head::Detached);
        assert_eq!(Head::Detached.to_string(), "(detached HEAD)");
    }

    #[tokio::test]
    async fn test_branch_exists() {
        let temp = TempDir::new().unwrap();
        let origin = upstream(temp.path());
        let work = working_copy(temp.path(), &origin);
        let sync = syncer();

        sync.branch_exists(&work, "main").await.unwrap();
        sync.branch_exists(&work, "v1").await.unwrap();
        sync.branch_exists(&work, "origin/feature").await.unwrap();

        let err = sync.branch_exists(&work, "nope").await.unwrap_err();
        assert_eq!(err.code(), RepoErrorCode::BranchNotFound);
        assert!(err.message().contains("nope"));

        let err = sync.branch_exists(&work, "--all").await.unwrap_err();
        assert_eq!(err.code(), RepoErrorCode::BranchNotFound);

        let err = sync
            .branch_exists(&temp.path().join("missing"), "main")
            .await
            .unwrap_err();
        assert_eq!(err.code(), RepoErrorCode::PathNotFound);
    }

    #[tokio::test]
    async fn test_branch_exists_runs_plain_git_log() {
        let temp = TempDir::new().unwrap();
        let origin = upstream(temp.path());
        let work = working_copy(temp.path(), &origin);
        let log = temp.path().join("argv.log");
        let logging = fake_git(
            temp.path(),
            &format!("echo \"$@\" >> '{}'\nexec git \"$@\"", log.display()),
        );

        syncer()
            .with_git_path(logging.to_str().unwrap())
            .branch_exists(&work, "main")
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&log).unwrap(), "log -1 main\n");
    }

    #[tokio::test]
    async fn test_current_head() {
        let temp = TempDir::new().unwrap();
        let origin = upstream(temp.path());
        let work = working_copy(temp.path(), &origin);
        let sync = syncer();

        assert_eq!(
            sync.current_head(&work).await.unwrap(),
            Head::Branch("main".to_string())
        );

        git(&work, &["checkout", "-q", "--detach"]);
        assert_eq!(sync.current_head(&work).await.unwrap(), Head::Detached);

        let plain = temp.path().join("plain");
        std::fs::create_dir(&plain).unwrap();
        let err = sync.current_head(&plain).await.unwrap_err();
        assert_eq!(err.code(), RepoErrorCode::NotARepo);
    }

    #[tokio::test]
    async fn test_switch_missing_ref_leaves_worktree_alone() {
        let temp = TempDir::new().unwrap();
        let origin = upstream(temp.path());
        let work = working_copy(temp.path(), &origin);
        std::fs::write(work.join("README.md"), "local edit\n").unwrap();

        let err = syncer()
            .switch_to_branch(&work, "does-not-exist")
            .await
            .unwrap_err();
        assert_eq!(err.code(), RepoErrorCode::BranchNotFound);
        assert_eq!(
            std::fs::read_to_string(work.join("README.md")).unwrap(),
            "local edit\n"
        );
    }

    #[tokio::test]
    async fn test_switch_named_branch_discards_changes() {
        let temp = TempDir::new().unwrap();
        let origin = upstream(temp.path());
        let work = working_copy(temp.path(), &origin);
        git(&work, &["branch", "topic", "origin/feature"]);
        std::fs::write(work.join("README.md"), "local edit\n").unwrap();
        let sync = syncer();

        sync.switch_to_branch(&work, "topic").await.unwrap();

        assert_eq!(
            sync.current_head(&work).await.unwrap(),
            Head::Branch("topic".to_string())
        );
        assert_eq!(std::fs::read_to_string(work.join("README.md")).unwrap(), "hello\n");
        assert!(work.join("feature.txt").exists());
    }

    #[tokio::test]
    async fn test_switch_detached_resets_to_ref() {
        let temp = TempDir::new().unwrap();
        let origin = upstream(temp.path());
        let work = working_copy(temp.path(), &origin);
        let sync = syncer();

        // Checking out a remote-tracking ref detaches HEAD.
        sync.switch_to_branch(&work, "origin/feature").await.unwrap();
        assert_eq!(sync.current_head(&work).await.unwrap(), Head::Detached);
        assert!(work.join("feature.txt").exists());

        sync.switch_to_branch(&work, "v1").await.unwrap();
        assert_eq!(sync.current_head(&work).await.unwrap(), Head::Detached);
        assert_eq!(
            git(&work, &["rev-parse", "HEAD"]),
            git(&work, &["rev-parse", "v1^{commit}"])
        );
        assert!(!work.join("feature.txt").exists());
    }
}
