//! Repository sync errors

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Stable error codes for repository sync failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoErrorCode {
    /// The local path does not exist
    PathNotFound,
    /// The local path exists but is not a git repository
    #[serde(rename = "path-is-not-a-repo")]
    NotARepo,
    /// The branch, tag or commit does not exist
    BranchNotFound,
    /// `git clone` failed or was killed
    CloneFailure,
    /// Checking out a ref failed
    CheckoutFailure,
    /// Parent directories could not be created
    PermissionError,
    /// A corrupt working copy could not be removed
    RemoveDirFailure,
    /// `git fetch` failed or was killed
    FetchFailure,
    /// The wait budget elapsed while the operation kept running
    WaitTimeout,
    /// Anything else
    Unknown,
}

impl RepoErrorCode {
    /// Stable string form used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathNotFound => "path-not-found",
            Self::NotARepo => "path-is-not-a-repo",
            Self::BranchNotFound => "branch-not-found",
            Self::CloneFailure => "clone-failure",
            Self::CheckoutFailure => "checkout-failure",
            Self::PermissionError => "permission-error",
            Self::RemoveDirFailure => "remove-dir-failure",
            Self::FetchFailure => "fetch-failure",
            Self::WaitTimeout => "wait-timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RepoErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A repository operation that did not reach its terminal state
#[derive(Error, Debug)]
#[error(
    "[{code}] {message}{}",
    .source.as_ref().map(|e| format!(": {}", e)).unwrap_or_default()
)]
pub struct RepoError {
    code: RepoErrorCode,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl RepoError {
    /// Error with no underlying cause
    pub fn new(code: RepoErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Error wrapping an underlying cause
    pub fn with_source(
        code: RepoErrorCode,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The stable error code
    pub fn code(&self) -> RepoErrorCode {
        self.code
    }

    /// The operator-facing message
    pub fn message(&self) -> &str {
        &self.message
    }
}
