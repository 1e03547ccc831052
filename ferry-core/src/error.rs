//! Error types for Ferry

use thiserror::Error;

use crate::exec::ExecError;
use crate::repo::RepoError;

/// Result type alias for Ferry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Ferry operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Bounded execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Repository sync error
    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote session lifecycle error
    #[error("Session error: {0}")]
    Session(String),

    /// Remote backend error
    #[error("Remote error: {0}")]
    Remote(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
