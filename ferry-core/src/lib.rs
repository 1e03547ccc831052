//! Ferry Core - bounded command execution and repository sync
//!
//! This crate runs external commands under a hard timeout with an optional
//! shorter wait budget, tracks remote command sessions, and keeps local git
//! working copies in sync with their remotes.

pub mod communicator;
pub mod config;
pub mod error;
pub mod exec;
pub mod repo;
pub mod session;

pub use communicator::{Communicator, CommunicatorFactory, ConnInfo};
pub use config::Config;
pub use error::{Error, Result};
pub use exec::{BoundedExecutor, Invocation, Outcome, WAIT_SENTINEL};
pub use repo::{Head, RepoError, RepoErrorCode, RepoState, RepoSync, SyncStatus};
pub use session::Cmd;
