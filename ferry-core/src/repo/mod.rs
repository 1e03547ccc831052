//! Local working copies kept in sync with a remote
//!
//! [`RepoSync`] drives the system `git` through the bounded executor:
//! clone when the path is empty, replace a corrupt copy, fetch otherwise,
//! and force the working tree onto a branch, tag or commit.

mod branch;
mod error;
mod remote;
mod sync;

#[cfg(all(test, unix))]
mod fixtures;

pub use branch::Head;
pub use error::{RepoError, RepoErrorCode};
pub use remote::redact_url;
pub use sync::{RepoState, RepoSync, SyncStatus, DEFAULT_PROBE_TIMEOUT};
