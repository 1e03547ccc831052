//! CLI command implementations

pub mod exec;
pub mod remote;
pub mod repo;

pub use exec::ExecArgs;
pub use remote::RemoteArgs;
pub use repo::RepoArgs;
