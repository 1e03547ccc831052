//! Bounded execution of external commands
//!
//! This module runs one process at a time under a hard kill timeout and an
//! optional shorter wait budget, using `tokio::process::Command`.
//!
//! - [`invocation`] describes what to run and where its output goes.
//! - [`executor`] owns the timer race and the [`Outcome`] it produces.
//! - [`detached`] supervises processes that outlived their wait budget.

mod detached;
mod executor;
mod invocation;
mod process;

pub use detached::{DetachedRegistry, DetachedResult, DetachedRun, DEFAULT_REGISTRY_CAPACITY};
pub use executor::{
    BoundedExecutor, Completion, ExecError, Outcome, DEFAULT_HARD_TIMEOUT, WAIT_SENTINEL,
};
pub use invocation::{Invocation, OutputBuffer};
