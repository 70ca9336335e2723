//! Everything that touches the remote workers.
//!
//! - **Commands**: argument vectors for the remote shell and copy programs
//! - **Fetch**: pulling a worker's results back after a successful task
//! - **Setup**: broadcasting preparation and cleanup commands to all workers
//!
//! # Components
//!
//! - [`RemoteCommands`]: builds `ssh`/`scp` style argument vectors
//! - [`TaskCommandBuilder`]: what the scheduler uses to get a task's command
//! - [`ResultFetcher`] / [`CopyFetcher`]: result retrieval
//! - [`setup`]: `prepare_workers`, `cleanup_workers`, `broadcast`
//!
//! The remote protocol itself is never interpreted; only the local
//! process's output and exit status are observed.

pub mod commands;
pub mod fetch;
pub mod setup;

pub use commands::{RemoteCommands, TaskCommandBuilder};
pub use fetch::{CopyFetcher, ResultFetcher};
