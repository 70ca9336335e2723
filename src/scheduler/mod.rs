pub mod pool;
pub mod run;
pub mod runner;
pub mod task;

pub use pool::{Outcome, WorkerPool};
pub use run::TaskRun;
pub use runner::{Assignment, RunReport, WorkerPoolScheduler};
pub use task::{Task, Worker};
