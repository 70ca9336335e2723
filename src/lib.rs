pub mod config;
pub mod dispatch;
pub mod error;
pub mod scheduler;
pub mod shutdown;
pub mod worker;
