use thiserror::Error;

use crate::dispatch::DescriptorKey;

#[derive(Error, Debug)]
pub enum DistexecError {
    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Waiting for output on {descriptor} failed: {source}")]
    PollFatal {
        descriptor: DescriptorKey,
        #[source]
        source: std::io::Error,
    },

    #[error("Run aborted by operator")]
    Aborted,

    #[error("Fetching results from {worker} failed: {reason}")]
    Fetch { worker: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DistexecError>;
