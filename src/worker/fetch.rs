use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{DistexecError, Result};
use crate::scheduler::Worker;
use crate::worker::RemoteCommands;

/// Retrieves the results a worker produced for a finished task.
#[async_trait]
pub trait ResultFetcher: Send {
    async fn fetch(&mut self, worker: &Worker) -> Result<()>;
}

/// Copies `<remote_dir>/results/*` from the worker into a local directory.
///
/// Runs to completion before returning, so the worker is not handed a new
/// task while its results are still being copied.
#[derive(Debug, Clone)]
pub struct CopyFetcher {
    commands: RemoteCommands,
    destination: PathBuf,
}

impl CopyFetcher {
    pub fn new(commands: RemoteCommands, destination: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            destination: destination.into(),
        }
    }

    fn process_output(worker: &Worker, output: std::io::Result<std::process::Output>) -> Result<()> {
        match output {
            Ok(output) if output.status.success() => {
                tracing::info!(worker = %worker, "Results fetched");
                Ok(())
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let reason = if stderr.is_empty() {
                    format!("Exit code: {:?}", output.status.code())
                } else {
                    stderr
                };
                Err(DistexecError::Fetch {
                    worker: worker.to_string(),
                    reason,
                })
            }
            Err(e) => Err(DistexecError::Fetch {
                worker: worker.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ResultFetcher for CopyFetcher {
    async fn fetch(&mut self, worker: &Worker) -> Result<()> {
        let cmd = self.commands.fetch_results(worker, &self.destination);
        println!("Fetching the results from {}", worker);
        println!("{}> {}", worker, cmd.join(" "));

        let (program, args) = cmd.split_first().ok_or_else(|| DistexecError::Fetch {
            worker: worker.to_string(),
            reason: "empty copy command".to_string(),
        })?;

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        Self::process_output(worker, output)
    }
}
