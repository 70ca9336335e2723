use std::path::Path;

use crate::config::RemoteConfig;
use crate::scheduler::{Task, Worker};

/// Builds the argument vector that runs one task on one worker.
pub trait TaskCommandBuilder: Send {
    fn task_command(&self, worker: &Worker, task: &Task) -> Vec<String>;
}

/// Argument vectors for the remote shell and copy programs.
///
/// Nothing here is executed; the vectors are handed unmodified to the
/// process multiplexer or to a fetcher.
#[derive(Debug, Clone)]
pub struct RemoteCommands {
    config: RemoteConfig,
}

impl RemoteCommands {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn login(&self, worker: &Worker) -> String {
        format!("{}@{}", self.config.user, worker)
    }

    /// `<shell> user@worker <args...>`
    pub fn exec_on(&self, worker: &Worker, args: &[String]) -> Vec<String> {
        let mut cmd = vec![self.config.shell.clone(), self.login(worker)];
        cmd.extend(args.iter().cloned());
        cmd
    }

    /// `<copy> <local> user@worker:<remote_dir>`
    pub fn copy_to(&self, worker: &Worker, local: &Path) -> Vec<String> {
        vec![
            self.config.copy.clone(),
            local.display().to_string(),
            format!("{}:{}", self.login(worker), self.config.remote_dir),
        ]
    }

    /// `<copy> user@worker:<remote_dir>/results/* <local_dir>/`
    pub fn fetch_results(&self, worker: &Worker, local_dir: &Path) -> Vec<String> {
        vec![
            self.config.copy.clone(),
            format!("{}:{}/results/*", self.login(worker), self.config.remote_dir),
            format!("{}/", local_dir.display()),
        ]
    }

    /// `mkdir -p <remote_dir>` on the worker
    pub fn make_remote_dir(&self, worker: &Worker) -> Vec<String> {
        self.exec_on(
            worker,
            &[
                "mkdir".to_string(),
                "-p".to_string(),
                self.config.remote_dir.clone(),
            ],
        )
    }

    /// Unpack the shipped archive and make the task script executable
    pub fn unpack_archive(&self, worker: &Worker) -> Vec<String> {
        let archive = self
            .config
            .archive
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.exec_on(
            worker,
            &[
                "cd".to_string(),
                self.config.remote_dir.clone(),
                ";".to_string(),
                "unzip".to_string(),
                "-o".to_string(),
                archive,
                "&&".to_string(),
                "chmod".to_string(),
                "+x".to_string(),
                self.config.script.clone(),
            ],
        )
    }

    /// The configured cleanup command on the worker, if one is set
    pub fn cleanup(&self, worker: &Worker) -> Option<Vec<String>> {
        if self.config.cleanup_command.is_empty() {
            return None;
        }
        Some(self.exec_on(worker, &self.config.cleanup_command))
    }
}

impl TaskCommandBuilder for RemoteCommands {
    fn task_command(&self, worker: &Worker, task: &Task) -> Vec<String> {
        self.exec_on(
            worker,
            &[
                "cd".to_string(),
                format!("{}/;", self.config.remote_dir),
                format!("./{}", self.config.script),
                task.workload.clone(),
                "-t".to_string(),
                task.variant.clone(),
            ],
        )
    }
}
