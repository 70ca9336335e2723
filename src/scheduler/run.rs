use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::dispatch::{DescriptorKey, StreamKind, StreamObserver};
use crate::scheduler::task::{Task, Worker};

/// State of one task executing on one worker.
///
/// The multiplexer reports each of the two output descriptors separately, so
/// the run counts closes and only the second one means the task is over.
/// The log file is closed when the run is dropped.
#[derive(Debug)]
pub struct TaskRun {
    task: Task,
    worker: Worker,
    closed_descriptors: u8,
    log: File,
    log_path: PathBuf,
}

impl TaskRun {
    /// Create the run and its log file inside `log_dir`.
    pub fn open(task: Task, worker: Worker, log_dir: &Path) -> io::Result<Self> {
        let (log, log_path) = create_log(log_dir, &log_file_name(&worker, &task))?;
        Ok(Self {
            task,
            worker,
            closed_descriptors: 0,
            log,
            log_path,
        })
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn closed_descriptors(&self) -> u8 {
        self.closed_descriptors
    }

    /// Count one closed descriptor. True exactly once: on the second close.
    pub fn record_close(&mut self) -> bool {
        self.closed_descriptors = self.closed_descriptors.saturating_add(1);
        self.closed_descriptors == 2
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.log, "{}", line)?;
        self.log.flush()
    }
}

impl StreamObserver for TaskRun {
    fn on_line(&mut self, _source: DescriptorKey, stream: StreamKind, line: &str) {
        if stream == StreamKind::Stderr {
            eprintln!("[{} stderr]: {}", self.worker, line);
        }

        if let Err(e) = self.append(line) {
            tracing::warn!(
                worker = %self.worker,
                task = %self.task,
                path = %self.log_path.display(),
                error = %e,
                "Failed to write task log"
            );
        }
    }
}

/// `<worker>-<workload>-<variant>.log` with path separators flattened
pub fn log_file_name(worker: &Worker, task: &Task) -> String {
    format!("{}-{}-{}.log", worker, task.workload, task.variant).replace('/', "-")
}

/// Create a fresh log file, appending `-next.log` while the name is taken.
fn create_log(dir: &Path, name: &str) -> io::Result<(File, PathBuf)> {
    let mut name = name.to_string();
    loop {
        let path = dir.join(&name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => name.push_str("-next.log"),
            Err(e) => return Err(e),
        }
    }
}
