use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{DistexecError, Result};

/// Workload descriptors used when none are given on the command line.
pub const DEFAULT_WORKLOADS: &[&str] = &[
    "symbiotic.xml",
    "symbiotic-noslice.xml",
    "symbiotic-sttt-instr.xml",
];

/// Variant descriptors used when none are given on the command line.
pub const DEFAULT_VARIANTS: &[&str] = &[
    "ReachSafety-Arrays",
    "ReachSafety-BitVectors",
    "ReachSafety-ControlFlow",
    "ReachSafety-Floats",
    "ReachSafety-Heap",
    "ReachSafety-Loops",
    "ReachSafety-ProductLines",
    "ReachSafety-Recursive",
    "ReachSafety-Sequentialized",
    "MemSafety-Other",
    "MemSafety-TerminCrafted",
    "MemSafety-LinkedLists",
    "MemSafety-Heap",
    "MemSafety-Arrays",
    "MemSafety-MemCleanup",
    "Systems_BusyBox_MemSafety",
    "Systems_BusyBox_NoOverflows",
    "Systems_DeviceDriversLinux64_ReachSafety",
    "NoOverflows-BitVectors",
    "NoOverflows-Other",
];

/// How to reach the workers and what to run there.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Login name used for every worker (`user@worker`)
    pub user: String,
    /// Remote execution program
    pub shell: String,
    /// Remote copy program
    pub copy: String,
    /// Working directory on each worker
    pub remote_dir: String,
    /// Script invoked once per task, relative to `remote_dir`
    pub script: String,
    /// Local archive shipped to every worker during setup
    pub archive: PathBuf,
    /// Command run on every worker before and after the run.
    /// Empty disables the step.
    pub cleanup_command: Vec<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            user: std::env::var("USER").unwrap_or_default(),
            shell: "ssh".to_string(),
            copy: "scp".to_string(),
            remote_dir: "/var/data/experiments/".to_string(),
            script: "run.sh".to_string(),
            archive: PathBuf::from("run.zip"),
            cleanup_command: vec![
                "killall".to_string(),
                "-9".to_string(),
                "klee".to_string(),
                "symbiotic".to_string(),
                "benchexec".to_string(),
            ],
        }
    }
}

/// Timeouts for the process multiplexer.
#[derive(Debug, Clone, Copy)]
pub struct MultiplexerConfig {
    /// How long a terminated process gets before it is killed
    pub terminate_grace: Duration,
    /// How long to wait for exit once both output streams have closed
    pub exit_wait: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            terminate_grace: Duration::from_millis(2000),
            exit_wait: Duration::from_millis(5000),
        }
    }
}

/// Everything one run needs, built once at startup and passed down.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub workers: Vec<String>,
    pub workloads: Vec<String>,
    pub variants: Vec<String>,
    pub remote: RemoteConfig,
    /// Directory receiving one log file per task run
    pub log_dir: PathBuf,
    /// Local directory that fetched results are copied into
    pub results_dir: PathBuf,
    pub terminate_grace_ms: u64,
    pub exit_wait_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        let mux = MultiplexerConfig::default();
        Self {
            workers: Vec::new(),
            workloads: DEFAULT_WORKLOADS.iter().map(|s| s.to_string()).collect(),
            variants: DEFAULT_VARIANTS.iter().map(|s| s.to_string()).collect(),
            remote: RemoteConfig::default(),
            log_dir: PathBuf::from("."),
            results_dir: PathBuf::from("results"),
            terminate_grace_ms: mux.terminate_grace.as_millis() as u64,
            exit_wait_ms: mux.exit_wait.as_millis() as u64,
        }
    }
}

impl RunConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.workers.push(worker.into());
        self
    }

    pub fn multiplexer(&self) -> MultiplexerConfig {
        MultiplexerConfig {
            terminate_grace: Duration::from_millis(self.terminate_grace_ms),
            exit_wait: Duration::from_millis(self.exit_wait_ms),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers.is_empty() {
            return Err(DistexecError::Config("no workers configured".to_string()));
        }
        if self.remote.user.is_empty() {
            return Err(DistexecError::Config("remote user is empty".to_string()));
        }
        if self.workloads.is_empty() || self.variants.is_empty() {
            return Err(DistexecError::Config(
                "at least one workload and one variant are required".to_string(),
            ));
        }
        Ok(())
    }
}
