use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One unit of work: a workload run under one variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Task {
    pub workload: String,
    pub variant: String,
}

impl Task {
    pub fn new(workload: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            variant: variant.into(),
        }
    }

    /// Every (workload, variant) combination. Duplicates collapse.
    pub fn cross_product(workloads: &[String], variants: &[String]) -> HashSet<Task> {
        workloads
            .iter()
            .flat_map(|w| variants.iter().map(move |v| Task::new(w.clone(), v.clone())))
            .collect()
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.workload, self.variant)
    }
}

/// A remote execution target, identified by host name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Worker(String);

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Worker {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
