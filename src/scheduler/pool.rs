use std::collections::{HashMap, HashSet};

use crate::scheduler::task::{Task, Worker};

/// How a task run ended, as far as the pool is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// Idle workers, pending tasks, and who is running what.
///
/// A worker is either idle or busy with exactly one task; a task is either
/// pending or running on exactly one worker. Pick order for both sets is
/// whatever the hash set yields.
#[derive(Debug, Default)]
pub struct WorkerPool {
    idle: HashSet<Worker>,
    pending: HashSet<Task>,
    busy: HashMap<Worker, Task>,
}

impl WorkerPool {
    pub fn new(
        workers: impl IntoIterator<Item = Worker>,
        tasks: impl IntoIterator<Item = Task>,
    ) -> Self {
        Self {
            idle: workers.into_iter().collect(),
            pending: tasks.into_iter().collect(),
            busy: HashMap::new(),
        }
    }

    /// Both an idle worker and a pending task exist
    pub fn can_assign(&self) -> bool {
        !self.idle.is_empty() && !self.pending.is_empty()
    }

    /// Pop one idle worker and one pending task and mark the worker busy.
    pub fn take_pair(&mut self) -> Option<(Worker, Task)> {
        if !self.can_assign() {
            return None;
        }
        let worker = self.idle.iter().next().cloned()?;
        let task = self.pending.iter().next().cloned()?;
        self.idle.remove(&worker);
        self.pending.remove(&task);
        self.busy.insert(worker.clone(), task.clone());
        Some((worker, task))
    }

    /// Return a busy worker to idle. A failed task goes back to pending.
    ///
    /// Returns the task the worker was running, or `None` if the worker was
    /// not busy (nothing changes in that case).
    pub fn release(&mut self, worker: &Worker, outcome: Outcome) -> Option<Task> {
        let task = self.busy.remove(worker)?;
        if outcome == Outcome::Failed {
            self.pending.insert(task.clone());
        }
        self.idle.insert(worker.clone());
        Some(task)
    }

    /// Undo a `take_pair` whose launch never happened.
    pub fn abandon(&mut self, worker: &Worker) -> Option<Task> {
        self.release(worker, Outcome::Failed)
    }

    pub fn is_idle(&self, worker: &Worker) -> bool {
        self.idle.contains(worker)
    }

    pub fn is_pending(&self, task: &Task) -> bool {
        self.pending.contains(task)
    }

    /// Worker currently running `task`, if any
    pub fn running_on(&self, task: &Task) -> Option<&Worker> {
        self.busy
            .iter()
            .find(|(_, t)| *t == task)
            .map(|(worker, _)| worker)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.busy.len()
    }

    /// Nothing pending and nothing running
    pub fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.busy.is_empty()
    }

    /// Pending tasks in a stable order, for reporting
    pub fn pending_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.pending.iter().cloned().collect();
        tasks.sort();
        tasks
    }

    /// Pending and in-flight tasks together, sorted
    pub fn unfinished_tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .pending
            .iter()
            .chain(self.busy.values())
            .cloned()
            .collect();
        tasks.sort();
        tasks
    }

    /// Idle and busy workers are disjoint, no task is both pending and
    /// running, and no task runs on two workers.
    pub fn check_invariant(&self) -> bool {
        let disjoint_workers = self.busy.keys().all(|w| !self.idle.contains(w));
        let disjoint_tasks = self.busy.values().all(|t| !self.pending.contains(t));
        let running: HashSet<&Task> = self.busy.values().collect();
        disjoint_workers && disjoint_tasks && running.len() == self.busy.len()
    }
}
