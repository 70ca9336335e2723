use std::path::PathBuf;
use std::process::ExitStatus;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{
    describe_status, is_success, CompletionObserver, DescriptorKey, ProcessHandle,
    ProcessMultiplexer,
};
use crate::error::{DistexecError, Result};
use crate::scheduler::pool::{Outcome, WorkerPool};
use crate::scheduler::run::TaskRun;
use crate::scheduler::task::{Task, Worker};
use crate::worker::{ResultFetcher, TaskCommandBuilder};

/// What happened during one scheduler run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Every launch, in order
    pub assignments: Vec<Assignment>,
    pub completed: Vec<Assignment>,
    pub failed_attempts: Vec<Assignment>,
    pub launch_failures: usize,
    pub fetch_failures: usize,
    /// Tasks pending or still running when the run ended
    pub unfinished: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub task: Task,
    pub worker: Worker,
}

impl RunReport {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            assignments: Vec::new(),
            completed: Vec::new(),
            failed_attempts: Vec::new(),
            launch_failures: 0,
            fetch_failures: 0,
            unfinished: Vec::new(),
        }
    }

    /// True when every task finished successfully
    pub fn is_complete(&self) -> bool {
        self.unfinished.is_empty()
    }
}

/// Maps pending tasks onto idle workers and reacts to their completion.
///
/// Failed tasks are re-queued without limit; successful ones trigger a
/// result fetch before their worker becomes idle again.
pub struct WorkerPoolScheduler {
    pool: WorkerPool,
    commands: Box<dyn TaskCommandBuilder>,
    fetcher: Box<dyn ResultFetcher>,
    log_dir: PathBuf,
    report: RunReport,
}

impl WorkerPoolScheduler {
    pub fn new(
        pool: WorkerPool,
        commands: Box<dyn TaskCommandBuilder>,
        fetcher: Box<dyn ResultFetcher>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            pool,
            commands,
            fetcher,
            log_dir: log_dir.into(),
            report: RunReport::new(),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Start one pending task on one idle worker.
    ///
    /// Returns `Ok(None)` if there is no idle worker or no pending task. On
    /// error the worker and task go back where they came from.
    pub fn assign_one(
        &mut self,
        mux: &mut ProcessMultiplexer<TaskRun>,
    ) -> Result<Option<ProcessHandle>> {
        let Some((worker, task)) = self.pool.take_pair() else {
            return Ok(None);
        };

        println!("Starting task {} on {}", task, worker);
        let cmd = self.commands.task_command(&worker, &task);
        println!("{}> {}", worker, cmd.join(" "));

        let launched = TaskRun::open(task.clone(), worker.clone(), &self.log_dir)
            .map_err(DistexecError::from)
            .and_then(|run| mux.launch(&cmd, run));

        match launched {
            Ok(handle) => {
                tracing::info!(worker = %worker, task = %task, process = handle.id, pid = ?handle.pid, "Task started");
                self.report.assignments.push(Assignment { task, worker });
                Ok(Some(handle))
            }
            Err(e) => {
                self.pool.abandon(&worker);
                self.report.launch_failures += 1;
                Err(e)
            }
        }
    }

    /// Assign until workers or tasks run out. A launch failure ends the pass;
    /// the next completion starts another one.
    pub fn fill(&mut self, mux: &mut ProcessMultiplexer<TaskRun>) -> usize {
        let mut started = 0;
        while self.pool.can_assign() {
            match self.assign_one(mux) {
                Ok(Some(_)) => started += 1,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Task launch failed");
                    eprintln!("{}", e);
                    break;
                }
            }
        }
        started
    }

    /// Seed the multiplexer and drive it until every task has succeeded,
    /// nothing is left to run, or the run is aborted.
    pub async fn run(
        &mut self,
        mux: &mut ProcessMultiplexer<TaskRun>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        self.report = RunReport::new();
        self.fill(mux);

        let result = mux.run_event_loop_with(&mut *self, shutdown).await;

        self.report.finished_at = Some(Utc::now());
        self.report.unfinished = self.pool.unfinished_tasks();
        tracing::info!(
            completed = self.report.completed.len(),
            failed_attempts = self.report.failed_attempts.len(),
            unfinished = self.report.unfinished.len(),
            "Run finished"
        );
        if !self.report.is_complete() {
            tracing::warn!(
                unfinished = self.report.unfinished.len(),
                launch_failures = self.report.launch_failures,
                "Run ended with unfinished tasks"
            );
        }
        result
    }

    async fn finish(&mut self, worker: Worker, task: Task, status: Option<ExitStatus>) {
        if is_success(status) {
            println!("Task {} on {} done", task, worker);
            if let Err(e) = self.fetcher.fetch(&worker).await {
                tracing::warn!(worker = %worker, error = %e, "Result fetch failed");
                eprintln!("[{}]: {}", worker, e);
                self.report.fetch_failures += 1;
            }
            self.pool.release(&worker, Outcome::Succeeded);
            self.report.completed.push(Assignment { task, worker });
        } else {
            eprintln!(
                "[{}]: Running task {} failed (exitstatus {})",
                worker,
                task,
                describe_status(status)
            );
            println!("Re-adding the task to be executed");
            tracing::warn!(worker = %worker, task = %task, status = ?status, "Task failed, requeued");
            self.pool.release(&worker, Outcome::Failed);
            self.report.failed_attempts.push(Assignment { task, worker });
        }
    }
}

#[async_trait]
impl CompletionObserver<TaskRun> for WorkerPoolScheduler {
    async fn on_task_finished(
        &mut self,
        mux: &mut ProcessMultiplexer<TaskRun>,
        _source: DescriptorKey,
        _handle: &ProcessHandle,
        run: &mut TaskRun,
        status: Option<ExitStatus>,
    ) {
        // one call per descriptor; act on the second
        if !run.record_close() {
            return;
        }

        self.finish(run.worker().clone(), run.task().clone(), status)
            .await;
        self.fill(mux);
    }
}
