use std::collections::HashMap;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncRead;
use tokio::process::{Child, ChildStdin, Command};
use tokio::time::Instant;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::config::MultiplexerConfig;
use crate::dispatch::{CompletionObserver, LineAssembler, StreamObserver};
use crate::error::{DistexecError, Result};

pub type ProcessId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => write!(f, "stdout"),
            StreamKind::Stderr => write!(f, "stderr"),
        }
    }
}

/// One registered output descriptor: which process, which stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorKey {
    pub process: ProcessId,
    pub stream: StreamKind,
}

impl DescriptorKey {
    pub fn new(process: ProcessId, stream: StreamKind) -> Self {
        Self { process, stream }
    }
}

impl fmt::Display for DescriptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.process, self.stream)
    }
}

/// Identity of a launched process, handed back by [`ProcessMultiplexer::launch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub id: ProcessId,
    /// OS pid, `None` only if the child was reaped before we asked
    pub pid: Option<u32>,
    pub command: Vec<String>,
}

/// What the event source reports for a descriptor.
enum Readiness {
    Data(Vec<u8>),
    Hangup,
    Error(io::Error),
}

type EventStream = Pin<Box<dyn Stream<Item = Readiness> + Send>>;

fn descriptor_events<R>(reader: R) -> EventStream
where
    R: AsyncRead + Send + 'static,
{
    let data = ReaderStream::new(reader).map(|chunk| match chunk {
        Ok(bytes) => Readiness::Data(bytes.to_vec()),
        Err(e) => Readiness::Error(e),
    });
    Box::pin(data.chain(tokio_stream::once(Readiness::Hangup)))
}

type ExitPoll = Pin<Box<dyn Stream<Item = ()> + Send>>;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Ticks for a child whose output has closed, until it exits or its
/// deadline passes. The first tick fires immediately.
fn exit_polls(period: Duration) -> ExitPoll {
    Box::pin(IntervalStream::new(tokio::time::interval(period)).map(|_| ()))
}

enum LoopEvent {
    Abort,
    Descriptor(DescriptorKey, Readiness),
    /// Time to check again whether the process behind this (last closed)
    /// descriptor has exited
    ExitCheck(DescriptorKey),
}

struct TrackedProcess<O> {
    handle: ProcessHandle,
    child: Child,
    // Held so the child sees an open stdin for its whole lifetime.
    _stdin: Option<ChildStdin>,
    observer: O,
    assembler: LineAssembler,
    open_descriptors: u8,
    /// Set once both descriptors are closed
    exit_deadline: Option<Instant>,
}

/// Tracks running commands and feeds their output to observers.
///
/// The only blocking point is the wait for the next event inside
/// [`run_event_loop`](Self::run_event_loop): output on a descriptor, a
/// hang-up, an exit check for a process whose output is closed, or the
/// shutdown token. Every process contributes two registrations (stdout,
/// stderr) and is dropped once both have hung up and it has been reaped.
pub struct ProcessMultiplexer<O> {
    config: MultiplexerConfig,
    streams: StreamMap<DescriptorKey, EventStream>,
    exits: StreamMap<DescriptorKey, ExitPoll>,
    processes: HashMap<ProcessId, TrackedProcess<O>>,
    next_id: ProcessId,
}

impl<O: StreamObserver> ProcessMultiplexer<O> {
    pub fn new(config: MultiplexerConfig) -> Self {
        Self {
            config,
            streams: StreamMap::new(),
            exits: StreamMap::new(),
            processes: HashMap::new(),
            next_id: 1,
        }
    }

    /// Number of processes not yet reported as finished
    pub fn active_processes(&self) -> usize {
        self.processes.len()
    }

    pub fn registered_descriptors(&self) -> usize {
        self.streams.len()
    }

    /// Start `command` and register its stdout and stderr.
    pub fn launch(&mut self, command: &[String], observer: O) -> Result<ProcessHandle> {
        let (program, args) = command.split_first().ok_or_else(|| DistexecError::Launch {
            command: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "empty command"),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DistexecError::Launch {
                command: command.join(" "),
                source,
            })?;

        let id = self.next_id;
        self.next_id += 1;

        let handle = ProcessHandle {
            id,
            pid: child.id(),
            command: command.to_vec(),
        };

        let stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            self.streams.insert(
                DescriptorKey::new(id, StreamKind::Stdout),
                descriptor_events(stdout),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            self.streams.insert(
                DescriptorKey::new(id, StreamKind::Stderr),
                descriptor_events(stderr),
            );
        }

        tracing::debug!(process = id, pid = ?handle.pid, command = %command.join(" "), "Process launched");

        self.processes.insert(
            id,
            TrackedProcess {
                handle: handle.clone(),
                child,
                _stdin: stdin,
                observer,
                assembler: LineAssembler::new(),
                open_descriptors: 2,
                exit_deadline: None,
            },
        );

        Ok(handle)
    }

    /// Drive all registered processes until none is left.
    pub async fn run_event_loop(&mut self, shutdown: &CancellationToken) -> Result<()> {
        self.drive(None, shutdown).await
    }

    /// Like [`run_event_loop`](Self::run_event_loop), additionally calling
    /// `completion` after every hang-up. The shutdown token is watched while
    /// the hook runs; an abort drops the hook mid-flight.
    pub async fn run_event_loop_with<C>(
        &mut self,
        completion: &mut C,
        shutdown: &CancellationToken,
    ) -> Result<()>
    where
        C: CompletionObserver<O>,
    {
        let completion: &mut dyn CompletionObserver<O> = completion;
        self.drive(Some(completion), shutdown).await
    }

    async fn drive<'c>(
        &mut self,
        mut completion: Option<&mut (dyn CompletionObserver<O> + 'c)>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        while !self.streams.is_empty() || !self.exits.is_empty() {
            let event = tokio::select! {
                biased;
                _ = shutdown.cancelled() => LoopEvent::Abort,
                Some((key, readiness)) = self.streams.next(), if !self.streams.is_empty() => {
                    LoopEvent::Descriptor(key, readiness)
                }
                Some((key, ())) = self.exits.next(), if !self.exits.is_empty() => {
                    LoopEvent::ExitCheck(key)
                }
                else => break,
            };

            let outcome = match event {
                LoopEvent::Abort => Err(DistexecError::Aborted),
                LoopEvent::Descriptor(key, Readiness::Data(chunk)) => {
                    self.deliver(key, &chunk);
                    Ok(())
                }
                LoopEvent::Descriptor(key, Readiness::Hangup) => {
                    self.hangup(key, completion.as_deref_mut(), shutdown).await
                }
                LoopEvent::Descriptor(key, Readiness::Error(source)) => {
                    tracing::error!(descriptor = %key, error = %source, "Waiting for output failed");
                    Err(DistexecError::PollFatal {
                        descriptor: key,
                        source,
                    })
                }
                LoopEvent::ExitCheck(key) => {
                    self.check_exit(key, completion.as_deref_mut(), shutdown)
                        .await
                }
            };

            if let Err(e) = outcome {
                if matches!(e, DistexecError::Aborted) {
                    tracing::warn!(processes = self.processes.len(), "Abort requested, stopping all processes");
                }
                self.terminate_all().await;
                return Err(e);
            }
        }

        Ok(())
    }

    fn deliver(&mut self, key: DescriptorKey, chunk: &[u8]) {
        let Some(tracked) = self.processes.get_mut(&key.process) else {
            return;
        };
        let TrackedProcess {
            observer,
            assembler,
            ..
        } = tracked;
        assembler.push(key.stream, chunk, |line| observer.on_line(key, key.stream, line));
    }

    async fn hangup<'c>(
        &mut self,
        key: DescriptorKey,
        completion: Option<&mut (dyn CompletionObserver<O> + 'c)>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        self.streams.remove(&key);

        let Some(tracked) = self.processes.get_mut(&key.process) else {
            return Ok(());
        };
        tracked.open_descriptors = tracked.open_descriptors.saturating_sub(1);

        if tracked.open_descriptors == 0 {
            // reported once the process has exited
            tracked.exit_deadline = Some(Instant::now() + self.config.exit_wait);
            self.exits.insert(key, exit_polls(EXIT_POLL_INTERVAL));
            return Ok(());
        }

        let status = tracked.child.try_wait().ok().flatten();
        self.report_close(key, status, completion, shutdown).await
    }

    async fn check_exit<'c>(
        &mut self,
        key: DescriptorKey,
        completion: Option<&mut (dyn CompletionObserver<O> + 'c)>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let Some(tracked) = self.processes.get_mut(&key.process) else {
            self.exits.remove(&key);
            return Ok(());
        };

        let status = match tracked.child.try_wait() {
            Ok(Some(status)) => Some(status),
            Ok(None) if tracked.exit_deadline.map_or(true, |d| Instant::now() < d) => {
                return Ok(());
            }
            Ok(None) => {
                tracing::warn!(
                    process = tracked.handle.id,
                    "Output closed but process did not exit, killing it"
                );
                if let Err(e) = tracked.child.start_kill() {
                    tracing::debug!(process = tracked.handle.id, error = %e, "SIGKILL failed");
                }
                None
            }
            Err(e) => {
                tracing::warn!(process = tracked.handle.id, error = %e, "Failed to collect exit status");
                None
            }
        };

        self.exits.remove(&key);
        self.report_close(key, status, completion, shutdown).await
    }

    /// Tell the observer and the completion hook that `key` closed.
    async fn report_close<'c>(
        &mut self,
        key: DescriptorKey,
        status: Option<ExitStatus>,
        completion: Option<&mut (dyn CompletionObserver<O> + 'c)>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        // Taken out of the map so the completion hook can borrow both the
        // observer and the multiplexer.
        let Some(mut tracked) = self.processes.remove(&key.process) else {
            return Ok(());
        };

        tracked.observer.on_process_done(key, status);
        let aborted = match completion {
            Some(completion) => tokio::select! {
                biased;
                _ = shutdown.cancelled() => true,
                _ = completion.on_task_finished(self, key, &tracked.handle, &mut tracked.observer, status) => false,
            },
            None => false,
        };

        if tracked.open_descriptors > 0 {
            self.processes.insert(key.process, tracked);
        } else {
            tracing::debug!(process = key.process, status = ?status, "Process finished");
        }

        if aborted {
            return Err(DistexecError::Aborted);
        }
        Ok(())
    }

    /// Stop every tracked process: SIGTERM first, SIGKILL after the grace
    /// period. Never fails; already-exited processes are skipped.
    pub async fn terminate_all(&mut self) {
        self.streams = StreamMap::new();
        self.exits = StreamMap::new();
        for (_, mut tracked) in self.processes.drain() {
            stop_child(&mut tracked.child, self.config.terminate_grace).await;
        }
    }
}

async fn stop_child(child: &mut Child, grace: Duration) {
    if let Ok(Some(_)) = child.try_wait() {
        return;
    }

    if let Some(pid) = child.id() {
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "SIGTERM failed");
        }
    }

    if let Ok(Ok(_)) = tokio::time::timeout(grace, child.wait()).await {
        return;
    }

    // for sure
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "SIGKILL failed");
    }
    let _ = child.wait().await;
}
