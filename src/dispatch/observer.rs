use std::process::ExitStatus;

use async_trait::async_trait;

use crate::dispatch::{DescriptorKey, ProcessHandle, ProcessMultiplexer, StreamKind};

/// Per-process policy invoked by the multiplexer.
///
/// `on_process_done` fires once per closed descriptor, so twice per process.
/// Implementations that care about the process as a whole must count.
pub trait StreamObserver: Send {
    fn on_line(&mut self, source: DescriptorKey, stream: StreamKind, line: &str);

    fn on_process_done(&mut self, _source: DescriptorKey, _status: Option<ExitStatus>) {}
}

/// Loop-wide hook, called after the per-process observer on every hang-up.
///
/// It gets the multiplexer itself so it can launch follow-up processes that
/// the next loop iteration will already see.
#[async_trait]
pub trait CompletionObserver<O: StreamObserver>: Send {
    async fn on_task_finished(
        &mut self,
        mux: &mut ProcessMultiplexer<O>,
        source: DescriptorKey,
        handle: &ProcessHandle,
        observer: &mut O,
        status: Option<ExitStatus>,
    );
}

/// Echoes output to the terminal, prefixed with a label (usually the worker).
#[derive(Debug, Clone)]
pub struct PrintObserver {
    label: String,
    quiet: bool,
}

impl PrintObserver {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            quiet: false,
        }
    }

    /// Suppress stdout lines; stderr is always shown.
    pub fn quiet(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            quiet: true,
        }
    }

    /// Formatted line, or `None` when it should not be shown
    pub fn render(&self, stream: StreamKind, line: &str) -> Option<String> {
        match stream {
            StreamKind::Stderr => Some(format!("[{} stderr]: {}", self.label, line)),
            StreamKind::Stdout if self.quiet => None,
            StreamKind::Stdout => Some(format!("[{}]: {}", self.label, line)),
        }
    }
}

impl StreamObserver for PrintObserver {
    fn on_line(&mut self, _source: DescriptorKey, stream: StreamKind, line: &str) {
        if let Some(text) = self.render(stream, line) {
            println!("{}", text);
        }
    }

    fn on_process_done(&mut self, source: DescriptorKey, status: Option<ExitStatus>) {
        tracing::debug!(label = %self.label, descriptor = %source, status = ?status, "Stream closed");
    }
}

/// Whether a reported status means the process exited cleanly
pub fn is_success(status: Option<ExitStatus>) -> bool {
    status.map(|s| s.success()).unwrap_or(false)
}

/// Human-readable status for failure banners
pub fn describe_status(status: Option<ExitStatus>) -> String {
    match status {
        Some(s) => match s.code() {
            Some(code) => code.to_string(),
            None => s.to_string(),
        },
        None => "unknown".to_string(),
    }
}
