//! Process multiplexing: run many external commands at once and watch their
//! output line by line.
//!
//! # Components
//!
//! - [`ProcessMultiplexer`]: owns the running children and the event source
//!   their stdout/stderr are registered with
//! - [`LineAssembler`]: turns raw chunks into lines, per stream
//! - [`StreamObserver`]: per-process reaction to lines and hang-ups
//! - [`CompletionObserver`]: loop-wide hook that may launch follow-up work
//!
//! # Event Flow
//!
//! 1. [`ProcessMultiplexer::launch`] spawns the command and registers both
//!    output descriptors
//! 2. [`ProcessMultiplexer::run_event_loop`] waits for the next ready
//!    descriptor; data goes through the assembler into `on_line`
//! 3. A hang-up unregisters the descriptor, calls `on_process_done`, then the
//!    completion hook; this happens twice per process
//! 4. The loop ends when nothing is registered, on a descriptor error, or
//!    when the shutdown token fires

pub mod assembler;
pub mod multiplexer;
pub mod observer;

pub use assembler::LineAssembler;
pub use multiplexer::{DescriptorKey, ProcessHandle, ProcessId, ProcessMultiplexer, StreamKind};
pub use observer::{describe_status, is_success, CompletionObserver, PrintObserver, StreamObserver};
