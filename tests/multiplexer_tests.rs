use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use distexec::config::MultiplexerConfig;
use distexec::dispatch::{
    CompletionObserver, DescriptorKey, ProcessHandle, ProcessId, ProcessMultiplexer, StreamKind,
    StreamObserver,
};
use distexec::error::DistexecError;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Line(ProcessId, StreamKind, String),
    Done(ProcessId, StreamKind, Option<i32>),
}

/// Records everything the multiplexer reports, shared across clones
#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    fn lines(&self, process: ProcessId, stream: StreamKind) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Line(p, s, line) if *p == process && *s == stream => Some(line.clone()),
                _ => None,
            })
            .collect()
    }

    fn done(&self, process: ProcessId) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Done(p, _, _) if *p == process))
            .cloned()
            .collect()
    }
}

impl StreamObserver for Recorder {
    fn on_line(&mut self, source: DescriptorKey, stream: StreamKind, line: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Line(source.process, stream, line.to_string()));
    }

    fn on_process_done(&mut self, source: DescriptorKey, status: Option<ExitStatus>) {
        self.events.lock().unwrap().push(Event::Done(
            source.process,
            source.stream,
            status.and_then(|s| s.code()),
        ));
    }
}

/// Counts hook calls and optionally launches one follow-up process
#[derive(Default)]
struct FollowUp {
    calls: Vec<(ProcessId, Option<i32>)>,
    next: Option<Vec<String>>,
    launched: Vec<ProcessHandle>,
}

#[async_trait]
impl CompletionObserver<Recorder> for FollowUp {
    async fn on_task_finished(
        &mut self,
        mux: &mut ProcessMultiplexer<Recorder>,
        source: DescriptorKey,
        _handle: &ProcessHandle,
        observer: &mut Recorder,
        status: Option<ExitStatus>,
    ) {
        self.calls.push((source.process, status.and_then(|s| s.code())));
        if let Some(command) = self.next.take() {
            let handle = mux.launch(&command, observer.clone()).unwrap();
            self.launched.push(handle);
        }
    }
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn test_mux() -> ProcessMultiplexer<Recorder> {
    ProcessMultiplexer::new(MultiplexerConfig {
        terminate_grace: Duration::from_millis(500),
        exit_wait: Duration::from_secs(5),
    })
}

fn pid_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[tokio::test]
async fn test_lines_arrive_in_order_per_stream() {
    let recorder = Recorder::default();
    let mut mux = test_mux();
    let handle = mux
        .launch(
            &sh("printf 'one\\ntwo\\n'; printf 'oops\\n' >&2; printf 'three\\n'"),
            recorder.clone(),
        )
        .unwrap();

    mux.run_event_loop(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        recorder.lines(handle.id, StreamKind::Stdout),
        vec!["one", "two", "three"]
    );
    assert_eq!(recorder.lines(handle.id, StreamKind::Stderr), vec!["oops"]);
    assert_eq!(mux.active_processes(), 0);
    assert_eq!(mux.registered_descriptors(), 0);
}

#[tokio::test]
async fn test_large_output_is_not_lost() {
    let recorder = Recorder::default();
    let mut mux = test_mux();
    let handle = mux.launch(&sh("seq 1 5000"), recorder.clone()).unwrap();

    mux.run_event_loop(&CancellationToken::new()).await.unwrap();

    let lines = recorder.lines(handle.id, StreamKind::Stdout);
    assert_eq!(lines.len(), 5000);
    assert_eq!(lines.first().map(String::as_str), Some("1"));
    assert_eq!(lines.last().map(String::as_str), Some("5000"));
}

#[tokio::test]
async fn test_unterminated_last_line_is_dropped() {
    let recorder = Recorder::default();
    let mut mux = test_mux();
    let handle = mux
        .launch(&sh("printf 'done\\npartial'"), recorder.clone())
        .unwrap();

    mux.run_event_loop(&CancellationToken::new()).await.unwrap();

    assert_eq!(recorder.lines(handle.id, StreamKind::Stdout), vec!["done"]);
}

#[tokio::test]
async fn test_process_done_fires_once_per_descriptor() {
    let recorder = Recorder::default();
    let mut mux = test_mux();
    let first = mux.launch(&sh("echo a"), recorder.clone()).unwrap();
    let second = mux.launch(&sh("echo b >&2; exit 3"), recorder.clone()).unwrap();

    mux.run_event_loop(&CancellationToken::new()).await.unwrap();

    for handle in [&first, &second] {
        let done = recorder.done(handle.id);
        assert_eq!(done.len(), 2);
        let streams: Vec<StreamKind> = done
            .iter()
            .map(|e| match e {
                Event::Done(_, s, _) => *s,
                Event::Line(..) => unreachable!(),
            })
            .collect();
        assert!(streams.contains(&StreamKind::Stdout));
        assert!(streams.contains(&StreamKind::Stderr));
    }

    // the second close always carries the reaped status
    match recorder.done(second.id).last() {
        Some(Event::Done(_, _, code)) => assert_eq!(*code, Some(3)),
        other => panic!("expected a done event, got {:?}", other),
    }
    match recorder.done(first.id).last() {
        Some(Event::Done(_, _, code)) => assert_eq!(*code, Some(0)),
        other => panic!("expected a done event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_completion_hook_can_launch_follow_up() {
    let recorder = Recorder::default();
    let mut mux = test_mux();
    let first = mux.launch(&sh("echo first"), recorder.clone()).unwrap();

    let mut hook = FollowUp {
        next: Some(sh("echo second")),
        ..Default::default()
    };
    mux.run_event_loop_with(&mut hook, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(hook.launched.len(), 1);
    let second = &hook.launched[0];
    assert_ne!(first.id, second.id);

    // two hang-ups per process
    assert_eq!(hook.calls.len(), 4);
    assert_eq!(hook.calls.iter().filter(|(p, _)| *p == first.id).count(), 2);
    assert_eq!(hook.calls.iter().filter(|(p, _)| *p == second.id).count(), 2);

    assert_eq!(recorder.lines(second.id, StreamKind::Stdout), vec!["second"]);
    assert_eq!(mux.active_processes(), 0);
}

#[tokio::test]
async fn test_missing_executable_is_a_launch_error() {
    let mut mux = test_mux();
    let result = mux.launch(
        &["/nonexistent/distexec-test-binary".to_string()],
        Recorder::default(),
    );

    match result {
        Err(DistexecError::Launch { command, .. }) => {
            assert_eq!(command, "/nonexistent/distexec-test-binary")
        }
        other => panic!("expected Launch error, got {:?}", other.map(|h| h.id)),
    }
    assert_eq!(mux.active_processes(), 0);
    assert_eq!(mux.registered_descriptors(), 0);
}

#[tokio::test]
async fn test_abort_terminates_running_processes() {
    let mut mux = test_mux();
    let a = mux.launch(&sh("exec sleep 30"), Recorder::default()).unwrap();
    let b = mux.launch(&sh("exec sleep 30"), Recorder::default()).unwrap();

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = mux.run_event_loop(&shutdown).await;

    assert!(matches!(result, Err(DistexecError::Aborted)));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(mux.active_processes(), 0);
    assert_eq!(mux.registered_descriptors(), 0);
    for handle in [a, b] {
        assert!(!pid_alive(handle.pid.unwrap()));
    }
}

#[tokio::test]
async fn test_abort_after_processes_exited() {
    let mut mux = test_mux();
    mux.launch(&sh("true"), Recorder::default()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let result = mux.run_event_loop(&shutdown).await;

    assert!(matches!(result, Err(DistexecError::Aborted)));
    assert_eq!(mux.active_processes(), 0);
}

#[tokio::test]
async fn test_empty_multiplexer_returns_immediately() {
    let mut mux = test_mux();
    mux.run_event_loop(&CancellationToken::new()).await.unwrap();
    assert_eq!(mux.active_processes(), 0);
}

fn last_done_index(recorder: &Recorder, process: ProcessId) -> Option<usize> {
    recorder
        .events
        .lock()
        .unwrap()
        .iter()
        .rposition(|e| matches!(e, Event::Done(p, _, _) if *p == process))
}

#[tokio::test]
async fn test_abort_is_not_held_by_a_process_that_closed_its_output() {
    let mut mux = test_mux();
    mux.launch(&sh("exec >&- 2>&-; sleep 4"), Recorder::default())
        .unwrap();
    let running = mux.launch(&sh("exec sleep 30"), Recorder::default()).unwrap();

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let result = mux.run_event_loop(&shutdown).await;

    assert!(matches!(result, Err(DistexecError::Aborted)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(mux.active_processes(), 0);
    assert!(!pid_alive(running.pid.unwrap()));
}

#[tokio::test]
async fn test_output_is_read_while_another_process_is_exiting() {
    let recorder = Recorder::default();
    let mut mux = test_mux();
    let lingering = mux
        .launch(&sh("exec >&- 2>&-; sleep 2"), recorder.clone())
        .unwrap();
    let chatty = mux
        .launch(&sh("sleep 0.3; echo tick"), recorder.clone())
        .unwrap();

    mux.run_event_loop(&CancellationToken::new()).await.unwrap();

    assert_eq!(recorder.lines(chatty.id, StreamKind::Stdout), vec!["tick"]);
    assert!(last_done_index(&recorder, chatty.id) < last_done_index(&recorder, lingering.id));
    match recorder.done(lingering.id).last() {
        Some(Event::Done(_, _, code)) => assert_eq!(*code, Some(0)),
        other => panic!("expected a done event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_process_outliving_its_output_is_killed_after_exit_wait() {
    let recorder = Recorder::default();
    let mut mux = ProcessMultiplexer::new(MultiplexerConfig {
        terminate_grace: Duration::from_millis(500),
        exit_wait: Duration::from_millis(300),
    });
    let handle = mux
        .launch(&sh("exec >&- 2>&-; exec sleep 30"), recorder.clone())
        .unwrap();

    let started = std::time::Instant::now();
    mux.run_event_loop(&CancellationToken::new()).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(mux.active_processes(), 0);
    match recorder.done(handle.id).last() {
        Some(Event::Done(_, _, code)) => assert_eq!(*code, None),
        other => panic!("expected a done event, got {:?}", other),
    }
}
