use std::io;
use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::config::{MultiplexerConfig, RunConfig};
use crate::dispatch::{PrintObserver, ProcessMultiplexer};
use crate::error::{DistexecError, Result};
use crate::scheduler::Worker;
use crate::worker::RemoteCommands;

/// Run one command per worker, all at once, echoing their output.
///
/// A command that cannot be started is reported and skipped. Exit statuses
/// are not inspected.
pub async fn broadcast<F>(
    workers: &[Worker],
    mux_config: MultiplexerConfig,
    quiet: bool,
    shutdown: &CancellationToken,
    build: F,
) -> Result<()>
where
    F: Fn(&Worker) -> Vec<String>,
{
    let mut mux = ProcessMultiplexer::new(mux_config);
    for worker in workers {
        let cmd = build(worker);
        println!("{}> {}", worker, cmd.join(" "));
        let observer = if quiet {
            PrintObserver::quiet(worker.as_str())
        } else {
            PrintObserver::new(worker.as_str())
        };
        if let Err(e) = mux.launch(&cmd, observer) {
            tracing::error!(worker = %worker, error = %e, "Broadcast command not started");
            eprintln!("[{}]: {}", worker, e);
        }
    }
    mux.run_event_loop(shutdown).await
}

/// Create the local results directory; an existing one is fine.
pub fn ensure_results_dir(path: &Path) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            println!("Directory {} already exists", path.display());
        }
        Err(e) => return Err(e.into()),
    }
    if !path.is_dir() {
        return Err(DistexecError::Config(format!(
            "{} exists and is not a directory",
            path.display()
        )));
    }
    Ok(())
}

/// Get every worker ready to run tasks: stop leftovers, create the remote
/// directory, ship the archive and unpack it.
pub async fn prepare_workers(config: &RunConfig, shutdown: &CancellationToken) -> Result<()> {
    ensure_results_dir(&config.results_dir)?;

    let commands = RemoteCommands::new(config.remote.clone());
    let workers: Vec<Worker> = config.workers.iter().map(|w| Worker::from(w.as_str())).collect();
    let mux_config = config.multiplexer();

    if let Some(cleanup) = cleanup_builder(&commands) {
        broadcast(&workers, mux_config, false, shutdown, cleanup).await?;
    }
    broadcast(&workers, mux_config, false, shutdown, |w| commands.make_remote_dir(w)).await?;
    broadcast(&workers, mux_config, false, shutdown, |w| {
        commands.copy_to(w, &config.remote.archive)
    })
    .await?;
    broadcast(&workers, mux_config, true, shutdown, |w| commands.unpack_archive(w)).await?;

    tracing::info!(workers = workers.len(), "Workers prepared");
    Ok(())
}

/// Run the cleanup command on every worker after the run.
pub async fn cleanup_workers(config: &RunConfig, shutdown: &CancellationToken) -> Result<()> {
    let commands = RemoteCommands::new(config.remote.clone());
    let workers: Vec<Worker> = config.workers.iter().map(|w| Worker::from(w.as_str())).collect();

    let result = match cleanup_builder(&commands) {
        Some(cleanup) => broadcast(&workers, config.multiplexer(), false, shutdown, cleanup).await,
        None => Ok(()),
    };
    result
}

fn cleanup_builder(commands: &RemoteCommands) -> Option<impl Fn(&Worker) -> Vec<String> + '_> {
    if commands.config().cleanup_command.is_empty() {
        return None;
    }
    Some(move |w: &Worker| commands.cleanup(w).unwrap_or_default())
}
