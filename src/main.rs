use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use distexec::config::RunConfig;
use distexec::dispatch::ProcessMultiplexer;
use distexec::error::DistexecError;
use distexec::scheduler::{RunReport, Task, Worker, WorkerPool, WorkerPoolScheduler};
use distexec::shutdown::install_shutdown_handler;
use distexec::worker::setup::{cleanup_workers, prepare_workers};
use distexec::worker::{CopyFetcher, RemoteCommands};

#[derive(Parser, Debug)]
#[command(name = "distexec")]
#[command(version)]
#[command(about = "Distribute tasks across a pool of remote workers")]
struct Args {
    /// Workload descriptors, comma-separated
    #[arg(long, alias = "xmls", value_delimiter = ',')]
    workloads: Vec<String>,

    /// Variant descriptors run for each workload, comma-separated
    #[arg(long, alias = "tasks", value_delimiter = ',')]
    variants: Vec<String>,

    /// Worker host names, comma-separated
    #[arg(long, value_delimiter = ',')]
    workers: Vec<String>,

    /// JSON config file; flags given here override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Login name on the workers
    #[arg(long)]
    user: Option<String>,

    /// Working directory on the workers
    #[arg(long)]
    remote_dir: Option<String>,

    /// Script run once per task inside the remote directory
    #[arg(long)]
    script: Option<String>,

    /// Archive shipped to every worker during setup
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Directory for per-task log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Directory fetched results are copied into
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Write a JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Do not prepare the workers before the run
    #[arg(long)]
    skip_setup: bool,

    /// Do not run the cleanup command after the run
    #[arg(long)]
    skip_cleanup: bool,
}

// =============================================================================
// Configuration
// =============================================================================

fn build_config(args: Args) -> Result<(RunConfig, Option<PathBuf>, bool, bool), DistexecError> {
    let mut config = match &args.config {
        Some(path) => RunConfig::from_json_file(path)?,
        None => RunConfig::default(),
    };

    if !args.workers.is_empty() {
        config.workers = args.workers;
    }
    if !args.workloads.is_empty() {
        config.workloads = args.workloads;
    }
    if !args.variants.is_empty() {
        config.variants = args.variants;
    }
    if let Some(user) = args.user {
        config.remote.user = user;
    }
    if let Some(dir) = args.remote_dir {
        config.remote.remote_dir = dir;
    }
    if let Some(script) = args.script {
        config.remote.script = script;
    }
    if let Some(archive) = args.archive {
        config.remote.archive = archive;
    }
    if let Some(dir) = args.log_dir {
        config.log_dir = dir;
    }
    if let Some(dir) = args.results_dir {
        config.results_dir = dir;
    }

    config.validate()?;
    Ok((config, args.report, args.skip_setup, args.skip_cleanup))
}

// =============================================================================
// Output
// =============================================================================

fn print_summary(report: &RunReport) {
    println!();
    println!("Run Summary");
    println!("{}", "=".repeat(40));
    println!("Completed:       {}", report.completed.len());
    println!("Failed attempts: {}", report.failed_attempts.len());
    println!("Launch failures: {}", report.launch_failures);
    println!("Fetch failures:  {}", report.fetch_failures);
    if let Some(finished) = report.finished_at {
        let elapsed = finished - report.started_at;
        println!("Elapsed:         {}s", elapsed.num_seconds());
    }
    if !report.unfinished.is_empty() {
        println!();
        println!("Unfinished:");
        for task in &report.unfinished {
            println!("  [-] {}", task);
        }
    }
}

fn write_report(path: &Path, report: &RunReport) -> Result<(), DistexecError> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json)?;
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

async fn run(args: Args) -> Result<(), DistexecError> {
    let (config, report_path, skip_setup, skip_cleanup) = build_config(args)?;
    let shutdown = install_shutdown_handler()?;

    if !skip_setup {
        prepare_workers(&config, &shutdown).await?;
    }

    let commands = RemoteCommands::new(config.remote.clone());
    let fetcher = CopyFetcher::new(commands.clone(), config.results_dir.clone());
    let pool = WorkerPool::new(
        config.workers.iter().map(|w| Worker::from(w.as_str())),
        Task::cross_product(&config.workloads, &config.variants),
    );
    tracing::info!(
        workers = pool.idle_count(),
        tasks = pool.pending_count(),
        "Starting run"
    );

    let mut scheduler = WorkerPoolScheduler::new(
        pool,
        Box::new(commands),
        Box::new(fetcher),
        config.log_dir.clone(),
    );
    let mut mux = ProcessMultiplexer::new(config.multiplexer());
    let result = scheduler.run(&mut mux, &shutdown).await;

    print_summary(scheduler.report());
    if let Some(path) = &report_path {
        if let Err(e) = write_report(path, scheduler.report()) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write run report");
        }
    }
    result?;

    if !skip_cleanup {
        cleanup_workers(&config, &shutdown).await?;
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(DistexecError::Aborted) => {
            println!("Stopping...");
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
