mod cli;

use anyhow::{Context, Result};
use bridge_desktop::{JsonLinesLogSink, ReqwestHttpClient};
use bridge_traits::{LogLevel, MetadataSource, RetryPolicy};
use clap::Parser;
use cli::{Cli, Commands, RunArgs, DEFAULT_DATABASE_PATH};
use core_runtime::config::{DaemonConfig, DaemonConfigBuilder};
use core_runtime::events::EventBus;
use core_runtime::logging::{init_logging, LoggingConfig};
use core_store::{DurableStore, JobStatus, SqliteStore};
use core_sync::{request_full_resync, CHECKPOINT_KEY};
use drive_sync::{build_runner, open_store};
use provider_google_drive::GoogleDriveConnector;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(logging_config(&cli).await?)?;

    let run_args = match &cli.command {
        Commands::Run(args) | Commands::Initiate { run: args, .. } => args.clone(),
        _ => RunArgs::default(),
    };
    let config = load_config(&cli, &run_args)?;
    debug!(?config, "Configuration loaded");

    let store = open_store(&config)
        .await
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    let events = Arc::new(EventBus::default());

    match cli.command {
        Commands::Run(args) => run_daemon(&config, &args, store, events).await?,
        Commands::Initiate {
            job_type,
            max_attempts,
            no_run,
            run,
        } => {
            let max_attempts = max_attempts.unwrap_or(config.default_max_attempts);
            let id = store.create_job(&job_type, max_attempts).await?;
            println!("Created job {id} ({job_type}, max attempts {max_attempts})");

            if !no_run {
                println!("Starting runner, press Ctrl-C to stop");
                run_daemon(&config, &run, store, events).await?;
            }
        }
        Commands::Status { limit } => print_status(store.as_ref(), limit).await?,
        Commands::Retry => {
            let reset = store.retry_jobs().await?;
            println!("Reset {reset} failed/dead job(s) to PENDING");
        }
        Commands::Delete { job_type } => {
            let deleted = store.delete_jobs_of_type(&job_type).await?;
            println!("Deleted {deleted} non-terminal job(s) of type {job_type}");
        }
        Commands::Resync => {
            request_full_resync(store.as_ref(), &events).await?;
            println!("Sync checkpoint cleared; the next sync re-lists every file");
        }
    }

    Ok(())
}

async fn logging_config(cli: &Cli) -> Result<LoggingConfig> {
    let level = match cli.verbose {
        0 => LogLevel::Info,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let mut config = LoggingConfig::default().with_level(level);
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_filter(filter);
    }
    if let Some(path) = &cli.log_file {
        let sink = JsonLinesLogSink::open(path)
            .await
            .with_context(|| format!("opening log file {}", path.display()))?
            .with_min_level(level);
        config = config.with_sink(Arc::new(sink));
    }
    Ok(config)
}

/// Environment first, then command line flags on top.
fn load_config(cli: &Cli, run: &RunArgs) -> Result<DaemonConfig> {
    let mut builder = DaemonConfigBuilder::from_env()?;

    if let Some(db) = &cli.db {
        builder = builder.database_path(db.clone());
    }
    builder = builder.database_path_or(DEFAULT_DATABASE_PATH);

    if let Some(token) = &run.access_token {
        builder = builder.access_token(token.clone());
    }
    if let Some(secs) = run.poll_interval_secs {
        builder = builder.poll_interval(Duration::from_secs(secs));
    }
    if let Some(size) = run.batch_size {
        builder = builder.batch_size(size);
    }
    if let Some(size) = run.page_size {
        builder = builder.page_size(size);
    }
    if let Some(secs) = run.source_timeout_secs {
        builder = builder.source_timeout(Duration::from_secs(secs));
    }
    if run.dead_on_permanent_error {
        builder = builder.dead_on_permanent_error(true);
    }

    Ok(builder.build()?)
}

async fn run_daemon(
    config: &DaemonConfig,
    args: &RunArgs,
    store: Arc<SqliteStore>,
    events: Arc<EventBus>,
) -> Result<()> {
    let token = config.require_access_token()?;
    let mut http = ReqwestHttpClient::new().context("creating HTTP client")?;
    if let Some(attempts) = args.http_retries {
        http = http.with_retry_policy(RetryPolicy {
            max_attempts: attempts.max(1),
            ..RetryPolicy::default()
        });
    }
    let source: Arc<dyn MetadataSource> =
        Arc::new(GoogleDriveConnector::new(Arc::new(http), token));

    let runner = build_runner(config, source, store, events);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, finishing current job");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });

    runner.run(shutdown).await?;
    Ok(())
}

async fn print_status(store: &dyn DurableStore, limit: u32) -> Result<()> {
    let counts = store.count_jobs_by_status().await?;
    let files = store.file_count().await?;
    let checkpoint = store.get_checkpoint(CHECKPOINT_KEY).await?;

    println!("Files known: {files}");
    match checkpoint {
        Some(token) => println!("Sync checkpoint: {token}"),
        None => println!("Sync checkpoint: none (next sync starts at the first page)"),
    }

    println!("Jobs: {} total", counts.total());
    for status in JobStatus::ALL {
        println!("  {:<8} {}", status.as_str(), counts.get(status));
    }

    let jobs = store.list_jobs(limit).await?;
    if jobs.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:>6}  {:<16} {:<8} {:>8}  {:<19}  LAST ERROR",
        "ID", "TYPE", "STATUS", "ATTEMPTS", "UPDATED"
    );
    for job in jobs {
        println!(
            "{:>6}  {:<16} {:<8} {:>8}  {:<19}  {}",
            job.id.to_string(),
            job.job_type,
            job.status.as_str(),
            format!("{}/{}", job.attempts, job.max_attempts),
            job.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            job.last_error.as_deref().unwrap_or("-"),
        );
    }

    Ok(())
}
