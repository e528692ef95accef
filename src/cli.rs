//! Command line surface of `drive-sync`.

use clap::{ArgAction, Args, Parser, Subcommand};
use core_runtime::logging::LogFormat;
use core_sync::METADATA_SYNC_JOB_TYPE;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_PATH: &str = "drive-sync.db";

#[derive(Parser, Debug)]
#[command(
    name = "drive-sync",
    version,
    about = "Resumable Google Drive metadata sync daemon",
    arg_required_else_help = true
)]
pub struct Cli {
    /// SQLite database file (default: $DRIVE_SYNC_DB, then drive-sync.db).
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// More log output (repeat for trace).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log output format.
    #[arg(long, global = true, value_name = "FORMAT", value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,

    /// Also append log records to this file as JSON lines.
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the job runner until Ctrl-C.
    Run(RunArgs),

    /// Create a job, then run the daemon.
    Initiate {
        /// Job type to enqueue.
        #[arg(long, default_value = METADATA_SYNC_JOB_TYPE)]
        job_type: String,

        /// Attempts before the job goes DEAD (default: $DRIVE_SYNC_MAX_ATTEMPTS, then 3).
        #[arg(long, value_name = "N")]
        max_attempts: Option<u32>,

        /// Only enqueue; do not start the runner.
        #[arg(long)]
        no_run: bool,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show job counts and the most recent jobs.
    Status {
        /// Number of recent jobs to list.
        #[arg(long, default_value_t = 25)]
        limit: u32,
    },

    /// Reset FAILED and DEAD jobs to PENDING with a fresh attempt budget.
    Retry,

    /// Delete PENDING, RUNNING and FAILED jobs of one type.
    Delete {
        #[arg(long)]
        job_type: String,
    },

    /// Clear the sync checkpoint so the next run re-lists everything.
    Resync,
}

/// Runner and source settings; each overrides its environment variable.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Google Drive OAuth access token.
    #[arg(long, value_name = "TOKEN")]
    pub access_token: Option<String>,

    /// Seconds to sleep when no job is runnable.
    #[arg(long, value_name = "SECS")]
    pub poll_interval_secs: Option<u64>,

    /// Jobs fetched per poll.
    #[arg(long, value_name = "N")]
    pub batch_size: Option<u32>,

    /// Records requested per Drive page (1-1000).
    #[arg(long, value_name = "N")]
    pub page_size: Option<u32>,

    /// Deadline for each Drive page request.
    #[arg(long, value_name = "SECS")]
    pub source_timeout_secs: Option<u64>,

    /// Attempts per HTTP request on connection failures (default 3).
    #[arg(long, value_name = "N")]
    pub http_retries: Option<u32>,

    /// Mark jobs DEAD on the first permanent Drive error.
    #[arg(long)]
    pub dead_on_permanent_error: bool,
}

fn parse_log_format(raw: &str) -> Result<LogFormat, String> {
    raw.parse().map_err(|e: core_runtime::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_initiate_defaults() {
        let cli = Cli::try_parse_from(["drive-sync", "initiate"]).unwrap();
        match cli.command {
            Commands::Initiate {
                job_type,
                max_attempts,
                no_run,
                run,
            } => {
                assert_eq!(job_type, "metadata_sync");
                assert_eq!(max_attempts, None);
                assert!(!no_run);
                assert!(run.access_token.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "drive-sync",
            "status",
            "--db",
            "/tmp/x.db",
            "-vv",
            "--log-format",
            "json",
            "--limit",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(matches!(cli.command, Commands::Status { limit: 5 }));
    }

    #[test]
    fn test_delete_requires_job_type() {
        assert!(Cli::try_parse_from(["drive-sync", "delete"]).is_err());
        let cli = Cli::try_parse_from(["drive-sync", "delete", "--job-type", "metadata_sync"]).unwrap();
        assert!(matches!(cli.command, Commands::Delete { job_type } if job_type == "metadata_sync"));
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "drive-sync",
            "run",
            "--log-file",
            "/tmp/drive-sync.jsonl",
            "--http-retries",
            "5",
            "--dead-on-permanent-error",
        ])
        .unwrap();

        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/drive-sync.jsonl")));
        match cli.command {
            Commands::Run(run) => {
                assert_eq!(run.http_retries, Some(5));
                assert!(run.dead_on_permanent_error);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_bad_log_format_rejected() {
        assert!(Cli::try_parse_from(["drive-sync", "retry", "--log-format", "xml"]).is_err());
    }
}
