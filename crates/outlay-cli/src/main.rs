//! outlay: expense-reimbursement robot
//!
//! Runs the worker against the configured queue and operates on that queue.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "outlay")]
#[command(about = "Create outlay tickets from queued reimbursement requests", long_about = None)]
#[command(version)]
struct Cli {
    /// Robot configuration (TOML)
    #[arg(long, short, global = true, env = "OUTLAY_CONFIG", default_value = "outlay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain the queue, then file the touched ledgers
    Run(RunArgs),

    /// Add requests (one JSON object or an array of them) to the queue
    Enqueue {
        /// JSON file with the request payloads
        file: PathBuf,
    },

    /// Put failed or stranded elements back to NEW
    Requeue {
        /// Element ids (`task-<ulid>` or bare ulid)
        #[arg(required_unless_present_any = ["all_failed", "stale"])]
        ids: Vec<String>,

        /// Requeue every FAILED element
        #[arg(long, conflicts_with = "ids")]
        all_failed: bool,

        /// Requeue every IN_PROGRESS element left behind by a killed run.
        /// Only use while no worker is running.
        #[arg(long, conflicts_with = "ids")]
        stale: bool,
    },

    /// Show element counts per status
    Status {
        /// Also list FAILED elements with their messages
        #[arg(long)]
        failed: bool,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false, id = "work_dir")]
struct WorkDirArgs {
    /// Working directory holding the ledger workbooks
    #[arg(long)]
    path: Option<PathBuf>,

    /// Scheduler process arguments, e.g. '{"path": "C:\\robot\\udbetaling"}'
    #[arg(long)]
    process_arguments: Option<String>,
}

#[derive(Args)]
struct RunArgs {
    #[command(flatten)]
    work_dir: WorkDirArgs,

    /// Skip filing ledgers into the document library
    #[arg(long)]
    no_archive: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let work_dir = commands::work_dir(
                args.work_dir.path,
                args.work_dir.process_arguments.as_deref(),
            )?;
            commands::run(&cli.config, &work_dir, args.no_archive).await
        }
        Commands::Enqueue { file } => commands::enqueue(&cli.config, &file).await,
        Commands::Requeue {
            ids,
            all_failed,
            stale,
        } => commands::requeue(&cli.config, &ids, all_failed, stale).await,
        Commands::Status { failed } => commands::status(&cli.config, failed).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_needs_exactly_one_work_dir_source() {
        assert!(Cli::try_parse_from(["outlay", "run"]).is_err());
        assert!(
            Cli::try_parse_from([
                "outlay",
                "run",
                "--path",
                "/srv",
                "--process-arguments",
                "{}"
            ])
            .is_err()
        );

        let cli = Cli::try_parse_from(["outlay", "--config", "robot.toml", "run", "--path", "/srv"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("robot.toml"));
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.work_dir.path, Some(PathBuf::from("/srv")));
        assert!(!args.no_archive);
    }

    #[test]
    fn requeue_takes_ids_or_a_status_selection() {
        assert!(Cli::try_parse_from(["outlay", "requeue"]).is_err());
        assert!(Cli::try_parse_from(["outlay", "requeue", "--all-failed"]).is_ok());
        assert!(Cli::try_parse_from(["outlay", "requeue", "--stale"]).is_ok());
        assert!(Cli::try_parse_from(["outlay", "requeue", "--all-failed", "--stale"]).is_ok());
        assert!(Cli::try_parse_from(["outlay", "requeue", "task-1", "--all-failed"]).is_err());
        assert!(Cli::try_parse_from(["outlay", "requeue", "task-1", "--stale"]).is_err());

        let cli = Cli::try_parse_from(["outlay", "requeue", "task-1", "task-2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Requeue { ids, all_failed: false, stale: false } if ids.len() == 2
        ));
    }
}
