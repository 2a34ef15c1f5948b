// rollcall - attendance reconciliation runner

mod commands;
mod config;
mod exit_codes;
mod fetch;
mod logging;
mod outbox;
mod report;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::{BackfillArgs, RunArgs, SwptmArgs};
use config::DEFAULT_CONFIG;
use exit_codes::{EXIT_ERROR, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Normalize and reconcile monthly student attendance into a local store")]
#[command(version)]
struct Cli {
    /// Config file
    #[arg(long, short = 'c', global = true, env = "ROLLCALL_CONFIG", default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one period, reconcile it against the store, persist new rows
    #[command(after_help = "\
Examples:
  rollcall run
  rollcall run --academic-year 2024-2025 --month March
  rollcall run --input march.json --dry-run --json
  rollcall run --out march.csv --no-remind")]
    Run {
        /// Academic year, e.g. 2024-2025 (default: previous month's)
        #[arg(long, requires = "month")]
        academic_year: Option<String>,

        /// Month name, e.g. March (default: previous month)
        #[arg(long, requires = "academic_year")]
        month: Option<String>,

        /// Read the batch from a JSON file instead of the API
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// API key (overrides the env var named by api.key_env)
        #[arg(long)]
        api_key: Option<String>,

        /// Reconcile against the store without writing
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,

        /// Write the final records as CSV
        #[arg(long, short = 'o', value_name = "FILE")]
        out: Option<PathBuf>,

        /// Do not queue reminders after the run
        #[arg(long)]
        no_remind: bool,
    },

    /// Run every period from the start year through the current academic year
    #[command(after_help = "\
Examples:
  rollcall backfill
  rollcall backfill --from-year 2023
  rollcall backfill --yearly --from-year 2024
  rollcall backfill --refresh --json > backfill.json")]
    Backfill {
        /// First academic year's start (default: backfill.start_year)
        #[arg(long)]
        from_year: Option<i32>,

        /// Insert or update every record instead of skipping stored ones
        #[arg(long)]
        refresh: bool,

        /// Dedup on student id + name and round percentages
        #[arg(long)]
        yearly: bool,

        /// API key (overrides the env var named by api.key_env)
        #[arg(long)]
        api_key: Option<String>,

        /// Print all run reports as a JSON array on stdout
        #[arg(long)]
        json: bool,
    },

    /// Refresh SWPTM attendance for one period into its own table
    #[command(after_help = "\
Examples:
  rollcall swptm
  rollcall swptm --academic-year 2024-2025 --month March
  rollcall swptm --input swptm.json --dry-run --json")]
    Swptm {
        /// Academic year, e.g. 2024-2025 (default: current month's, June start)
        #[arg(long, requires = "month")]
        academic_year: Option<String>,

        /// Month name, e.g. March (default: current month)
        #[arg(long, requires = "academic_year")]
        month: Option<String>,

        /// Read the batch from a JSON file instead of the SWPTM API
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// API key (overrides the env var named by api.key_env)
        #[arg(long)]
        api_key: Option<String>,

        /// Reconcile against the store without writing
        #[arg(long)]
        dry_run: bool,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// Queue reminders for configured schools with no data for a period
    #[command(after_help = "\
Examples:
  rollcall remind
  rollcall remind --academic-year 2024-2025 --month March")]
    Remind {
        #[arg(long, requires = "month")]
        academic_year: Option<String>,

        #[arg(long, requires = "academic_year")]
        month: Option<String>,
    },

    /// Parse and validate the config file
    #[command(after_help = "\
Examples:
  rollcall validate
  rollcall --config /etc/rollcall.toml validate")]
    Validate,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { academic_year, month, input, api_key, dry_run, json, out, no_remind } => {
            commands::cmd_run(
                &cli.config,
                RunArgs { academic_year, month, input, api_key, dry_run, json, out, no_remind },
            )
        }
        Commands::Backfill { from_year, refresh, yearly, api_key, json } => commands::cmd_backfill(
            &cli.config,
            BackfillArgs { from_year, refresh, yearly, api_key, json },
        ),
        Commands::Swptm { academic_year, month, input, api_key, dry_run, json } => {
            commands::cmd_swptm(
                &cli.config,
                SwptmArgs { academic_year, month, input, api_key, dry_run, json },
            )
        }
        Commands::Remind { academic_year, month } => {
            commands::cmd_remind(&cli.config, academic_year, month)
        }
        Commands::Validate => commands::cmd_validate(&cli.config),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_ERROR, message: msg.into(), hint: None }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
