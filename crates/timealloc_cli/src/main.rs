//! Operator CLI over `timealloc_core`.
//!
//! # Responsibility
//! - Run allocation usage checks against a store from the shell.
//! - Keep output deterministic: one ALLOW/DENY line per check.
//!
//! Exit codes: 0 allow, 2 deny, 1 error.

use clap::{Parser, Subcommand};
use log::error;
use rusqlite::Connection;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use timealloc_core::db::open_db_with;
use timealloc_core::{
    default_log_level, init_logging, AllocationKey, AllocationRepository, Deadline, Decision,
    ProposalId, ProposalRepository, SqliteAllocationRepository, SqliteProposalRepository,
    SqliteRequestGraph, StoreConfig, UsageGuard,
};
use uuid::Uuid;

/// Time allocation usage checks.
#[derive(Parser)]
#[command(name = "timealloc", version, about = "Time allocation usage checks")]
struct Cli {
    /// Path to the SQLite store
    #[arg(long, global = true, default_value = "timealloc.sqlite3")]
    db: PathBuf,

    /// Absolute directory for rolling log files; logging is off when absent
    #[arg(long, global = true)]
    log_dir: Option<String>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Usage check timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print core health and version
    Ping,
    /// Check whether an allocation may move to another pair
    CheckUpdate {
        #[arg(long)]
        allocation: Uuid,
        #[arg(long)]
        instrument_type: String,
        #[arg(long)]
        semester: String,
    },
    /// Check whether an allocation may be deleted
    CheckDelete {
        #[arg(long)]
        allocation: Uuid,
    },
    /// List instrument types allocated on active proposals
    InstrumentTypes {
        /// Proposal ids
        #[arg(required = true)]
        proposals: Vec<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        if let Err(err) = init_logging(level, log_dir) {
            eprintln!("error: {err}");
            return ExitCode::from(1);
        }
    }

    match run(&cli) {
        Ok(code) => code,
        Err(message) => {
            error!("event=cli_run module=cli status=error error={message}");
            eprintln!("error: {message}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode, String> {
    let (allocation_id, proposed) = match &cli.command {
        Commands::Ping => {
            println!("timealloc_core ping={}", timealloc_core::ping());
            println!("timealloc_core version={}", timealloc_core::core_version());
            return Ok(ExitCode::SUCCESS);
        }
        Commands::InstrumentTypes { proposals } => {
            let conn = open_store(cli)?;
            let ids = proposals
                .iter()
                .map(|id| ProposalId::new(id.as_str()))
                .collect::<Vec<_>>();
            let instrument_types = SqliteProposalRepository::new(&conn)
                .available_instrument_types(&ids)
                .map_err(|err| err.to_string())?;
            for instrument_type in instrument_types {
                println!("{instrument_type}");
            }
            return Ok(ExitCode::SUCCESS);
        }
        Commands::CheckUpdate {
            allocation,
            instrument_type,
            semester,
        } => (
            *allocation,
            Some(AllocationKey::new(instrument_type.as_str(), semester.as_str())),
        ),
        Commands::CheckDelete { allocation } => (*allocation, None),
    };

    let config = store_config(cli);
    let conn = open_db_with(&cli.db, &config).map_err(|err| err.to_string())?;
    let current = SqliteAllocationRepository::new(&conn)
        .get_allocation(allocation_id)
        .map_err(|err| err.to_string())?
        .ok_or_else(|| format!("time allocation {allocation_id} not found"))?;

    let deadline = Deadline::from_timeout(config.usage_check_timeout);
    let guard = UsageGuard::new(SqliteRequestGraph::new(&conn).with_deadline(deadline));
    let decision = match proposed {
        Some(key) => guard.validate_mutation(Some(&current), &key),
        None => guard.validate_deletion(&current),
    }
    .map_err(|err| err.to_string())?;

    Ok(report(&decision))
}

fn store_config(cli: &Cli) -> StoreConfig {
    let mut config = StoreConfig::default();
    if let Some(timeout_ms) = cli.timeout_ms {
        config.usage_check_timeout = Some(Duration::from_millis(timeout_ms));
    }
    config
}

fn open_store(cli: &Cli) -> Result<Connection, String> {
    open_db_with(&cli.db, &store_config(cli)).map_err(|err| err.to_string())
}

fn report(decision: &Decision) -> ExitCode {
    match decision {
        Decision::Allow => {
            println!("ALLOW");
            ExitCode::SUCCESS
        }
        Decision::Deny(denial) => {
            println!("DENY {denial}");
            ExitCode::from(2)
        }
    }
}
