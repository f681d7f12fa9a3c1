//! Sales Ingest - load the sales snapshot from the blob store into Postgres

use clap::{Parser, Subcommand};
use sales_common::logging::{init_logging, LogConfig, LogLevel};
use sales_ingest::{config::Config, pipeline, IngestError};
use std::process::ExitCode;
use tracing::{error, info};

/// `EX_DATAERR`: the snapshot itself must be fixed upstream
const EXIT_DATA_ERROR: u8 = 65;
/// `EX_TEMPFAIL`: reissuing the run may succeed
const EXIT_TRANSIENT: u8 = 75;

#[derive(Parser, Debug)]
#[command(name = "sales-ingest")]
#[command(author, version, about = "Load the sales snapshot into Postgres")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the result as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the snapshot and merge it into the destination (default)
    Run,
    /// Create the destination schema and table if absent
    Bootstrap,
    /// Fetch and validate the snapshot without touching the database
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sales-ingest")
        .build();

    // Environment variables take precedence over flags
    let log_config = match log_config.clone().merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid logging environment: {}", e);
            log_config
        },
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        },
    };

    match execute(cli.command.unwrap_or(Command::Run), cli.json).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(
                kind = ?err.kind(),
                step = ?err.step(),
                transient = err.is_transient(),
                error = %err,
                "Run failed"
            );
            ExitCode::from(exit_code(&err))
        },
    }
}

async fn execute(command: Command, json: bool) -> Result<(), IngestError> {
    let config = Config::load()?;

    match command {
        Command::Run => {
            let result = pipeline::run_load(&config).await?;
            if json {
                print_json(&result);
            } else {
                println!(
                    "staged {} rows, upserted {} ({} inserted, {} updated) into {}",
                    result.rows_staged,
                    result.rows_upserted,
                    result.rows_inserted,
                    result.rows_updated,
                    config.loader.destination
                );
            }
        },
        Command::Bootstrap => {
            pipeline::run_bootstrap(&config).await?;
            info!(destination = %config.loader.destination, "Bootstrap complete");
        },
        Command::Check => {
            let check = pipeline::run_check(&config).await?;
            if json {
                print_json(&check);
            } else {
                println!("{}: {} rows, {} bytes, well-formed", check.location, check.rows, check.bytes);
            }
        },
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(error = %e, "Failed to serialize result"),
    }
}

fn exit_code(err: &IngestError) -> u8 {
    if err.is_transient() {
        EXIT_TRANSIENT
    } else if err.is_data_error() {
        EXIT_DATA_ERROR
    } else {
        1
    }
}
