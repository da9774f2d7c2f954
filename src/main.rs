use std::fs::File;
use tracing::{info, info_span, level_filters::LevelFilter};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use config::{Config, DatabaseBackend};
use database::{memory::MemoryDatabase, Database, PgDatabase};
use ledger::Ledger;
use tournament_model::SingleElimTournament;

/// Building and advancing single elimination brackets.
mod bracket;
/// The JSON-lines console that drives the tournament core.
///
/// Additionally, it contains the `CommandsContainer` trait that groups all the commands together
/// as well as checks used by various commands.
mod commands;
/// Process configuration read from the environment.
mod config;
/// Traits and types used for interacting with the database.
mod database;
/// Coin balances and the append-only transaction log.
mod ledger;
/// Contains functions for the operator audit log.
mod log;
/// The tournament lifecycle controller.
mod tournament_model;

mod utils;

/// Stores everything the commands need.
///
/// All members share the same database, so they all see each other's commits.
#[derive(Debug, Clone)]
pub struct Data<DB> {
    database: DB,
    tournament_model: SingleElimTournament<DB>,
    ledger: Ledger<DB>,
}

impl<DB> Data<DB>
where
    DB: Database + Clone,
{
    /// Create a new data struct with a given Database.
    fn new(database: DB, max_retries: u32) -> Self {
        Self {
            tournament_model: SingleElimTournament::new(database.clone(), max_retries),
            ledger: Ledger::new(database.clone(), max_retries),
            database,
        }
    }
}

/// A thread-safe Error type used for setup and I/O failures.
pub type AppError = anyhow::Error;

#[tokio::main]
async fn main() {
    if let Err(e) = setup_tracing() {
        panic!("Error trying to setup tracing: {}", e);
    }

    if let Err(e) = run().await {
        panic!("Error trying to run the console: {}", e);
    }
}

/// The main function that runs the console.
async fn run() -> Result<(), AppError> {
    let config = {
        let setup_span = info_span!("console_setup");
        let _guard = setup_span.enter();
        Config::from_env()?
    };

    match &config.backend {
        DatabaseBackend::Postgres { url } => {
            let pg_database = PgDatabase::connect(url).await?;
            pg_database.migrate().await?;
            info!("Database migrations are up to date");
            serve(Data::new(pg_database, config.max_conflict_retries), &config).await
        }
        DatabaseBackend::Memory => {
            info!("Using the in-memory database, nothing will be persisted");
            serve(
                Data::new(MemoryDatabase::new(), config.max_conflict_retries),
                &config,
            )
            .await
        }
    }
}

async fn serve<DB>(data: Data<DB>, config: &Config) -> Result<(), AppError>
where
    DB: Database + Clone,
{
    if let Some(admin) = &config.admin {
        commands::seed_admin(&data, admin).await?;
    }

    info!("Ready to accept commands");
    commands::run_console(&data, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Sets up the tracing subscriber for the console.
fn setup_tracing() -> Result<(), AppError> {
    if cfg!(debug_assertions) {
        let filter = EnvFilter::from_default_env()
            .add_directive("none".parse()?)
            .add_directive("bracket_ledger=info".parse()?)
            .add_directive(format!("{}=info", log::AUDIT_TARGET).parse()?);

        // stdout carries the responses, so logs go to stderr
        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::NONE)
            .with_writer(std::io::stderr)
            .pretty()
            .init();

        return Ok(());
    }

    let log_file = File::create("debug.log")?;

    // Set up tracing with a filter that only logs errors in production
    tracing_subscriber::fmt::fmt()
        .with_span_events(FmtSpan::NONE)
        .with_max_level(LevelFilter::ERROR)
        .with_writer(log_file)
        .pretty()
        .init();

    Ok(())
}
