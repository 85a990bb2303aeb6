//! Bootstrap driver for the client database.
//!
//! # Responsibility
//! - Open the database, verify connectivity and bring the schema up to date.
//! - Exercise the client service once so wiring problems surface immediately.
//! - Keep output deterministic for quick local sanity checks.

use clap::Parser;
use clientdb_core::{
    core_version, default_log_level, init_logging_with, ClientService, Database, DbConfig,
    LoggingOptions, MigrationConfig, Migrator, RepoError, SqliteClientRepository,
};
use log::{error, info};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(name = "clientdb", version, about = "Migrate and exercise the client database")]
struct Args {
    /// Database file, or `:memory:` for a throwaway database
    #[arg(long)]
    db: Option<String>,

    /// Drop every table before migrating (destructive)
    #[arg(long)]
    clean: bool,

    /// Directory with NNNN_description.sql scripts; embedded scripts when unset
    #[arg(long)]
    migrations_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value_t = default_log_level().to_string())]
    log_level: String,

    /// Absolute directory for rolling log files; file logging is off when unset
    #[arg(long, env = "CLIENTDB_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Apply migrations and print their status without touching client data
    #[arg(long)]
    migrate_only: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("clientdb: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    if let Some(log_dir) = &args.log_dir {
        let mut options = LoggingOptions::new(args.log_level.as_str(), log_dir);
        options.mirror_to_stderr = true;
        init_logging_with(&options)?;
    }

    let mut db_config = DbConfig::from_env()?;
    if let Some(location) = &args.db {
        db_config = db_config.with_location(location)?;
    }
    let mut migration_config = MigrationConfig::from_env()?;
    migration_config.clean_enabled |= args.clean;
    if let Some(dir) = &args.migrations_dir {
        migration_config.scripts_dir = Some(dir.clone());
    }

    println!("clientdb_core version={}", core_version());

    let database = Database::open(db_config)?;
    database.check_connection()?;

    let migrator = Migrator::from_config(migration_config)?;
    let report = if args.clean {
        info!("event=cli_migrate module=cli status=start mode=clean_and_migrate");
        migrator.clean_and_migrate(&database)?
    } else {
        info!("event=cli_migrate module=cli status=start mode=migrate");
        migrator.migrate(&database)?
    };
    println!(
        "migrations applied={:?} schema_version={}",
        report.applied, report.schema_version
    );

    for migration in migrator.info(&database)? {
        println!(
            "migration version={} description=\"{}\" state={}",
            migration.version,
            migration.description,
            migration.state.as_str()
        );
    }

    if !args.migrate_only {
        exercise_clients(&database)?;
    }

    database.shutdown();
    Ok(())
}

fn exercise_clients(database: &Database) -> Result<(), RepoError> {
    let service = ClientService::new(SqliteClientRepository::try_new(database)?);

    let id = service.create("New Client")?;
    println!("created client id={id}");
    println!("client id={id} name=\"{}\"", service.get_by_id(id)?);

    let renamed = service.rename_and_fetch(id, "Updated Client Name")?;
    println!("renamed client id={} name=\"{}\"", renamed.id, renamed.name);

    for client in service.list_all()? {
        println!("client id={} name=\"{}\"", client.id, client.name);
    }

    service.delete_by_id(id)?;
    println!("deleted client id={id} remaining={}", service.count()?);
    Ok(())
}
