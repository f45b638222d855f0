mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use commands::migrate;
use logging::LoggingConfig;

#[derive(Parser)]
#[command(name = "sequent")]
#[command(version)]
#[command(about = "Apply numbered SQL migrations to PostgreSQL, once and in order")]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending migrations
    Up {
        #[command(flatten)]
        options: RunOptions,
    },

    /// Show which migrations are applied, pending, modified or missing
    Status {
        #[command(flatten)]
        options: RunOptions,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Connection and catalog options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// PostgreSQL connection string; PG* variables are used when absent
    #[arg(long, short = 'c', env = "DATABASE_URL")]
    pub connection_string: Option<String>,

    /// Directory containing migration files
    #[arg(long, short = 'd')]
    pub migration_dir: Option<PathBuf>,

    /// Glob pattern selecting migration files
    #[arg(long, short = 'i')]
    pub includes: Option<String>,

    /// Table recording applied migrations
    #[arg(long)]
    pub table: Option<String>,

    /// Fail when two files share a sequence number
    #[arg(long)]
    pub strict: bool,

    /// Give up waiting for another instance's lock after SECS seconds
    #[arg(long, value_name = "SECS")]
    pub lock_timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    }
    .with_json(cli.log_json);

    let outcome = match logging::init_logging(&log_config) {
        Ok(()) => run(cli.command).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if std::env::var_os("DEBUG").is_some() {
                eprintln!("Error: {:?}", err);
            } else {
                eprintln!("Error: {}", err);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Up { options } => {
            migrate::up(&options).await?;
        }
        Commands::Status { options, json } => {
            migrate::status(&options, json).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_arguments() {
        let cli = Cli::try_parse_from([
            "sequent",
            "up",
            "-c",
            "postgres://localhost/app",
            "-d",
            "db/migrations",
            "--strict",
            "--lock-timeout",
            "30",
        ])
        .unwrap();

        match cli.command {
            Commands::Up { options } => {
                assert_eq!(options.connection_string.as_deref(), Some("postgres://localhost/app"));
                assert_eq!(options.migration_dir, Some(PathBuf::from("db/migrations")));
                assert!(options.strict);
                assert_eq!(options.lock_timeout, Some(30));
                assert!(options.table.is_none());
            }
            _ => panic!("expected up"),
        }
    }

    #[test]
    fn test_status_arguments() {
        let cli = Cli::try_parse_from(["sequent", "status", "--json", "--table", "schema_migrations", "-v"]).unwrap();

        assert!(cli.verbose);
        match cli.command {
            Commands::Status { options, json } => {
                assert!(json);
                assert_eq!(options.table.as_deref(), Some("schema_migrations"));
            }
            _ => panic!("expected status"),
        }
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["sequent", "down"]).is_err());
        assert!(Cli::try_parse_from(["sequent"]).is_err());
    }
}
