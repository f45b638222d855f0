use std::time::Duration;

use sequent_migrate::{
    DatabaseConnection, MigrateResult, MigrationConfig, MigrationRunner, MigrationState,
    MigrationStatusReport, PostgresConnection,
};

use crate::RunOptions;

/// Environment configuration with command-line options layered on top
pub fn build_config(options: &RunOptions) -> MigrateResult<MigrationConfig> {
    let mut config = MigrationConfig::from_env()?;

    if let Some(dir) = &options.migration_dir {
        config = config.with_migration_dir(dir.clone());
    }
    if let Some(includes) = &options.includes {
        config = config.with_includes(includes.clone());
    }
    if let Some(table) = &options.table {
        config = config.with_ledger_table(table.clone());
    }
    if options.strict {
        config = config.with_strict_sequence(true);
    }
    if let Some(seconds) = options.lock_timeout {
        config = config.with_lock_timeout(Some(Duration::from_secs(seconds)));
    }

    config.validate()?;
    Ok(config)
}

pub async fn up(options: &RunOptions) -> anyhow::Result<()> {
    let runner = MigrationRunner::new(build_config(options)?)?;
    let mut conn = PostgresConnection::connect(options.connection_string.as_deref()).await?;

    let outcome = runner.run(&mut conn).await;
    close(conn).await;
    let result = outcome?;

    match result.final_watermark {
        Some(last) if !result.deferred => {
            println!("Migrations complete. Last migration id: {}", last);
        }
        _ => println!("Another instance completed the migrations"),
    }
    Ok(())
}

pub async fn status(options: &RunOptions, json: bool) -> anyhow::Result<()> {
    let runner = MigrationRunner::new(build_config(options)?)?;
    let mut conn = PostgresConnection::connect(options.connection_string.as_deref()).await?;

    let outcome = runner.status(&mut conn).await;
    close(conn).await;
    let report = outcome?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn close(conn: PostgresConnection) {
    if let Err(err) = Box::new(conn).close().await {
        tracing::warn!("Failed to close database session: {}", err);
    }
}

fn print_report(report: &MigrationStatusReport) {
    if report.migrations.is_empty() {
        println!("No migrations found");
        return;
    }

    println!("Migration Status (last migration id: {}):", report.watermark);
    for migration in &report.migrations {
        let executed = migration
            .executed_at
            .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {:>5}  {:<8}  {:<19}  {}",
            migration.sequence_id,
            state_label(&migration.state),
            executed,
            migration.name
        );
    }

    let pending = report.pending_count();
    let modified = report.modified_count();
    if modified > 0 {
        println!("{} modified migration(s) will fail the next run", modified);
    }
    if pending > 0 {
        println!("{} pending migration(s)", pending);
    } else {
        println!("Database is up to date");
    }
}

fn state_label(state: &MigrationState) -> &'static str {
    match state {
        MigrationState::Applied => "applied",
        MigrationState::Pending => "pending",
        MigrationState::Modified => "MODIFIED",
        MigrationState::Missing => "missing",
    }
}
