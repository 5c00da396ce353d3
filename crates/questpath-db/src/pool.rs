use std::time::Duration;

use anyhow::{Context, Result, bail};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/questpath-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables owned by questpath, parents before children.
pub const SCHEMA_TABLES: [&str; 5] = ["users", "goals", "plans", "stages", "events"];

const APPLICATION_NAME: &str = "questpath";
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

fn connect_options(url: &str) -> Result<PgConnectOptions> {
    let options: PgConnectOptions = url.parse().context("invalid database URL")?;
    Ok(options.application_name(APPLICATION_NAME))
}

/// Create a connection pool sized from the config. Connections identify
/// themselves as `questpath` in `pg_stat_activity`.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let name = config.database_name().unwrap_or("<unknown>");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(connect_options(&config.database_url)?)
        .await
        .with_context(|| format!("failed to connect to database {name}"))?;

    info!(db = name, max_connections = config.max_connections, "database pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to apply questpath schema migrations")?;

    info!(migrations = MIGRATOR.iter().count(), "schema up to date");
    Ok(())
}

/// `CREATE DATABASE` takes no bind parameters, so the name is spliced into
/// the statement and must be a plain identifier.
fn checked_database_name(name: &str) -> Result<&str> {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !plain {
        bail!("refusing to create database {name:?}: not a plain identifier");
    }
    Ok(name)
}

/// Create the configured database through the `postgres` maintenance
/// database when it does not exist yet. Used by `questpath db-init`.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let name = config
        .database_name()
        .context("database URL names no database")?;
    let name = checked_database_name(name)?;

    let maint = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(connect_options(&config.maintenance_url())?)
        .await
        .context("failed to connect to maintenance database")?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(name)
        .fetch_one(&maint)
        .await
        .context("failed to look up database")?;

    if exists {
        info!(db = name, "database already exists");
    } else {
        maint
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .with_context(|| format!("failed to create database {name}"))?;
        info!(db = name, "database created");
    }

    maint.close().await;
    Ok(())
}

/// Row count of every questpath table, in [`SCHEMA_TABLES`] order.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let mut counts = Vec::with_capacity(SCHEMA_TABLES.len());
    for table in SCHEMA_TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push((table.to_owned(), count));
    }
    Ok(counts)
}
