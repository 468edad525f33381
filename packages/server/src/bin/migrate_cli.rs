//! Runs the SQL migrations under `migrations/` against `DATABASE_URL`.
//! Mirrors the teacher codebase's `migrate_cli.rs`: a thin wrapper around
//! `sqlx::migrate!`, not a data-backfill tool.

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(about = "Apply pending SQL migrations to the fabric provisioning database")]
struct Args {
    /// Database URL; defaults to $DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let database_url = args
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("DATABASE_URL must be set (or pass --database-url)")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    tracing::info!("migrations applied");
    Ok(())
}
