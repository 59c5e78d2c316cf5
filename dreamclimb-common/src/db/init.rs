//! Database initialization
//!
//! Creates the SQLite database on first run and brings the schema up to
//! date. Schema creation is idempotent so it can run on every startup and
//! on in-memory pools in tests.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while a submission upsert is in flight
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Writers on the same identity serialize here instead of failing fast
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent - safe to call multiple times)
///
/// Exposed separately so tests can build the schema on `sqlite::memory:`
/// pools without touching the filesystem.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_sectors_table(pool).await?;
    create_problems_table(pool).await?;
    create_submissions_table(pool).await?;
    create_submission_problems_table(pool).await?;
    create_submission_tags_table(pool).await?;
    Ok(())
}

async fn create_sectors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sectors (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_problems_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS problems (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade TEXT NOT NULL,
            styles TEXT,
            sector_id INTEGER REFERENCES sectors(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_problems_name ON problems(name)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_submissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id TEXT PRIMARY KEY,
            fingerprint TEXT NOT NULL,
            email TEXT,
            update_code TEXT NOT NULL UNIQUE,
            gender TEXT,
            height_cm INTEGER,
            arm_span_cm INTEGER,
            subscribe_newsletter INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Unique: at most one submission per fingerprint, enforced at the
    // storage layer so racing first submissions cannot both insert
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_submissions_fingerprint ON submissions(fingerprint)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_submissions_email ON submissions(email)")
        .execute(pool)
        .await?;
    Ok(())
}

async fn create_submission_problems_table(pool: &SqlitePool) -> Result<()> {
    // Composite primary key gives climbed-problem references set semantics
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submission_problems (
            submission_id TEXT NOT NULL REFERENCES submissions(id),
            problem_id TEXT NOT NULL,
            PRIMARY KEY (submission_id, problem_id)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_submission_tags_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submission_tags (
            submission_id TEXT NOT NULL REFERENCES submissions(id),
            tag_key TEXT NOT NULL,
            PRIMARY KEY (submission_id, tag_key)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
