//! Email retention sweep
//!
//! Out-of-band batch job: once the initial collection phase closes, clears
//! the email of every respondent who did not opt into the newsletter.
//! Submissions themselves are kept.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dreamclimb_api::retention;

#[derive(Parser, Debug)]
#[command(name = "sweep-emails")]
#[command(about = "Clear emails of respondents who did not opt into the newsletter")]
#[command(version)]
struct Args {
    /// Path to the SQLite database
    #[arg(short, long, default_value = "dreamclimb.db", env = "DREAMCLIMB_DB")]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sweep_emails=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let db_pool = dreamclimb_common::db::init_database(&args.database)
        .await
        .context("Failed to open database")?;

    let cleared = retention::sweep_unsubscribed_emails(&db_pool)
        .await
        .context("Retention sweep failed")?;

    info!("Done: cleared {} email(s)", cleared);
    Ok(())
}
