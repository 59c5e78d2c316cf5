//! DreamClimb Survey API - Main entry point
//!
//! Serves the questionnaire endpoints: submission upsert, problem search,
//! and tag options.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dreamclimb_api::api;
use dreamclimb_api::config::Config;
use dreamclimb_api::taxonomy::Taxonomy;

/// Command-line arguments for dreamclimb-api
#[derive(Parser, Debug)]
#[command(name = "dreamclimb-api")]
#[command(about = "Survey backend for the DreamClimb recommendation model")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8000", env = "DREAMCLIMB_PORT")]
    port: u16,

    /// Path to the SQLite database
    #[arg(short, long, default_value = "dreamclimb.db", env = "DREAMCLIMB_DB")]
    database: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dreamclimb_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting DreamClimb survey API on port {}", args.port);
    info!("Database: {}", args.database.display());

    let db_pool = dreamclimb_common::db::init_database(&args.database)
        .await
        .context("Failed to initialize database")?;

    // The taxonomy is derived from the catalog once; catalog changes need a
    // restart to show up in tag counts
    let taxonomy = Arc::new(
        Taxonomy::load(&db_pool)
            .await
            .context("Failed to load tag taxonomy")?,
    );

    let config = Config {
        db_path: args.database,
        port: args.port,
    };

    api::run(config, db_pool, taxonomy)
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}
