use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shelf_core::persist::format_timestamp;
use shelf_core::{ProviderConfig, RainforestClient, RatingSnapshot, RatingsService, RefreshConfig, SledStore, SweepOutcome};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ratingsctl")]
#[command(about = "Inspect and maintain the book ratings cache", long_about = None)]
struct Cli {
    /// Ratings database directory (must not be open by a running server)
    #[arg(long, global = true, default_value = "./data/ratings")]
    db: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every cached rating
    List {
        /// Emit JSON lines instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Refresh every catalog item from the provider now
    Sweep,
    /// Delete all cached ratings
    Clear,
    /// Show refresh state
    Status,
}

#[derive(Serialize)]
struct ListedRating<'a> {
    item_id: &'a str,
    rating: f64,
    review_count: u32,
    fetched_at: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    let service = open_service(&cli.db)?;

    match cli.command {
        Commands::List { json } => list(&service.all_ratings().await, json)?,
        Commands::Sweep => sweep(&service).await?,
        Commands::Clear => {
            let outcome = service.clear_cache().await;
            println!("{}", outcome.message);
            if !outcome.success {
                bail!("clear failed");
            }
        }
        Commands::Status => {
            service.ensure_initialized().await;
            println!("{}", serde_json::to_string_pretty(&service.status())?);
        }
    }

    service.shutdown().await;
    Ok(())
}

fn open_service(db: &str) -> Result<Arc<RatingsService>> {
    let store = Arc::new(SledStore::open(db)?);
    tracing::debug!(db, rows = store.rating_rows(), "opened ratings store");
    let provider_config = ProviderConfig::from_env();
    let provider = Arc::new(RainforestClient::new(provider_config.api_key, &provider_config.base_url, provider_config.timeout)?);
    Ok(RatingsService::new(store, provider, RefreshConfig::from_env()))
}

fn list(ratings: &[RatingSnapshot], json: bool) -> Result<()> {
    for r in ratings {
        let fetched_at = format_timestamp(r.fetched_at)?;
        if json {
            let row = ListedRating { item_id: &r.item_id, rating: r.rating, review_count: r.review_count, fetched_at };
            println!("{}", serde_json::to_string(&row)?);
        } else {
            println!("{:<12} {:>4.1} {:>7}  {}", r.item_id, r.rating, r.review_count, fetched_at);
        }
    }
    if !json {
        eprintln!("{} cached ratings", ratings.len());
    }
    Ok(())
}

async fn sweep(service: &RatingsService) -> Result<()> {
    if !service.status().provider_configured {
        bail!("RAINFOREST_API_KEY is not set");
    }
    match service.refresh_all().await {
        SweepOutcome::Completed(report) => {
            println!(
                "refreshed {} of {} items ({} failed) in {:.1}s",
                report.succeeded,
                service.catalog().len(),
                report.failed,
                report.elapsed.as_secs_f64()
            );
            if report.succeeded == 0 {
                bail!("no ratings could be fetched");
            }
        }
        SweepOutcome::Skipped => println!("a refresh is already running"),
    }
    Ok(())
}
