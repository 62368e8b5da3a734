use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clickpulse::config::Config;
use clickpulse::context::AppContext;
use clickpulse::counters::Resolution;
use clickpulse::ingest::{ChannelSource, IngestSettings, IngestionLoop};
use clickpulse::models::Ad;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "clickpulse-admin")]
#[command(about = "ClickPulse ad and analytics management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the ad catalog
    Ads {
        #[command(subcommand)]
        command: AdCommands,
    },
    /// Show click analytics for an ad
    Analytics {
        ad_id: String,
        /// Sliding window in seconds
        #[arg(long, default_value_t = 300)]
        window_secs: u64,
    },
    /// Show per-bucket click counts for an ad
    Buckets {
        ad_id: String,
        /// minute, hour or day
        #[arg(long, default_value = "minute")]
        resolution: Resolution,
        /// Number of buckets, capped at 1440
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Show the most recent archived click events for an ad
    Events {
        ad_id: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Replay a JSON-lines file of click events through the ingestion pipeline
    IngestFile {
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum AdCommands {
    /// List all ads
    List,
    /// Add or replace an ad
    Add {
        id: String,
        image_url: String,
        target_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let ctx = Arc::new(AppContext::connect(config).await?);

    match cli.command {
        Commands::Ads {
            command: AdCommands::List,
        } => {
            let listing = ctx.catalog.list_ads().await?;
            if listing.ads.is_empty() {
                println!("No ads found.");
            } else {
                println!("{:<20} {:<40} {}", "Ad ID", "Image URL", "Target URL");
                println!("{}", "-".repeat(100));
                for ad in &listing.ads {
                    println!("{:<20} {:<40} {}", ad.id, ad.image_url, ad.target_url);
                }
                println!(
                    "\n{} ad(s) ({})",
                    listing.ads.len(),
                    if listing.metadata.cache_hit { "cached" } else { "from store" }
                );
            }
        }
        Commands::Ads {
            command:
                AdCommands::Add {
                    id,
                    image_url,
                    target_url,
                },
        } => {
            let ad = Ad {
                id,
                image_url,
                target_url,
            };
            ctx.events.upsert_ad(&ad).await?;
            let ads = ctx.catalog.refresh().await?;
            println!("✓ Saved ad '{}' ({} ad(s) in catalog)", ad.id, ads.len());
        }
        Commands::Analytics { ad_id, window_secs } => {
            let view = ctx
                .aggregator
                .query_analytics(&ad_id, Duration::from_secs(window_secs))
                .await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Buckets {
            ad_id,
            resolution,
            count,
        } => {
            let series = ctx.aggregator.bucket_series(&ad_id, resolution, count).await?;
            println!("{:<16} {}", "Bucket", "Clicks");
            println!("{}", "-".repeat(28));
            for bucket in series.buckets {
                println!("{:<16} {}", bucket.bucket, bucket.clicks);
            }
        }
        Commands::Events { ad_id, limit } => {
            let records = ctx.events.events_for_ad(&ad_id, limit).await?;
            if records.is_empty() {
                println!("No events found for ad '{}'.", ad_id);
            }
            for record in records {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Commands::IngestFile { path } => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;

            let settings = IngestSettings::from(&ctx.config.ingest);
            let (producer, source) =
                ChannelSource::new(&ctx.config.kafka.topic, settings.queue_capacity);
            let ingestion = IngestionLoop::new(source, Arc::clone(&ctx.aggregator), settings);

            // Never flipped: the loop stops once the file is exhausted
            let (_shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(ingestion.run(shutdown_rx));

            let mut lines = BufReader::new(file).lines();
            let mut published = 0u64;
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                producer.publish(line).await?;
                published += 1;
            }
            drop(producer);

            let stats = handle.await.context("ingestion task failed")?;
            println!("✓ Replayed {} line(s) from {}", published, path.display());
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
