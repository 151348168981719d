use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use kidspot_core::{Category, GeoPoint, SpotSource};
use kidspot_storage::{InMemorySpotStore, PgSpotStore, SpotStore};
use kidspot_sync::ranking::{apply_seasonal_boost, rank_for_profile, rank_weekly, seasonal_recommendations, AgeWeights};
use kidspot_sync::{
    build_engine, build_pipeline, load_source_registry, report_recent_markdown, IngestionScheduler, KidspotConfig,
    QualityGate, QualityInput, SearchFilters,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "kidspot-cli")]
#[command(about = "Kid-friendly spot finder command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, clap::Args)]
struct AreaArgs {
    #[arg(long, default_value_t = 34.97, allow_negative_numbers = true)]
    lat: f64,
    #[arg(long, default_value_t = 138.38, allow_negative_numbers = true)]
    lon: f64,
    #[arg(long, default_value_t = 5000.0)]
    radius: f64,
    /// Repeatable; omit for every category.
    #[arg(long = "category")]
    categories: Vec<Category>,
    #[arg(long)]
    min_score: Option<u8>,
}

impl AreaArgs {
    fn filters(&self) -> SearchFilters {
        SearchFilters {
            categories: (!self.categories.is_empty()).then(|| self.categories.clone()),
            min_child_score: self.min_score,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Aggregate candidates around a point from every enabled search source.
    Search {
        #[command(flatten)]
        area: AreaArgs,
    },
    /// Search, then rank by popularity with the seasonal boost applied.
    Rank {
        #[command(flatten)]
        area: AreaArgs,
        /// Defaults to the current month.
        #[arg(long)]
        month: Option<u32>,
        #[arg(long, default_value = "")]
        region: String,
        /// Age-bucket weights `baby,toddler,child` for profile ranking.
        #[arg(long, value_delimiter = ',')]
        weights: Option<Vec<f64>>,
    },
    /// Seasonal recommendations for a month.
    Seasonal {
        #[arg(long)]
        month: Option<u32>,
        #[arg(long, default_value = "")]
        region: String,
    },
    /// Run the quality gate over a spot draft read from a JSON file.
    Validate {
        file: PathBuf,
        /// Also look for duplicates in the configured store.
        #[arg(long)]
        check_store: bool,
    },
    /// Run one ingestion pass now.
    Ingest,
    /// Run ingestion on the configured cron until interrupted.
    Schedule,
    Migrate,
    /// Summarize recent ingestion runs.
    Report {
        #[arg(long, default_value_t = 5)]
        runs: usize,
    },
}

/// The fields a hand-written spot needs for validation.
#[derive(Debug, Deserialize)]
struct SpotDraft {
    #[serde(default)]
    name: String,
    lat: Option<f64>,
    lon: Option<f64>,
    description: Option<String>,
    source: Option<SpotSource>,
    source_url: Option<String>,
    #[serde(default)]
    popularity_score: f64,
}

impl SpotDraft {
    fn as_input(&self) -> QualityInput<'_> {
        QualityInput {
            name: &self.name,
            location: self.lat.zip(self.lon).map(|(lat, lon)| GeoPoint::new(lat, lon)),
            description: self.description.as_deref(),
            source: self.source,
            source_url: self.source_url.as_deref(),
            popularity_score: self.popularity_score,
        }
    }
}

#[derive(Debug, Serialize)]
struct RankOutput<T> {
    month: u32,
    recommendations: Vec<String>,
    spots: Vec<T>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}

fn current_month() -> u32 {
    Utc::now().month()
}

async fn open_store(config: &KidspotConfig) -> Result<Arc<dyn SpotStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgSpotStore::connect(url).await.context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set; using a process-local in-memory store");
            Ok(Arc::new(InMemorySpotStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = KidspotConfig::from_env();

    match cli.command.unwrap_or(Commands::Ingest) {
        Commands::Search { area } => {
            let registry = load_source_registry(&config.sources_path())?;
            let engine = build_engine(&config, &registry)?;
            let spots = engine.search(area.lat, area.lon, area.radius, &area.filters()).await?;
            print_json(&spots)?;
        }
        Commands::Rank {
            area,
            month,
            region,
            weights,
        } => {
            let registry = load_source_registry(&config.sources_path())?;
            let engine = build_engine(&config, &registry)?;
            let month = month.unwrap_or_else(current_month);
            let spots = engine.search(area.lat, area.lon, area.radius, &area.filters()).await?;
            let recs = seasonal_recommendations(month, &region);
            let ranked = apply_seasonal_boost(rank_weekly(spots), &recs);
            let recommendations = recs.into_iter().map(|r| r.title).collect();
            match weights.as_deref() {
                Some([baby, toddler, child]) => print_json(&RankOutput {
                    month,
                    recommendations,
                    spots: rank_for_profile(ranked, AgeWeights::normalized(*baby, *toddler, *child)),
                })?,
                Some(other) => bail!("--weights needs exactly three values, got {}", other.len()),
                None => print_json(&RankOutput {
                    month,
                    recommendations,
                    spots: ranked,
                })?,
            }
        }
        Commands::Seasonal { month, region } => {
            let month = month.unwrap_or_else(current_month);
            print_json(&seasonal_recommendations(month, &region))?;
        }
        Commands::Validate { file, check_store } => {
            let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
            let draft: SpotDraft =
                serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
            let gate = QualityGate::new(config.region);
            let report = if check_store {
                let store = open_store(&config).await?;
                gate.check(&draft.as_input(), store.as_ref()).await?
            } else {
                gate.evaluate(&draft.as_input())
            };
            print_json(&report)?;
        }
        Commands::Ingest => {
            let registry = load_source_registry(&config.sources_path())?;
            let store = open_store(&config).await?;
            let pipeline = build_pipeline(&config, &registry, store)?;
            match pipeline.run().await {
                Some(summary) => {
                    println!(
                        "ingest complete: run_id={} added={} updated={} skipped={} errors={} total={}",
                        summary.run_id,
                        summary.added,
                        summary.updated,
                        summary.skipped.len(),
                        summary.errors.len(),
                        summary
                            .total_spots
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "?".to_string())
                    );
                }
                None => println!("ingest skipped: a run is already in progress"),
            }
        }
        Commands::Schedule => {
            if !config.scheduler_enabled {
                warn!("KIDSPOT_SCHEDULER_ENABLED is off; starting anyway because schedule was requested");
            }
            let registry = load_source_registry(&config.sources_path())?;
            let store = open_store(&config).await?;
            let pipeline = Arc::new(build_pipeline(&config, &registry, store)?);
            let scheduler = IngestionScheduler::new(pipeline, config.ingest_cron.clone());
            scheduler.start().await?;
            info!(cron = %config.ingest_cron, "waiting for ctrl-c");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
            scheduler.stop().await?;
        }
        Commands::Migrate => {
            let Some(url) = &config.database_url else {
                bail!("DATABASE_URL must be set to run migrations");
            };
            let store = PgSpotStore::connect(url).await.context("connecting to postgres")?;
            store.migrate().await.context("running migrations")?;
            println!("migrations applied");
        }
        Commands::Report { runs } => {
            println!("{}", report_recent_markdown(runs, &config.reports_path())?);
        }
    }

    Ok(())
}
