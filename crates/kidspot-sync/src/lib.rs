use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use kidspot_adapters::{
    adapter_for_source, AdapterSettings, FixtureReplayAdapter, PlacesAdapter, SearchArea, SourceAdapter,
    SpotEnricher,
};
use kidspot_core::{RegionBounds, SpotSource};
use kidspot_storage::{
    BackoffPolicy, HttpClientConfig, HttpFetcher, SearchCache, SpotStore, TokenBucketConfig,
};
use serde::Deserialize;

pub mod aggregate;
pub mod dedup;
pub mod ingest;
pub mod quality;
pub mod ranking;
pub mod reports;
pub mod scheduler;
#[cfg(test)]
mod testing;

pub use aggregate::{AggregationEngine, SearchError, SearchFilters};
pub use ingest::{IngestionPipeline, IngestionPlan, IngestionSettings, IngestionSummary, SkippedRecord};
pub use quality::{QualityGate, QualityInput, QualityReport};
pub use reports::{report_recent_markdown, write_run_report};
pub use scheduler::IngestionScheduler;

pub const CRATE_NAME: &str = "kidspot-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Live,
    Fixture,
    Synthetic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub mode: SourceMode,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub fixture: Option<PathBuf>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl SourceConfig {
    pub fn source(&self) -> Option<SpotSource> {
        self.source_id.parse().ok()
    }

    pub fn is_social(&self) -> bool {
        self.source().is_some_and(|s| s.is_social())
    }
}

pub fn load_source_registry(path: &Path) -> Result<SourceRegistry> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct KidspotConfig {
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
    pub sources_file: PathBuf,
    pub reports_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub ingest_cron: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub utc_offset_hours: i32,
    pub region: RegionBounds,
    pub ingest_area: SearchArea,
    pub enrich_batch: usize,
    pub enrich_delay_ms: u64,
    pub enrich_max_retries: usize,
    pub rate_limit_per_sec: Option<u32>,
    pub google_places_api_key: Option<String>,
    pub instagram_access_token: Option<String>,
    pub twitter_bearer_token: Option<String>,
}

impl KidspotConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reading through `lookup`, so tests need not touch
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let region = var("KIDSPOT_REGION_BOUNDS")
            .and_then(|v| parse_floats::<4>(&v))
            .map(|[min_lat, max_lat, min_lon, max_lon]| RegionBounds {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            })
            .unwrap_or_default();
        let ingest_area = var("KIDSPOT_INGEST_AREA")
            .and_then(|v| parse_floats::<3>(&v))
            .filter(|[_, _, radius]| *radius > 0.0)
            .map(|[lat, lon, radius]| SearchArea::new(lat, lon, radius as u32))
            .unwrap_or_else(|| SearchArea::new(34.97, 138.38, 5000));

        Self {
            database_url: var("DATABASE_URL"),
            workspace_root: var("KIDSPOT_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            sources_file: var("KIDSPOT_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sources.yaml")),
            reports_dir: var("KIDSPOT_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("reports")),
            scheduler_enabled: var("KIDSPOT_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            ingest_cron: var("KIDSPOT_INGEST_CRON").unwrap_or_else(|| "0 0 */6 * * *".to_string()),
            user_agent: var("KIDSPOT_USER_AGENT").unwrap_or_else(|| "kidspot-bot/0.1".to_string()),
            http_timeout_secs: parsed(var("KIDSPOT_HTTP_TIMEOUT_SECS")).unwrap_or(10u64).clamp(8, 15),
            utc_offset_hours: parsed(var("KIDSPOT_UTC_OFFSET_HOURS")).unwrap_or(9),
            region,
            ingest_area,
            enrich_batch: parsed(var("KIDSPOT_ENRICH_BATCH")).unwrap_or(20),
            enrich_delay_ms: parsed(var("KIDSPOT_ENRICH_DELAY_MS")).unwrap_or(200),
            enrich_max_retries: parsed(var("KIDSPOT_ENRICH_MAX_RETRIES")).unwrap_or(2),
            rate_limit_per_sec: parsed::<u32>(var("KIDSPOT_RATE_LIMIT_PER_SEC")).filter(|n| *n > 0),
            google_places_api_key: var("GOOGLE_PLACES_API_KEY"),
            instagram_access_token: var("INSTAGRAM_ACCESS_TOKEN"),
            twitter_bearer_token: var("TWITTER_BEARER_TOKEN"),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    pub fn sources_path(&self) -> PathBuf {
        self.resolve(&self.sources_file)
    }

    pub fn reports_path(&self) -> PathBuf {
        self.resolve(&self.reports_dir)
    }

    pub fn credential_for(&self, source: SpotSource) -> Option<String> {
        match source {
            SpotSource::GooglePlaces => self.google_places_api_key.clone(),
            SpotSource::Instagram => self.instagram_access_token.clone(),
            SpotSource::Twitter => self.twitter_bearer_token.clone(),
            _ => None,
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            token_bucket: self.rate_limit_per_sec.map(|per_sec| TokenBucketConfig {
                capacity: per_sec,
                refill_every: Duration::from_secs(1) / per_sec,
            }),
            ..HttpClientConfig::default()
        }
    }

    /// Enrichment calls back off linearly on 429s.
    pub fn enrichment_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            backoff: BackoffPolicy::linear(
                self.enrich_max_retries,
                Duration::from_millis(self.enrich_delay_ms.max(1) * 5),
            ),
            ..self.http_client_config()
        }
    }

    pub fn ingestion_settings(&self) -> IngestionSettings {
        IngestionSettings {
            area: self.ingest_area,
            enrich_batch: self.enrich_batch,
            enrich_delay: Duration::from_millis(self.enrich_delay_ms),
            utc_offset_hours: self.utc_offset_hours,
            ..IngestionSettings::default()
        }
    }
}

fn parsed<T: FromStr>(raw: Option<String>) -> Option<T> {
    raw.and_then(|v| v.parse().ok())
}

fn parse_floats<const N: usize>(raw: &str) -> Option<[f64; N]> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    let values: [f64; N] = values.try_into().ok()?;
    values.iter().all(|v| v.is_finite()).then_some(values)
}

/// Builds the adapter a registry entry describes. Fixture mode wraps the
/// adapter so it replays the recorded bundle instead of calling out.
pub fn build_source_adapter(config: &KidspotConfig, source: &SourceConfig) -> Result<Arc<dyn SourceAdapter>> {
    let spot_source = source
        .source()
        .with_context(|| format!("unknown source_id {}", source.source_id))?;
    let settings = AdapterSettings {
        endpoint: source.endpoint.clone(),
        credential: config.credential_for(spot_source),
        hashtags: source.hashtags.clone(),
        account_id: source.account_id.clone(),
        synthetic: source.mode == SourceMode::Synthetic,
    };
    let Some(adapter) = adapter_for_source(&source.source_id, &settings) else {
        bail!("no adapter registered for source_id {}", source.source_id);
    };

    match source.mode {
        SourceMode::Fixture => {
            let bundle = source.fixture.clone().unwrap_or_else(|| {
                PathBuf::from("fixtures")
                    .join(&source.source_id)
                    .join("sample")
                    .join("bundle.json")
            });
            Ok(Arc::new(FixtureReplayAdapter::new(adapter, config.resolve(&bundle))))
        }
        SourceMode::Live | SourceMode::Synthetic => Ok(Arc::from(adapter)),
    }
}

fn build_enabled(
    config: &KidspotConfig,
    registry: &SourceRegistry,
    keep: impl Fn(&SourceConfig) -> bool,
) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    registry
        .sources
        .iter()
        .filter(|s| s.enabled && keep(s))
        .map(|s| build_source_adapter(config, s))
        .collect()
}

/// Adapters the aggregation engine fans out to: every enabled non-social source.
pub fn search_adapters(config: &KidspotConfig, registry: &SourceRegistry) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    build_enabled(config, registry, |s| !s.is_social())
}

/// Social collectors feeding ingestion.
pub fn social_collectors(config: &KidspotConfig, registry: &SourceRegistry) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    build_enabled(config, registry, SourceConfig::is_social)
}

/// Place enrichment, when a Places key is configured.
pub fn places_enricher(config: &KidspotConfig, registry: &SourceRegistry) -> Option<Arc<dyn SpotEnricher>> {
    let key = config.google_places_api_key.clone()?;
    let endpoint = registry
        .sources
        .iter()
        .find(|s| s.source() == Some(SpotSource::GooglePlaces))
        .and_then(|s| s.endpoint.clone());
    Some(Arc::new(PlacesAdapter::new(Some(key), endpoint)))
}

pub fn build_engine(config: &KidspotConfig, registry: &SourceRegistry) -> Result<AggregationEngine> {
    let http = HttpFetcher::new(config.http_client_config())?;
    Ok(AggregationEngine::new(search_adapters(config, registry)?, Arc::new(http))
        .with_utc_offset(config.utc_offset_hours)
        .with_cache(Arc::new(SearchCache::new())))
}

pub fn build_pipeline(
    config: &KidspotConfig,
    registry: &SourceRegistry,
    store: Arc<dyn SpotStore>,
) -> Result<IngestionPipeline> {
    let http = HttpFetcher::new(config.http_client_config())?;
    let enrich_http = HttpFetcher::new(config.enrichment_client_config())?;
    let mut pipeline = IngestionPipeline::new(
        social_collectors(config, registry)?,
        store,
        QualityGate::new(config.region),
        http,
        enrich_http,
        config.ingestion_settings(),
    )
    .with_reports_dir(config.reports_path());
    if let Some(enricher) = places_enricher(config, registry) {
        pipeline = pipeline.with_enricher(enricher);
    }
    Ok(pipeline)
}
