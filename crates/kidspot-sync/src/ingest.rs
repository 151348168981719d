//! Background ingestion of social-sourced spots into the store.
//!
//! `plan` reads only: it collects, dedups, enriches and decides what should
//! change. `run` applies the plan and reports. Only records whose quality
//! strictly beats the stored record's recomputed quality replace it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use kidspot_adapters::{AdapterContext, SearchArea, SourceAdapter, SpotEnricher};
use kidspot_core::{CandidateSpot, SpotDelta, UpsertIntent};
use kidspot_storage::{HttpFetcher, SpotStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::dedup_by_name;
use crate::quality::{QualityGate, QualityInput, DUPLICATE_EPSILON_DEG};
use crate::reports::write_run_report;

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub area: SearchArea,
    /// Enrichment lookups per run; records past the cap go in unenriched.
    pub enrich_batch: usize,
    /// Pause between consecutive enrichment lookups.
    pub enrich_delay: Duration,
    pub utc_offset_hours: i32,
    pub proximity_epsilon: f64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            area: SearchArea::new(34.97, 138.38, 5000),
            enrich_batch: 20,
            enrich_delay: Duration::from_millis(200),
            utc_offset_hours: 9,
            proximity_epsilon: DUPLICATE_EPSILON_DEG,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionPlan {
    pub run_id: Uuid,
    pub collected: usize,
    pub intents: Vec<UpsertIntent>,
    pub skipped: Vec<SkippedRecord>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collected: usize,
    pub added: usize,
    pub updated: usize,
    pub skipped: Vec<SkippedRecord>,
    pub errors: Vec<String>,
    pub total_spots: Option<u64>,
    /// The run ended early on a stop request.
    pub stopped: bool,
}

/// Clears the running flag however the run ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct IngestionPipeline {
    collectors: Vec<Arc<dyn SourceAdapter>>,
    enricher: Option<Arc<dyn SpotEnricher>>,
    store: Arc<dyn SpotStore>,
    gate: QualityGate,
    http: HttpFetcher,
    enrich_http: HttpFetcher,
    settings: IngestionSettings,
    reports_dir: Option<PathBuf>,
    running: AtomicBool,
    stop: Arc<AtomicBool>,
}

impl IngestionPipeline {
    pub fn new(
        collectors: Vec<Arc<dyn SourceAdapter>>,
        store: Arc<dyn SpotStore>,
        gate: QualityGate,
        http: HttpFetcher,
        enrich_http: HttpFetcher,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            collectors,
            enricher: None,
            store,
            gate,
            http,
            enrich_http,
            settings,
            reports_dir: None,
            running: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn SpotEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_reports_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.reports_dir = Some(dir.into());
        self
    }

    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ends the current run at the next record boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Re-arms the pipeline after a stop. Runs never clear the flag themselves,
    /// so a stop raised while a tick is queued still holds.
    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Collects, dedups, enriches and decides. Never writes to the store.
    pub async fn plan(&self) -> IngestionPlan {
        let ctx = AdapterContext::new(Uuid::new_v4(), Utc::now(), self.settings.utc_offset_hours);
        let mut errors = Vec::new();

        let collected = self.collect(&ctx, &mut errors).await;
        let total = collected.len();
        let mut candidates = dedup_by_name(collected);
        self.enrich(&ctx, &mut candidates, &mut errors).await;

        let mut intents = Vec::new();
        let mut skipped = Vec::new();
        for spot in candidates {
            if self.stop_requested() {
                info!(run_id = %ctx.run_id, "stop requested; ending plan early");
                break;
            }
            let report = self.gate.evaluate(&QualityInput::from(&spot));
            if !report.is_valid {
                let reason = if report.issues.is_empty() {
                    format!("quality score {} below threshold", report.score)
                } else {
                    report.issues.join("; ")
                };
                debug!(spot = %spot.name, score = report.score, %reason, "candidate rejected by quality gate");
                skipped.push(SkippedRecord {
                    name: spot.name,
                    reason,
                });
                continue;
            }

            let existing = self
                .store
                .find_by_name_or_proximity(&spot.name, spot.location, self.settings.proximity_epsilon)
                .await;
            match existing {
                Err(err) => errors.push(format!("{}: store lookup failed: {err}", spot.name)),
                Ok(None) => intents.push(UpsertIntent::Create { spot }),
                Ok(Some(record)) => {
                    let stored = self.gate.evaluate(&QualityInput::from(&record)).score;
                    if report.score > stored {
                        intents.push(UpsertIntent::Update {
                            id: record.id,
                            name: spot.name.clone(),
                            delta: SpotDelta::from_candidate(&spot),
                        });
                    } else {
                        debug!(spot = %spot.name, candidate = report.score, stored, "stored record is at least as good");
                        skipped.push(SkippedRecord {
                            reason: format!(
                                "stored record '{}' scores {stored}, candidate scores {}",
                                record.spot.name, report.score
                            ),
                            name: spot.name,
                        });
                    }
                }
            }
        }

        IngestionPlan {
            run_id: ctx.run_id,
            collected: total,
            intents,
            skipped,
            errors,
        }
    }

    async fn collect(&self, ctx: &AdapterContext, errors: &mut Vec<String>) -> Vec<CandidateSpot> {
        let area = self.settings.area;
        let calls = self
            .collectors
            .iter()
            .map(|collector| async move { (collector.source(), collector.collect(&self.http, ctx, &area).await) });

        let mut out = Vec::new();
        for (source, result) in join_all(calls).await {
            match result {
                Ok(spots) => out.extend(spots),
                Err(err) => {
                    warn!(%source, error = %err, "collector failed; continuing without it");
                    errors.push(format!("source {source}: {err}"));
                }
            }
        }
        out
    }

    async fn enrich(&self, ctx: &AdapterContext, candidates: &mut [CandidateSpot], errors: &mut Vec<String>) {
        let Some(enricher) = self.enricher.as_ref().filter(|e| e.is_configured()) else {
            return;
        };

        let mut attempted = 0usize;
        for spot in candidates.iter_mut() {
            if attempted >= self.settings.enrich_batch {
                debug!(batch = self.settings.enrich_batch, "enrichment batch cap reached");
                break;
            }
            if self.stop_requested() {
                break;
            }
            if spot.location.is_none() {
                continue;
            }
            if attempted > 0 && !self.settings.enrich_delay.is_zero() {
                tokio::time::sleep(self.settings.enrich_delay).await;
            }
            attempted += 1;

            match enricher.enrich(&self.enrich_http, ctx, spot).await {
                Ok(Some(found)) => found.apply_to(spot),
                Ok(None) => {}
                Err(err) if err.is_rate_limited() => {
                    warn!(spot = %spot.name, error = %err, "enrichment rate limit exhausted; moving on");
                    errors.push(format!("{}: enrichment rate limited: {err}", spot.name));
                }
                Err(err) => {
                    warn!(spot = %spot.name, error = %err, "enrichment failed");
                    errors.push(format!("{}: enrichment failed: {err}", spot.name));
                }
            }
        }
    }

    /// One full ingestion run. Returns `None` without doing anything when a run
    /// is already in progress.
    pub async fn run(&self) -> Option<IngestionSummary> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("ingestion already running; trigger ignored");
            return None;
        }
        let _guard = RunningGuard(&self.running);

        let started_at = Utc::now();
        let plan = self.plan().await;
        let span = info_span!("ingest", run_id = %plan.run_id);
        let summary = self.apply(plan, started_at).instrument(span).await;

        if let Some(dir) = &self.reports_dir {
            if let Err(err) = write_run_report(dir, &summary).await {
                warn!(run_id = %summary.run_id, error = %err, "failed to write ingestion report");
            }
        }
        Some(summary)
    }

    async fn apply(&self, plan: IngestionPlan, started_at: DateTime<Utc>) -> IngestionSummary {
        info!(
            collected = plan.collected,
            intents = plan.intents.len(),
            skipped = plan.skipped.len(),
            "ingestion run started"
        );

        let IngestionPlan {
            run_id,
            collected,
            intents,
            skipped,
            mut errors,
        } = plan;
        let (mut added, mut updated) = (0usize, 0usize);
        let mut stopped = false;

        for intent in intents {
            if self.stop_requested() {
                stopped = true;
                break;
            }
            match intent {
                UpsertIntent::Create { spot } => match self.store.create(&spot).await {
                    Ok(_) => added += 1,
                    Err(err) => errors.push(format!("{}: create failed: {err}", spot.name)),
                },
                UpsertIntent::Update { id, name, delta } => match self.store.update(id, &delta).await {
                    Ok(_) => updated += 1,
                    Err(err) => errors.push(format!("{name}: update failed: {err}")),
                },
            }
        }
        stopped |= self.stop_requested();

        let total_spots = match self.store.count().await {
            Ok(n) => Some(n),
            Err(err) => {
                errors.push(format!("counting stored spots failed: {err}"));
                None
            }
        };

        let summary = IngestionSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            collected,
            added,
            updated,
            skipped,
            errors,
            total_spots,
            stopped,
        };
        info!(
            added = summary.added,
            updated = summary.updated,
            skipped = summary.skipped.len(),
            errors = summary.errors.len(),
            stopped = summary.stopped,
            "ingestion run finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kidspot_adapters::{AdapterError, PlaceMatch};
    use kidspot_core::{Category, GeoPoint, PersistedSpot, SpotSource};
    use kidspot_storage::{FetchError, HttpClientConfig, InMemorySpotStore, StoreError};

    use crate::testing::{canned, CannedAdapter, ScriptedEnricher};

    const GOOD_DESCRIPTION: &str = "子連れに人気のカフェ。キッズスペースと駐車場あり、営業時間は10時から17時。";

    fn social(name: &str, description: Option<&str>) -> CandidateSpot {
        let mut spot = CandidateSpot::new(name, Category::Cafe, SpotSource::Instagram, Utc::now())
            .with_location(34.9752, 138.3847);
        spot.description = description.map(str::to_string);
        spot.source_url = Some(format!("https://www.instagram.com/explore/tags/{name}/"));
        spot.is_trending = true;
        spot
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig::default()).unwrap()
    }

    fn pipeline(collectors: Vec<Arc<dyn SourceAdapter>>, store: Arc<dyn SpotStore>) -> IngestionPipeline {
        IngestionPipeline::new(
            collectors,
            store,
            QualityGate::default(),
            fetcher(),
            fetcher(),
            IngestionSettings {
                enrich_delay: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    fn persisted(spot: CandidateSpot) -> PersistedSpot {
        PersistedSpot {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            spot,
        }
    }

    #[tokio::test]
    async fn valid_new_candidates_are_created_and_invalid_skipped() {
        let mut homeless = social("ひみつのキッズカフェ", Some(GOOD_DESCRIPTION));
        homeless.location = None;
        let store = Arc::new(InMemorySpotStore::new());
        let pipeline = pipeline(
            vec![canned(
                SpotSource::Instagram,
                vec![social("あおぞらキッズカフェ", Some(GOOD_DESCRIPTION)), homeless],
            )],
            store.clone(),
        );

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.collected, 2);
        assert_eq!(summary.added, 1);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].name, "ひみつのキッズカフェ");
        assert_eq!(summary.total_spots, Some(1));
        assert!(summary.errors.is_empty());
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn never_overwrites_with_equal_or_lower_quality() {
        let mut stored = social("あおぞらキッズカフェ", Some(GOOD_DESCRIPTION));
        stored.source = SpotSource::Osm;
        stored.source_url = None;
        let stored = persisted(stored);
        let store = Arc::new(InMemorySpotStore::with_spots(vec![stored.clone()]));

        // Both clamp to 100, so the candidate is not strictly better.
        let weaker = social("あおぞらキッズカフェ", Some("子連れ歓迎のお店です"));
        let pipeline = pipeline(vec![canned(SpotSource::Instagram, vec![weaker])], store.clone());
        let plan = pipeline.plan().await;
        assert!(plan.intents.is_empty());
        assert_eq!(plan.skipped.len(), 1);

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.updated, 0);
        assert_eq!(store.snapshot().await[0], stored);
    }

    #[tokio::test]
    async fn strictly_better_candidate_updates_the_record() {
        let stored = persisted(
            CandidateSpot::new("駿府城公園", Category::Park, SpotSource::Osm, Utc::now())
                .with_location(34.9800, 138.3830),
        );
        let store = Arc::new(InMemorySpotStore::with_spots(vec![stored.clone()]));

        let mut better = social("駿府城公園", Some("親子で桜と芝生を楽しめる公園。駐車場あり。"));
        better.category = Category::Park;
        let pipeline = pipeline(vec![canned(SpotSource::Instagram, vec![better])], store.clone());

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.added, 0);
        let record = &store.snapshot().await[0];
        assert_eq!(record.id, stored.id);
        assert_eq!(record.spot.source, SpotSource::Instagram);
        assert!(record.spot.description.is_some());
    }

    #[tokio::test]
    async fn enrichment_fills_gaps_and_survives_rate_limits() {
        fn lookup(spot: &CandidateSpot) -> Result<Option<PlaceMatch>, AdapterError> {
            if spot.name.starts_with("混雑") {
                return Err(AdapterError::Fetch(FetchError::RateLimited {
                    url: "https://places.example/findplacefromtext".into(),
                    attempts: 3,
                }));
            }
            Ok(Some(PlaceMatch {
                place_id: "ChIJ-aozora".into(),
                name: spot.name.clone(),
                location: spot.location,
                address: Some("静岡市葵区追手町".into()),
                category: Category::Cafe,
                rating: Some(4.5),
                review_count: Some(210),
            }))
        }

        let enricher = Arc::new(ScriptedEnricher::new(lookup));
        let store = Arc::new(InMemorySpotStore::new());
        let mut unlocated = social("いちご農園カフェ", Some(GOOD_DESCRIPTION));
        unlocated.location = None;
        let pipeline = pipeline(
            vec![canned(
                SpotSource::Instagram,
                vec![
                    social("混雑キッズカフェ", Some(GOOD_DESCRIPTION)),
                    unlocated,
                    social("あおぞらキッズカフェ", Some(GOOD_DESCRIPTION)),
                ],
            )],
            store.clone(),
        )
        .with_enricher(enricher.clone());

        let summary = pipeline.run().await.unwrap();
        assert_eq!(enricher.calls(), 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("混雑キッズカフェ"));
        assert_eq!(summary.added, 2);

        let spots = store.snapshot().await;
        let enriched = spots.iter().find(|s| s.spot.name == "あおぞらキッズカフェ").unwrap();
        assert_eq!(enriched.spot.rating, Some(4.5));
        assert_eq!(enriched.spot.address.as_deref(), Some("静岡市葵区追手町"));
        assert_eq!(enriched.spot.external_id.as_deref(), Some("ChIJ-aozora"));
    }

    #[tokio::test]
    async fn enrichment_respects_batch_cap() {
        let enricher = Arc::new(ScriptedEnricher::new(|_| Ok(None)));
        let spots: Vec<CandidateSpot> = (0..5)
            .map(|i| social(&format!("キッズカフェ{i}号"), Some(GOOD_DESCRIPTION)))
            .collect();
        let pipeline = IngestionPipeline::new(
            vec![canned(SpotSource::Instagram, spots)],
            Arc::new(InMemorySpotStore::new()),
            QualityGate::default(),
            fetcher(),
            fetcher(),
            IngestionSettings {
                enrich_batch: 3,
                enrich_delay: Duration::ZERO,
                ..Default::default()
            },
        )
        .with_enricher(enricher.clone());
        pipeline.plan().await;
        assert_eq!(enricher.calls(), 3);
    }

    /// Delegates to memory but refuses to create one named record.
    struct FlakyStore {
        inner: InMemorySpotStore,
        refuse: &'static str,
    }

    #[async_trait]
    impl SpotStore for FlakyStore {
        async fn find_by_name(&self, name: &str) -> Result<Option<PersistedSpot>, StoreError> {
            self.inner.find_by_name(name).await
        }

        async fn find_near(&self, point: GeoPoint, epsilon: f64) -> Result<Vec<PersistedSpot>, StoreError> {
            self.inner.find_near(point, epsilon).await
        }

        async fn create(&self, spot: &CandidateSpot) -> Result<PersistedSpot, StoreError> {
            if spot.name == self.refuse {
                return Err(StoreError::Backend("connection dropped".into()));
            }
            self.inner.create(spot).await
        }

        async fn update(&self, id: Uuid, delta: &SpotDelta) -> Result<PersistedSpot, StoreError> {
            self.inner.update(id, delta).await
        }

        async fn count(&self) -> Result<u64, StoreError> {
            self.inner.count().await
        }
    }

    #[tokio::test]
    async fn record_failures_do_not_abort_the_batch() {
        let store = Arc::new(FlakyStore {
            inner: InMemorySpotStore::new(),
            refuse: "こわれたキッズカフェ",
        });
        let mut far = social("ひだまりキッズカフェ", Some(GOOD_DESCRIPTION));
        far.location = Some(GeoPoint::new(35.1, 138.9));
        let offline: Arc<dyn SourceAdapter> = Arc::new(CannedAdapter::failing(SpotSource::Twitter));
        let pipeline = pipeline(
            vec![
                offline,
                canned(
                    SpotSource::Instagram,
                    vec![social("こわれたキッズカフェ", Some(GOOD_DESCRIPTION)), far],
                ),
            ],
            store,
        );

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors.iter().any(|e| e.starts_with("source twitter")));
        assert!(summary.errors.iter().any(|e| e.starts_with("こわれたキッズカフェ")));
    }

    #[tokio::test]
    async fn overlapping_trigger_is_a_no_op() {
        let slow = CannedAdapter {
            delay: Some(Duration::from_millis(50)),
            ..CannedAdapter::serving(
                SpotSource::Instagram,
                vec![social("あおぞらキッズカフェ", Some(GOOD_DESCRIPTION))],
            )
        };
        let slow: Arc<dyn SourceAdapter> = Arc::new(slow);
        let pipeline = pipeline(vec![slow], Arc::new(InMemorySpotStore::new()));

        let (first, second) = tokio::join!(pipeline.run(), pipeline.run());
        assert_eq!(first.is_some() as u8 + second.is_some() as u8, 1);
        assert!(!pipeline.is_running());
        assert!(pipeline.run().await.is_some());
    }

    #[tokio::test]
    async fn stop_request_ends_run_between_records() {
        let store = Arc::new(InMemorySpotStore::new());
        let mut pipeline = pipeline(Vec::new(), store.clone());
        let stopper = CannedAdapter {
            raise_on_collect: Some(pipeline.stop_handle()),
            ..CannedAdapter::serving(
                SpotSource::Instagram,
                vec![social("あおぞらキッズカフェ", Some(GOOD_DESCRIPTION))],
            )
        };
        pipeline.collectors.push(Arc::new(stopper));

        let summary = pipeline.run().await.unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.added, 0);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stop_raised_before_a_run_holds_until_cleared() {
        let store = Arc::new(InMemorySpotStore::new());
        let pipeline = pipeline(
            vec![canned(
                SpotSource::Instagram,
                vec![social("あおぞらキッズカフェ", Some(GOOD_DESCRIPTION))],
            )],
            store.clone(),
        );

        pipeline.request_stop();
        let summary = pipeline.run().await.unwrap();
        assert!(summary.stopped);
        assert_eq!(store.count().await.unwrap(), 0);

        pipeline.clear_stop();
        let summary = pipeline.run().await.unwrap();
        assert!(!summary.stopped);
        assert_eq!(summary.added, 1);
    }

    #[tokio::test]
    async fn run_writes_report_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(Vec::new(), Arc::new(InMemorySpotStore::new())).with_reports_dir(dir.path());
        let summary = pipeline.run().await.unwrap();
        let run_dir = dir.path().join(summary.run_id.to_string());
        assert!(run_dir.join("ingestion_summary.json").exists());
        assert!(run_dir.join("brief.md").exists());
    }
}
