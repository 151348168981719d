use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use crate::ingest::{IngestionPipeline, IngestionSummary};

/// Explicitly started cron driver for the ingestion pipeline. Nothing runs
/// until `start`; overlapping triggers fall through the pipeline's own guard.
pub struct IngestionScheduler {
    pipeline: Arc<IngestionPipeline>,
    cron: String,
    scheduler: Mutex<Option<JobScheduler>>,
}

impl IngestionScheduler {
    pub fn new(pipeline: Arc<IngestionPipeline>, cron: impl Into<String>) -> Self {
        Self {
            pipeline,
            cron: cron.into(),
            scheduler: Mutex::new(None),
        }
    }

    pub fn cron(&self) -> &str {
        &self.cron
    }

    pub async fn is_started(&self) -> bool {
        self.scheduler.lock().await.is_some()
    }

    /// Registers the cron job and starts ticking. A second call is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut slot = self.scheduler.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        self.pipeline.clear_stop();
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        let pipeline = self.pipeline.clone();
        let job = Job::new_async(&self.cron, move |_uuid, _l| {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                if let Some(summary) = pipeline.run().await {
                    info!(run_id = %summary.run_id, added = summary.added, updated = summary.updated, "scheduled ingestion finished");
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {}", self.cron))?;
        sched.add(job).await.context("adding scheduler job")?;
        sched.start().await.context("starting scheduler")?;

        info!(cron = %self.cron, "ingestion scheduler started");
        *slot = Some(sched);
        Ok(())
    }

    /// Stops future ticks and asks an in-flight run to end at the next record.
    pub async fn stop(&self) -> Result<()> {
        self.pipeline.request_stop();
        if let Some(mut sched) = self.scheduler.lock().await.take() {
            sched.shutdown().await.context("shutting down scheduler")?;
            info!("ingestion scheduler stopped");
        }
        Ok(())
    }

    /// Runs ingestion immediately, outside the cron cadence. `None` when a run
    /// is already in progress.
    pub async fn trigger_now(&self) -> Option<IngestionSummary> {
        self.pipeline.clear_stop();
        self.pipeline.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kidspot_storage::{HttpClientConfig, HttpFetcher, InMemorySpotStore};

    use crate::ingest::IngestionSettings;
    use crate::quality::QualityGate;

    fn idle_pipeline() -> Arc<IngestionPipeline> {
        let fetcher = || HttpFetcher::new(HttpClientConfig::default()).unwrap();
        Arc::new(IngestionPipeline::new(
            Vec::new(),
            Arc::new(InMemorySpotStore::new()),
            QualityGate::default(),
            fetcher(),
            fetcher(),
            IngestionSettings::default(),
        ))
    }

    #[tokio::test]
    async fn trigger_now_runs_without_starting() {
        let scheduler = IngestionScheduler::new(idle_pipeline(), "0 0 */6 * * *");
        let summary = scheduler.trigger_now().await.unwrap();
        assert_eq!(summary.added, 0);
        assert_eq!(summary.total_spots, Some(0));
        assert!(!scheduler.is_started().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_and_stop_are_idempotent() {
        let scheduler = IngestionScheduler::new(idle_pipeline(), "0 0 */6 * * *");
        scheduler.start().await.unwrap();
        scheduler.start().await.unwrap();
        assert!(scheduler.is_started().await);

        scheduler.stop().await.unwrap();
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_started().await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_is_not_undone_by_a_queued_tick() {
        let pipeline = idle_pipeline();
        let scheduler = IngestionScheduler::new(pipeline.clone(), "0 0 */6 * * *");
        scheduler.start().await.unwrap();
        scheduler.stop().await.unwrap();

        // A tick dispatched just before the stop runs after it.
        let summary = pipeline.run().await.unwrap();
        assert!(summary.stopped);

        assert!(!scheduler.trigger_now().await.unwrap().stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bad_cron_expression_fails_to_start() {
        let scheduler = IngestionScheduler::new(idle_pipeline(), "every now and then");
        assert!(scheduler.start().await.is_err());
        assert!(!scheduler.is_started().await);
    }
}
