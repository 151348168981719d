use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;

use crate::ingest::IngestionSummary;

pub const SUMMARY_FILE: &str = "ingestion_summary.json";
pub const BRIEF_FILE: &str = "brief.md";

/// Writes `<reports_dir>/<run_id>/{ingestion_summary.json,brief.md}`.
pub async fn write_run_report(reports_dir: &Path, summary: &IngestionSummary) -> Result<PathBuf> {
    let run_dir = reports_dir.join(summary.run_id.to_string());
    fs::create_dir_all(&run_dir)
        .await
        .with_context(|| format!("creating {}", run_dir.display()))?;

    let json = serde_json::to_vec_pretty(summary).context("serializing ingestion summary")?;
    fs::write(run_dir.join(SUMMARY_FILE), json)
        .await
        .with_context(|| format!("writing {SUMMARY_FILE}"))?;
    fs::write(run_dir.join(BRIEF_FILE), render_brief(summary))
        .await
        .with_context(|| format!("writing {BRIEF_FILE}"))?;
    Ok(run_dir)
}

fn render_brief(summary: &IngestionSummary) -> String {
    let mut lines = vec![
        "# Kidspot Ingestion Brief".to_string(),
        String::new(),
        format!("- Run ID: `{}`", summary.run_id),
        format!("- Started: {}", summary.started_at),
        format!("- Finished: {}", summary.finished_at),
        format!("- Collected: {}", summary.collected),
        format!("- Added: {}", summary.added),
        format!("- Updated: {}", summary.updated),
        format!("- Skipped: {}", summary.skipped.len()),
        format!(
            "- Spots in store: {}",
            summary
                .total_spots
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        ),
    ];
    if summary.stopped {
        lines.push("- Stopped early on request".to_string());
    }
    if !summary.skipped.is_empty() {
        lines.push(String::new());
        lines.push("## Skipped".to_string());
        lines.extend(
            summary
                .skipped
                .iter()
                .map(|s| format!("- {}: {}", s.name, s.reason)),
        );
    }
    if !summary.errors.is_empty() {
        lines.push(String::new());
        lines.push("## Errors".to_string());
        lines.extend(summary.errors.iter().map(|e| format!("- {e}")));
    }
    lines.push(String::new());
    lines.join("\n")
}

/// Markdown digest of the most recent `runs` ingestion reports, newest first.
pub fn report_recent_markdown(runs: usize, reports_dir: &Path) -> Result<String> {
    let entries = std::fs::read_dir(reports_dir)
        .with_context(|| format!("reading {}", reports_dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false));

    let mut summaries = Vec::new();
    for entry in entries {
        let path = entry.path().join(SUMMARY_FILE);
        if !path.exists() {
            continue;
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let summary: IngestionSummary =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        summaries.push(summary);
    }
    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    summaries.truncate(runs.max(1));

    let mut lines = vec!["# Kidspot Recent Ingestion Runs".to_string(), String::new()];
    if summaries.is_empty() {
        lines.push("No ingestion runs recorded yet.".to_string());
    }
    for summary in summaries {
        lines.push(format!("## Run `{}`", summary.run_id));
        lines.push(format!("- started: {}", summary.started_at));
        lines.push(format!(
            "- added: {}, updated: {}, skipped: {}, errors: {}",
            summary.added,
            summary.updated,
            summary.skipped.len(),
            summary.errors.len()
        ));
        if let Some(total) = summary.total_spots {
            lines.push(format!("- spots in store: {total}"));
        }
        lines.push(format!(
            "- brief: `{}`",
            reports_dir
                .join(summary.run_id.to_string())
                .join(BRIEF_FILE)
                .display()
        ));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use uuid::Uuid;

    use crate::ingest::SkippedRecord;

    fn summary(hour: u32, added: usize) -> IngestionSummary {
        let started_at = Utc.with_ymd_and_hms(2026, 4, 4, hour, 0, 0).unwrap();
        IngestionSummary {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: started_at + Duration::seconds(42),
            collected: added + 1,
            added,
            updated: 0,
            skipped: vec![SkippedRecord {
                name: "ひみつのキッズカフェ".into(),
                reason: "coordinates are missing or invalid".into(),
            }],
            errors: Vec::new(),
            total_spots: Some(added as u64),
            stopped: false,
        }
    }

    #[tokio::test]
    async fn writes_summary_and_brief() {
        let dir = tempfile::tempdir().unwrap();
        let run = summary(3, 2);
        let run_dir = write_run_report(dir.path(), &run).await.unwrap();

        let json = std::fs::read_to_string(run_dir.join(SUMMARY_FILE)).unwrap();
        let back: IngestionSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);

        let brief = std::fs::read_to_string(run_dir.join(BRIEF_FILE)).unwrap();
        assert!(brief.contains("- Added: 2"));
        assert!(brief.contains("ひみつのキッズカフェ: coordinates are missing or invalid"));
    }

    #[tokio::test]
    async fn recent_runs_are_newest_first_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let early = summary(1, 1);
        let late = summary(6, 4);
        let middle = summary(3, 2);
        for run in [&early, &late, &middle] {
            write_run_report(dir.path(), run).await.unwrap();
        }
        std::fs::create_dir(dir.path().join("not-a-run")).unwrap();

        let markdown = report_recent_markdown(2, dir.path()).unwrap();
        let late_at = markdown.find(&late.run_id.to_string()).unwrap();
        let middle_at = markdown.find(&middle.run_id.to_string()).unwrap();
        assert!(late_at < middle_at);
        assert!(!markdown.contains(&early.run_id.to_string()));
    }

    #[test]
    fn empty_reports_dir_renders_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let markdown = report_recent_markdown(5, dir.path()).unwrap();
        assert!(markdown.contains("No ingestion runs recorded yet."));
    }
}
