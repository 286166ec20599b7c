//! One-shot update run: fetch, reshape, merge and persist a day's coverage.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use coverage_core::{merge::merge, transform::CoverageTransformer};
use tracing::info;

use crate::{
    fetch::{ArtifactFetcher, ArtifactSource},
    store::AggregateStore,
};

/// What one update run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Publish date of the downloaded report (names the daily backup).
    pub report_date: NaiveDate,
    /// Date stamped on the new rows and on the aggregate snapshot.
    pub test_date: NaiveDate,
    pub groups: usize,
    pub total_rows: usize,
    pub added_rows: usize,
    pub replaced_rows: usize,
    pub backup_written: bool,
    pub snapshot_written: bool,
}

pub struct UpdateJob {
    fetcher: ArtifactFetcher,
    store: Arc<dyn AggregateStore>,
    transformer: CoverageTransformer,
}

impl UpdateJob {
    pub fn new(
        source: Arc<dyn ArtifactSource>,
        store: Arc<dyn AggregateStore>,
        transformer: CoverageTransformer,
    ) -> Self {
        Self {
            fetcher: ArtifactFetcher::new(source, store.clone()),
            store,
            transformer,
        }
    }

    /// Run the update for `today`.
    ///
    /// A report with missing or malformed columns aborts the run before
    /// anything is written, backup included.
    pub async fn run(&self, today: NaiveDate) -> Result<UpdateSummary> {
        info!(
            today = %today,
            group_prefix = self.transformer.group_prefix(),
            "Running test coverage report update"
        );

        let fetched = self
            .fetcher
            .fetch_and_archive(today)
            .await
            .context("failed to fetch the latest coverage report")?;

        let latest = self.transformer.transform(&fetched.rows, today);
        info!(
            source_rows = fetched.rows.len(),
            groups = latest.len(),
            "Transformed latest coverage data"
        );

        let existing = self
            .store
            .load()
            .await
            .context("failed to load the aggregate coverage report")?;
        if existing.is_none() {
            info!("No aggregate report found, the latest coverage becomes the aggregate");
        }

        let outcome = merge(existing.as_ref(), &latest);
        info!(
            rows = outcome.table.len(),
            added = outcome.added,
            replaced = outcome.replaced,
            "Appended latest coverage to aggregate report"
        );

        let saved = self
            .store
            .save(&outcome.table, today)
            .await
            .context("failed to upload the aggregate coverage report")?;

        let summary = UpdateSummary {
            report_date: fetched.report_date,
            test_date: today,
            groups: latest.len(),
            total_rows: outcome.table.len(),
            added_rows: outcome.added,
            replaced_rows: outcome.replaced,
            backup_written: fetched.backup_written,
            snapshot_written: saved.snapshot_written,
        };
        info!(?summary, "Completed test coverage report update");
        Ok(summary)
    }
}
