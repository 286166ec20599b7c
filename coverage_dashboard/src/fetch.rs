//! Download of the latest raw coverage report and its daily backup.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use coverage_core::{codec, RawCoverageRow};
use reqwest::{header::LAST_MODIFIED, StatusCode};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{AggregateStore, StoreError};

/// Published location of the Azure SDK for Java jacoco report.
pub const DEFAULT_REPORT_URL: &str =
    "https://azuresdkartifacts.blob.core.windows.net/azure-sdk-for-java/test-coverage/jacoco.csv";

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
    #[error("unexpected status {status} fetching {url}")]
    Status { url: String, status: StatusCode },
}

pub type FetchResult<T> = Result<T, FetchError>;

/// A downloaded report and the time the artifact was last published.
#[derive(Debug, Clone)]
pub struct RawArtifact {
    pub body: Bytes,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RawArtifact {
    /// Day the report belongs to: its publish date, or `fallback` when the
    /// server did not say.
    pub fn report_date(&self, fallback: NaiveDate) -> NaiveDate {
        self.last_modified
            .map(|stamp| stamp.date_naive())
            .unwrap_or(fallback)
    }
}

#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch_latest(&self) -> FetchResult<RawArtifact>;
}

#[derive(Debug, Clone)]
pub struct HttpArtifactSource {
    client: reqwest::Client,
    url: String,
}

impl HttpArtifactSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch_latest(&self) -> FetchResult<RawArtifact> {
        let network = |e: reqwest::Error| FetchError::Network {
            url: self.url.clone(),
            message: e.to_string(),
        };

        let response = self.client.get(&self.url).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_last_modified);
        let body = response.bytes().await.map_err(network)?;

        match last_modified {
            Some(stamp) => info!(
                url = %self.url,
                bytes = body.len(),
                last_modified = %stamp,
                "Downloaded latest coverage report"
            ),
            None => warn!(
                url = %self.url,
                bytes = body.len(),
                "Downloaded latest coverage report without a usable Last-Modified header"
            ),
        }

        Ok(RawArtifact {
            body,
            last_modified,
        })
    }
}

/// Parse an HTTP date such as `Thu, 14 May 2020 07:28:00 GMT`.
pub fn parse_last_modified(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|stamp| stamp.with_timezone(&Utc))
}

/// A fetched and parsed report together with its backup status.
#[derive(Debug, Clone)]
pub struct FetchedReport {
    pub artifact: RawArtifact,
    pub rows: Vec<RawCoverageRow>,
    pub report_date: NaiveDate,
    /// False when a backup for `report_date` was already stored.
    pub backup_written: bool,
}

/// Fetches the latest report and keeps a dated copy of it.
#[derive(Clone)]
pub struct ArtifactFetcher {
    source: Arc<dyn ArtifactSource>,
    store: Arc<dyn AggregateStore>,
}

impl ArtifactFetcher {
    pub fn new(source: Arc<dyn ArtifactSource>, store: Arc<dyn AggregateStore>) -> Self {
        Self { source, store }
    }

    /// Download the report, parse it and back it up under its publish date.
    ///
    /// Backups are create-only, so a report with missing columns is rejected
    /// before it can claim the day's backup slot. A backup already stored for
    /// that date wins; the collision is logged and the parsed report is still
    /// returned.
    pub async fn fetch_and_archive(&self, today: NaiveDate) -> anyhow::Result<FetchedReport> {
        let artifact = self.source.fetch_latest().await?;
        let report_date = artifact.report_date(today);
        let rows = codec::read_raw_report(artifact.body.as_ref())
            .context("latest coverage report has an unexpected shape")?;

        let backup_written = match self
            .store
            .archive_daily_report(report_date, artifact.body.clone())
            .await
        {
            Ok(()) => true,
            Err(StoreError::AlreadyExists { key }) => {
                warn!(key = %key, "Daily coverage report backup already exists, not overwriting");
                false
            }
            Err(e) => return Err(e.into()),
        };

        Ok(FetchedReport {
            artifact,
            rows,
            report_date,
            backup_written,
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::store::ObjectStoreAggregateStore;
    use object_store::ObjectStoreExt;

    const REPORT: &[u8] = b"\
GROUP,INSTRUCTION_MISSED,INSTRUCTION_COVERED,BRANCH_MISSED,BRANCH_COVERED
azure-core,1,3,0,2
";

    struct FixedSource(RawArtifact);

    #[async_trait]
    impl ArtifactSource for FixedSource {
        async fn fetch_latest(&self) -> FetchResult<RawArtifact> {
            Ok(self.0.clone())
        }
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 5, day).expect("valid date")
    }

    #[test]
    fn parse_last_modified__http_date__then_utc_timestamp() {
        let stamp = parse_last_modified("Thu, 14 May 2020 07:28:00 GMT").expect("parse");
        assert_eq!(stamp.date_naive(), date(14));
        assert_eq!(stamp.to_rfc3339(), "2020-05-14T07:28:00+00:00");
    }

    #[test]
    fn parse_last_modified__garbage__then_none() {
        assert!(parse_last_modified("yesterday").is_none());
    }

    #[test]
    fn raw_artifact__missing_last_modified__then_fallback_date() {
        let artifact = RawArtifact {
            body: Bytes::new(),
            last_modified: None,
        };
        assert_eq!(artifact.report_date(date(20)), date(20));
    }

    #[tokio::test]
    async fn fetch_and_archive__twice_same_day__then_second_backup_skipped() {
        let store = Arc::new(ObjectStoreAggregateStore::memory());
        let artifact = RawArtifact {
            body: Bytes::from_static(REPORT),
            last_modified: parse_last_modified("Wed, 13 May 2020 23:10:00 GMT"),
        };
        let fetcher = ArtifactFetcher::new(Arc::new(FixedSource(artifact)), store.clone());

        let first = fetcher.fetch_and_archive(date(14)).await.expect("first");
        let second = fetcher.fetch_and_archive(date(14)).await.expect("second");

        assert_eq!(first.report_date, date(13));
        assert_eq!(first.rows.len(), 1);
        assert!(first.backup_written);
        assert!(!second.backup_written);
    }

    #[tokio::test]
    async fn fetch_and_archive__missing_columns__then_no_backup_written() {
        let store = Arc::new(ObjectStoreAggregateStore::memory());
        let artifact = RawArtifact {
            body: Bytes::from_static(b"GROUP,PACKAGE\nazure-core,com.azure.core\n"),
            last_modified: parse_last_modified("Wed, 13 May 2020 23:10:00 GMT"),
        };
        let fetcher = ArtifactFetcher::new(Arc::new(FixedSource(artifact)), store.clone());

        let error = fetcher
            .fetch_and_archive(date(14))
            .await
            .expect_err("malformed report");

        assert!(
            format!("{error:#}").contains("unexpected shape"),
            "unexpected error: {error:#}"
        );
        assert!(store
            .inner()
            .head(&store.keys().daily_report_key(date(13)))
            .await
            .is_err());
    }
}
