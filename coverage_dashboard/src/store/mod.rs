//! Persistence for the aggregate table and its archives.
//!
//! The canonical aggregate is a single object rewritten in full on every save;
//! object stores replace objects atomically, so a concurrent load sees either
//! the previous table or the new one. Dated snapshots and daily backups are
//! create-only: once written for a day they are never replaced.

pub mod azure;
pub mod error;
pub mod naming;
pub mod object_store_backend;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use coverage_core::AggregateTable;

pub use error::{StoreError, StoreResult};
pub use naming::KeyBuilder;
pub use object_store_backend::ObjectStoreAggregateStore;

/// Parsed store location.
///
/// ```text
/// az://container/prefix     (credentials from the connection string)
/// file:///var/lib/coverage
/// memory://                 (tests)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub scheme: String,
    /// Container name (empty for file://)
    pub container: Option<String>,
    /// Prefix inside the container, or the directory for file://
    pub prefix: String,
}

impl StoreSpec {
    pub fn parse(spec: &str) -> StoreResult<Self> {
        let url = url::Url::parse(spec).map_err(|e| StoreError::InvalidSpec {
            spec: spec.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            container: url
                .host_str()
                .filter(|host| !host.is_empty())
                .map(|host| host.to_string()),
            prefix: url.path().trim_start_matches('/').to_string(),
        })
    }

    pub fn is_memory(&self) -> bool {
        self.scheme == "memory"
    }

    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }
}

/// What [`AggregateStore::save`] wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveOutcome {
    /// False when a snapshot for that day already existed.
    pub snapshot_written: bool,
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Load the canonical aggregate table.
    ///
    /// `Ok(None)` means it has never been written; that is the normal state
    /// before the first update run, not an error.
    async fn load(&self) -> StoreResult<Option<AggregateTable>>;

    /// Overwrite the canonical table and archive a snapshot dated `date`.
    ///
    /// An existing snapshot for `date` is kept and reported through
    /// [`SaveOutcome::snapshot_written`].
    async fn save(&self, table: &AggregateTable, date: NaiveDate) -> StoreResult<SaveOutcome>;

    /// Back up a raw daily report.
    ///
    /// Returns `Err(StoreError::AlreadyExists)` when a backup for `date` is
    /// already stored.
    async fn archive_daily_report(&self, date: NaiveDate, report: Bytes) -> StoreResult<()>;
}
