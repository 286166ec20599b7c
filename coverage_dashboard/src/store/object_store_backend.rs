//! [`AggregateStore`] backed by the `object_store` crate.
//!
//! Works with Azure Blob Storage, the local filesystem and an in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use coverage_core::{codec, AggregateTable};
use object_store::{path::Path, ObjectStore, ObjectStoreExt, PutMode, PutOptions, PutPayload};
use tracing::{debug, info, warn};

use super::{
    azure::AzureConnection, AggregateStore, KeyBuilder, SaveOutcome, StoreError, StoreResult,
    StoreSpec,
};

pub struct ObjectStoreAggregateStore {
    inner: Arc<dyn ObjectStore>,
    keys: KeyBuilder,
}

impl ObjectStoreAggregateStore {
    pub fn new(inner: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            inner,
            keys: KeyBuilder::new(prefix),
        }
    }

    /// Open an `az://`, `file://` or `memory://` location.
    ///
    /// `az://` needs a connection string for credentials.
    pub fn from_spec(spec: &StoreSpec, connection_string: Option<&str>) -> StoreResult<Self> {
        let inner: Arc<dyn ObjectStore> = match spec.scheme.as_str() {
            "memory" => Arc::new(object_store::memory::InMemory::new()),
            "file" => {
                let path = match &spec.container {
                    Some(host) => format!("/{}/{}", host, spec.prefix),
                    None => format!("/{}", spec.prefix),
                };
                std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
                    message: format!("failed to create store directory {path}: {e}"),
                })?;
                let local = object_store::local::LocalFileSystem::new_with_prefix(&path)
                    .map_err(|e| StoreError::Io {
                        message: format!("failed to create local store at {path}: {e}"),
                    })?;
                return Ok(Self::new(Arc::new(local), ""));
            }
            "az" | "azure" => {
                let container = spec.container.as_deref().ok_or_else(|| StoreError::InvalidSpec {
                    spec: format!("{}://{}", spec.scheme, spec.prefix),
                    reason: "Azure URL must include the container name".to_string(),
                })?;
                let connection_string = connection_string.ok_or_else(|| {
                    StoreError::NotConfigured {
                        message: "Azure store needs a storage connection string".to_string(),
                    }
                })?;
                Arc::new(AzureConnection::parse(connection_string)?.build(container)?)
            }
            scheme => {
                return Err(StoreError::InvalidSpec {
                    spec: spec.scheme.clone(),
                    reason: format!("unsupported scheme: {scheme}"),
                })
            }
        };

        Ok(Self::new(inner, &spec.prefix))
    }

    pub fn from_url(url: &str, connection_string: Option<&str>) -> StoreResult<Self> {
        Self::from_spec(&StoreSpec::parse(url)?, connection_string)
    }

    /// Azure container from a connection string.
    pub fn azure(connection_string: &str, container: &str, prefix: &str) -> StoreResult<Self> {
        let inner = AzureConnection::parse(connection_string)?.build(container)?;
        Ok(Self::new(Arc::new(inner), prefix))
    }

    /// In-memory store for tests.
    pub fn memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), "")
    }

    /// Place every key under `prefix` instead of the current base prefix.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.keys = KeyBuilder::new(prefix);
        self
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.inner
    }

    async fn get_bytes(&self, key: &Path) -> StoreResult<Bytes> {
        let result = self
            .inner
            .get(key)
            .await
            .map_err(|e| StoreError::from_object_store(e, key.as_ref()))?;

        result.bytes().await.map_err(|e| StoreError::Io {
            message: format!("failed to read {key}: {e}"),
        })
    }

    /// Conditional put (If-None-Match: "*"), falling back to check-then-put on
    /// backends without conditional writes.
    async fn put_if_not_exists(&self, key: &Path, bytes: Bytes) -> StoreResult<()> {
        let opts = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };

        match self
            .inner
            .put_opts(key, PutPayload::from_bytes(bytes.clone()), opts)
            .await
        {
            Ok(_) => return Ok(()),
            Err(object_store::Error::AlreadyExists { .. })
            | Err(object_store::Error::Precondition { .. }) => {
                return Err(StoreError::AlreadyExists {
                    key: key.as_ref().to_string(),
                });
            }
            Err(object_store::Error::NotSupported { .. }) => {
                warn!(
                    key = %key,
                    "Conditional writes not supported by backend, falling back to check-then-put"
                );
            }
            Err(e) => return Err(StoreError::from_object_store(e, key.as_ref())),
        }

        // Racy, but only reached on backends without conditional writes.
        if self.inner.head(key).await.is_ok() {
            return Err(StoreError::AlreadyExists {
                key: key.as_ref().to_string(),
            });
        }

        self.inner
            .put(key, PutPayload::from_bytes(bytes))
            .await
            .map_err(|e| StoreError::Io {
                message: format!("failed to put {key}: {e}"),
            })?;

        Ok(())
    }
}

#[async_trait]
impl AggregateStore for ObjectStoreAggregateStore {
    async fn load(&self) -> StoreResult<Option<AggregateTable>> {
        let key = self.keys.aggregate_key();
        let bytes = match self.get_bytes(&key).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound { .. }) => {
                info!(key = %key, "Aggregate report does not exist yet");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let table = codec::read_aggregate(bytes.as_ref())?;
        debug!(key = %key, rows = table.len(), "Loaded aggregate report");
        Ok(Some(table))
    }

    async fn save(&self, table: &AggregateTable, date: NaiveDate) -> StoreResult<SaveOutcome> {
        let bytes = Bytes::from(codec::aggregate_to_vec(table)?);

        let key = self.keys.aggregate_key();
        self.inner
            .put(&key, PutPayload::from_bytes(bytes.clone()))
            .await
            .map_err(|e| StoreError::from_object_store(e, key.as_ref()))?;
        info!(key = %key, rows = table.len(), "Uploaded aggregate report");

        let snapshot = self.keys.snapshot_key(date);
        let snapshot_written = match self.put_if_not_exists(&snapshot, bytes).await {
            Ok(()) => {
                info!(key = %snapshot, "Archived aggregate report snapshot");
                true
            }
            Err(StoreError::AlreadyExists { .. }) => {
                warn!(key = %snapshot, "Aggregate snapshot for this day already exists, keeping it");
                false
            }
            Err(e) => return Err(e),
        };

        Ok(SaveOutcome { snapshot_written })
    }

    async fn archive_daily_report(&self, date: NaiveDate, report: Bytes) -> StoreResult<()> {
        let key = self.keys.daily_report_key(date);
        self.put_if_not_exists(&key, report).await?;
        info!(key = %key, "Backed up daily coverage report");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use coverage_core::{AggregateRow, Counter};
    use tempfile::tempdir;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 5, day).expect("valid date")
    }

    fn table(covered: u64) -> AggregateTable {
        AggregateTable::new(vec![AggregateRow::new(
            "azure-core",
            date(1),
            Counter::new(10, covered),
            Counter::new(1, 1),
        )])
    }

    #[tokio::test]
    async fn load__never_saved__then_none() {
        let store = ObjectStoreAggregateStore::memory();

        let loaded = store.load().await.expect("load");

        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn save__then_load_returns_table_and_snapshot_exists() {
        let store = ObjectStoreAggregateStore::memory();

        let outcome = store.save(&table(30), date(1)).await.expect("save");
        let loaded = store.load().await.expect("load").expect("table present");

        assert!(outcome.snapshot_written);
        assert_eq!(loaded, table(30));
        let snapshot = store
            .get_bytes(&store.keys().snapshot_key(date(1)))
            .await
            .expect("snapshot");
        let archived = codec::read_aggregate(snapshot.as_ref()).expect("decode snapshot");
        assert_eq!(archived, table(30));
    }

    #[tokio::test]
    async fn save__twice_same_day__then_canonical_overwritten_snapshot_kept() {
        let store = ObjectStoreAggregateStore::memory();

        store.save(&table(30), date(1)).await.expect("first save");
        let second = store.save(&table(35), date(1)).await.expect("second save");

        assert!(!second.snapshot_written);
        assert_eq!(store.load().await.expect("load"), Some(table(35)));
        let snapshot = store
            .get_bytes(&store.keys().snapshot_key(date(1)))
            .await
            .expect("snapshot");
        assert_eq!(
            codec::read_aggregate(snapshot.as_ref()).expect("decode"),
            table(30)
        );
    }

    #[tokio::test]
    async fn archive_daily_report__twice__then_already_exists_and_first_kept() {
        let store = ObjectStoreAggregateStore::memory();

        store
            .archive_daily_report(date(2), Bytes::from_static(b"first"))
            .await
            .expect("first backup");
        let err = store
            .archive_daily_report(date(2), Bytes::from_static(b"second"))
            .await
            .expect_err("second backup collides");

        assert!(err.is_already_exists());
        let stored = store
            .get_bytes(&store.keys().daily_report_key(date(2)))
            .await
            .expect("backup");
        assert_eq!(stored.as_ref(), b"first");
    }

    #[tokio::test]
    async fn load__corrupt_aggregate__then_shape_error() {
        let store = ObjectStoreAggregateStore::memory();
        store
            .inner()
            .put(
                &store.keys().aggregate_key(),
                PutPayload::from_static(b"GROUP,SOMETHING\ncore,1\n"),
            )
            .await
            .expect("seed corrupt aggregate");

        let err = store.load().await.expect_err("corrupt aggregate");

        assert!(err.is_shape());
    }

    #[tokio::test]
    async fn from_url__file_scheme__then_persists_on_disk() {
        let root = tempdir().expect("tempdir");
        let url = format!("file://{}", root.path().join("store").display());

        let store = ObjectStoreAggregateStore::from_url(&url, None).expect("open file store");
        store.save(&table(12), date(3)).await.expect("save");

        assert!(root
            .path()
            .join("store/aggregate/jacoco_aggregate.csv")
            .is_file());
        assert!(root
            .path()
            .join("store/aggregate/jacoco_aggregate_2020-05-03.csv")
            .is_file());
        assert_eq!(store.load().await.expect("load"), Some(table(12)));
    }

    #[test]
    fn from_url__azure_without_connection_string__then_not_configured() {
        let err = ObjectStoreAggregateStore::from_url("az://coverage", None)
            .err()
            .expect("missing credentials");
        assert!(matches!(err, StoreError::NotConfigured { .. }));
    }

    #[test]
    fn from_url__unknown_scheme__then_invalid_spec() {
        let err = ObjectStoreAggregateStore::from_url("ftp://host/path", None)
            .err()
            .expect("unsupported scheme");
        assert!(matches!(err, StoreError::InvalidSpec { .. }));
    }
}
