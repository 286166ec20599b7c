//! Background refresh of the dashboard's chart datasets.
//!
//! The loop is the only writer of [`SharedCharts`]. Each tick loads the
//! aggregate table, builds a complete [`ChartSet`] outside any lock and then
//! swaps it in with a single pointer replacement, so readers always see a
//! whole snapshot, old or new. A tick that fails leaves the previous snapshot
//! in place; nothing a tick does ends the loop.
//!
//! Calls inside a tick have no timeout: a hung storage call delays the next
//! tick until it returns.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, NaiveDate, Utc};
use coverage_core::charts::{build_chart_set, initial_visible_group, ChartDataset, ChartSet};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::store::{AggregateStore, StoreError};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    Idle,
    Fetching,
    Transforming,
    Publishing,
}

/// Everything the rendering side reads, published as one unit.
#[derive(Debug, Clone)]
pub struct ChartSnapshot {
    pub instruction: Arc<ChartDataset>,
    pub branch: Arc<ChartDataset>,
    pub latest: Arc<ChartDataset>,
    pub latest_date: Option<NaiveDate>,
    /// 0 until the first successful tick.
    pub generation: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl ChartSnapshot {
    fn new(charts: ChartSet, generation: u64, refreshed_at: Option<DateTime<Utc>>) -> Self {
        Self {
            instruction: Arc::new(charts.instruction),
            branch: Arc::new(charts.branch),
            latest: Arc::new(charts.latest),
            latest_date: charts.latest_date,
            generation,
            refreshed_at,
        }
    }
}

pub struct SharedCharts {
    current: RwLock<Arc<ChartSnapshot>>,
    generation: AtomicU64,
}

impl Default for SharedCharts {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(ChartSnapshot::new(ChartSet::default(), 0, None))),
            generation: AtomicU64::new(0),
        }
    }
}

impl SharedCharts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<ChartSnapshot> {
        self.current.read().clone()
    }

    pub fn instruction(&self) -> Arc<ChartDataset> {
        self.current.read().instruction.clone()
    }

    pub fn branch(&self) -> Arc<ChartDataset> {
        self.current.read().branch.clone()
    }

    pub fn latest(&self) -> Arc<ChartDataset> {
        self.current.read().latest.clone()
    }

    /// Replace the published datasets; returns the new generation.
    pub fn publish(&self, charts: ChartSet, refreshed_at: DateTime<Utc>) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let next = Arc::new(ChartSnapshot::new(charts, generation, Some(refreshed_at)));
        *self.current.write() = next;
        generation
    }
}

#[derive(Debug, Error)]
pub enum TickError {
    #[error("aggregate table unavailable: {0}")]
    Store(#[source] StoreError),
    #[error("aggregate table has an unexpected shape: {0}")]
    Shape(#[source] StoreError),
}

impl From<StoreError> for TickError {
    fn from(err: StoreError) -> Self {
        if err.is_shape() {
            TickError::Shape(err)
        } else {
            TickError::Store(err)
        }
    }
}

#[derive(Debug)]
pub enum TickOutcome {
    Published { generation: u64, rows: usize },
    /// No aggregate has been uploaded yet.
    SkippedAbsent,
    Failed(TickError),
}

pub struct RefreshLoop {
    store: Arc<dyn AggregateStore>,
    charts: Arc<SharedCharts>,
    interval: Duration,
    state: Mutex<RefreshState>,
    /// Chosen on the first successful tick and kept afterwards.
    visible_group: Mutex<Option<String>>,
}

impl RefreshLoop {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        charts: Arc<SharedCharts>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            charts,
            interval: interval.max(Duration::from_millis(1)),
            state: Mutex::new(RefreshState::Idle),
            visible_group: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn charts(&self) -> &Arc<SharedCharts> {
        &self.charts
    }

    pub fn state(&self) -> RefreshState {
        *self.state.lock()
    }

    pub fn visible_group(&self) -> Option<String> {
        self.visible_group.lock().clone()
    }

    fn set_state(&self, state: RefreshState) {
        *self.state.lock() = state;
    }

    /// Run one fetch, transform and publish cycle.
    pub async fn tick(&self) -> TickOutcome {
        self.set_state(RefreshState::Fetching);
        let table = match self.store.load().await {
            Ok(Some(table)) => table,
            Ok(None) => {
                self.set_state(RefreshState::Idle);
                info!("No aggregate report uploaded yet, skipping refresh");
                return TickOutcome::SkippedAbsent;
            }
            Err(err) => {
                self.set_state(RefreshState::Idle);
                let err = TickError::from(err);
                match &err {
                    TickError::Store(source) if source.is_transient() => {
                        warn!(error = %err, "Refresh failed, keeping previous charts")
                    }
                    _ => error!(error = %err, "Refresh aborted, keeping previous charts"),
                }
                return TickOutcome::Failed(err);
            }
        };

        self.set_state(RefreshState::Transforming);
        let visible = {
            let mut visible = self.visible_group.lock();
            if visible.is_none() {
                *visible = initial_visible_group(&table);
            }
            visible.clone()
        };
        let charts = build_chart_set(&table, visible.as_deref());

        self.set_state(RefreshState::Publishing);
        let generation = self.charts.publish(charts, Utc::now());
        self.set_state(RefreshState::Idle);

        info!(
            generation,
            rows = table.len(),
            groups = table.groups().len(),
            "Published refreshed coverage charts"
        );
        TickOutcome::Published {
            generation,
            rows: table.len(),
        }
    }

    /// Tick immediately, then every `interval`, until `shutdown` turns true or
    /// its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.interval.as_secs(),
            "Starting coverage refresh loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Coverage refresh loop stopped");
    }

    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
