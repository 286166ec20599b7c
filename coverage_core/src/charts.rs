//! Chart-ready datasets derived from the aggregate table.
//!
//! Datasets are built in full from one table snapshot and never edited
//! afterwards; a refresh replaces them wholesale.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::{
    codec::format_date,
    model::{AggregateRow, AggregateTable},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Instruction,
    Branch,
}

impl Metric {
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Instruction => "Instruction Coverage",
            Metric::Branch => "Branch Coverage",
        }
    }

    fn value(&self, row: &AggregateRow) -> f64 {
        match self {
            Metric::Instruction => row.instruction_coverage(),
            Metric::Branch => row.branch_coverage(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    Line,
    Bar,
}

/// Whether a series is drawn initially or only listed in the legend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    LegendOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub x: Vec<String>,
    /// `None` where the percentage is undefined (nothing instrumented).
    pub y: Vec<Option<f64>>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartDataset {
    pub title: String,
    pub kind: ChartKind,
    pub series: Vec<Series>,
}

impl ChartDataset {
    pub fn empty(title: impl Into<String>, kind: ChartKind) -> Self {
        Self {
            title: title.into(),
            kind,
            series: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// The three datasets the dashboard shows.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSet {
    pub instruction: ChartDataset,
    pub branch: ChartDataset,
    pub latest: ChartDataset,
    pub latest_date: Option<NaiveDate>,
}

impl Default for ChartSet {
    fn default() -> Self {
        Self {
            instruction: ChartDataset::empty(Metric::Instruction.label(), ChartKind::Line),
            branch: ChartDataset::empty(Metric::Branch.label(), ChartKind::Line),
            latest: ChartDataset::empty(latest_title(None), ChartKind::Bar),
            latest_date: None,
        }
    }
}

/// Group that should start out visible: the first one in name order.
pub fn initial_visible_group(table: &AggregateTable) -> Option<String> {
    table.groups().first().map(|group| group.to_string())
}

pub fn build_chart_set(table: &AggregateTable, visible_group: Option<&str>) -> ChartSet {
    let by_group = rows_by_group(table);
    ChartSet {
        instruction: time_series(&by_group, Metric::Instruction, visible_group),
        branch: time_series(&by_group, Metric::Branch, visible_group),
        latest: latest_bars(table),
        latest_date: table.latest_date(),
    }
}

/// One line per group, points ordered by TEST_DATE.
///
/// Only `visible_group` is drawn; every other series is collapsed into the
/// legend. When that group is missing from the table the first series is
/// shown instead.
pub fn time_series(
    by_group: &BTreeMap<&str, Vec<&AggregateRow>>,
    metric: Metric,
    visible_group: Option<&str>,
) -> ChartDataset {
    let visible = visible_group
        .filter(|group| by_group.contains_key(group))
        .or_else(|| by_group.keys().next().copied());

    let series = by_group
        .iter()
        .map(|(group, rows)| Series {
            name: group.to_string(),
            x: rows.iter().map(|row| format_date(row.test_date)).collect(),
            y: rows.iter().map(|row| finite(metric.value(row))).collect(),
            visibility: if Some(*group) == visible {
                Visibility::Visible
            } else {
                Visibility::LegendOnly
            },
        })
        .collect();

    ChartDataset {
        title: metric.label().to_string(),
        kind: ChartKind::Line,
        series,
    }
}

/// Instruction and branch coverage per group for the most recent TEST_DATE.
pub fn latest_bars(table: &AggregateTable) -> ChartDataset {
    let Some(latest) = table.latest_date() else {
        return ChartDataset::empty(latest_title(None), ChartKind::Bar);
    };

    let mut rows: Vec<&AggregateRow> = table
        .rows()
        .iter()
        .filter(|row| row.test_date == latest)
        .collect();
    rows.sort_by(|a, b| a.group.cmp(&b.group));

    let groups: Vec<String> = rows.iter().map(|row| row.group.clone()).collect();
    let series = [Metric::Instruction, Metric::Branch]
        .into_iter()
        .map(|metric| Series {
            name: metric.label().to_string(),
            x: groups.clone(),
            y: rows.iter().map(|row| finite(metric.value(row))).collect(),
            visibility: Visibility::Visible,
        })
        .collect();

    ChartDataset {
        title: latest_title(Some(latest)),
        kind: ChartKind::Bar,
        series,
    }
}

pub fn rows_by_group(table: &AggregateTable) -> BTreeMap<&str, Vec<&AggregateRow>> {
    let mut by_group: BTreeMap<&str, Vec<&AggregateRow>> = BTreeMap::new();
    for row in table.rows() {
        by_group.entry(row.group.as_str()).or_default().push(row);
    }
    for rows in by_group.values_mut() {
        rows.sort_by_key(|row| row.test_date);
    }
    by_group
}

fn latest_title(date: Option<NaiveDate>) -> String {
    match date {
        Some(date) => format!("Latest Coverage ({})", format_date(date)),
        None => "Latest Coverage".to_string(),
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
