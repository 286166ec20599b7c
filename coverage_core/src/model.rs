//! Row and table types for coverage data.

use chrono::NaiveDate;
use serde::Deserialize;

/// One row of a day's raw jacoco report.
///
/// Reports carry more columns (package, class, line and method counters);
/// only the ones needed for aggregation are kept.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RawCoverageRow {
    #[serde(rename = "GROUP")]
    pub group: String,
    #[serde(rename = "INSTRUCTION_MISSED")]
    pub instruction_missed: u64,
    #[serde(rename = "INSTRUCTION_COVERED")]
    pub instruction_covered: u64,
    #[serde(rename = "BRANCH_MISSED")]
    pub branch_missed: u64,
    #[serde(rename = "BRANCH_COVERED")]
    pub branch_covered: u64,
}

/// Missed/covered pair for one coverage metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    pub missed: u64,
    pub covered: u64,
}

impl Counter {
    pub fn new(missed: u64, covered: u64) -> Self {
        Self { missed, covered }
    }

    pub fn total(&self) -> u64 {
        self.missed.saturating_add(self.covered)
    }

    /// Covered share of the total as a percentage.
    ///
    /// Returns `NaN` when nothing was instrumented; callers treat that as "no
    /// data" rather than 0%.
    pub fn coverage(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return f64::NAN;
        }
        self.covered as f64 / total as f64 * 100.0
    }

    pub fn add(&mut self, other: Counter) {
        self.missed = self.missed.saturating_add(other.missed);
        self.covered = self.covered.saturating_add(other.covered);
    }
}

/// Composite key that is unique within an [`AggregateTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub test_date: NaiveDate,
    pub group: String,
}

/// Coverage totals for one group on one day.
///
/// Totals and percentages are derived from the counters, so a row can never
/// disagree with itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateRow {
    pub group: String,
    pub test_date: NaiveDate,
    pub instruction: Counter,
    pub branch: Counter,
}

impl AggregateRow {
    pub fn new(
        group: impl Into<String>,
        test_date: NaiveDate,
        instruction: Counter,
        branch: Counter,
    ) -> Self {
        Self {
            group: group.into(),
            test_date,
            instruction,
            branch,
        }
    }

    pub fn key(&self) -> AggregateKey {
        AggregateKey {
            test_date: self.test_date,
            group: self.group.clone(),
        }
    }

    pub fn instruction_coverage(&self) -> f64 {
        self.instruction.coverage()
    }

    pub fn branch_coverage(&self) -> f64 {
        self.branch.coverage()
    }
}

/// The full coverage history: one row per (group, day).
///
/// Row order carries no meaning; use [`AggregateTable::sorted`] before
/// presenting rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateTable {
    rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn new(rows: Vec<AggregateRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[AggregateRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<AggregateRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, group: &str, test_date: NaiveDate) -> Option<&AggregateRow> {
        self.rows
            .iter()
            .find(|row| row.group == group && row.test_date == test_date)
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|row| row.test_date).max()
    }

    /// Distinct group names in ascending order.
    pub fn groups(&self) -> Vec<&str> {
        let mut groups: Vec<&str> = self.rows.iter().map(|row| row.group.as_str()).collect();
        groups.sort_unstable();
        groups.dedup();
        groups
    }

    /// Copy of the table ordered by TEST_DATE, then GROUP.
    pub fn sorted(&self) -> AggregateTable {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            a.test_date
                .cmp(&b.test_date)
                .then_with(|| a.group.cmp(&b.group))
        });
        AggregateTable { rows }
    }
}

impl FromIterator<AggregateRow> for AggregateTable {
    fn from_iter<I: IntoIterator<Item = AggregateRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 5, day).expect("valid date")
    }

    #[test]
    fn counter__zero_total__then_coverage_is_nan() {
        let counter = Counter::new(0, 0);
        assert_eq!(counter.total(), 0);
        assert!(counter.coverage().is_nan());
    }

    #[test]
    fn counter__partial_coverage__then_percentage_of_total() {
        let counter = Counter::new(1, 3);
        assert_eq!(counter.total(), 4);
        assert_eq!(counter.coverage(), 75.0);
    }

    #[test]
    fn counter__add__then_sums_both_fields() {
        let mut counter = Counter::new(3, 7);
        counter.add(Counter::new(1, 9));
        assert_eq!(counter, Counter::new(4, 16));
    }

    #[test]
    fn aggregate_table__sorted__then_orders_by_date_then_group() {
        let table = AggregateTable::new(vec![
            AggregateRow::new("b", date(2), Counter::default(), Counter::default()),
            AggregateRow::new("a", date(2), Counter::default(), Counter::default()),
            AggregateRow::new("c", date(1), Counter::default(), Counter::default()),
        ]);

        let keys: Vec<(String, NaiveDate)> = table
            .sorted()
            .rows()
            .iter()
            .map(|row| (row.group.clone(), row.test_date))
            .collect();

        assert_eq!(
            keys,
            vec![
                ("c".to_string(), date(1)),
                ("a".to_string(), date(2)),
                ("b".to_string(), date(2)),
            ]
        );
    }

    #[test]
    fn aggregate_table__latest_date_and_groups__then_derived_from_rows() {
        let table: AggregateTable = vec![
            AggregateRow::new("core", date(3), Counter::default(), Counter::default()),
            AggregateRow::new("core", date(1), Counter::default(), Counter::default()),
            AggregateRow::new("amqp", date(2), Counter::default(), Counter::default()),
        ]
        .into_iter()
        .collect();

        assert_eq!(table.latest_date(), Some(date(3)));
        assert_eq!(table.groups(), vec!["amqp", "core"]);
        assert!(table.get("amqp", date(2)).is_some());
        assert!(table.get("amqp", date(3)).is_none());
    }

    #[test]
    fn aggregate_table__empty__then_no_latest_date() {
        let table = AggregateTable::default();
        assert!(table.is_empty());
        assert_eq!(table.latest_date(), None);
    }
}
