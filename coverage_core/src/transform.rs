//! Reshapes a day's raw report into one aggregate row per group.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::debug;

use crate::model::{AggregateRow, Counter, RawCoverageRow};

/// Label prefix jacoco puts in front of every module name in the Azure SDK
/// for Java report.
pub const DEFAULT_GROUP_PREFIX: &str = "Microsoft Azure Client Library - Test coverage/";

#[derive(Debug, Clone)]
pub struct CoverageTransformer {
    group_prefix: String,
}

impl Default for CoverageTransformer {
    fn default() -> Self {
        Self::new(DEFAULT_GROUP_PREFIX)
    }
}

impl CoverageTransformer {
    pub fn new(group_prefix: impl Into<String>) -> Self {
        Self {
            group_prefix: group_prefix.into(),
        }
    }

    pub fn group_prefix(&self) -> &str {
        &self.group_prefix
    }

    pub fn normalize_group<'a>(&self, group: &'a str) -> &'a str {
        let group = group.trim();
        if self.group_prefix.is_empty() {
            return group;
        }
        group.strip_prefix(self.group_prefix.as_str()).unwrap_or(group)
    }

    /// Sum every source row of a group into a single row dated `test_date`.
    ///
    /// Output is ordered by group name and holds one row per distinct group.
    pub fn transform(&self, rows: &[RawCoverageRow], test_date: NaiveDate) -> Vec<AggregateRow> {
        let mut groups: BTreeMap<&str, (Counter, Counter)> = BTreeMap::new();

        for row in rows {
            let group = self.normalize_group(&row.group);
            let (instruction, branch) = groups.entry(group).or_default();
            instruction.add(Counter::new(row.instruction_missed, row.instruction_covered));
            branch.add(Counter::new(row.branch_missed, row.branch_covered));
        }

        debug!(
            source_rows = rows.len(),
            groups = groups.len(),
            test_date = %test_date,
            "Transformed raw coverage rows"
        );

        groups
            .into_iter()
            .map(|(group, (instruction, branch))| {
                AggregateRow::new(group, test_date, instruction, branch)
            })
            .collect()
    }
}
