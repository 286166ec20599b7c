//! Folds a freshly transformed day into the historical aggregate table.

use std::collections::{hash_map::Entry, HashMap};

use tracing::debug;

use crate::model::{AggregateKey, AggregateRow, AggregateTable};

/// Result of [`merge`]; the counts describe what the new batch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub table: AggregateTable,
    /// Keys that did not exist before.
    pub added: usize,
    /// Keys whose existing row was overwritten by the new batch.
    pub replaced: usize,
}

/// Merge `latest` into `existing`, keeping exactly one row per (GROUP, TEST_DATE).
///
/// When both sides hold a key, the row from `latest` wins, so re-running a day
/// overwrites that day's rows instead of duplicating them or keeping stale
/// values. Within a single side the last row for a key wins for `latest` and
/// the first one for `existing`. An absent `existing` table means no history
/// yet: the batch becomes the table.
///
/// `existing` is left untouched.
pub fn merge(existing: Option<&AggregateTable>, latest: &[AggregateRow]) -> MergeOutcome {
    let capacity = existing.map_or(0, AggregateTable::len) + latest.len();
    let mut rows: Vec<AggregateRow> = Vec::with_capacity(capacity);
    let mut index: HashMap<AggregateKey, usize> = HashMap::with_capacity(capacity);

    if let Some(table) = existing {
        for row in table.rows() {
            if let Entry::Vacant(slot) = index.entry(row.key()) {
                slot.insert(rows.len());
                rows.push(row.clone());
            }
        }
    }
    let mut overwritten = vec![false; rows.len()];

    let mut added = 0;
    for row in latest {
        match index.get(&row.key()) {
            Some(&position) => {
                if let Some(flag) = overwritten.get_mut(position) {
                    *flag = true;
                }
                rows[position] = row.clone();
            }
            None => {
                index.insert(row.key(), rows.len());
                rows.push(row.clone());
                added += 1;
            }
        }
    }
    let replaced = overwritten.iter().filter(|flag| **flag).count();

    debug!(
        existing_rows = existing.map_or(0, AggregateTable::len),
        batch_rows = latest.len(),
        added,
        replaced,
        "Merged coverage batch into aggregate table"
    );

    MergeOutcome {
        table: AggregateTable::new(rows),
        added,
        replaced,
    }
}
