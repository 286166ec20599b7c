//! Key naming conventions for coverage objects.
//!
//! ```text
//! {base_prefix}/aggregate/jacoco_aggregate.csv              # canonical aggregate, overwritten
//! {base_prefix}/aggregate/jacoco_aggregate_{YYYY-MM-DD}.csv # dated snapshot, create-only
//! {base_prefix}/daily/jacoco-{YYYY-MM-DD}.csv               # raw daily backup, create-only
//! ```

use chrono::NaiveDate;
use coverage_core::codec::format_date;
use object_store::path::Path;

#[derive(Debug, Clone)]
pub struct KeyBuilder {
    /// Base prefix inside the container (e.g., "java")
    base_prefix: String,
}

impl KeyBuilder {
    pub fn new(base_prefix: impl Into<String>) -> Self {
        let prefix = base_prefix.into().trim_matches('/').to_string();
        Self {
            base_prefix: prefix,
        }
    }

    pub fn base_prefix(&self) -> &str {
        &self.base_prefix
    }

    pub fn aggregate_key(&self) -> Path {
        self.key("aggregate/jacoco_aggregate.csv")
    }

    pub fn snapshot_key(&self, date: NaiveDate) -> Path {
        self.key(&format!("aggregate/jacoco_aggregate_{}.csv", format_date(date)))
    }

    pub fn daily_report_key(&self, date: NaiveDate) -> Path {
        self.key(&format!("daily/jacoco-{}.csv", format_date(date)))
    }

    fn key(&self, relative: &str) -> Path {
        if self.base_prefix.is_empty() {
            Path::from(relative)
        } else {
            Path::from(format!("{}/{}", self.base_prefix, relative))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 5, 14).expect("valid date")
    }

    #[test]
    fn key_builder__no_prefix__then_plain_keys() {
        let keys = KeyBuilder::new("");

        assert_eq!(keys.aggregate_key().as_ref(), "aggregate/jacoco_aggregate.csv");
        assert_eq!(
            keys.snapshot_key(date()).as_ref(),
            "aggregate/jacoco_aggregate_2020-05-14.csv"
        );
        assert_eq!(
            keys.daily_report_key(date()).as_ref(),
            "daily/jacoco-2020-05-14.csv"
        );
    }

    #[test]
    fn key_builder__slashed_prefix__then_normalized() {
        let keys = KeyBuilder::new("/java/");

        assert_eq!(keys.base_prefix(), "java");
        assert_eq!(
            keys.aggregate_key().as_ref(),
            "java/aggregate/jacoco_aggregate.csv"
        );
    }
}
