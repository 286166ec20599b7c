//! CSV encoding for raw jacoco reports and the aggregate table.
//!
//! The aggregate layout is shared with every dated snapshot:
//!
//! ```text
//! GROUP,TEST_DATE,INSTRUCTION_MISSED,INSTRUCTION_COVERED,INSTRUCTION_TOTAL,
//! BRANCH_MISSED,BRANCH_COVERED,BRANCH_TOTAL,INSTRUCTION_COVERAGE,BRANCH_COVERAGE
//! ```
//!
//! Percentages for groups with nothing instrumented are written as empty
//! fields.

use std::io;

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    error::{CoverageError, CoverageResult},
    model::{AggregateRow, AggregateTable, Counter, RawCoverageRow},
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub const AGGREGATE_HEADER: [&str; 10] = [
    "GROUP",
    "TEST_DATE",
    "INSTRUCTION_MISSED",
    "INSTRUCTION_COVERED",
    "INSTRUCTION_TOTAL",
    "BRANCH_MISSED",
    "BRANCH_COVERED",
    "BRANCH_TOTAL",
    "INSTRUCTION_COVERAGE",
    "BRANCH_COVERAGE",
];

pub const RAW_REQUIRED_COLUMNS: [&str; 5] = [
    "GROUP",
    "INSTRUCTION_MISSED",
    "INSTRUCTION_COVERED",
    "BRANCH_MISSED",
    "BRANCH_COVERED",
];

#[derive(Debug, Serialize, Deserialize)]
struct AggregateRecord {
    #[serde(rename = "GROUP")]
    group: String,
    #[serde(rename = "TEST_DATE")]
    test_date: String,
    #[serde(rename = "INSTRUCTION_MISSED")]
    instruction_missed: u64,
    #[serde(rename = "INSTRUCTION_COVERED")]
    instruction_covered: u64,
    #[serde(rename = "INSTRUCTION_TOTAL")]
    instruction_total: u64,
    #[serde(rename = "BRANCH_MISSED")]
    branch_missed: u64,
    #[serde(rename = "BRANCH_COVERED")]
    branch_covered: u64,
    #[serde(rename = "BRANCH_TOTAL")]
    branch_total: u64,
    #[serde(rename = "INSTRUCTION_COVERAGE")]
    instruction_coverage: Option<f64>,
    #[serde(rename = "BRANCH_COVERAGE")]
    branch_coverage: Option<f64>,
}

impl From<&AggregateRow> for AggregateRecord {
    fn from(row: &AggregateRow) -> Self {
        Self {
            group: row.group.clone(),
            test_date: format_date(row.test_date),
            instruction_missed: row.instruction.missed,
            instruction_covered: row.instruction.covered,
            instruction_total: row.instruction.total(),
            branch_missed: row.branch.missed,
            branch_covered: row.branch.covered,
            branch_total: row.branch.total(),
            instruction_coverage: finite(row.instruction_coverage()),
            branch_coverage: finite(row.branch_coverage()),
        }
    }
}

impl TryFrom<AggregateRecord> for AggregateRow {
    type Error = CoverageError;

    fn try_from(record: AggregateRecord) -> CoverageResult<Self> {
        let test_date = parse_date(&record.test_date)?;
        let instruction = Counter::new(record.instruction_missed, record.instruction_covered);
        let branch = Counter::new(record.branch_missed, record.branch_covered);

        if instruction.total() != record.instruction_total {
            return Err(CoverageError::inconsistent(
                record.group,
                test_date,
                format!(
                    "INSTRUCTION_TOTAL is {} but missed + covered is {}",
                    record.instruction_total,
                    instruction.total()
                ),
            ));
        }
        if branch.total() != record.branch_total {
            return Err(CoverageError::inconsistent(
                record.group,
                test_date,
                format!(
                    "BRANCH_TOTAL is {} but missed + covered is {}",
                    record.branch_total,
                    branch.total()
                ),
            ));
        }

        Ok(AggregateRow::new(record.group, test_date, instruction, branch))
    }
}

/// Parse a raw jacoco report. Extra columns are ignored.
pub fn read_raw_report<R: io::Read>(reader: R) -> CoverageResult<Vec<RawCoverageRow>> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    require_columns(reader.headers()?, &RAW_REQUIRED_COLUMNS)?;

    reader
        .deserialize::<RawCoverageRow>()
        .map(|row| row.map_err(CoverageError::from))
        .collect()
}

pub fn read_aggregate<R: io::Read>(reader: R) -> CoverageResult<AggregateTable> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    require_columns(reader.headers()?, &AGGREGATE_HEADER)?;

    reader
        .deserialize::<AggregateRecord>()
        .map(|record| AggregateRow::try_from(record?))
        .collect()
}

/// Write the table with its header, even when it has no rows.
pub fn write_aggregate<W: io::Write>(table: &AggregateTable, writer: W) -> CoverageResult<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(writer);
    writer.write_record(AGGREGATE_HEADER)?;
    for row in table.rows() {
        writer.serialize(AggregateRecord::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn aggregate_to_vec(table: &AggregateTable) -> CoverageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    write_aggregate(table, &mut buffer)?;
    Ok(buffer)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD`, and the `YYYY-MM-DD HH:MM:SS` form older aggregates
/// were written with.
pub fn parse_date(value: &str) -> CoverageResult<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|stamp| stamp.date())
        })
        .map_err(|_| CoverageError::InvalidDate {
            value: value.to_string(),
        })
}

fn require_columns(headers: &StringRecord, required: &[&str]) -> CoverageResult<()> {
    for column in required {
        if !headers.iter().any(|header| header == *column) {
            return Err(CoverageError::MissingColumn {
                column: (*column).to_string(),
            });
        }
    }
    Ok(())
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
