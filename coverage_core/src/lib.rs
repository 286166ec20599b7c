//! Coverage trend data handling.
//!
//! A day's raw jacoco report is reshaped into one row per group by
//! [`transform::CoverageTransformer`], merged into the historical aggregate
//! table by [`merge::merge`], and turned into chart-ready datasets by
//! [`charts::build_chart_set`]. [`codec`] reads and writes both CSV shapes.

pub mod charts;
pub mod codec;
pub mod error;
pub mod merge;
pub mod model;
pub mod transform;

pub use error::{CoverageError, CoverageResult};
pub use model::{AggregateKey, AggregateRow, AggregateTable, Counter, RawCoverageRow};
