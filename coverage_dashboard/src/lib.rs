//! Coverage trend service: the daily `update` job that folds the latest
//! jacoco report into the aggregate, and the `serve` dashboard that keeps
//! chart datasets refreshed from it.

pub mod app;
pub mod fetch;
pub mod refresh;
pub mod server;
pub mod store;
pub mod update;
