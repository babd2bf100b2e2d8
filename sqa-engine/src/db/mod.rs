//! Engine database access
//!
//! `bucket_store` owns all writes to `bucket_changes` and
//! `speaker_bucket_state`; `report_store` is the SQLite-backed
//! implementation of the external report-store contract.

pub mod bucket_store;
pub mod report_store;

pub use bucket_store::BucketStateStore;
pub use report_store::SqliteReportStore;
