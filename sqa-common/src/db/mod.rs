//! Database access for SQA
//!
//! Schema ownership: `bucket_changes` and `speaker_bucket_state` are
//! mutated only by the engine's state store; everything else is shared.

pub mod init;
pub mod models;

pub use init::init_database;
