//! # SQA Common Library
//!
//! Shared code for the speaker-quality engine and its administrative tools:
//! - Database initialization, schema, and row models
//! - Event types (QaEvent enum) and the broadcast EventBus
//! - Configuration loading and data folder resolution
//! - Human-readable duration formatting

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod human_time;

pub use error::{Error, Result};
