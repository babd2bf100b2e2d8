//! SQLite-backed report store
//!
//! Implements the `ReportStore` contract over the shared `error_reports`
//! table. The engine only ever reads from it.

use crate::error::{EngineError, EngineResult};
use crate::services::performance_aggregator::{ReportStore, VolumeBaseline};
use crate::types::ErrorReport;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqa_common::db::models;
use sqlx::SqlitePool;
use uuid::Uuid;

/// Report store reading the shared error_reports table
#[derive(Clone)]
pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn parse_uuid(value: &str, column: &str) -> EngineResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| {
        EngineError::Common(sqa_common::Error::Internal(format!(
            "malformed {} value '{}'",
            column, value
        )))
    })
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn list_reports(
        &self,
        speaker_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> EngineResult<Vec<ErrorReport>> {
        let rows = models::list_error_reports(&self.pool, speaker_id, window_start, window_end)
            .await
            .map_err(EngineError::Common)?;

        rows.into_iter()
            .map(|row| {
                Ok(ErrorReport {
                    id: parse_uuid(&row.guid, "error_reports.guid")?,
                    speaker_id: parse_uuid(&row.speaker_id, "error_reports.speaker_id")?,
                    original_text: row.original_text,
                    corrected_text: row.corrected_text,
                    severity: row.severity,
                    accepted: row.accepted,
                    submitted_at: row.submitted_at,
                })
            })
            .collect()
    }

    async fn volume_baseline(
        &self,
        speaker_id: Uuid,
        before: DateTime<Utc>,
    ) -> EngineResult<Option<VolumeBaseline>> {
        let (count, earliest) = models::count_reports_before(&self.pool, speaker_id, before)
            .await
            .map_err(EngineError::Common)?;

        let Some(earliest) = earliest else {
            return Ok(None);
        };
        if count == 0 {
            return Ok(None);
        }

        let span_days = ((before - earliest).num_seconds() as f64 / 86_400.0).max(1.0);
        Ok(Some(VolumeBaseline {
            daily_average: count as f64 / span_days,
        }))
    }
}
