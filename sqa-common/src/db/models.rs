//! Row models and shared queries
//!
//! Identifier columns are stored as hyphenated UUID text; row structs keep
//! them as `String` and callers parse where a typed identifier is needed.

use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

/// One row of the speakers table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SpeakerRow {
    pub guid: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// One row of the error_reports table
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ErrorReportRow {
    pub guid: String,
    pub speaker_id: String,
    pub original_text: String,
    pub corrected_text: String,
    pub severity: String,
    pub accepted: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Insert a speaker reference row
pub async fn insert_speaker(
    pool: &SqlitePool,
    speaker_id: Uuid,
    display_name: &str,
    created_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO speakers (guid, display_name, created_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(speaker_id.to_string())
    .bind(display_name)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List speaker identifiers, oldest first, capped
pub async fn list_speaker_ids(pool: &SqlitePool, limit: u32) -> Result<Vec<String>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT guid FROM speakers ORDER BY created_at, guid LIMIT ?")
            .bind(limit as i64)
            .fetch_all(pool)
            .await?;
    Ok(ids)
}

/// Insert an error report (used by the ingestion side and by tests)
#[allow(clippy::too_many_arguments)]
pub async fn insert_error_report(
    pool: &SqlitePool,
    report_id: Uuid,
    speaker_id: Uuid,
    original_text: &str,
    corrected_text: &str,
    severity: &str,
    accepted: bool,
    submitted_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO error_reports (
            guid, speaker_id, original_text, corrected_text,
            severity, accepted, submitted_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(report_id.to_string())
    .bind(speaker_id.to_string())
    .bind(original_text)
    .bind(corrected_text)
    .bind(severity)
    .bind(accepted)
    .bind(submitted_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List a speaker's error reports within a time window, oldest first
pub async fn list_error_reports(
    pool: &SqlitePool,
    speaker_id: Uuid,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Result<Vec<ErrorReportRow>> {
    let rows = sqlx::query_as::<_, ErrorReportRow>(
        r#"
        SELECT guid, speaker_id, original_text, corrected_text,
               severity, accepted, submitted_at
        FROM error_reports
        WHERE speaker_id = ? AND submitted_at >= ? AND submitted_at <= ?
        ORDER BY submitted_at, guid
        "#,
    )
    .bind(speaker_id.to_string())
    .bind(window_start)
    .bind(window_end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Count a speaker's reports before a cutoff (historical volume baseline)
pub async fn count_reports_before(
    pool: &SqlitePool,
    speaker_id: Uuid,
    cutoff: DateTime<Utc>,
) -> Result<(i64, Option<DateTime<Utc>>)> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM error_reports WHERE speaker_id = ? AND submitted_at < ?",
    )
    .bind(speaker_id.to_string())
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    let earliest: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT MIN(submitted_at) FROM error_reports WHERE speaker_id = ? AND submitted_at < ?",
    )
    .bind(speaker_id.to_string())
    .bind(cutoff)
    .fetch_one(pool)
    .await?;

    Ok((count, earliest))
}
