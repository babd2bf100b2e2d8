//! Bucket state store
//!
//! Single source of truth for "current bucket". `commit_change` is the only
//! mutation path: it appends to the audit trail and updates the cached
//! state projection in one transaction, with an optimistic-concurrency
//! check against the bucket the caller read. The invariant "current bucket
//! equals the newest history record's new_bucket" is the recovery check.

use crate::error::{EngineError, EngineResult};
use crate::types::{BucketChangeRecord, ChangeActor, QualityBucket, SpeakerBucketState};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

/// One row of the bucket_changes table
#[derive(Debug, sqlx::FromRow)]
struct BucketChangeRow {
    guid: String,
    speaker_id: String,
    previous_bucket: String,
    new_bucket: String,
    confidence: f64,
    reason: String,
    snapshot: Option<String>,
    actor: String,
    created_at: DateTime<Utc>,
}

fn parse_bucket(value: &str, column: &str) -> EngineResult<QualityBucket> {
    QualityBucket::parse(value).ok_or_else(|| {
        EngineError::Common(sqa_common::Error::Internal(format!(
            "malformed {} value '{}'",
            column, value
        )))
    })
}

fn parse_uuid(value: &str, column: &str) -> EngineResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| {
        EngineError::Common(sqa_common::Error::Internal(format!(
            "malformed {} value '{}'",
            column, value
        )))
    })
}

impl BucketChangeRow {
    fn into_record(self) -> EngineResult<BucketChangeRecord> {
        let snapshot = match self.snapshot {
            Some(text) => Some(serde_json::from_str(&text)?),
            None => None,
        };
        Ok(BucketChangeRecord {
            id: parse_uuid(&self.guid, "bucket_changes.guid")?,
            speaker_id: parse_uuid(&self.speaker_id, "bucket_changes.speaker_id")?,
            previous_bucket: parse_bucket(&self.previous_bucket, "bucket_changes.previous_bucket")?,
            new_bucket: parse_bucket(&self.new_bucket, "bucket_changes.new_bucket")?,
            confidence: self.confidence,
            reason: self.reason,
            snapshot,
            actor: ChangeActor::parse(&self.actor),
            created_at: self.created_at,
        })
    }
}

/// Bucket state store over the shared pool
#[derive(Clone)]
pub struct BucketStateStore {
    pool: SqlitePool,
    default_bucket: QualityBucket,
}

impl BucketStateStore {
    pub fn new(pool: SqlitePool, default_bucket: QualityBucket) -> Self {
        Self {
            pool,
            default_bucket,
        }
    }

    /// Current bucket for a speaker; a speaker with no history starts in
    /// the conservative default
    pub async fn current_bucket(&self, speaker_id: Uuid) -> EngineResult<QualityBucket> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT current_bucket FROM speaker_bucket_state WHERE speaker_id = ?",
        )
        .bind(speaker_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match value {
            Some(s) => parse_bucket(&s, "speaker_bucket_state.current_bucket"),
            None => Ok(self.default_bucket),
        }
    }

    /// Full bucket state for a speaker, synthesized for speakers that have
    /// never changed bucket. The trailing-30-day change count is derived
    /// from the audit trail at read time.
    pub async fn state(&self, speaker_id: Uuid, now: DateTime<Utc>) -> EngineResult<SpeakerBucketState> {
        let row: Option<(String, DateTime<Utc>, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
            sqlx::query_as(
                r#"
                SELECT current_bucket, entered_at, last_change_at, last_evaluated_at
                FROM speaker_bucket_state WHERE speaker_id = ?
                "#,
            )
            .bind(speaker_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let changes_in_trailing_30_days: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bucket_changes WHERE speaker_id = ? AND created_at > ?",
        )
        .bind(speaker_id.to_string())
        .bind(now - Duration::days(30))
        .fetch_one(&self.pool)
        .await?;

        match row {
            Some((bucket, entered_at, last_change_at, last_evaluated_at)) => {
                Ok(SpeakerBucketState {
                    speaker_id,
                    current_bucket: parse_bucket(&bucket, "speaker_bucket_state.current_bucket")?,
                    entered_at,
                    last_change_at,
                    last_evaluated_at,
                    changes_in_trailing_30_days: changes_in_trailing_30_days as u32,
                })
            }
            None => {
                // Never changed: the speaker has been in the default bucket
                // since creation
                let entered_at = self.speaker_created_at(speaker_id).await?.unwrap_or(now);
                Ok(SpeakerBucketState {
                    speaker_id,
                    current_bucket: self.default_bucket,
                    entered_at,
                    last_change_at: None,
                    last_evaluated_at: None,
                    changes_in_trailing_30_days: changes_in_trailing_30_days as u32,
                })
            }
        }
    }

    async fn speaker_created_at(&self, speaker_id: Uuid) -> EngineResult<Option<DateTime<Utc>>> {
        let created: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT created_at FROM speakers WHERE guid = ?")
                .bind(speaker_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(created)
    }

    /// Commit a bucket change: the only mutation path
    ///
    /// Appends the audit record and updates the cached state pointer in one
    /// transaction. `expected_previous` is the bucket the caller read when
    /// it evaluated; a mismatch means another evaluation committed in
    /// between and the whole change is rejected with a conflict.
    #[allow(clippy::too_many_arguments)]
    pub async fn commit_change(
        &self,
        speaker_id: Uuid,
        new_bucket: QualityBucket,
        expected_previous: QualityBucket,
        confidence: f64,
        reason: &str,
        snapshot: Option<&serde_json::Value>,
        actor: ChangeActor,
        now: DateTime<Utc>,
    ) -> EngineResult<BucketChangeRecord> {
        let mut tx = self.pool.begin().await?;

        let stored: Option<String> = sqlx::query_scalar(
            "SELECT current_bucket FROM speaker_bucket_state WHERE speaker_id = ?",
        )
        .bind(speaker_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let current = match stored {
            Some(s) => parse_bucket(&s, "speaker_bucket_state.current_bucket")?,
            None => self.default_bucket,
        };

        if current != expected_previous {
            return Err(EngineError::Conflict(format!(
                "speaker {} is in {} but the evaluation read {}",
                speaker_id,
                current.as_str(),
                expected_previous.as_str(),
            )));
        }

        let record_id = Uuid::new_v4();
        let snapshot_text = snapshot.map(|v| v.to_string());

        // History first; the state row is a projection of it
        sqlx::query(
            r#"
            INSERT INTO bucket_changes (
                guid, speaker_id, previous_bucket, new_bucket,
                confidence, reason, snapshot, actor, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record_id.to_string())
        .bind(speaker_id.to_string())
        .bind(current.as_str())
        .bind(new_bucket.as_str())
        .bind(confidence)
        .bind(reason)
        .bind(&snapshot_text)
        .bind(actor.as_db_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO speaker_bucket_state (speaker_id, current_bucket, entered_at, last_change_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(speaker_id) DO UPDATE SET
                current_bucket = excluded.current_bucket,
                entered_at = excluded.entered_at,
                last_change_at = excluded.last_change_at
            "#,
        )
        .bind(speaker_id.to_string())
        .bind(new_bucket.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            speaker_id = %speaker_id,
            previous_bucket = current.as_str(),
            new_bucket = new_bucket.as_str(),
            confidence,
            actor = %actor.as_db_string(),
            "Bucket change committed"
        );

        Ok(BucketChangeRecord {
            id: record_id,
            speaker_id,
            previous_bucket: current,
            new_bucket,
            confidence,
            reason: reason.to_string(),
            snapshot: snapshot.cloned(),
            actor,
            created_at: now,
        })
    }

    /// Change history for a speaker, newest first
    pub async fn history(
        &self,
        speaker_id: Uuid,
        limit: u32,
    ) -> EngineResult<Vec<BucketChangeRecord>> {
        let rows = sqlx::query_as::<_, BucketChangeRow>(
            r#"
            SELECT guid, speaker_id, previous_bucket, new_bucket,
                   confidence, reason, snapshot, actor, created_at
            FROM bucket_changes
            WHERE speaker_id = ?
            ORDER BY created_at DESC, guid DESC
            LIMIT ?
            "#,
        )
        .bind(speaker_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|row| row.into_record()).collect()
    }

    /// Record that an evaluation ran, creating the state row if absent
    pub async fn mark_evaluated(&self, speaker_id: Uuid, now: DateTime<Utc>) -> EngineResult<()> {
        let entered_at = self.speaker_created_at(speaker_id).await?.unwrap_or(now);

        sqlx::query(
            r#"
            INSERT INTO speaker_bucket_state (speaker_id, current_bucket, entered_at, last_evaluated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(speaker_id) DO UPDATE SET
                last_evaluated_at = excluded.last_evaluated_at
            "#,
        )
        .bind(speaker_id.to_string())
        .bind(self.default_bucket.as_str())
        .bind(entered_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Recovery check: the cached state must match the newest audit record
    /// (both absent counts as consistent — the speaker is still in the
    /// default bucket)
    pub async fn verify_consistency(&self, speaker_id: Uuid) -> EngineResult<bool> {
        let newest: Option<String> = sqlx::query_scalar(
            r#"
            SELECT new_bucket FROM bucket_changes
            WHERE speaker_id = ?
            ORDER BY created_at DESC, guid DESC
            LIMIT 1
            "#,
        )
        .bind(speaker_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let cached: Option<String> = sqlx::query_scalar(
            "SELECT current_bucket FROM speaker_bucket_state WHERE speaker_id = ?",
        )
        .bind(speaker_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match (newest, cached) {
            (None, None) => true,
            // Evaluated but never changed: cached row must hold the default
            (None, Some(bucket)) => bucket == self.default_bucket.as_str(),
            (Some(newest), Some(cached)) => newest == cached,
            (Some(_), None) => false,
        })
    }

    /// Speaker identifiers for a sweep, capped
    pub async fn list_speaker_ids(&self, limit: u32) -> EngineResult<Vec<Uuid>> {
        let ids = sqa_common::db::models::list_speaker_ids(&self.pool, limit)
            .await
            .map_err(EngineError::Common)?;
        ids.iter().map(|s| parse_uuid(s, "speakers.guid")).collect()
    }
}
