//! Job record persistence
//!
//! Every job row has a single writer (the worker running its pipeline), so
//! read-modify-write sequences on one row need no locking beyond SQLite's.
//! Writes are wrapped in `retry_on_lock` for contention between workers.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use stemscribe_common::Error;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult, SchedulerError};
use crate::models::{Job, JobFiles, JobMetadata, JobStatus, Stage};
use crate::utils::retry_on_lock;

/// Durable job storage
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job record
    async fn create(&self, job: &Job) -> PipelineResult<()>;

    /// Insert a new job only while fewer than `max_active` jobs are queued or processing
    ///
    /// The count and the insert happen in one statement.
    async fn admit(&self, job: &Job, max_active: usize) -> PipelineResult<()>;

    async fn get(&self, id: Uuid) -> PipelineResult<Option<Job>>;

    /// Jobs newest first, optionally filtered by status
    async fn list(&self, status: Option<JobStatus>, limit: i64, offset: i64) -> PipelineResult<Vec<Job>>;

    /// Change status
    ///
    /// Processing sets `started_at` once. Terminal states set `completed_at`
    /// and clear the stage; Completed forces progress to 100. A terminal job
    /// cannot change status again.
    async fn update_status(&self, id: Uuid, status: JobStatus, error_message: Option<&str>) -> PipelineResult<()>;

    /// Record the running stage, overall progress and a status message
    ///
    /// Progress never decreases.
    async fn update_stage(&self, id: Uuid, stage: Stage, progress: u8, message: &str) -> PipelineResult<()>;

    /// Fill in result metadata; `None` fields keep their stored value
    async fn update_metadata(&self, id: Uuid, metadata: &JobMetadata) -> PipelineResult<()>;

    /// Record result file paths; `None` fields keep their stored value, stems are merged
    async fn update_file_paths(&self, id: Uuid, files: &JobFiles) -> PipelineResult<()>;

    /// Returns false when the job did not exist
    async fn delete(&self, id: Uuid) -> PipelineResult<bool>;

    /// Number of queued plus processing jobs
    async fn count_active(&self) -> PipelineResult<i64>;

    /// Delete terminal jobs completed more than `days` days ago, returning their ids
    async fn cleanup_older_than(&self, days: u32) -> PipelineResult<Vec<Uuid>>;
}

/// SQLite-backed job repository
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Turn "no row updated" into NotFound or a rejected transition
    async fn explain_missed_update(&self, id: Uuid, action: &str) -> PipelineError {
        match self.get(id).await {
            Ok(Some(job)) => PipelineError::InvalidInput(format!(
                "Cannot {} job {} in status {}",
                action, id, job.status
            )),
            Ok(None) => PipelineError::NotFound(id),
            Err(e) => e,
        }
    }
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> PipelineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)).into())
}

fn parse_optional_timestamp(column: &str, value: Option<String>) -> PipelineResult<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

fn row_to_job(row: &SqliteRow) -> PipelineResult<Job> {
    let id: String = row.get("id");
    let id = Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("Invalid job id '{}': {}", id, e)))?;

    let status: String = row.get("status");
    let status = JobStatus::from_str(&status)
        .ok_or_else(|| Error::Internal(format!("Unknown job status '{}'", status)))?;

    let stage: Option<String> = row.get("stage");
    let stage = match stage {
        Some(s) => Some(Stage::from_str(&s).ok_or_else(|| Error::Internal(format!("Unknown stage '{}'", s)))?),
        None => None,
    };

    let created_at: String = row.get("created_at");
    let stems: String = row.get("stems");
    let stems: BTreeMap<String, String> = serde_json::from_str(&stems)
        .map_err(|e| Error::Internal(format!("Failed to deserialize stems: {}", e)))?;

    Ok(Job {
        id,
        status,
        stage,
        progress: row.get::<i64, _>("progress").clamp(0, 100) as u8,
        created_at: parse_timestamp("created_at", &created_at)?,
        started_at: parse_optional_timestamp("started_at", row.get("started_at"))?,
        completed_at: parse_optional_timestamp("completed_at", row.get("completed_at"))?,
        error_message: row.get("error_message"),
        status_message: row.get("status_message"),
        input_filename: row.get("input_filename"),
        file_size: row.get("file_size"),
        metadata: JobMetadata {
            duration_secs: row.get("duration_secs"),
            tempo_bpm: row.get("tempo_bpm"),
            num_frames: row.get("num_frames"),
            num_chords: row.get("num_chords"),
        },
        files: JobFiles {
            input_file: row.get("input_file"),
            stems,
            frames_json: row.get("frames_json"),
            pitch_csv: row.get("pitch_csv"),
            notes_json: row.get("notes_json"),
            midi: row.get("midi"),
            chords_json: row.get("chords_json"),
            chords_lab: row.get("chords_lab"),
            chords_csv: row.get("chords_csv"),
        },
    })
}

const INSERT_COLUMNS: &str = "id, status, stage, progress, created_at, started_at, completed_at, \
    error_message, status_message, input_filename, file_size, stems";

#[async_trait]
impl JobRepository for SqliteJobStore {
    async fn create(&self, job: &Job) -> PipelineResult<()> {
        let id = job.id.to_string();
        let created_at = timestamp(&job.created_at);
        let stems = serde_json::to_string(&job.files.stems)
            .map_err(|e| Error::Internal(format!("Failed to serialize stems: {}", e)))?;
        let sql = format!(
            "INSERT INTO jobs ({}) VALUES (?, ?, NULL, ?, ?, NULL, NULL, NULL, NULL, ?, ?, ?)",
            INSERT_COLUMNS
        );

        retry_on_lock("create_job", self.max_lock_wait_ms, || async {
            sqlx::query(&sql)
                .bind(&id)
                .bind(job.status.as_str())
                .bind(job.progress as i64)
                .bind(&created_at)
                .bind(&job.input_filename)
                .bind(job.file_size)
                .bind(&stems)
                .execute(&self.pool)
                .await?;
            Ok::<_, Error>(())
        })
        .await?;

        tracing::debug!(job_id = %job.id, filename = %job.input_filename, "Job created");
        Ok(())
    }

    async fn admit(&self, job: &Job, max_active: usize) -> PipelineResult<()> {
        let id = job.id.to_string();
        let created_at = timestamp(&job.created_at);
        let stems = serde_json::to_string(&job.files.stems)
            .map_err(|e| Error::Internal(format!("Failed to serialize stems: {}", e)))?;
        let sql = format!(
            "INSERT INTO jobs ({}) \
             SELECT ?, ?, NULL, ?, ?, NULL, NULL, NULL, NULL, ?, ?, ? \
             WHERE (SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'processing')) < ?",
            INSERT_COLUMNS
        );

        let inserted = retry_on_lock("admit_job", self.max_lock_wait_ms, || async {
            let result = sqlx::query(&sql)
                .bind(&id)
                .bind(job.status.as_str())
                .bind(job.progress as i64)
                .bind(&created_at)
                .bind(&job.input_filename)
                .bind(job.file_size)
                .bind(&stems)
                .bind(max_active as i64)
                .execute(&self.pool)
                .await?;
            Ok::<_, Error>(result.rows_affected())
        })
        .await?;

        if inserted == 0 {
            let active = self.count_active().await?;
            tracing::warn!(job_id = %job.id, active, max_active, "Job rejected: capacity exceeded");
            return Err(SchedulerError::CapacityExceeded {
                active: active.max(0) as usize,
                capacity: max_active,
            }
            .into());
        }

        tracing::debug!(job_id = %job.id, filename = %job.input_filename, "Job admitted");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> PipelineResult<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref().map(row_to_job).transpose()
    }

    async fn list(&self, status: Option<JobStatus>, limit: i64, offset: i64) -> PipelineResult<Vec<Job>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM jobs WHERE status = ? ORDER BY created_at DESC LIMIT ? OFFSET ?")
                    .bind(status.as_str())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(Error::Database)?;

        rows.iter().map(row_to_job).collect()
    }

    async fn update_status(&self, id: Uuid, status: JobStatus, error_message: Option<&str>) -> PipelineResult<()> {
        let id_str = id.to_string();
        let now = timestamp(&Utc::now());
        let is_processing = status == JobStatus::Processing;
        let is_terminal = status.is_terminal();
        let is_completed = status == JobStatus::Completed;

        let updated = retry_on_lock("update_job_status", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE jobs SET
                    status = ?,
                    started_at = CASE WHEN ? AND started_at IS NULL THEN ? ELSE started_at END,
                    completed_at = CASE WHEN ? THEN ? ELSE completed_at END,
                    stage = CASE WHEN ? THEN NULL ELSE stage END,
                    progress = CASE WHEN ? THEN 100 ELSE progress END,
                    error_message = COALESCE(?, error_message)
                WHERE id = ? AND status NOT IN ('completed', 'failed')
                "#,
            )
            .bind(status.as_str())
            .bind(is_processing)
            .bind(&now)
            .bind(is_terminal)
            .bind(&now)
            .bind(is_terminal)
            .bind(is_completed)
            .bind(error_message)
            .bind(&id_str)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(result.rows_affected())
        })
        .await?;

        if updated == 0 {
            return Err(self.explain_missed_update(id, "change status of").await);
        }

        tracing::debug!(job_id = %id, status = %status, "Job status updated");
        Ok(())
    }

    async fn update_stage(&self, id: Uuid, stage: Stage, progress: u8, message: &str) -> PipelineResult<()> {
        let id_str = id.to_string();
        let progress = progress.min(100) as i64;

        let updated = retry_on_lock("update_job_stage", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE jobs SET
                    stage = ?,
                    progress = MAX(progress, ?),
                    status_message = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(stage.as_str())
            .bind(progress)
            .bind(message)
            .bind(&id_str)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(result.rows_affected())
        })
        .await?;

        if updated == 0 {
            return Err(self.explain_missed_update(id, "report progress for").await);
        }
        Ok(())
    }

    async fn update_metadata(&self, id: Uuid, metadata: &JobMetadata) -> PipelineResult<()> {
        let id_str = id.to_string();

        let updated = retry_on_lock("update_job_metadata", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE jobs SET
                    duration_secs = COALESCE(?, duration_secs),
                    tempo_bpm = COALESCE(?, tempo_bpm),
                    num_frames = COALESCE(?, num_frames),
                    num_chords = COALESCE(?, num_chords)
                WHERE id = ?
                "#,
            )
            .bind(metadata.duration_secs)
            .bind(metadata.tempo_bpm)
            .bind(metadata.num_frames)
            .bind(metadata.num_chords)
            .bind(&id_str)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(result.rows_affected())
        })
        .await?;

        if updated == 0 {
            return Err(PipelineError::NotFound(id));
        }
        Ok(())
    }

    async fn update_file_paths(&self, id: Uuid, files: &JobFiles) -> PipelineResult<()> {
        let mut stems = self
            .get(id)
            .await?
            .ok_or(PipelineError::NotFound(id))?
            .files
            .stems;
        stems.extend(files.stems.iter().map(|(k, v)| (k.clone(), v.clone())));
        let stems = serde_json::to_string(&stems)
            .map_err(|e| Error::Internal(format!("Failed to serialize stems: {}", e)))?;
        let id_str = id.to_string();

        retry_on_lock("update_job_files", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                UPDATE jobs SET
                    input_file = COALESCE(?, input_file),
                    stems = ?,
                    frames_json = COALESCE(?, frames_json),
                    pitch_csv = COALESCE(?, pitch_csv),
                    notes_json = COALESCE(?, notes_json),
                    midi = COALESCE(?, midi),
                    chords_json = COALESCE(?, chords_json),
                    chords_lab = COALESCE(?, chords_lab),
                    chords_csv = COALESCE(?, chords_csv)
                WHERE id = ?
                "#,
            )
            .bind(&files.input_file)
            .bind(&stems)
            .bind(&files.frames_json)
            .bind(&files.pitch_csv)
            .bind(&files.notes_json)
            .bind(&files.midi)
            .bind(&files.chords_json)
            .bind(&files.chords_lab)
            .bind(&files.chords_csv)
            .bind(&id_str)
            .execute(&self.pool)
            .await?;
            Ok::<_, Error>(())
        })
        .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> PipelineResult<bool> {
        let id_str = id.to_string();
        let deleted = retry_on_lock("delete_job", self.max_lock_wait_ms, || async {
            let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(&id_str)
                .execute(&self.pool)
                .await?;
            Ok::<_, Error>(result.rows_affected())
        })
        .await?;

        Ok(deleted > 0)
    }

    async fn count_active(&self) -> PipelineResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'processing')")
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(count)
    }

    async fn cleanup_older_than(&self, days: u32) -> PipelineResult<Vec<Uuid>> {
        let cutoff = timestamp(&(Utc::now() - chrono::Duration::days(days as i64)));

        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM jobs WHERE status IN ('completed', 'failed') AND completed_at < ?",
        )
        .bind(&cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            let uuid = Uuid::parse_str(&id).map_err(|e| Error::Internal(format!("Invalid job id '{}': {}", id, e)))?;
            if self.delete(uuid).await? {
                removed.push(uuid);
            }
        }

        tracing::info!(count = removed.len(), days, "Cleaned up old jobs");
        Ok(removed)
    }
}
