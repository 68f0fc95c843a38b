//! Job records and the job state store
//!
//! A job is one unit of asynchronous work (a conversion or a tagging run).
//! The store is the authoritative record of its lifecycle; `update` enforces
//! the transition invariants (monotonic status, non-decreasing progress) so
//! pipelines can't resurrect terminal jobs or roll progress backwards.

use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Completed and failed are terminal; no transition out of them
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Kind of work a job tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Conversion,
    Tagging,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Conversion => "conversion",
            JobKind::Tagging => "tagging",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "conversion" => Some(JobKind::Conversion),
            "tagging" => Some(JobKind::Tagging),
            _ => None,
        }
    }
}

/// One unit of asynchronous work
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Source folders for conversion, a single file path for tagging
    pub input_paths: Vec<String>,
    pub output_path: Option<String>,
    /// Snapshot locations, cleared once the artifact has been tagged
    pub backup_paths: Option<Vec<String>>,
    pub progress: f64,
    pub log: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Partial update applied by `JobStore::update`; absent fields are untouched
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub output_path: Option<String>,
    pub backup_paths: Option<Vec<String>>,
    pub progress: Option<f64>,
    pub log: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Job state store backed by the shared SQLite pool
#[derive(Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new job in QUEUED state
    pub async fn create(&self, kind: JobKind, input_paths: &[String]) -> Result<Job> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, status, input_paths, progress, created_at, updated_at)
            VALUES (?, ?, 'queued', ?, 0.0, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(kind.as_str())
        .bind(serde_json::to_string(input_paths).unwrap_or_else(|_| "[]".to_string()))
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Job {
            id,
            kind,
            status: JobStatus::Queued,
            input_paths: input_paths.to_vec(),
            output_path: None,
            backup_paths: None,
            progress: 0.0,
            log: None,
            created_at: now,
            updated_at: now,
            start_time: None,
            end_time: None,
        })
    }

    /// Fetch a job by id
    pub async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    /// List jobs with optional status/kind filters, newest first
    pub async fn list(
        &self,
        status: Option<JobStatus>,
        kind: Option<JobKind>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Job>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR kind = ?2)
            ORDER BY created_at DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(kind.map(|k| k.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    /// Count jobs matching the optional filters
    pub async fn count(&self, status: Option<JobStatus>, kind: Option<JobKind>) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM jobs
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR kind = ?2)
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(kind.map(|k| k.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("n"))
    }

    /// Apply a partial update. Returns `None` for an unknown id (never an
    /// error); callers treat that as "nothing to update".
    pub async fn update(&self, id: Uuid, update: JobUpdate) -> Result<Option<Job>> {
        let Some(current) = self.get(id).await? else {
            return Ok(None);
        };

        // Terminal states stick: once a job is completed or failed, only its
        // snapshot bookkeeping may still change. Everything else in a late
        // update (stray tracker writes included) is dropped.
        if current.status.is_terminal() {
            if let Some(new_status) = update.status {
                if new_status != current.status {
                    tracing::warn!(
                        job_id = %id,
                        current = current.status.as_str(),
                        requested = new_status.as_str(),
                        "Ignoring status transition out of terminal state"
                    );
                }
            }

            let Some(backup_paths) = update.backup_paths else {
                return Ok(Some(current));
            };

            sqlx::query("UPDATE jobs SET backup_paths = ?, updated_at = ? WHERE id = ?")
                .bind(serde_json::to_string(&backup_paths).unwrap_or_else(|_| "[]".to_string()))
                .bind(Utc::now().to_rfc3339())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

            return self.get(id).await;
        }

        let status = update.status.unwrap_or(current.status);

        // Progress never decreases; completion forces 100.
        let mut progress = match update.progress {
            Some(p) => current.progress.max(p.clamp(0.0, 100.0)),
            None => current.progress,
        };
        if status == JobStatus::Completed {
            progress = 100.0;
        }

        let output_path = update.output_path.or(current.output_path);
        let backup_paths = update.backup_paths.or(current.backup_paths);
        let log = update.log.or(current.log);
        let start_time = update.start_time.or(current.start_time);
        let end_time = update.end_time.or(current.end_time);
        let now = Utc::now();

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, output_path = ?, backup_paths = ?, progress = ?,
                log = ?, start_time = ?, end_time = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(&output_path)
        .bind(
            backup_paths
                .as_ref()
                .map(|p| serde_json::to_string(p).unwrap_or_else(|_| "[]".to_string())),
        )
        .bind(progress)
        .bind(&log)
        .bind(start_time.map(|t| t.to_rfc3339()))
        .bind(end_time.map(|t| t.to_rfc3339()))
        .bind(now.to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.get(id).await
    }

    /// Delete a job record
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete terminal-status jobs older than the cutoff. Queued and running
    /// jobs are never swept regardless of age.
    pub async fn sweep_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(days);

        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed')
              AND created_at < ?
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Find the completed conversion job that produced the given artifact.
    /// Used by the tagging pipeline to locate reclaimable backups.
    pub async fn find_completed_conversion_by_output(
        &self,
        output_path: &str,
    ) -> Result<Option<Job>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE kind = 'conversion' AND status = 'completed' AND output_path = ?
            LIMIT 1
            "#,
        )
        .bind(output_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| job_from_row(&r)).transpose()
    }
}

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let id_str: String = row.get("id");
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| crate::error::Error::Internal(format!("Bad job id {}: {}", id_str, e)))?;

    let kind_str: String = row.get("kind");
    let kind = JobKind::parse(&kind_str)
        .ok_or_else(|| crate::error::Error::Internal(format!("Bad job kind: {}", kind_str)))?;

    let status_str: String = row.get("status");
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| crate::error::Error::Internal(format!("Bad job status: {}", status_str)))?;

    let input_paths_json: String = row.get("input_paths");
    let input_paths: Vec<String> = serde_json::from_str(&input_paths_json).unwrap_or_default();

    let backup_paths: Option<Vec<String>> = row
        .get::<Option<String>, _>("backup_paths")
        .map(|json| serde_json::from_str(&json).unwrap_or_default());

    Ok(Job {
        id,
        kind,
        status,
        input_paths,
        output_path: row.get("output_path"),
        backup_paths,
        progress: row.get("progress"),
        log: row.get("log"),
        created_at: parse_timestamp(row.get("created_at")),
        updated_at: parse_timestamp(row.get("updated_at")),
        start_time: row
            .get::<Option<String>, _>("start_time")
            .map(parse_timestamp),
        end_time: row
            .get::<Option<String>, _>("end_time")
            .map(parse_timestamp),
    })
}

fn parse_timestamp(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    async fn store() -> JobStore {
        JobStore::new(init_memory_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = store().await;
        let job = store
            .create(JobKind::Conversion, &["/data/source/book".to_string()])
            .await
            .unwrap();

        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, job.id);
        assert_eq!(fetched.kind, JobKind::Conversion);
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.input_paths, vec!["/data/source/book".to_string()]);
        assert_eq!(fetched.progress, 0.0);
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_none() {
        let store = store().await;
        let result = store
            .update(
                Uuid::new_v4(),
                JobUpdate {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_status_transitions_are_monotonic() {
        let store = store().await;
        let job = store.create(JobKind::Conversion, &[]).await.unwrap();

        store
            .update(
                job.id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .update(
                job.id,
                JobUpdate {
                    status: Some(JobStatus::Failed),
                    log: Some("encoder exited with 1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // No resurrection from a terminal state
        let after = store
            .update(
                job.id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.log.as_deref(), Some("encoder exited with 1"));
    }

    #[tokio::test]
    async fn test_terminal_jobs_only_accept_backup_bookkeeping() {
        let store = store().await;
        let job = store.create(JobKind::Conversion, &[]).await.unwrap();

        store
            .update(
                job.id,
                JobUpdate {
                    status: Some(JobStatus::Failed),
                    progress: Some(40.0),
                    backup_paths: Some(vec!["/data/backup/book_x".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Post-mortem field writes are dropped whole
        let after = store
            .update(
                job.id,
                JobUpdate {
                    progress: Some(90.0),
                    log: Some("late tracker write".to_string()),
                    output_path: Some("/data/ready/ghost.m4b".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, JobStatus::Failed);
        assert_eq!(after.progress, 40.0);
        assert!(after.log.is_none());
        assert!(after.output_path.is_none());

        // Snapshot reclamation must still be able to clear its paths
        let after = store
            .update(
                job.id,
                JobUpdate {
                    backup_paths: Some(Vec::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.backup_paths, Some(Vec::new()));
        assert_eq!(after.progress, 40.0);
    }

    #[tokio::test]
    async fn test_progress_is_non_decreasing_and_completion_forces_100() {
        let store = store().await;
        let job = store.create(JobKind::Conversion, &[]).await.unwrap();

        let updated = store
            .update(
                job.id,
                JobUpdate {
                    progress: Some(40.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.progress, 40.0);

        // A lower write never rolls progress back
        let updated = store
            .update(
                job.id,
                JobUpdate {
                    progress: Some(10.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.progress, 40.0);

        let updated = store
            .update(
                job.id,
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.progress, 100.0);
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let store = store().await;
        for _ in 0..3 {
            store.create(JobKind::Conversion, &[]).await.unwrap();
        }
        let tagging = store.create(JobKind::Tagging, &[]).await.unwrap();
        store
            .update(
                tagging.id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let all = store.list(None, None, 50, 0).await.unwrap();
        assert_eq!(all.len(), 4);

        let queued = store.list(Some(JobStatus::Queued), None, 50, 0).await.unwrap();
        assert_eq!(queued.len(), 3);

        let tagging_jobs = store
            .list(None, Some(JobKind::Tagging), 50, 0)
            .await
            .unwrap();
        assert_eq!(tagging_jobs.len(), 1);
        assert_eq!(tagging_jobs[0].id, tagging.id);

        let page = store.list(None, None, 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);

        assert_eq!(store.count(None, None).await.unwrap(), 4);
        assert_eq!(
            store.count(Some(JobStatus::Running), None).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_old_terminal_jobs() {
        let store = store().await;

        let completed = store.create(JobKind::Conversion, &[]).await.unwrap();
        store
            .update(
                completed.id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update(
                completed.id,
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let running = store.create(JobKind::Conversion, &[]).await.unwrap();
        store
            .update(
                running.id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Back-date creation: completed job 40 days, running job 90 days
        backdate(&store, completed.id, 40).await;
        backdate(&store, running.id, 90).await;

        let swept = store.sweep_older_than(30).await.unwrap();
        assert_eq!(swept, 1);
        assert!(store.get(completed.id).await.unwrap().is_none());
        assert!(store.get(running.id).await.unwrap().is_some());
    }

    async fn backdate(store: &JobStore, id: Uuid, days: i64) {
        let old = (Utc::now() - Duration::days(days)).to_rfc3339();
        sqlx::query("UPDATE jobs SET created_at = ? WHERE id = ?")
            .bind(old)
            .bind(id.to_string())
            .execute(&store.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_find_completed_conversion_by_output() {
        let store = store().await;
        let job = store.create(JobKind::Conversion, &[]).await.unwrap();
        store
            .update(
                job.id,
                JobUpdate {
                    status: Some(JobStatus::Running),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update(
                job.id,
                JobUpdate {
                    status: Some(JobStatus::Completed),
                    output_path: Some("/data/ready/book.m4b".to_string()),
                    backup_paths: Some(vec!["/data/backup/book_20260801_120000".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let found = store
            .find_completed_conversion_by_output("/data/ready/book.m4b")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.backup_paths.unwrap().len(), 1);

        assert!(store
            .find_completed_conversion_by_output("/data/ready/other.m4b")
            .await
            .unwrap()
            .is_none());
    }
}
