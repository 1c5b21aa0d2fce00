use chrono::Duration;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::ingest::IngestDoc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobKind {
    Ingest,
    Rebuild,
    Delete,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Rebuild => "rebuild",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum JobPayload {
    Ingest {
        docs: Vec<IngestDoc>,
    },
    Rebuild {
        tenant_id: String,
        namespace: String,
        document_type: Option<String>,
        reembed: bool,
    },
    Delete {
        tenant_id: String,
        namespace: String,
        doc_id: String,
    },
}

stored_object!(Job, "jobs", {
    kind: JobKind,
    status: JobStatus,
    payload: JobPayload,
    progress: u8,
    stage: Option<String>,
    error: Option<String>,
    attempts: u32,
    worker_id: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    completed_at: Option<DateTime<Utc>>
});

impl Job {
    pub fn new(kind: JobKind, payload: JobPayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            kind,
            status: JobStatus::Pending,
            payload,
            progress: 0,
            stage: None,
            error: None,
            attempts: 0,
            worker_id: None,
            completed_at: None,
        }
    }

    /// Create a job and persist it as pending.
    pub async fn enqueue(
        db: &SurrealDbClient,
        kind: JobKind,
        payload: JobPayload,
    ) -> Result<Self, AppError> {
        let job = Self::new(kind, payload);
        db.store_item(job.clone()).await?;
        Ok(job)
    }

    /// Claim the oldest pending job for this worker. The status guard in the
    /// UPDATE keeps the claim atomic when more than one worker polls.
    pub async fn claim_next_pending(
        db: &SurrealDbClient,
        worker_id: &str,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query(
                "SELECT VALUE record::id(id) FROM jobs \
                 WHERE status = 'Pending' \
                 ORDER BY created_at ASC \
                 LIMIT 1",
            )
            .await?;
        let candidates: Vec<String> = response.take(0).unwrap_or_default();

        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let mut response = db
            .query(
                "UPDATE type::thing('jobs', $id) SET \
                 status = 'Running', \
                 attempts += 1, \
                 worker_id = $worker_id, \
                 updated_at = time::now() \
                 WHERE status = 'Pending' \
                 RETURN AFTER",
            )
            .bind(("id", candidate))
            .bind(("worker_id", worker_id.to_owned()))
            .await?;

        let claimed: Vec<Self> = response.take(0)?;
        Ok(claimed.into_iter().next())
    }

    pub async fn update_progress(
        db: &SurrealDbClient,
        id: &str,
        progress: u8,
        stage: &str,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('jobs', $id) SET \
             progress = $progress, \
             stage = $stage, \
             updated_at = time::now()",
        )
        .bind(("id", id.to_owned()))
        .bind(("progress", progress.min(100)))
        .bind(("stage", stage.to_owned()))
        .await?;
        Ok(())
    }

    pub async fn mark_completed(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('jobs', $id) SET \
             status = 'Completed', \
             progress = 100, \
             stage = NONE, \
             completed_at = time::now(), \
             updated_at = time::now()",
        )
        .bind(("id", id.to_owned()))
        .await?;
        Ok(())
    }

    pub async fn mark_failed(db: &SurrealDbClient, id: &str, error: &str) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('jobs', $id) SET \
             status = 'Failed', \
             error = $error, \
             completed_at = time::now(), \
             updated_at = time::now()",
        )
        .bind(("id", id.to_owned()))
        .bind(("error", error.to_owned()))
        .await?;
        Ok(())
    }

    /// Return a failed job to pending so a worker retries it.
    pub async fn requeue(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('jobs', $id) SET \
             status = 'Pending', \
             worker_id = NONE, \
             updated_at = time::now()",
        )
        .bind(("id", id.to_owned()))
        .await?;
        Ok(())
    }

    /// Startup sweep: running jobs whose worker died go back to pending, or
    /// to failed once their attempts are exhausted.
    pub async fn sweep_stale(
        db: &SurrealDbClient,
        stale_after: Duration,
        max_attempts: u32,
    ) -> Result<(usize, usize), AppError> {
        let cutoff = surrealdb::sql::Datetime::from(Utc::now() - stale_after);

        let mut response = db
            .query(
                "UPDATE jobs SET \
                 status = 'Pending', \
                 worker_id = NONE, \
                 updated_at = time::now() \
                 WHERE status = 'Running' \
                   AND updated_at < $cutoff \
                   AND attempts < $max_attempts \
                 RETURN AFTER",
            )
            .query(
                "UPDATE jobs SET \
                 status = 'Failed', \
                 error = 'worker lost and retry budget exhausted', \
                 completed_at = time::now(), \
                 updated_at = time::now() \
                 WHERE status = 'Running' \
                   AND updated_at < $cutoff \
                   AND attempts >= $max_attempts \
                 RETURN AFTER",
            )
            .bind(("cutoff", cutoff))
            .bind(("max_attempts", max_attempts))
            .await?;

        let requeued: Vec<Self> = response.take(0).unwrap_or_default();
        let failed: Vec<Self> = response.take(1).unwrap_or_default();
        Ok((requeued.len(), failed.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rebuild_payload() -> JobPayload {
        JobPayload::Rebuild {
            tenant_id: "acme".to_owned(),
            namespace: "p1".to_owned(),
            document_type: None,
            reembed: false,
        }
    }

    async fn memory_db() -> SurrealDbClient {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized().await.expect("init schema");
        db
    }

    #[tokio::test]
    async fn claim_transitions_oldest_pending_to_running() {
        let db = memory_db().await;

        let first = Job::enqueue(&db, JobKind::Rebuild, rebuild_payload())
            .await
            .expect("enqueue");
        // A later job should not be claimed before the first.
        let mut second = Job::new(JobKind::Rebuild, rebuild_payload());
        second.created_at = first.created_at + Duration::seconds(5);
        db.store_item(second).await.expect("store");

        let claimed = Job::claim_next_pending(&db, "worker-a")
            .await
            .expect("claim")
            .expect("job available");
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-a"));
    }

    #[tokio::test]
    async fn claim_returns_none_when_queue_is_empty() {
        let db = memory_db().await;
        let claimed = Job::claim_next_pending(&db, "worker-a").await.expect("claim");
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn lifecycle_progress_complete_and_fail() {
        let db = memory_db().await;
        let job = Job::enqueue(&db, JobKind::Rebuild, rebuild_payload())
            .await
            .expect("enqueue");

        Job::update_progress(&db, &job.id, 40, "embedding")
            .await
            .expect("progress");
        let row: Job = db.get_item(&job.id).await.expect("get").expect("row");
        assert_eq!(row.progress, 40);
        assert_eq!(row.stage.as_deref(), Some("embedding"));

        Job::mark_completed(&db, &job.id).await.expect("complete");
        let row: Job = db.get_item(&job.id).await.expect("get").expect("row");
        assert_eq!(row.status, JobStatus::Completed);
        assert_eq!(row.progress, 100);
        assert!(row.completed_at.is_some());

        let other = Job::enqueue(&db, JobKind::Rebuild, rebuild_payload())
            .await
            .expect("enqueue");
        Job::mark_failed(&db, &other.id, "backend unavailable")
            .await
            .expect("fail");
        let row: Job = db.get_item(&other.id).await.expect("get").expect("row");
        assert_eq!(row.status, JobStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("backend unavailable"));
    }

    #[tokio::test]
    async fn sweep_requeues_stale_running_and_fails_exhausted() {
        let db = memory_db().await;

        let retryable = Job::enqueue(&db, JobKind::Rebuild, rebuild_payload())
            .await
            .expect("enqueue");
        let exhausted = Job::enqueue(&db, JobKind::Rebuild, rebuild_payload())
            .await
            .expect("enqueue");

        let stale = surrealdb::sql::Datetime::from(Utc::now() - Duration::minutes(30));
        db.query(
            "UPDATE type::thing('jobs', $id) SET status = 'Running', attempts = 1, updated_at = $stale",
        )
        .bind(("id", retryable.id.clone()))
        .bind(("stale", stale.clone()))
        .await
        .expect("prep");
        db.query(
            "UPDATE type::thing('jobs', $id) SET status = 'Running', attempts = 3, updated_at = $stale",
        )
        .bind(("id", exhausted.id.clone()))
        .bind(("stale", stale))
        .await
        .expect("prep");

        let (requeued, failed) = Job::sweep_stale(&db, Duration::minutes(10), 3)
            .await
            .expect("sweep");
        assert_eq!(requeued, 1);
        assert_eq!(failed, 1);

        let row: Job = db.get_item(&retryable.id).await.expect("get").expect("row");
        assert_eq!(row.status, JobStatus::Pending);
        let row: Job = db.get_item(&exhausted.id).await.expect("get").expect("row");
        assert_eq!(row.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn sweep_ignores_fresh_running_jobs() {
        let db = memory_db().await;
        let job = Job::enqueue(&db, JobKind::Rebuild, rebuild_payload())
            .await
            .expect("enqueue");
        Job::claim_next_pending(&db, "worker-a")
            .await
            .expect("claim");

        let (requeued, failed) = Job::sweep_stale(&db, Duration::minutes(10), 3)
            .await
            .expect("sweep");
        assert_eq!(requeued, 0);
        assert_eq!(failed, 0);

        let row: Job = db.get_item(&job.id).await.expect("get").expect("row");
        assert_eq!(row.status, JobStatus::Running);
    }
}
