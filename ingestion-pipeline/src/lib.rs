pub mod chunking;
pub mod enrichment;
pub mod pipeline;

use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::job::Job},
    utils::config::AppConfig,
};
pub use pipeline::{DeleteOutcome, IngestionPipeline, ProgressReporter, UpsertOutcome};
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// How often the stale-job sweep runs while the worker is alive, expressed
/// in poll ticks.
const SWEEP_EVERY_TICKS: u64 = 30;

/// Single-process queue consumer: sweep stale work at startup, then claim
/// and execute pending jobs until shutdown.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<IngestionPipeline>,
    config: &AppConfig,
) -> Result<(), AppError> {
    let worker_id = format!("ingest-worker-{}", Uuid::new_v4());
    let poll_interval = Duration::from_secs(config.poll_interval.max(1));
    let stale_after = chrono::Duration::seconds(config.stale_job_after as i64);
    let max_attempts = config.max_job_attempts;

    match Job::sweep_stale(&db, stale_after, max_attempts).await {
        Ok((requeued, failed)) if requeued + failed > 0 => {
            info!(%worker_id, requeued, failed, "startup sweep reclaimed stale jobs");
        }
        Ok(_) => {}
        Err(err) => warn!(%worker_id, error = %err, "startup sweep failed"),
    }

    info!(%worker_id, "worker loop started");
    let mut ticks: u64 = 0;

    loop {
        match Job::claim_next_pending(&db, &worker_id).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                info!(%worker_id, %job_id, attempt = job.attempts, "claimed job");
                if let Err(err) = pipeline.process_job(job).await {
                    // Already recorded on the job row; the loop keeps going.
                    error!(%worker_id, %job_id, error = %err, "job execution failed");
                }
            }
            Ok(None) => {
                ticks += 1;
                if ticks % SWEEP_EVERY_TICKS == 0 {
                    if let Err(err) = Job::sweep_stale(&db, stale_after, max_attempts).await {
                        warn!(%worker_id, error = %err, "periodic sweep failed");
                    }
                }
                sleep(poll_interval).await;
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim job");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
