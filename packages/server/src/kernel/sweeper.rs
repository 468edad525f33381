//! Sweeper — `CleanupExpiredJobs` (§4.5), run periodically from a background
//! worker. Grounded on `kernel/scheduled_tasks.rs`'s periodic-task shape in
//! this workspace, simplified to a plain `tokio::time::interval` loop since
//! the spec calls for no calendar scheduling, just a fixed poll interval.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::domains::jobs::{Job, JobService};

/// Selects Jobs with `status = active AND expires-at < now`, deprovisions
/// each, and returns the job-ids successfully cleaned. A failure on one Job
/// is logged and does not abort the sweep (§4.5).
pub async fn sweep_expired_jobs(
    db: &sqlx::PgPool,
    job_service: &JobService,
) -> Result<Vec<String>, sqlx::Error> {
    let expired = Job::find_active_expired(db).await?;
    let mut cleaned = Vec::with_capacity(expired.len());
    for job in &expired {
        match job_service.deprovision(job).await {
            Ok(()) => {
                info!(job_id = %job.job_id, "sweeper reclaimed expired job");
                cleaned.push(job.job_id.clone());
            }
            Err(error) => {
                error!(job_id = %job.job_id, %error, "sweeper failed to deprovision expired job");
            }
        }
    }
    Ok(cleaned)
}

/// Spawns the per-replica sweeper loop (§5 "one background sweeper per
/// replica"), ticking every `interval` and running [`sweep_expired_jobs`].
/// Returns the task handle so callers can await or abort it at shutdown.
pub fn spawn_sweeper(
    db: sqlx::PgPool,
    job_service: Arc<JobService>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sweep_expired_jobs(&db, &job_service).await {
                Ok(cleaned) if !cleaned.is_empty() => {
                    info!(count = cleaned.len(), "sweeper cycle reclaimed expired jobs");
                }
                Ok(_) => {}
                Err(error) => warn!(%error, "sweeper cycle failed to query expired jobs"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles() {
        // End-to-end coverage lives in `tests/sweeper_test.rs`, which runs
        // this against a real `PgPool` via `testcontainers`; this module has
        // no pure logic of its own beyond the query + fan-out above.
        let _ = sweep_expired_jobs;
        let _ = spawn_sweeper;
    }
}
