//! `CleanupExpiredJobs` (§4.5) against a real Postgres container.

mod common;

use common::TestHarness;
use server_core::domains::jobs::{Allocation, ComputeNode, Job, JobStatus};
use server_core::kernel::sweep_expired_jobs;

#[tokio::test]
async fn sweeper_reclaims_an_expired_active_job() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;

    harness
        .kernel
        .job_service
        .provision("42", "training-run", &["n1".to_string()], 1)
        .await
        .unwrap();

    sqlx::query("UPDATE jobs SET expires_at = NOW() - INTERVAL '1 hour' WHERE job_id = '42'")
        .execute(&harness.db)
        .await
        .unwrap();

    let cleaned = sweep_expired_jobs(&harness.db, &harness.kernel.job_service)
        .await
        .unwrap();

    assert_eq!(cleaned, vec!["42".to_string()]);

    let job = Job::find_by_job_id("42", &harness.db).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let n1 = &ComputeNode::resolve_and_lock(&["n1".to_string()], &harness.db)
        .await
        .unwrap()[0];
    let holders = Allocation::find_holders(&[n1.id], "nobody", &harness.db)
        .await
        .unwrap();
    assert!(holders.is_empty());
}

#[tokio::test]
async fn sweeper_leaves_non_expired_active_jobs_alone() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;

    harness
        .kernel
        .job_service
        .provision("42", "training-run", &["n1".to_string()], 30)
        .await
        .unwrap();

    let cleaned = sweep_expired_jobs(&harness.db, &harness.kernel.job_service)
        .await
        .unwrap();

    assert!(cleaned.is_empty());

    let job = Job::find_by_job_id("42", &harness.db).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Active);
}
