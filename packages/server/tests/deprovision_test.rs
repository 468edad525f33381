//! Deprovisioning round-trip scenarios (§4.4).

mod common;

use common::TestHarness;
use server_core::domains::jobs::{Allocation, ComputeNode, Job, JobStatus};
use server_core::kernel::nca_mock::NcaErrorKindPublic;

#[tokio::test]
async fn deprovision_releases_allocations_and_the_local_group() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;

    let (job, _) = harness
        .kernel
        .job_service
        .provision("42", "training-run", &["n1".to_string()], 1)
        .await
        .unwrap();
    let security_group_id = job.security_group_id.unwrap();

    harness.kernel.job_service.deprovision(&job).await.unwrap();

    let job = Job::find_by_job_id("42", &harness.db).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.security_group_id.is_none());
    assert!(job.completed_at.is_some());

    assert!(
        server_core::domains::jobs::SecurityGroup::find_by_id(security_group_id, &harness.db)
            .await
            .unwrap()
            .is_none()
    );

    let n1 = &ComputeNode::resolve_and_lock(&["n1".to_string()], &harness.db)
        .await
        .unwrap()[0];
    let holders = Allocation::find_holders(&[n1.id], "nobody", &harness.db)
        .await
        .unwrap();
    assert!(holders.is_empty());
}

#[tokio::test]
async fn deprovision_reports_cleanup_failed_when_the_controller_errors() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;

    let (job, _) = harness
        .kernel
        .job_service
        .provision("42", "training-run", &["n1".to_string()], 1)
        .await
        .unwrap();

    harness
        .nca
        .fail_next("delete_security_group", NcaErrorKindPublic::Other);

    let result = harness.kernel.job_service.deprovision(&job).await;
    assert!(result.is_err());

    let job = Job::find_by_job_id("42", &harness.db).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::CleanupFailed);
    assert!(job.error_message.is_some());

    // Local rows are still dropped even though the controller cleanup failed
    // (§4.4.4/§4.4.5): nodes must never be stranded by a transient fault.
    let n1 = &ComputeNode::resolve_and_lock(&["n1".to_string()], &harness.db)
        .await
        .unwrap()[0];
    let holders = Allocation::find_holders(&[n1.id], "nobody", &harness.db)
        .await
        .unwrap();
    assert!(holders.is_empty());
}

#[tokio::test]
async fn deprovisioning_a_completed_job_twice_is_harmless() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;

    let (job, _) = harness
        .kernel
        .job_service
        .provision("42", "training-run", &["n1".to_string()], 1)
        .await
        .unwrap();

    harness.kernel.job_service.deprovision(&job).await.unwrap();
    let completed = Job::find_by_job_id("42", &harness.db).await.unwrap().unwrap();

    // The controller has already forgotten this group/contract/association,
    // so the second call sees nothing but NotFound from every NCA call.
    harness.kernel.job_service.deprovision(&completed).await.unwrap();

    let job = Job::find_by_job_id("42", &harness.db).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}
