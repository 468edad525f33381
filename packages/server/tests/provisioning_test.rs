//! Provisioning scenarios against a real Postgres container and a
//! [`MockNca`](server_core::kernel::nca_mock::MockNca).

mod common;

use common::TestHarness;
use server_core::domains::jobs::{Allocation, ComputeNode, Job, JobError, JobStatus, SecurityGroup};
use server_core::kernel::nca_mock::NcaErrorKindPublic;

#[tokio::test]
async fn provisions_a_job_with_two_nodes() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;
    harness.seed_node("n2", "SN2", "eth0").await;

    let (job, created) = harness
        .kernel
        .job_service
        .provision("42", "training-run", &["n1".to_string(), "n2".to_string()], 1)
        .await
        .expect("provision should succeed");

    assert!(created);
    assert_eq!(job.status, JobStatus::Active);
    assert_eq!(job.contract_name, "hpc-42");
    assert!(job.security_group_id.is_some());

    let group = SecurityGroup::find_by_id(job.security_group_id.unwrap(), &harness.db)
        .await
        .unwrap()
        .expect("security group persisted");
    let group_id: u32 = group.controller_group_id.unwrap().parse().unwrap();
    assert!((16..=65535).contains(&group_id));

    let nodes = ComputeNode::resolve_and_lock(&["n1".to_string(), "n2".to_string()], &harness.db)
        .await
        .unwrap();
    assert_eq!(nodes.len(), 2);
    let node_ids: Vec<_> = nodes.iter().map(|n| n.id).collect();
    let holders = Allocation::find_holders(&node_ids, "nonexistent", &harness.db)
        .await
        .unwrap();
    assert_eq!(holders.len(), 2, "both nodes should be allocated to job 42");
}

#[tokio::test]
async fn replaying_an_identical_provision_is_a_no_op() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;

    let (_job, created) = harness
        .kernel
        .job_service
        .provision("42", "training-run", &["n1".to_string()], 1)
        .await
        .unwrap();
    assert!(created);

    let deploys_before = harness.nca.config_deploy_count("fab1");

    let (job_again, created_again) = harness
        .kernel
        .job_service
        .provision("42", "training-run", &["n1".to_string()], 1)
        .await
        .unwrap();

    assert!(!created_again);
    assert_eq!(job_again.status, JobStatus::Active);
    assert_eq!(harness.nca.config_deploy_count("fab1"), deploys_before);
}

#[tokio::test]
async fn provisioning_a_busy_node_is_rejected() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;
    harness.seed_node("n3", "SN3", "eth0").await;

    harness
        .kernel
        .job_service
        .provision("holder", "first", &["n1".to_string()], 1)
        .await
        .unwrap();

    let result = harness
        .kernel
        .job_service
        .provision("challenger", "second", &["n1".to_string(), "n3".to_string()], 1)
        .await;

    match result {
        Err(JobError::AllocationConflict(message)) => {
            assert!(message.contains("n1"));
            assert!(message.contains("holder"));
        }
        other => panic!("expected AllocationConflict, got {other:?}"),
    }

    assert!(Job::find_by_job_id("challenger", &harness.db)
        .await
        .unwrap()
        .is_none());

    let n3 = &ComputeNode::resolve_and_lock(&["n3".to_string()], &harness.db)
        .await
        .unwrap()[0];
    let holders = Allocation::find_holders(&[n3.id], "nobody", &harness.db)
        .await
        .unwrap();
    assert!(holders.is_empty(), "n3 must not have been allocated");
}

#[tokio::test]
async fn failed_attach_leaves_the_job_failed_with_no_local_group() {
    let harness = TestHarness::new().await;
    harness.seed_node("n1", "SN1", "eth0").await;
    harness
        .nca
        .fail_next("attach_ports_to_network", NcaErrorKindPublic::Other);

    let result = harness
        .kernel
        .job_service
        .provision("99", "broken-run", &["n1".to_string()], 1)
        .await;

    assert!(matches!(result, Err(JobError::NcaFailure(_))));

    let job = Job::find_by_job_id("99", &harness.db)
        .await
        .unwrap()
        .expect("job row still exists");
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.is_some());
    assert!(job.security_group_id.is_none());

    let n1 = &ComputeNode::resolve_and_lock(&["n1".to_string()], &harness.db)
        .await
        .unwrap()[0];
    let holders = Allocation::find_holders(&[n1.id], "nobody", &harness.db)
        .await
        .unwrap();
    assert!(holders.is_empty(), "allocation must be released on failure");
}
