//! Storage Service scenarios (§4.6): per-node storage security groups and
//! reversible, journaled tenant-network attachment.

mod common;

use common::TestHarness;
use server_core::domains::jobs::SecurityGroup;
use server_core::domains::storage::StoragePort;

#[tokio::test]
async fn ensure_node_storage_sg_creates_then_updates_selectors() {
    let harness = TestHarness::new().await;
    let node_name = harness.seed_node("n1", "SN1", "storage0").await;

    sqlx::query(
        "UPDATE compute_node_port_mappings SET interface_role = 'storage'
         WHERE compute_node_id = (SELECT id FROM compute_nodes WHERE name = $1)",
    )
    .bind(&node_name)
    .execute(&harness.db)
    .await
    .unwrap();

    let node_id = sqlx::query_scalar::<_, uuid::Uuid>(
        "SELECT id FROM compute_nodes WHERE name = $1",
    )
    .bind(&node_name)
    .fetch_one(&harness.db)
    .await
    .unwrap();
    let node_id = node_id.into();

    let ports = harness
        .kernel
        .storage_service
        .storage_ports_for_node(node_id)
        .await
        .unwrap();
    assert_eq!(ports.len(), 1);

    let group = harness
        .kernel
        .storage_service
        .ensure_node_storage_sg(&node_name, &ports)
        .await
        .unwrap();
    assert_eq!(group.name, "storage-node-n1");
    assert!(group.controller_group_id.is_some());

    // Re-running with no ports detaches the group instead of erroring.
    let empty_ports: Vec<StoragePort> = Vec::new();
    harness
        .kernel
        .storage_service
        .ensure_node_storage_sg(&node_name, &empty_ports)
        .await
        .unwrap();

    let persisted = SecurityGroup::find_by_fabric_and_name("fab1", "storage-node-n1", &harness.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(persisted.name, "storage-node-n1");
}

#[tokio::test]
async fn provision_then_deprovision_reverts_to_the_previous_network() {
    let harness = TestHarness::new().await;
    let node_name = harness.seed_node("n1", "SN1", "storage0").await;
    sqlx::query(
        "UPDATE compute_node_port_mappings SET interface_role = 'storage'
         WHERE compute_node_id = (SELECT id FROM compute_nodes WHERE name = $1)",
    )
    .bind(&node_name)
    .execute(&harness.db)
    .await
    .unwrap();

    let node_id: uuid::Uuid = sqlx::query_scalar("SELECT id FROM compute_nodes WHERE name = $1")
        .bind(&node_name)
        .fetch_one(&harness.db)
        .await
        .unwrap();
    let node_id = node_id.into();

    harness
        .kernel
        .storage_service
        .provision_for_job("job-1", node_id, "tenant-a", "tenant-a-network", "tenant-a-contract")
        .await
        .unwrap();

    harness
        .kernel
        .storage_service
        .deprovision_for_job("job-1", node_id)
        .await
        .unwrap();

    // Reverting back to the configured default network must have issued a
    // second `attach_ports_to_network` call; there is no direct observable
    // short of the NCA call succeeding without error here, since the default
    // network has no VLAN entry. Re-provisioning after revert should see the
    // journaled previous network, not the tenant network, as the baseline.
    harness
        .kernel
        .storage_service
        .provision_for_job("job-2", node_id, "tenant-b", "tenant-b-network", "tenant-b-contract")
        .await
        .unwrap();

    let accesses =
        server_core::domains::jobs::models::JobStorageAccess::find_for_job("job-2", &harness.db)
            .await
            .unwrap();
    assert_eq!(accesses.len(), 1);
    assert_eq!(
        accesses[0].previous_network_name.as_deref(),
        Some("default-network")
    );
}
