//! Row types for the Job Service's slice of the data model (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::entity_ids::{AllocationId, ComputeNodeId, JobStorageAccessId, PortSelectorId, SecurityGroupId, SwitchPortId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    Provisioning,
    Active,
    Deprovisioning,
    Completed,
    Failed,
    CleanupFailed,
}

impl JobStatus {
    /// Statuses that admit a replay of `Provision` for the same job-id (§4.1.1).
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobStatus::Provisioning | JobStatus::Active)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::CleanupFailed
        )
    }
}

/// A Job row. `job_id` is the caller-supplied external identifier and is the
/// primary key — there is no separate surrogate id, per §3 ("unique external
/// identifier (job-id)").
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub fabric: String,
    pub vrf: String,
    pub network: String,
    pub contract_name: String,
    pub submitted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub security_group_id: Option<SecurityGroupId>,
}

impl Job {
    pub async fn find_by_job_id(
        job_id: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            r#"
            SELECT job_id, name, status, fabric, vrf, network, contract_name,
                   submitted_at, expires_at, provisioned_at, completed_at,
                   error_message, security_group_id
            FROM jobs
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_active_expired(
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            r#"
            SELECT job_id, name, status, fabric, vrf, network, contract_name,
                   submitted_at, expires_at, provisioned_at, completed_at,
                   error_message, security_group_id
            FROM jobs
            WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < NOW()
            "#,
        )
        .fetch_all(executor)
        .await
    }

    /// Insert the Job row with status = pending (§4.1.2.c).
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        job_id: &str,
        name: &str,
        fabric: &str,
        vrf: &str,
        network: &str,
        contract_name: &str,
        expires_at: Option<DateTime<Utc>>,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Self> {
        sqlx::query_as(
            r#"
            INSERT INTO jobs (
                job_id, name, status, fabric, vrf, network, contract_name,
                submitted_at, expires_at
            )
            VALUES ($1, $2, 'pending', $3, $4, $5, $6, NOW(), $7)
            RETURNING job_id, name, status, fabric, vrf, network, contract_name,
                      submitted_at, expires_at, provisioned_at, completed_at,
                      error_message, security_group_id
            "#,
        )
        .bind(job_id)
        .bind(name)
        .bind(fabric)
        .bind(vrf)
        .bind(network)
        .bind(contract_name)
        .bind(expires_at)
        .fetch_one(executor)
        .await
    }

    /// §4.1.2.g: admitted, ready for controller programming.
    pub async fn mark_provisioning(
        job_id: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE jobs SET status = 'provisioning' WHERE job_id = $1")
            .bind(job_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// §4.1.3: post-commit NCA failure. Allocations are dropped by the caller
    /// separately so the nodes can be retried.
    pub async fn mark_failed(
        job_id: &str,
        error_message: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE jobs SET status = 'failed', error_message = $2 WHERE job_id = $1")
            .bind(job_id)
            .bind(error_message)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// §4.2.3: local persistence after successful controller programming.
    pub async fn mark_active(
        job_id: &str,
        security_group_id: SecurityGroupId,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'active', security_group_id = $2, provisioned_at = NOW(),
                error_message = NULL
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(security_group_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// §4.4.2: deprovisioning intent recorded before any NCA cleanup.
    pub async fn mark_deprovisioning(
        job_id: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query("UPDATE jobs SET status = 'deprovisioning' WHERE job_id = $1")
            .bind(job_id)
            .execute(executor)
            .await?;
        Ok(())
    }

    /// §4.4.4: NCA cleanup succeeded.
    pub async fn mark_completed(
        job_id: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', completed_at = NOW(), security_group_id = NULL WHERE job_id = $1",
        )
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// §4.4.4: NCA cleanup failed; local rows are still dropped by the
    /// caller, but the Job itself ends in a state that needs operator
    /// attention (§5 "Cancellation").
    pub async fn mark_cleanup_failed(
        job_id: &str,
        error_message: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cleanup-failed', error_message = $2, security_group_id = NULL
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(error_message)
        .execute(executor)
        .await?;
        Ok(())
    }
}

/// A Compute Node. Port Mappings are loaded separately via
/// [`PortMapping::find_for_nodes`].
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ComputeNode {
    pub id: ComputeNodeId,
    pub name: String,
    pub hostname: String,
}

impl ComputeNode {
    /// Resolve `identifiers` against Compute Nodes by matching either name or
    /// hostname, taking a row-level exclusive lock ordered by node id to
    /// preclude deadlock between concurrent provisions that intersect on
    /// nodes (§4.1.2.a, §5 "Ordering guarantees").
    ///
    /// A node matching more than one identifier, or an identifier matching
    /// more than one node, is not deduplicated here — callers check the
    /// resolved count against the input count (§4.1.2.b).
    pub async fn resolve_and_lock(
        identifiers: &[String],
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            r#"
            SELECT id, name, hostname
            FROM compute_nodes
            WHERE name = ANY($1) OR hostname = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
        )
        .bind(identifiers)
        .fetch_all(executor)
        .await
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PortMapping {
    pub compute_node_id: ComputeNodeId,
    pub switch_port_id: SwitchPortId,
    pub interface_role: Option<String>,
}

impl PortMapping {
    pub async fn find_for_nodes(
        node_ids: &[ComputeNodeId],
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            r#"
            SELECT compute_node_id, switch_port_id, interface_role
            FROM compute_node_port_mappings
            WHERE compute_node_id = ANY($1)
            "#,
        )
        .bind(node_ids)
        .fetch_all(executor)
        .await
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SwitchPort {
    pub id: SwitchPortId,
    pub switch_serial: String,
    pub interface_name: String,
}

impl SwitchPort {
    pub async fn find_by_ids(
        ids: &[SwitchPortId],
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            r#"
            SELECT id, switch_serial, interface_name
            FROM switch_ports
            WHERE id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(executor)
        .await
    }
}

/// A Compute Node Allocation. `compute_node_id` is UNIQUE — that constraint,
/// not application-level locking, is what makes double-booking a node
/// impossible (§3, §5).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub compute_node_id: ComputeNodeId,
    pub job_id: String,
    pub allocated_at: DateTime<Utc>,
}

impl Allocation {
    /// Bulk-insert one Allocation per node (§4.1.2.f). `compute_node_id` is
    /// UNIQUE, so a concurrent provision holding any of these nodes surfaces
    /// as a raw `sqlx::Error::Database` unique-violation here; the caller is
    /// responsible for the targeted follow-up query that turns that into an
    /// informative allocation-conflict error.
    pub async fn bulk_insert(
        job_id: &str,
        node_ids: &[ComputeNodeId],
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        if node_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<uuid::Uuid> = node_ids.iter().map(|id| *id.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO compute_node_allocations (id, compute_node_id, job_id, allocated_at)
            SELECT gen_random_uuid(), node_id, $2, NOW()
            FROM UNNEST($1::uuid[]) AS node_id
            "#,
        )
        .bind(&ids)
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Finds which of `node_ids` are currently held by a job other than
    /// `job_id`, for the allocation-conflict error message (§7).
    pub async fn find_holders(
        node_ids: &[ComputeNodeId],
        excluding_job_id: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            r#"
            SELECT id, compute_node_id, job_id, allocated_at
            FROM compute_node_allocations
            WHERE compute_node_id = ANY($1) AND job_id <> $2
            "#,
        )
        .bind(node_ids)
        .bind(excluding_job_id)
        .fetch_all(executor)
        .await
    }

    pub async fn delete_for_job(
        job_id: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<u64> {
        Ok(sqlx::query("DELETE FROM compute_node_allocations WHERE job_id = $1")
            .bind(job_id)
            .execute(executor)
            .await?
            .rows_affected())
    }
}

/// A local Security Group, unique on (fabric, name) per §3.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: SecurityGroupId,
    pub fabric: String,
    pub name: String,
    pub controller_group_id: Option<String>,
}

impl SecurityGroup {
    pub async fn find_by_fabric_and_name(
        fabric: &str,
        name: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            r#"
            SELECT id, fabric, name, controller_group_id
            FROM security_groups
            WHERE fabric = $1 AND name = $2
            "#,
        )
        .bind(fabric)
        .bind(name)
        .fetch_optional(executor)
        .await
    }

    /// Upsert on (fabric, name), per §4.2.3.
    pub async fn upsert(
        fabric: &str,
        name: &str,
        controller_group_id: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Self> {
        sqlx::query_as(
            r#"
            INSERT INTO security_groups (id, fabric, name, controller_group_id)
            VALUES (gen_random_uuid(), $1, $2, $3)
            ON CONFLICT (fabric, name) DO UPDATE SET controller_group_id = EXCLUDED.controller_group_id
            RETURNING id, fabric, name, controller_group_id
            "#,
        )
        .bind(fabric)
        .bind(name)
        .bind(controller_group_id)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id(
        id: SecurityGroupId,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            "SELECT id, fabric, name, controller_group_id FROM security_groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn delete(
        id: SecurityGroupId,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM security_groups WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

/// A Port Selector, unique on (security_group_id, switch_port_id) per §3.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PortSelector {
    pub id: PortSelectorId,
    pub security_group_id: SecurityGroupId,
    pub switch_port_id: SwitchPortId,
    pub expression: String,
}

impl PortSelector {
    /// Upsert on (security_group_id, switch_port_id), per §4.2.3.
    pub async fn upsert(
        security_group_id: SecurityGroupId,
        switch_port_id: SwitchPortId,
        expression: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO port_selectors (id, security_group_id, switch_port_id, expression)
            VALUES (gen_random_uuid(), $1, $2, $3)
            ON CONFLICT (security_group_id, switch_port_id) DO UPDATE SET expression = EXCLUDED.expression
            "#,
        )
        .bind(security_group_id)
        .bind(switch_port_id)
        .bind(expression)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn delete_for_group(
        security_group_id: SecurityGroupId,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        sqlx::query("DELETE FROM port_selectors WHERE security_group_id = $1")
            .bind(security_group_id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

/// A reversible storage-network mutation (§4.6), journaled so deprovision can
/// restore the previous network name.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JobStorageAccess {
    pub id: JobStorageAccessId,
    pub job_id: String,
    pub node_id: ComputeNodeId,
    pub tenant_id: String,
    pub src_group_name: String,
    pub dst_group_name: String,
    pub contract: String,
    pub fabric: String,
    pub vrf: String,
    pub previous_network_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobStorageAccess {
    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        job_id: &str,
        node_id: ComputeNodeId,
        tenant_id: &str,
        src_group_name: &str,
        dst_group_name: &str,
        contract: &str,
        fabric: &str,
        vrf: &str,
        previous_network_name: Option<&str>,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Self> {
        sqlx::query_as(
            r#"
            INSERT INTO job_storage_accesses (
                id, job_id, node_id, tenant_id, src_group_name, dst_group_name,
                contract, fabric, vrf, previous_network_name, created_at
            )
            VALUES (gen_random_uuid(), $1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING id, job_id, node_id, tenant_id, src_group_name, dst_group_name,
                      contract, fabric, vrf, previous_network_name, created_at
            "#,
        )
        .bind(job_id)
        .bind(node_id)
        .bind(tenant_id)
        .bind(src_group_name)
        .bind(dst_group_name)
        .bind(contract)
        .bind(fabric)
        .bind(vrf)
        .bind(previous_network_name)
        .fetch_one(executor)
        .await
    }

    pub async fn find_for_job(
        job_id: &str,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Vec<Self>> {
        sqlx::query_as(
            r#"
            SELECT id, job_id, node_id, tenant_id, src_group_name, dst_group_name,
                   contract, fabric, vrf, previous_network_name, created_at
            FROM job_storage_accesses
            WHERE job_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(job_id)
        .fetch_all(executor)
        .await
    }

    /// Most recent access record for `node_id` across all jobs, used to
    /// recover the network name a node's storage ports were attached to
    /// before the current Job's mutation (§4.6 "previous-network-name").
    pub async fn find_latest_for_node(
        node_id: ComputeNodeId,
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<Option<Self>> {
        sqlx::query_as(
            r#"
            SELECT id, job_id, node_id, tenant_id, src_group_name, dst_group_name,
                   contract, fabric, vrf, previous_network_name, created_at
            FROM job_storage_accesses
            WHERE node_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(node_id)
        .fetch_optional(executor)
        .await
    }
}

/// A Job↔Node link row (§4.1.2.d). Purely a membership record — the
/// admission-control invariant lives on [`Allocation`], not here.
pub struct JobComputeNode;

impl JobComputeNode {
    pub async fn bulk_insert(
        job_id: &str,
        node_ids: &[ComputeNodeId],
        executor: impl sqlx::PgExecutor<'_>,
    ) -> sqlx::Result<()> {
        if node_ids.is_empty() {
            return Ok(());
        }
        let ids: Vec<uuid::Uuid> = node_ids.iter().map(|id| *id.as_uuid()).collect();
        sqlx::query(
            r#"
            INSERT INTO job_compute_nodes (id, job_id, compute_node_id)
            SELECT gen_random_uuid(), $2, node_id
            FROM UNNEST($1::uuid[]) AS node_id
            "#,
        )
        .bind(&ids)
        .bind(job_id)
        .execute(executor)
        .await?;
        Ok(())
    }
}
