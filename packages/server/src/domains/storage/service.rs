//! The Storage Service (§4.6): per-node storage security groups plus
//! reversible, journaled tenant-network attachment for storage ports.

use std::sync::Arc;

use sqlx::PgPool;

use crate::common::entity_ids::{ComputeNodeId, SwitchPortId};
use crate::config::Config;
use crate::domains::jobs::contract_ids::storage_security_group_id;
use crate::domains::jobs::error::JobError;
use crate::domains::jobs::models::{JobStorageAccess, PortMapping, SecurityGroup, SwitchPort};
use crate::kernel::nca::{NetworkControllerAdapter, PortAttachment, PortSelectorSpec, SecurityGroupInfo};

/// A storage-capable switch port, resolved from a node's Port Mappings.
#[derive(Debug, Clone)]
pub struct StoragePort {
    pub switch_port_id: SwitchPortId,
    pub switch_serial: String,
    pub interface_name: String,
}

pub struct StorageService {
    db: PgPool,
    nca: Arc<dyn NetworkControllerAdapter>,
    config: Arc<Config>,
}

impl StorageService {
    pub fn new(db: PgPool, nca: Arc<dyn NetworkControllerAdapter>, config: Arc<Config>) -> Self {
        Self { db, nca, config }
    }

    /// Resolve the storage-role Port Mappings for `node_id` into
    /// [`StoragePort`]s, for callers building the `ports` argument to
    /// [`Self::ensure_node_storage_sg`].
    pub async fn storage_ports_for_node(
        &self,
        node_id: ComputeNodeId,
    ) -> Result<Vec<StoragePort>, JobError> {
        let mappings = PortMapping::find_for_nodes(&[node_id], &self.db).await?;
        let storage_mappings: Vec<_> = mappings
            .into_iter()
            .filter(|m| m.interface_role.as_deref() == Some("storage"))
            .collect();
        let switch_port_ids: Vec<SwitchPortId> =
            storage_mappings.iter().map(|m| m.switch_port_id).collect();
        let switch_ports = SwitchPort::find_by_ids(&switch_port_ids, &self.db).await?;
        Ok(switch_ports
            .into_iter()
            .map(|sp| StoragePort {
                switch_port_id: sp.id,
                switch_serial: sp.switch_serial,
                interface_name: sp.interface_name,
            })
            .collect())
    }

    /// `EnsureNodeStorageSG(node, ports, network)` (§4.6).
    pub async fn ensure_node_storage_sg(
        &self,
        node_name: &str,
        ports: &[StoragePort],
    ) -> Result<SecurityGroup, JobError> {
        let group_name = format!("storage-node-{node_name}");
        let fabric = &self.config.fabric;

        let existing = self
            .nca
            .get_security_group_by_name(fabric, &group_name)
            .await
            .map_err(|e| JobError::NcaFailure(format!("get security group by name: {e}")))?;

        let selectors: Vec<PortSelectorSpec> = ports
            .iter()
            .map(|p| PortSelectorSpec {
                switch_serial: p.switch_serial.clone(),
                interface_name: p.interface_name.clone(),
            })
            .collect();

        if existing.group_id.is_some() {
            // §4.6: an empty selector list detaches the group in one update.
            let attach = !selectors.is_empty();
            self.nca
                .update_security_groups(fabric, &group_name, &selectors, attach)
                .await
                .map_err(|e| JobError::NcaFailure(format!("update security groups: {e}")))?;
        } else {
            let fingerprint_id = storage_security_group_id(node_name);
            match self
                .nca
                .create_security_group(fabric, &group_name, fingerprint_id, &selectors)
                .await
            {
                Ok(()) => {}
                Err(error) if error.is_conflict() => {}
                Err(error) => {
                    return Err(JobError::NcaFailure(format!(
                        "create security group: {error}"
                    )))
                }
            }
        }

        let info: SecurityGroupInfo = self
            .nca
            .get_security_group_by_name(fabric, &group_name)
            .await
            .map_err(|e| JobError::NcaFailure(format!("get security group by name: {e}")))?;
        let controller_group_id = info
            .group_id
            .unwrap_or_else(|| storage_security_group_id(node_name).to_string());

        let mut tx = self.db.begin().await?;
        let local_group =
            SecurityGroup::upsert(fabric, &group_name, &controller_group_id, &mut *tx).await?;
        for port in ports {
            let expression = format!("{}:{}", port.switch_serial, port.interface_name);
            crate::domains::jobs::models::PortSelector::upsert(
                local_group.id,
                port.switch_port_id,
                &expression,
                &mut *tx,
            )
            .await?;
        }
        tx.commit().await?;

        Ok(local_group)
    }

    /// Provision-for-job: attaches `node`'s storage ports to the tenant's
    /// network and journals the previous network so deprovision can revert
    /// it (§4.6).
    pub async fn provision_for_job(
        &self,
        job_id: &str,
        node_id: ComputeNodeId,
        tenant_id: &str,
        tenant_network: &str,
        contract: &str,
    ) -> Result<(), JobError> {
        let ports = self.storage_ports_for_node(node_id).await?;
        if ports.is_empty() {
            return Ok(());
        }

        let previous_network = JobStorageAccess::find_latest_for_node(node_id, &self.db)
            .await?
            .map(|access| access.dst_group_name)
            .unwrap_or_else(|| self.config.security_group_network.clone());

        let attachments: Vec<PortAttachment> = ports
            .iter()
            .map(|p| PortAttachment {
                serial: p.switch_serial.clone(),
                switch_ports: vec![p.interface_name.clone()],
                deployment: tenant_network.to_string(),
                dot1q_vlan: None,
                untagged: true,
            })
            .collect();

        self.nca
            .attach_ports_to_network(&self.config.fabric, tenant_network, &attachments)
            .await
            .map_err(|e| JobError::NcaFailure(format!("attach storage ports: {e}")))?;

        let src_group = format!("storage-node-{node_id}");
        JobStorageAccess::insert(
            job_id,
            node_id,
            tenant_id,
            &src_group,
            tenant_network,
            contract,
            &self.config.fabric,
            &self.config.vrf,
            Some(&previous_network),
            &self.db,
        )
        .await?;

        Ok(())
    }

    /// Deprovision-for-job: reverts `node`'s storage ports back to the
    /// network recorded for this Job's most recent access row.
    pub async fn deprovision_for_job(
        &self,
        job_id: &str,
        node_id: ComputeNodeId,
    ) -> Result<(), JobError> {
        let accesses = JobStorageAccess::find_for_job(job_id, &self.db).await?;
        let Some(access) = accesses.into_iter().find(|a| a.node_id == node_id) else {
            return Ok(());
        };
        let Some(previous_network) = access.previous_network_name else {
            return Ok(());
        };

        let ports = self.storage_ports_for_node(node_id).await?;
        let attachments: Vec<PortAttachment> = ports
            .iter()
            .map(|p| PortAttachment {
                serial: p.switch_serial.clone(),
                switch_ports: vec![p.interface_name.clone()],
                deployment: previous_network.clone(),
                dot1q_vlan: None,
                untagged: true,
            })
            .collect();

        if !attachments.is_empty() {
            self.nca
                .attach_ports_to_network(&self.config.fabric, &previous_network, &attachments)
                .await
                .map_err(|e| JobError::NcaFailure(format!("revert storage ports: {e}")))?;
        }

        // Journal the revert itself as an access row so a later
        // `provision_for_job` for this node picks up the network it was
        // actually left on, not the tenant network this job just vacated.
        JobStorageAccess::insert(
            job_id,
            node_id,
            &access.tenant_id,
            &access.dst_group_name,
            &previous_network,
            &access.contract,
            &access.fabric,
            &access.vrf,
            None,
            &self.db,
        )
        .await?;

        Ok(())
    }
}
