//! The Job Provisioning/Deprovisioning Engine (§4.1, §4.2, §4.4).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::common::entity_ids::{ComputeNodeId, SwitchPortId};
use crate::config::Config;
use crate::kernel::nca::{
    ContractAction, ContractDirection, ContractRule, NetworkControllerAdapter, PortAttachment,
    PortSelectorSpec,
};

use super::contract_ids::job_security_group_id;
use super::error::JobError;
use super::models::{
    Allocation, ComputeNode, Job, JobComputeNode, JobStatus, PortMapping, PortSelector,
    SecurityGroup, SwitchPort,
};
use super::shared_group_cache::SharedGroupCache;

/// Sub-deadline for interface programming (§4.2.1), bounded separately from
/// the overall provisioning timeout (§5 "Timeouts").
const INTERFACE_PHASE_TIMEOUT: Duration = Duration::from_secs(3 * 60);
/// Sub-deadline for security-group/contract operations (§4.2.2, §4.2.4).
const SECURITY_PHASE_TIMEOUT: Duration = Duration::from_secs(30);

/// `{switch-port-id, serial, interface-name}`, the internal port-info tuple
/// of §4.1.2.e(ii).
#[derive(Debug, Clone)]
struct PortInfo {
    switch_port_id: SwitchPortId,
    serial: String,
    interface_name: String,
}

/// Provisions and deprovisions Jobs against the Relational Store and the
/// Network Controller Adapter.
pub struct JobService {
    db: PgPool,
    nca: Arc<dyn NetworkControllerAdapter>,
    shared_group_cache: Arc<SharedGroupCache>,
    config: Arc<Config>,
}

impl JobService {
    pub fn new(
        db: PgPool,
        nca: Arc<dyn NetworkControllerAdapter>,
        shared_group_cache: Arc<SharedGroupCache>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            nca,
            shared_group_cache,
            config,
        }
    }

    /// `Provision(job-id, name, node-identifiers, duration-days)` (§4.1).
    pub async fn provision(
        &self,
        job_id: &str,
        name: &str,
        node_identifiers: &[String],
        duration_days: i64,
    ) -> Result<(Job, bool), JobError> {
        if let Some(existing) = Job::find_by_job_id(job_id, &self.db).await? {
            if existing.status.is_in_flight() {
                return Ok((existing, false));
            }
            return Err(JobError::Conflict {
                job_id: job_id.to_string(),
                status: format!("{:?}", existing.status),
            });
        }

        let contract_name = if self.config.contract_name_prefix.is_empty() {
            job_id.to_string()
        } else {
            format!("{}-{}", self.config.contract_name_prefix, job_id)
        };
        let expires_at = (duration_days > 0)
            .then(|| Utc::now() + chrono::Duration::days(duration_days));

        let (job, port_infos) = self
            .admit(job_id, name, node_identifiers, &contract_name, expires_at)
            .await?;

        match timeout(
            self.config.provision_timeout,
            self.program_controller(&job, &port_infos),
        )
        .await
        {
            Ok(Ok(())) => {
                let active = Job::find_by_job_id(job_id, &self.db)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
                info!(job_id, "job provisioned");
                Ok((active, true))
            }
            Ok(Err(error)) => {
                self.fail_job(job_id, &error.to_string()).await?;
                Err(error)
            }
            Err(_elapsed) => {
                self.fail_job(job_id, "provisioning timed out").await?;
                Err(JobError::Timeout(self.config.provision_timeout))
            }
        }
    }

    /// §4.1.2: admission transaction. Resolves nodes under row locks, inserts
    /// the Job and its link/allocation rows, and leaves the Job in
    /// `provisioning` on success.
    async fn admit(
        &self,
        job_id: &str,
        name: &str,
        node_identifiers: &[String],
        contract_name: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<(Job, Vec<PortInfo>), JobError> {
        let mut tx = self.db.begin().await?;

        let resolved = ComputeNode::resolve_and_lock(node_identifiers, &mut *tx).await?;

        let invalid: Vec<String> = node_identifiers
            .iter()
            .filter(|ident| {
                let matches = resolved
                    .iter()
                    .filter(|n| &n.name == *ident || &n.hostname == *ident)
                    .count();
                matches != 1
            })
            .cloned()
            .collect();
        if !invalid.is_empty() {
            tx.rollback().await.ok();
            return Err(JobError::Validation(format!(
                "node identifiers do not each resolve to exactly one node: {}",
                invalid.join(", ")
            )));
        }

        let node_ids: Vec<ComputeNodeId> = {
            let mut seen = HashSet::new();
            resolved
                .iter()
                .map(|n| n.id)
                .filter(|id| seen.insert(*id))
                .collect()
        };

        let job = Job::insert(
            job_id,
            name,
            &self.config.fabric,
            &self.config.vrf,
            &self.config.security_group_network,
            contract_name,
            expires_at,
            &mut *tx,
        )
        .await?;

        JobComputeNode::bulk_insert(job_id, &node_ids, &mut *tx).await?;

        let port_mappings = PortMapping::find_for_nodes(&node_ids, &mut *tx).await?;
        let switch_port_ids: Vec<SwitchPortId> =
            port_mappings.iter().map(|m| m.switch_port_id).collect();
        let switch_ports = SwitchPort::find_by_ids(&switch_port_ids, &mut *tx).await?;
        let switch_port_by_id: HashMap<SwitchPortId, &SwitchPort> =
            switch_ports.iter().map(|p| (p.id, p)).collect();

        let port_infos: Vec<PortInfo> = port_mappings
            .iter()
            .filter_map(|mapping| {
                switch_port_by_id
                    .get(&mapping.switch_port_id)
                    .map(|sp| PortInfo {
                        switch_port_id: mapping.switch_port_id,
                        serial: sp.switch_serial.clone(),
                        interface_name: sp.interface_name.clone(),
                    })
            })
            .collect();

        if let Err(insert_err) = Allocation::bulk_insert(job_id, &node_ids, &mut *tx).await {
            tx.rollback().await.ok();
            let holders = Allocation::find_holders(&node_ids, job_id, &self.db).await?;
            if holders.is_empty() {
                return Err(JobError::Store(insert_err));
            }
            let name_by_id: HashMap<ComputeNodeId, &str> =
                resolved.iter().map(|n| (n.id, n.name.as_str())).collect();
            let message = holders
                .iter()
                .map(|holder| {
                    let name = name_by_id
                        .get(&holder.compute_node_id)
                        .copied()
                        .unwrap_or("<unknown>");
                    format!("{name} (held by job {})", holder.job_id)
                })
                .collect::<Vec<_>>()
                .join(", ");
            return Err(JobError::AllocationConflict(message));
        }

        Job::mark_provisioning(job_id, &mut *tx).await?;
        tx.commit().await?;

        let mut provisioning_job = job;
        provisioning_job.status = JobStatus::Provisioning;
        Ok((provisioning_job, port_infos))
    }

    /// §4.2: ordered controller programming outside the admission
    /// transaction. interfaces → attach → group → local persist → contract →
    /// associations.
    async fn program_controller(
        &self,
        job: &Job,
        port_infos: &[PortInfo],
    ) -> Result<(), JobError> {
        let mut dedup_ports: Vec<&PortInfo> = Vec::new();
        let mut seen = HashSet::new();
        for port in port_infos {
            if seen.insert((port.serial.clone(), port.interface_name.clone())) {
                dedup_ports.push(port);
            }
        }

        // 1. Interface configuration.
        let vlan = timeout(
            INTERFACE_PHASE_TIMEOUT,
            self.nca.get_network_vlan(&job.fabric, &job.network),
        )
        .await
        .map_err(|_| JobError::Timeout(INTERFACE_PHASE_TIMEOUT))?
        .map_err(|e| JobError::NcaFailure(format!("get network vlan: {e}")))?;

        let mut by_switch: HashMap<String, Vec<String>> = HashMap::new();
        for port in &dedup_ports {
            let comment = format!("job-{}", job.job_id);
            match self
                .nca
                .configure_access_host_interface(&port.serial, &port.interface_name, &vlan, &comment)
                .await
            {
                Ok(()) => {
                    by_switch
                        .entry(port.serial.clone())
                        .or_default()
                        .push(port.interface_name.clone());
                }
                Err(error) => warn!(
                    job_id = %job.job_id, serial = %port.serial, interface = %port.interface_name, %error,
                    "interface configuration failed, excluding from deploy set"
                ),
            }
        }

        for (serial, interfaces) in &by_switch {
            if let Err(error) = self.nca.deploy_interfaces(serial, interfaces).await {
                warn!(job_id = %job.job_id, %serial, %error, "interface deploy failed");
            }
        }

        // Attach is mandatory and fatal for every port, independent of
        // whether its interface configuration succeeded above.
        let attachments: Vec<PortAttachment> = dedup_ports
            .iter()
            .map(|port| PortAttachment {
                serial: port.serial.clone(),
                switch_ports: vec![port.interface_name.clone()],
                deployment: job.network.clone(),
                dot1q_vlan: vlan.parse().ok(),
                untagged: true,
            })
            .collect();

        self.nca
            .attach_ports_to_network(&job.fabric, &job.network, &attachments)
            .await
            .map_err(|e| JobError::NcaFailure(format!("attach ports to network: {e}")))?;

        // 2. Security group.
        let group_name = format!("job-{}", job.job_id);
        let fingerprint_id = job_security_group_id(&job.job_id);
        let selectors: Vec<PortSelectorSpec> = dedup_ports
            .iter()
            .map(|port| PortSelectorSpec {
                switch_serial: port.serial.clone(),
                interface_name: port.interface_name.clone(),
            })
            .collect();

        match timeout(
            SECURITY_PHASE_TIMEOUT,
            self.nca
                .create_security_group(&job.fabric, &group_name, fingerprint_id, &selectors),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(error)) if error.is_conflict() => {}
            Ok(Err(error)) => {
                return Err(JobError::NcaFailure(format!("create security group: {error}")))
            }
            Err(_elapsed) => return Err(JobError::Timeout(SECURITY_PHASE_TIMEOUT)),
        }

        // Always read back: the controller may assign a different id than requested.
        let info = timeout(
            SECURITY_PHASE_TIMEOUT,
            self.nca.get_security_group_by_name(&job.fabric, &group_name),
        )
        .await
        .map_err(|_| JobError::Timeout(SECURITY_PHASE_TIMEOUT))?
        .map_err(|e| JobError::NcaFailure(format!("get security group by name: {e}")))?;
        let authoritative_group_id = info.group_id.unwrap_or_else(|| fingerprint_id.to_string());

        // 3. Local persistence.
        let mut tx = self.db.begin().await?;
        let local_group =
            SecurityGroup::upsert(&job.fabric, &group_name, &authoritative_group_id, &mut *tx)
                .await?;
        for port in &dedup_ports {
            let expression = format!("{}:{}", port.serial, port.interface_name);
            PortSelector::upsert(local_group.id, port.switch_port_id, &expression, &mut *tx)
                .await?;
        }
        Job::mark_active(&job.job_id, local_group.id, &mut *tx).await?;
        tx.commit().await?;

        // 4. Contracts and associations (best-effort).
        self.program_contracts_and_associations(job, &group_name).await;

        Ok(())
    }

    async fn program_contracts_and_associations(&self, job: &Job, group_name: &str) {
        let rule = ContractRule {
            direction: ContractDirection::Bidirectional,
            action: ContractAction::Permit,
            protocol: "icmp".to_string(),
        };
        match self
            .nca
            .create_security_contract(&job.fabric, &job.contract_name, std::slice::from_ref(&rule))
            .await
        {
            Ok(()) => {}
            Err(error) if error.is_conflict() => {}
            Err(error) => warn!(job_id = %job.job_id, %error, "create security contract failed"),
        }

        match self
            .nca
            .create_security_association(&job.fabric, group_name, group_name, &job.contract_name)
            .await
        {
            Ok(()) => {}
            Err(error) if error.is_conflict() => {}
            Err(error) => warn!(job_id = %job.job_id, %error, "create self-association failed"),
        }

        let shared_groups = self.shared_group_cache.get().await;
        for shared in &self.config.shared_contracts {
            let Some(dst_group_id) = shared_groups.get(&shared.dst_group_name) else {
                warn!(
                    job_id = %job.job_id, dst_group = %shared.dst_group_name,
                    "shared group not found in cache, skipping association"
                );
                continue;
            };
            match self
                .nca
                .create_security_association(
                    &job.fabric,
                    group_name,
                    dst_group_id,
                    &shared.contract_name,
                )
                .await
            {
                Ok(()) => {}
                Err(error) if error.is_conflict() => {}
                Err(error) => warn!(
                    job_id = %job.job_id, dst_group = %shared.dst_group_name, %error,
                    "create shared-contract association failed"
                ),
            }
        }
    }

    async fn fail_job(&self, job_id: &str, error_message: &str) -> Result<(), JobError> {
        let mut tx = self.db.begin().await?;
        Job::mark_failed(job_id, error_message, &mut *tx).await?;
        Allocation::delete_for_job(job_id, &mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// `Deprovision(job)` (§4.4).
    pub async fn deprovision(&self, job: &Job) -> Result<(), JobError> {
        match timeout(self.config.deprovision_timeout, self.deprovision_inner(job)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                self.finish_deprovision(job, Some("deprovision timed out".to_string()))
                    .await?;
                Err(JobError::Timeout(self.config.deprovision_timeout))
            }
        }
    }

    /// Convenience wrapper used by the sweeper and by manual retries: loads
    /// the Job by id, then deprovisions it.
    pub async fn deprovision_by_id(&self, job_id: &str) -> Result<(), JobError> {
        let job = Job::find_by_job_id(job_id, &self.db)
            .await?
            .ok_or_else(|| JobError::Validation(format!("no such job: {job_id}")))?;
        self.deprovision(&job).await
    }

    async fn deprovision_inner(&self, job: &Job) -> Result<(), JobError> {
        Job::mark_deprovisioning(&job.job_id, &self.db).await?;

        let group_name = format!("job-{}", job.job_id);
        let mut nca_error: Option<String> = None;

        if let Err(error) = self
            .nca
            .delete_security_association(&job.fabric, &group_name, &group_name, &job.contract_name)
            .await
        {
            if !error.is_not_found() {
                warn!(job_id = %job.job_id, %error, "delete self-association failed");
            }
        }

        for shared in &self.config.shared_contracts {
            if let Err(error) = self
                .nca
                .delete_security_association(
                    &job.fabric,
                    &group_name,
                    &shared.dst_group_name,
                    &shared.contract_name,
                )
                .await
            {
                if !error.is_not_found() {
                    warn!(
                        job_id = %job.job_id, dst_group = %shared.dst_group_name, %error,
                        "delete shared-contract association failed"
                    );
                }
            }
        }

        if let Err(error) = self
            .nca
            .delete_security_contract(&job.fabric, &job.contract_name)
            .await
        {
            if !error.is_not_found() {
                warn!(job_id = %job.job_id, %error, "delete security contract failed");
            }
        }

        if let Err(error) = self.nca.delete_security_group(&job.fabric, &group_name).await {
            if !error.is_not_found() {
                nca_error = Some(error.to_string());
            }
        }

        self.finish_deprovision(job, nca_error.clone()).await?;

        match nca_error {
            None => {
                info!(job_id = %job.job_id, "job deprovisioned");
                Ok(())
            }
            Some(message) => Err(JobError::NcaFailure(message)),
        }
    }

    /// §4.4.4: local cleanup always runs regardless of NCA outcome so nodes
    /// are never stranded by a transient controller fault (§4.4.5).
    async fn finish_deprovision(
        &self,
        job: &Job,
        nca_error: Option<String>,
    ) -> Result<(), JobError> {
        let mut tx = self.db.begin().await?;
        // Null `jobs.security_group_id` before deleting the group it
        // references: the FK has no ON DELETE action, so the delete below
        // would otherwise violate it for every job that has a group.
        match &nca_error {
            None => Job::mark_completed(&job.job_id, &mut *tx).await?,
            Some(message) => Job::mark_cleanup_failed(&job.job_id, message, &mut *tx).await?,
        }
        if let Some(security_group_id) = job.security_group_id {
            PortSelector::delete_for_group(security_group_id, &mut *tx).await?;
            SecurityGroup::delete(security_group_id, &mut *tx).await?;
        }
        Allocation::delete_for_job(&job.job_id, &mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
