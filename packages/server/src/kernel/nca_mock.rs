//! In-memory [`NetworkControllerAdapter`] test double, analogous to the
//! fake-service pattern used elsewhere in this workspace's test harnesses.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::nca::{
    ContractRule, NcaError, NcaResult, NetworkControllerAdapter, PortAttachment,
    PortSelectorSpec, SecurityGroupInfo, SecurityGroupSummary,
};

#[derive(Default)]
struct State {
    vlans: HashMap<(String, String), String>,
    configured_interfaces: HashSet<(String, String)>,
    deployed_switches: HashSet<String>,
    attached: HashSet<(String, String, String)>,
    groups: HashMap<(String, String), (u32, Vec<PortSelectorSpec>)>,
    contracts: HashSet<(String, String)>,
    associations: HashSet<(String, String, String, String)>,
    config_deploys: Vec<String>,
    /// Call sites that should fail on their next invocation, keyed by method name.
    failures: HashMap<&'static str, NcaErrorKind>,
}

#[derive(Clone, Copy)]
enum NcaErrorKind {
    Conflict,
    NotFound,
    Other,
}

impl NcaErrorKind {
    fn into_error(self, msg: &str) -> NcaError {
        match self {
            NcaErrorKind::Conflict => NcaError::Conflict(msg.to_string()),
            NcaErrorKind::NotFound => NcaError::NotFound(msg.to_string()),
            NcaErrorKind::Other => NcaError::Other(msg.to_string()),
        }
    }
}

/// Deterministic in-memory controller fake for unit and integration tests.
/// Lets tests pre-seed VLANs and inject one-shot failures per operation name
/// to exercise the provisioning/deprovisioning error paths of §7/§8.
#[derive(Default)]
pub struct MockNca {
    state: Mutex<State>,
}

impl MockNca {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_vlan(&self, fabric: &str, network: &str, vlan: &str) {
        self.state
            .lock()
            .unwrap()
            .vlans
            .insert((fabric.to_string(), network.to_string()), vlan.to_string());
    }

    /// Make the next call to `method` fail with the given error kind.
    pub fn fail_next(&self, method: &'static str, kind: NcaErrorKindPublic) {
        let kind = match kind {
            NcaErrorKindPublic::Conflict => NcaErrorKind::Conflict,
            NcaErrorKindPublic::NotFound => NcaErrorKind::NotFound,
            NcaErrorKindPublic::Other => NcaErrorKind::Other,
        };
        self.state.lock().unwrap().failures.insert(method, kind);
    }

    pub fn config_deploy_count(&self, fabric: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .config_deploys
            .iter()
            .filter(|f| *f == fabric)
            .count()
    }

    fn maybe_fail(state: &mut State, method: &'static str) -> NcaResult<()> {
        if let Some(kind) = state.failures.remove(method) {
            return Err(kind.into_error(&format!("{method} injected failure")));
        }
        Ok(())
    }
}

/// Public mirror of the internal error-kind enum so tests can call
/// [`MockNca::fail_next`] without reaching into private state.
#[derive(Clone, Copy)]
pub enum NcaErrorKindPublic {
    Conflict,
    NotFound,
    Other,
}

#[async_trait]
impl NetworkControllerAdapter for MockNca {
    async fn configure_access_host_interface(
        &self,
        serial: &str,
        if_name: &str,
        _vlan: &str,
        _description: &str,
    ) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "configure_access_host_interface")?;
        state
            .configured_interfaces
            .insert((serial.to_string(), if_name.to_string()));
        Ok(())
    }

    async fn deploy_interfaces(&self, serial: &str, _if_names: &[String]) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "deploy_interfaces")?;
        state.deployed_switches.insert(serial.to_string());
        Ok(())
    }

    async fn attach_ports_to_network(
        &self,
        fabric: &str,
        network: &str,
        attachments: &[PortAttachment],
    ) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "attach_ports_to_network")?;
        for attachment in attachments {
            state.attached.insert((
                fabric.to_string(),
                network.to_string(),
                attachment.serial.clone(),
            ));
        }
        Ok(())
    }

    async fn get_network_vlan(&self, fabric: &str, network: &str) -> NcaResult<String> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "get_network_vlan")?;
        state
            .vlans
            .get(&(fabric.to_string(), network.to_string()))
            .cloned()
            .ok_or_else(|| NcaError::NotFound(format!("no vlan for {fabric}/{network}")))
    }

    async fn get_security_group_by_name(
        &self,
        fabric: &str,
        name: &str,
    ) -> NcaResult<SecurityGroupInfo> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "get_security_group_by_name")?;
        match state.groups.get(&(fabric.to_string(), name.to_string())) {
            Some((group_id, selectors)) => Ok(SecurityGroupInfo {
                group_id: Some(group_id.to_string()),
                attach: true,
                selectors: selectors
                    .iter()
                    .map(|s| format!("{}:{}", s.switch_serial, s.interface_name))
                    .collect(),
            }),
            None => Ok(SecurityGroupInfo::default()),
        }
    }

    async fn create_security_group(
        &self,
        fabric: &str,
        name: &str,
        group_id: u32,
        selectors: &[PortSelectorSpec],
    ) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "create_security_group")?;
        let key = (fabric.to_string(), name.to_string());
        if state.groups.contains_key(&key) {
            return Err(NcaError::Conflict(format!("group {name} already exists")));
        }
        state.groups.insert(key, (group_id, selectors.to_vec()));
        Ok(())
    }

    async fn update_security_groups(
        &self,
        fabric: &str,
        name: &str,
        selectors: &[PortSelectorSpec],
        _attach: bool,
    ) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "update_security_groups")?;
        let key = (fabric.to_string(), name.to_string());
        let entry = state
            .groups
            .get_mut(&key)
            .ok_or_else(|| NcaError::NotFound(format!("group {name} not found")))?;
        entry.1 = selectors.to_vec();
        Ok(())
    }

    async fn delete_security_group(&self, fabric: &str, name: &str) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "delete_security_group")?;
        let key = (fabric.to_string(), name.to_string());
        if state.groups.remove(&key).is_none() {
            return Err(NcaError::NotFound(format!("group {name} not found")));
        }
        Ok(())
    }

    async fn get_security_groups(&self, fabric: &str) -> NcaResult<Vec<SecurityGroupSummary>> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "get_security_groups")?;
        Ok(state
            .groups
            .iter()
            .filter(|((f, _), _)| f == fabric)
            .map(|((_, name), (id, _))| SecurityGroupSummary {
                group_id: id.to_string(),
                name: name.clone(),
            })
            .collect())
    }

    async fn create_security_contract(
        &self,
        fabric: &str,
        name: &str,
        _rules: &[ContractRule],
    ) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "create_security_contract")?;
        let key = (fabric.to_string(), name.to_string());
        if !state.contracts.insert(key) {
            return Err(NcaError::Conflict(format!("contract {name} already exists")));
        }
        Ok(())
    }

    async fn delete_security_contract(&self, fabric: &str, name: &str) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "delete_security_contract")?;
        let key = (fabric.to_string(), name.to_string());
        if !state.contracts.remove(&key) {
            return Err(NcaError::NotFound(format!("contract {name} not found")));
        }
        Ok(())
    }

    async fn create_security_association(
        &self,
        fabric: &str,
        src_group: &str,
        dst_group: &str,
        contract: &str,
    ) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "create_security_association")?;
        let key = (
            fabric.to_string(),
            src_group.to_string(),
            dst_group.to_string(),
            contract.to_string(),
        );
        if !state.associations.insert(key) {
            return Err(NcaError::Conflict("association already exists".to_string()));
        }
        Ok(())
    }

    async fn delete_security_association(
        &self,
        fabric: &str,
        src_group: &str,
        dst_group: &str,
        contract: &str,
    ) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "delete_security_association")?;
        let key = (
            fabric.to_string(),
            src_group.to_string(),
            dst_group.to_string(),
            contract.to_string(),
        );
        if !state.associations.remove(&key) {
            return Err(NcaError::NotFound("association not found".to_string()));
        }
        Ok(())
    }

    async fn config_deploy(&self, fabric: &str) -> NcaResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::maybe_fail(&mut state, "config_deploy")?;
        state.config_deploys.push(fabric.to_string());
        Ok(())
    }
}
