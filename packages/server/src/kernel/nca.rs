//! The Network Controller Adapter contract (§6) and the error classification
//! it must expose without call sites resorting to string matching (§9
//! "Error classification").

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by an [`NetworkControllerAdapter`] implementation,
/// classified per §7/§9 so call sites branch on the *kind*, not the message.
#[derive(Debug, Error)]
pub enum NcaError {
    #[error("network controller reports conflict: {0}")]
    Conflict(String),

    #[error("network controller reports not found: {0}")]
    NotFound(String),

    #[error("network controller request failed: {0}")]
    Other(String),
}

impl NcaError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, NcaError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, NcaError::NotFound(_))
    }
}

pub type NcaResult<T> = Result<T, NcaError>;

/// One `{serial, switchPorts, deployment, dot1qVlan, untagged}` attachment
/// request for `AttachPortsToNetwork`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortAttachment {
    pub serial: String,
    pub switch_ports: Vec<String>,
    pub deployment: String,
    pub dot1q_vlan: Option<u16>,
    pub untagged: bool,
}

/// Result of `GetSecurityGroupByName`: the controller-assigned group id (if
/// the group exists), whether it is attached, and its current selectors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityGroupInfo {
    pub group_id: Option<String>,
    pub attach: bool,
    pub selectors: Vec<String>,
}

/// A `(switch-serial, interface-name)` port selector, as sent to
/// `CreateSecurityGroup`/`UpdateSecurityGroups`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSelectorSpec {
    pub switch_serial: String,
    pub interface_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupSummary {
    pub group_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ContractDirection {
    Bidirectional,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum ContractAction {
    Permit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRule {
    pub direction: ContractDirection,
    pub action: ContractAction,
    pub protocol: String,
}

/// The external network controller's contract (§6). Implementations ship as
/// an HTTP client ([`super::nca_http::NetworkControllerClient`]) or an
/// in-memory test double ([`super::nca_mock::MockNca`]).
#[async_trait]
pub trait NetworkControllerAdapter: Send + Sync {
    async fn configure_access_host_interface(
        &self,
        serial: &str,
        if_name: &str,
        vlan: &str,
        description: &str,
    ) -> NcaResult<()>;

    async fn deploy_interfaces(&self, serial: &str, if_names: &[String]) -> NcaResult<()>;

    async fn attach_ports_to_network(
        &self,
        fabric: &str,
        network: &str,
        attachments: &[PortAttachment],
    ) -> NcaResult<()>;

    async fn get_network_vlan(&self, fabric: &str, network: &str) -> NcaResult<String>;

    async fn get_security_group_by_name(
        &self,
        fabric: &str,
        name: &str,
    ) -> NcaResult<SecurityGroupInfo>;

    async fn create_security_group(
        &self,
        fabric: &str,
        name: &str,
        group_id: u32,
        selectors: &[PortSelectorSpec],
    ) -> NcaResult<()>;

    async fn update_security_groups(
        &self,
        fabric: &str,
        name: &str,
        selectors: &[PortSelectorSpec],
        attach: bool,
    ) -> NcaResult<()>;

    async fn delete_security_group(&self, fabric: &str, name: &str) -> NcaResult<()>;

    async fn get_security_groups(&self, fabric: &str) -> NcaResult<Vec<SecurityGroupSummary>>;

    async fn create_security_contract(
        &self,
        fabric: &str,
        name: &str,
        rules: &[ContractRule],
    ) -> NcaResult<()>;

    async fn delete_security_contract(&self, fabric: &str, name: &str) -> NcaResult<()>;

    async fn create_security_association(
        &self,
        fabric: &str,
        src_group: &str,
        dst_group: &str,
        contract: &str,
    ) -> NcaResult<()>;

    async fn delete_security_association(
        &self,
        fabric: &str,
        src_group: &str,
        dst_group: &str,
        contract: &str,
    ) -> NcaResult<()>;

    async fn config_deploy(&self, fabric: &str) -> NcaResult<()>;
}
