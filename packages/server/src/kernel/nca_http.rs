//! HTTP-based [`NetworkControllerAdapter`] implementation.
//!
//! One `reqwest` call per contract operation against a bearer-token-
//! authenticated JSON API, with status-code-driven error classification
//! (409 → conflict, 404 → not-found, anything else → other) so call sites
//! never pattern-match on response bodies.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::nca::{
    ContractRule, NcaError, NcaResult, NetworkControllerAdapter, PortAttachment,
    PortSelectorSpec, SecurityGroupInfo, SecurityGroupSummary,
};

/// A `reqwest`-backed client for the network controller's HTTP API.
#[derive(Clone)]
pub struct NetworkControllerClient {
    http: Client,
    base_url: String,
    api_token: String,
}

impl NetworkControllerClient {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            api_token: api_token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Classify a response by status code and, on failure, read the body
    /// into the error message.
    async fn classify(response: reqwest::Response) -> NcaResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::CONFLICT => Err(NcaError::Conflict(body)),
            StatusCode::NOT_FOUND => Err(NcaError::NotFound(body)),
            _ => Err(NcaError::Other(format!("{status}: {body}"))),
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> NcaResult<reqwest::Response> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| NcaError::Other(e.to_string()))?;
        Self::classify(response).await
    }

    async fn get(&self, path: &str) -> NcaResult<reqwest::Response> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| NcaError::Other(e.to_string()))?;
        Self::classify(response).await
    }

    async fn delete(&self, path: &str) -> NcaResult<reqwest::Response> {
        let response = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| NcaError::Other(e.to_string()))?;
        Self::classify(response).await
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> NcaResult<T> {
        response
            .json::<T>()
            .await
            .map_err(|e| NcaError::Other(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl NetworkControllerAdapter for NetworkControllerClient {
    async fn configure_access_host_interface(
        &self,
        serial: &str,
        if_name: &str,
        vlan: &str,
        description: &str,
    ) -> NcaResult<()> {
        self.post(
            &format!("/switches/{serial}/interfaces/{if_name}/access-host"),
            json!({ "vlan": vlan, "description": description }),
        )
        .await?;
        Ok(())
    }

    async fn deploy_interfaces(&self, serial: &str, if_names: &[String]) -> NcaResult<()> {
        self.post(
            &format!("/switches/{serial}/deploy"),
            json!({ "interfaces": if_names }),
        )
        .await?;
        Ok(())
    }

    async fn attach_ports_to_network(
        &self,
        fabric: &str,
        network: &str,
        attachments: &[PortAttachment],
    ) -> NcaResult<()> {
        self.post(
            &format!("/fabrics/{fabric}/networks/{network}/attach"),
            json!({ "attachments": attachments }),
        )
        .await?;
        Ok(())
    }

    async fn get_network_vlan(&self, fabric: &str, network: &str) -> NcaResult<String> {
        #[derive(Deserialize)]
        struct Resp {
            vlan: String,
        }
        let response = self
            .get(&format!("/fabrics/{fabric}/networks/{network}"))
            .await?;
        let resp: Resp = Self::json(response).await?;
        Ok(resp.vlan)
    }

    async fn get_security_group_by_name(
        &self,
        fabric: &str,
        name: &str,
    ) -> NcaResult<SecurityGroupInfo> {
        let result = self
            .get(&format!("/fabrics/{fabric}/security-groups/by-name/{name}"))
            .await;
        match result {
            Ok(response) => Self::json(response).await,
            Err(NcaError::NotFound(_)) => Ok(SecurityGroupInfo::default()),
            Err(other) => Err(other),
        }
    }

    async fn create_security_group(
        &self,
        fabric: &str,
        name: &str,
        group_id: u32,
        selectors: &[PortSelectorSpec],
    ) -> NcaResult<()> {
        self.post(
            &format!("/fabrics/{fabric}/security-groups"),
            json!({ "name": name, "groupId": group_id, "selectors": selectors }),
        )
        .await?;
        Ok(())
    }

    async fn update_security_groups(
        &self,
        fabric: &str,
        name: &str,
        selectors: &[PortSelectorSpec],
        attach: bool,
    ) -> NcaResult<()> {
        self.post(
            &format!("/fabrics/{fabric}/security-groups/{name}"),
            json!({ "selectors": selectors, "attach": attach }),
        )
        .await?;
        Ok(())
    }

    async fn delete_security_group(&self, fabric: &str, name: &str) -> NcaResult<()> {
        self.delete(&format!("/fabrics/{fabric}/security-groups/{name}"))
            .await?;
        Ok(())
    }

    async fn get_security_groups(&self, fabric: &str) -> NcaResult<Vec<SecurityGroupSummary>> {
        let response = self.get(&format!("/fabrics/{fabric}/security-groups")).await?;
        Self::json(response).await
    }

    async fn create_security_contract(
        &self,
        fabric: &str,
        name: &str,
        rules: &[ContractRule],
    ) -> NcaResult<()> {
        self.post(
            &format!("/fabrics/{fabric}/contracts"),
            json!({ "name": name, "rules": rules }),
        )
        .await?;
        Ok(())
    }

    async fn delete_security_contract(&self, fabric: &str, name: &str) -> NcaResult<()> {
        self.delete(&format!("/fabrics/{fabric}/contracts/{name}"))
            .await?;
        Ok(())
    }

    async fn create_security_association(
        &self,
        fabric: &str,
        src_group: &str,
        dst_group: &str,
        contract: &str,
    ) -> NcaResult<()> {
        self.post(
            &format!("/fabrics/{fabric}/associations"),
            json!({ "srcGroup": src_group, "dstGroup": dst_group, "contract": contract }),
        )
        .await?;
        Ok(())
    }

    async fn delete_security_association(
        &self,
        fabric: &str,
        src_group: &str,
        dst_group: &str,
        contract: &str,
    ) -> NcaResult<()> {
        self.delete(&format!(
            "/fabrics/{fabric}/associations/{src_group}/{dst_group}/{contract}"
        ))
        .await?;
        Ok(())
    }

    async fn config_deploy(&self, fabric: &str) -> NcaResult<()> {
        self.post(&format!("/fabrics/{fabric}/deploy"), json!({})).await?;
        Ok(())
    }
}
