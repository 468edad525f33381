use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::Deserialize;

/// One entry of the configured *shared contracts* list (§4.2.4): every Job's
/// security group gets an association to `dst_group_name` under
/// `contract_name`, in addition to its own self-association.
#[derive(Debug, Clone, Deserialize)]
pub struct SharedContract {
    pub dst_group_name: String,
    pub contract_name: String,
}

/// Application configuration loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub port: u16,

    /// Fabric scope this service instance programs (§2 "Fabric").
    pub fabric: String,
    /// VRF assigned to every provisioned Job (§3).
    pub vrf: String,
    /// Network name used for interface attachment during provisioning (§4.2.1).
    pub security_group_network: String,
    /// Prefix for `Job.contract_name` (§4.1.2.c): `${prefix}-${job_id}`, or
    /// just `job_id` when empty.
    pub contract_name_prefix: String,
    /// Static list of shared-contract associations applied to every Job's
    /// group (§4.2.4).
    pub shared_contracts: Vec<SharedContract>,

    pub provision_timeout: Duration,
    pub deprovision_timeout: Duration,

    pub nca_base_url: String,
    pub nca_api_token: String,

    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables, loading a `.env` file
    /// first if present (development convenience).
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        let shared_contracts = match env::var("SHARED_CONTRACTS") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .context("SHARED_CONTRACTS must be a JSON array of {dst_group_name, contract_name}")?,
            _ => Vec::new(),
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,

            fabric: env::var("FABRIC_NAME").context("FABRIC_NAME must be set")?,
            vrf: env::var("VRF_NAME").context("VRF_NAME must be set")?,
            security_group_network: env::var("SECURITY_GROUP_NETWORK")
                .context("SECURITY_GROUP_NETWORK must be set")?,
            contract_name_prefix: env::var("CONTRACT_NAME_PREFIX").unwrap_or_default(),
            shared_contracts,

            provision_timeout: Duration::from_secs(
                env::var("PROVISION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "600".to_string())
                    .parse()
                    .context("PROVISION_TIMEOUT_SECS must be a valid number")?,
            ),
            deprovision_timeout: Duration::from_secs(
                env::var("DEPROVISION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .context("DEPROVISION_TIMEOUT_SECS must be a valid number")?,
            ),

            nca_base_url: env::var("NCA_BASE_URL").context("NCA_BASE_URL must be set")?,
            nca_api_token: env::var("NCA_API_TOKEN").context("NCA_API_TOKEN must be set")?,

            sweep_interval: Duration::from_secs(
                env::var("SWEEP_INTERVAL_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("SWEEP_INTERVAL_SECS must be a valid number")?,
            ),
        })
    }
}
