//! `ServerKernel` — the central dependency container, constructed once in
//! `main` and shared behind an `Arc` with every request handler and
//! background task. Grounded directly on this workspace's `kernel/deps.rs` /
//! `kernel/server_kernel.rs` split: a plain struct of `Arc<dyn Trait>`
//! fields, built by a single constructor, with no business logic of its own.

use std::sync::Arc;

use fabric_kv::{FredKvc, KeyValueCoordinator};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Config;
use crate::domains::jobs::{JobService, SharedGroupCache};
use crate::domains::storage::StorageService;

use super::deploy_batcher::DeployBatcher;
use super::nca::NetworkControllerAdapter;
use super::nca_http::NetworkControllerClient;

/// All wired-up dependencies for one running service instance: the database
/// pool, the network controller client, the KV coordinator (optional — its
/// absence degrades the deploy batcher to direct calls per §4.7.1), and the
/// domain services built on top of them.
#[derive(Clone)]
pub struct ServerKernel {
    pub db: PgPool,
    pub nca: Arc<dyn NetworkControllerAdapter>,
    pub kvc: Option<Arc<dyn KeyValueCoordinator>>,
    pub job_service: Arc<JobService>,
    pub storage_service: Arc<StorageService>,
    pub deploy_batcher: Arc<DeployBatcher>,
    pub shared_group_cache: Arc<SharedGroupCache>,
    pub config: Arc<Config>,
}

impl ServerKernel {
    /// Build the full dependency graph from a loaded [`Config`]: connects
    /// the database pool and the KV coordinator, constructs the HTTP NCA
    /// client, and wires the domain services on top.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(20)
            .connect(&config.database_url)
            .await?;

        let nca: Arc<dyn NetworkControllerAdapter> = Arc::new(NetworkControllerClient::new(
            config.nca_base_url.clone(),
            config.nca_api_token.clone(),
        ));

        let kvc: Option<Arc<dyn KeyValueCoordinator>> =
            match FredKvc::connect(&config.redis_url).await {
                Ok(client) => Some(Arc::new(client)),
                Err(error) => {
                    tracing::warn!(
                        %error,
                        "could not connect to key-value coordinator, deploy batcher will call the controller directly"
                    );
                    None
                }
            };

        let config = Arc::new(config);
        Ok(Self::new(db, nca, kvc, config))
    }

    /// Wire services from already-constructed external dependencies. Used by
    /// `from_config` and directly by integration tests that supply a
    /// [`super::nca_mock::MockNca`] / [`fabric_kv::MockKvc`].
    pub fn new(
        db: PgPool,
        nca: Arc<dyn NetworkControllerAdapter>,
        kvc: Option<Arc<dyn KeyValueCoordinator>>,
        config: Arc<Config>,
    ) -> Self {
        let shared_group_cache = Arc::new(SharedGroupCache::new(config.fabric.clone(), nca.clone()));
        let job_service = Arc::new(JobService::new(
            db.clone(),
            nca.clone(),
            shared_group_cache.clone(),
            config.clone(),
        ));
        let storage_service = Arc::new(StorageService::new(db.clone(), nca.clone(), config.clone()));
        let deploy_batcher = Arc::new(DeployBatcher::new(kvc.clone(), nca.clone()));

        Self {
            db,
            nca,
            kvc,
            job_service,
            storage_service,
            deploy_batcher,
            shared_group_cache,
            config,
        }
    }
}
